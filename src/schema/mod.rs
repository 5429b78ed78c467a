pub mod flatten;
pub mod loader;
pub mod navigator;
pub mod store;

pub use flatten::{candidate_paths, flatten, Deprecation, Descriptor, PathMap, VariantNote};
pub use navigator::{value_matches, SchemaNode};
pub use store::{CompiledSchema, SchemaStore};
