//! Schema-driven YAML intelligence for Landofiles.
//!
//! The core engine lives in [`position`], [`schema`], [`diagnostics`],
//! [`hover`], and [`completion`]: pure, synchronous functions that take a
//! text buffer plus a compiled schema and produce diagnostics, hover
//! documentation, or completion suggestions anchored to source locations.
//! [`backend`] wraps the engine in a `tower-lsp` stdio server.

pub mod backend;
pub mod completion;
pub mod config;
pub mod diagnostics;
pub mod document;
pub mod hover;
pub mod position;
pub mod schema;
