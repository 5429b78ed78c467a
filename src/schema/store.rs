use crate::schema::flatten::{flatten, PathMap};
use crate::schema::loader::load_schema;
use anyhow::{anyhow, Result};
use dashmap::DashMap;
use moka::future::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const SCHEMA_TTL_SECS: u64 = 28800; // 8 hours
const CACHE_CAPACITY: u64 = 8;
const ERROR_RETRY_SECS: u64 = 60;

/// A loaded schema in every shape the engine needs: the raw value tree for
/// tree-walking resolvers, the flattened path map for hover and deprecation
/// lookups, and the compiled evaluator for structural validation.
///
/// Compilation happens once per load; the result is shared behind an `Arc`
/// and never mutated, so a reload swaps the whole object and in-flight
/// hover/completion calls keep reading the schema they started with.
pub struct CompiledSchema {
    pub raw: Value,
    pub map: PathMap,
    pub validator: Option<jsonschema::Validator>,
}

impl CompiledSchema {
    pub fn compile(raw: Value) -> Self {
        let map = flatten(&raw);
        // Landofiles use draft-07-like schemas (where `deprecated` carries a
        // message string). Schemas that declare their draft via `$schema` are
        // compiled with autodetection; those that omit it default to draft-07
        // rather than the evaluator's newer default, under which a string
        // `deprecated` would fail meta-schema validation.
        let compile_result = if raw.get("$schema").is_some() {
            jsonschema::validator_for(&raw)
        } else {
            jsonschema::options()
                .with_draft(jsonschema::Draft::Draft7)
                .build(&raw)
        };
        let validator = match compile_result {
            Ok(v) => Some(v),
            Err(e) => {
                // An invalid schema disables structural validation but not
                // hover or completion; the validator surfaces a warning.
                warn!("Schema failed to compile: {e}");
                None
            }
        };
        Self {
            raw,
            map,
            validator,
        }
    }
}

/// Caches compiled schemas by source (URL or local override path).
pub struct SchemaStore {
    inner: Cache<String, Arc<CompiledSchema>>,
    errors: Arc<DashMap<String, Instant>>,
}

impl SchemaStore {
    pub fn new() -> Self {
        let inner = Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .time_to_live(Duration::from_secs(SCHEMA_TTL_SECS))
            .build();

        Self {
            inner,
            errors: Arc::new(DashMap::new()),
        }
    }

    /// Return the compiled schema for `source`, loading and flattening it if
    /// not cached.
    ///
    /// Failed loads are NOT cached in moka; instead we store an error
    /// timestamp and refuse to retry for `ERROR_RETRY_SECS` seconds.
    pub async fn get_or_load(&self, source: &str) -> Result<Arc<CompiledSchema>> {
        if let Some(failed_at) = self.errors.get(source) {
            if failed_at.elapsed() < Duration::from_secs(ERROR_RETRY_SECS) {
                debug!("Schema load on cooldown: {source}");
                return Err(anyhow!("Schema load on cooldown for: {source}"));
            }
            drop(failed_at);
            self.errors.remove(source);
        }

        let source_owned = source.to_owned();
        let errors = self.errors.clone();

        // get_with coalesces concurrent loads for the same source
        let result = self
            .inner
            .try_get_with(source_owned.clone(), async move {
                match load_schema(&source_owned).await {
                    Ok(raw) => {
                        let compiled = CompiledSchema::compile(raw);
                        debug!(
                            "Schema loaded and flattened: {source_owned} ({} paths)",
                            compiled.map.len()
                        );
                        Ok(Arc::new(compiled))
                    }
                    Err(e) => {
                        warn!("Failed to load schema {source_owned}: {e}");
                        errors.insert(source_owned, Instant::now());
                        Err(e)
                    }
                }
            })
            .await;

        result.map_err(|e| anyhow!("{e}"))
    }

    /// Drop a cached schema so the next request reloads it (e.g. after the
    /// local override file changed).
    pub fn invalidate(&self, source: &str) {
        let cache = self.inner.clone();
        let source_owned = source.to_owned();
        self.errors.remove(&source_owned);
        tokio::spawn(async move {
            cache.invalidate(&source_owned).await;
        });
    }
}

impl Default for SchemaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_valid_schema() {
        let compiled = CompiledSchema::compile(json!({
            "type": "object",
            "properties": { "name": { "type": "string" } }
        }));
        assert!(compiled.validator.is_some());
        assert!(compiled.map.get("name").is_some());
    }

    #[test]
    fn test_compile_invalid_schema_keeps_map() {
        // A bogus `type` makes the evaluator reject the schema, but the
        // flattened map is still produced for hover.
        let compiled = CompiledSchema::compile(json!({
            "type": "object",
            "properties": { "name": { "type": 42, "description": "Still here." } }
        }));
        assert!(compiled.validator.is_none());
        assert_eq!(
            compiled.map.get("name").and_then(|d| d.description.as_deref()),
            Some("Still here.")
        );
    }
}
