use serde::Deserialize;
use std::path::PathBuf;

/// Server settings parsed from LSP `initializationOptions`.
///
/// A Landofile carries no `$schema` key, so the schema source is pure
/// configuration: a remote URL, optionally shadowed by a local override
/// file. The config object is replaced wholesale on (re)initialization and
/// never mutated in place.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    /// Remote URL of the Landofile JSON Schema.
    #[serde(default)]
    pub schema_url: Option<String>,

    /// Local schema file that takes precedence over `schema_url`.
    #[serde(default)]
    pub schema_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_value(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    /// The effective schema source: the local override if set, else the
    /// remote URL. `None` disables validation, hover, and completion.
    pub fn schema_source(&self) -> Option<String> {
        if let Some(path) = &self.schema_path {
            return Some(path.display().to_string());
        }
        self.schema_url.clone()
    }
}
