//! Engine configuration.

use std::env;

use mergereq_types::DEFAULT_METHOD;

/// Environment variable overriding the default HTTP method.
pub const DEFAULT_METHOD_ENV: &str = "MERGEREQ_DEFAULT_METHOD";

/// Settings applied while normalizing request descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Method used when a descriptor does not name one. Always upper-case.
    pub default_method: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_method: DEFAULT_METHOD.to_string(),
        }
    }
}

impl EngineConfig {
    /// Reads `MERGEREQ_DEFAULT_METHOD`, falling back to `GET` when unset or blank.
    pub fn from_env() -> Self {
        match env::var(DEFAULT_METHOD_ENV) {
            Ok(method) if !method.trim().is_empty() => Self::default().with_default_method(method),
            _ => Self::default(),
        }
    }

    pub fn with_default_method(mut self, method: impl AsRef<str>) -> Self {
        self.default_method = method.as_ref().trim().to_ascii_uppercase();
        self
    }
}
