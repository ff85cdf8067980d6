//! Bridge configuration.
//!
//! Resolved once when a [`Registry`](crate::Registry) is created. Values come
//! from `Default`, an optional JSON document and environment overrides.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Environment variable overriding [`BridgeConfig::remote_byte_signedness`].
pub const ENV_BYTE_SIGNEDNESS: &str = "VMBRIDGE_BYTE_SIGNEDNESS";

/// Environment variable overriding [`BridgeConfig::scope_capacity`].
pub const ENV_SCOPE_CAPACITY: &str = "VMBRIDGE_SCOPE_CAPACITY";

/// Declared signedness of the remote runtime's one-byte integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signedness {
    #[default]
    Signed,
    Unsigned,
}

impl FromStr for Signedness {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "signed" => Ok(Signedness::Signed),
            "unsigned" => Ok(Signedness::Unsigned),
            other => Err(BridgeError::Config(format!(
                "unknown byte signedness `{other}` (expected `signed` or `unsigned`)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How the remote runtime interprets its one-byte integer.
    pub remote_byte_signedness: Signedness,

    /// Capacity hint passed to `push_local_frame` by scoped operations.
    pub scope_capacity: usize,

    /// Root class whose `equals`/`hashCode`/`toString` wrappers delegate to.
    pub object_class: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            remote_byte_signedness: Signedness::Signed,
            scope_capacity: 16,
            object_class: "java/lang/Object".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_byte_signedness(mut self, signedness: Signedness) -> Self {
        self.remote_byte_signedness = signedness;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BridgeError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json_str(&content)
    }

    /// Apply `VMBRIDGE_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(ENV_BYTE_SIGNEDNESS) {
            self.remote_byte_signedness = value.parse()?;
        }

        if let Some(value) = lookup(ENV_SCOPE_CAPACITY) {
            self.scope_capacity = value.trim().parse().map_err(|_| {
                BridgeError::Config(format!("{ENV_SCOPE_CAPACITY} must be a positive integer"))
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scope_capacity == 0 {
            return Err(BridgeError::Config(
                "scope_capacity must be greater than zero".into(),
            ));
        }

        if self.object_class.is_empty() {
            return Err(BridgeError::Config("object_class must not be empty".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.remote_byte_signedness, Signedness::Signed);
        assert_eq!(config.scope_capacity, 16);
        assert_eq!(config.object_class, "java/lang/Object");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = BridgeConfig::from_json_str(r#"{"remote_byte_signedness": "unsigned"}"#)
            .unwrap();
        assert_eq!(config.remote_byte_signedness, Signedness::Unsigned);
        assert_eq!(config.scope_capacity, 16);
    }

    #[test]
    fn test_from_json_rejects_zero_capacity() {
        let err = BridgeConfig::from_json_str(r#"{"scope_capacity": 0}"#).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_BYTE_SIGNEDNESS, " Unsigned "),
            (ENV_SCOPE_CAPACITY, "64"),
        ]
        .into_iter()
        .collect();

        let config = BridgeConfig::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.remote_byte_signedness, Signedness::Unsigned);
        assert_eq!(config.scope_capacity, 64);
    }

    #[test]
    fn test_bad_override() {
        let err = BridgeConfig::default()
            .with_overrides(|key| (key == ENV_BYTE_SIGNEDNESS).then(|| "sideways".to_string()))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }
}
