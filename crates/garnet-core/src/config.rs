//! VM configuration.

use serde::Deserialize;

use crate::error::{RbError, RbResult};

/// Settings applied once, when the VM is set up.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VmConfig {
    /// Value of `$0` inside the VM.
    /// Default: "garnet"
    pub script_name: String,

    /// Populate `$LOAD_PATH` with the interpreter's standard directories.
    /// Default: true
    pub init_loadpath: bool,

    /// Run the collector on every allocation (`GC.stress = true`).
    /// Slow; meant for shaking out missing GC roots.
    /// Default: false
    pub gc_stress: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            script_name: "garnet".to_string(),
            init_loadpath: true,
            gc_stress: false,
        }
    }
}

impl VmConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from JSON. Missing fields keep their defaults.
    ///
    /// ```
    /// use garnet_core::VmConfig;
    ///
    /// let config = VmConfig::from_json(r#"{ "gcStress": true }"#).unwrap();
    /// assert!(config.gc_stress);
    /// assert_eq!(config.script_name, "garnet");
    /// ```
    pub fn from_json(json: &str) -> RbResult<Self> {
        serde_json::from_str(json).map_err(|e| RbError::internal(format!("Invalid config: {}", e)))
    }

    /// Set the script name.
    pub fn script_name(mut self, name: impl Into<String>) -> Self {
        self.script_name = name.into();
        self
    }

    /// Enable or disable load path initialization.
    pub fn init_loadpath(mut self, enabled: bool) -> Self {
        self.init_loadpath = enabled;
        self
    }

    /// Enable or disable GC stress mode.
    pub fn gc_stress(mut self, enabled: bool) -> Self {
        self.gc_stress = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VmConfig::new();
        assert_eq!(config.script_name, "garnet");
        assert!(config.init_loadpath);
        assert!(!config.gc_stress);
    }

    #[test]
    fn test_builder() {
        let config = VmConfig::new()
            .script_name("embedder")
            .init_loadpath(false)
            .gc_stress(true);
        assert_eq!(config.script_name, "embedder");
        assert!(!config.init_loadpath);
        assert!(config.gc_stress);
    }

    #[test]
    fn test_from_json_partial() {
        let config = VmConfig::from_json(r#"{"scriptName": "app.rb"}"#).unwrap();
        assert_eq!(config.script_name, "app.rb");
        assert!(config.init_loadpath);
    }

    #[test]
    fn test_from_json_invalid() {
        let err = VmConfig::from_json("{not json").unwrap_err();
        assert!(err.to_string().contains("Invalid config"));
    }
}
