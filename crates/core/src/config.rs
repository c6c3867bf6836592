use serde::Deserialize;

use crate::error::CoreError;

pub const DEFAULT_MAX_COMMANDS_PER_BUNDLE: usize = 64;
pub const DEFAULT_MAX_APPLY_COMMANDS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_commands_per_bundle: usize,
    pub max_apply_commands: usize,
    /// `None` keeps all state in memory.
    pub database_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_commands_per_bundle: DEFAULT_MAX_COMMANDS_PER_BUNDLE,
            max_apply_commands: DEFAULT_MAX_APPLY_COMMANDS,
            database_path: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| CoreError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_commands_per_bundle == 0 || self.max_apply_commands == 0 {
            return Err(CoreError::InvalidConfig("command limits must be nonzero".into()));
        }
        if self.max_apply_commands < self.max_commands_per_bundle {
            return Err(CoreError::InvalidConfig(format!(
                "max_apply_commands ({}) is below max_commands_per_bundle ({})",
                self.max_apply_commands, self.max_commands_per_bundle
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_for_missing_keys() {
        let config = EngineConfig::from_json(r#"{"database_path": "/tmp/reg.db"}"#).unwrap();
        assert_eq!(config.max_commands_per_bundle, 64);
        assert_eq!(config.max_apply_commands, 256);
        assert_eq!(config.database_path.as_deref(), Some("/tmp/reg.db"));
    }

    #[test]
    fn zero_limit_rejected() {
        let err = EngineConfig::from_json(r#"{"max_apply_commands": 0}"#).unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
    }

    #[test]
    fn apply_limit_below_bundle_limit_rejected() {
        let config = EngineConfig {
            max_commands_per_bundle: 10,
            max_apply_commands: 5,
            database_path: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_rejected() {
        assert!(EngineConfig::from_json("{").is_err());
    }
}
