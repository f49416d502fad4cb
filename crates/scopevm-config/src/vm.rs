//! VM configuration (`[vm]` table of scopevm.toml)

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default operand stack capacity (values)
pub const DEFAULT_OPERAND_STACK_CAPACITY: usize = 1024;

/// Default frame stack capacity (live calls)
pub const DEFAULT_FRAME_STACK_CAPACITY: usize = 8192;

/// Top-level layout of scopevm.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct VmConfig {
    /// VM settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm: Option<VmSection>,
}

/// `[vm]` table
///
/// Every field is optional; unset fields fall back to the defaults above.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct VmSection {
    /// Maximum number of values on the operand stack
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operand_stack_capacity: Option<usize>,

    /// Maximum number of live call frames
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_stack_capacity: Option<usize>,

    /// Check value tags on every typed pop and slot access
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict_types: Option<bool>,

    /// Run the bytecode validator before execution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<bool>,

    /// Collect per-opcode and per-function execution counts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<bool>,
}

impl VmConfig {
    /// Load VM configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse VM configuration from a TOML string
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::TomlParseError {
            file: Path::new("<string>").to_path_buf(),
            error: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(vm) = &self.vm {
            if vm.operand_stack_capacity == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "vm.operand_stack_capacity".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            if vm.frame_stack_capacity == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "vm.frame_stack_capacity".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Mutable access to the `[vm]` table, creating it when absent
    pub fn section_mut(&mut self) -> &mut VmSection {
        self.vm.get_or_insert_with(VmSection::default)
    }

    /// Effective operand stack capacity
    pub fn operand_stack_capacity(&self) -> usize {
        self.vm
            .as_ref()
            .and_then(|vm| vm.operand_stack_capacity)
            .unwrap_or(DEFAULT_OPERAND_STACK_CAPACITY)
    }

    /// Effective frame stack capacity
    pub fn frame_stack_capacity(&self) -> usize {
        self.vm
            .as_ref()
            .and_then(|vm| vm.frame_stack_capacity)
            .unwrap_or(DEFAULT_FRAME_STACK_CAPACITY)
    }

    /// Whether typed pops check value tags
    pub fn strict_types(&self) -> bool {
        self.vm
            .as_ref()
            .and_then(|vm| vm.strict_types)
            .unwrap_or(false)
    }

    /// Whether the validator runs before execution
    pub fn verify(&self) -> bool {
        self.vm.as_ref().and_then(|vm| vm.verify).unwrap_or(false)
    }

    /// Whether profiling is enabled
    pub fn profile(&self) -> bool {
        self.vm.as_ref().and_then(|vm| vm.profile).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let config = VmConfig::parse("").unwrap();
        assert_eq!(config.operand_stack_capacity(), DEFAULT_OPERAND_STACK_CAPACITY);
        assert_eq!(config.frame_stack_capacity(), DEFAULT_FRAME_STACK_CAPACITY);
        assert!(!config.strict_types());
        assert!(!config.verify());
        assert!(!config.profile());
    }

    #[test]
    fn test_parse_full_section() {
        let config = VmConfig::parse(
            r#"
[vm]
operand_stack_capacity = 64
frame_stack_capacity = 16
strict_types = true
verify = true
profile = true
"#,
        )
        .unwrap();
        assert_eq!(config.operand_stack_capacity(), 64);
        assert_eq!(config.frame_stack_capacity(), 16);
        assert!(config.strict_types());
        assert!(config.verify());
        assert!(config.profile());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = VmConfig::parse("[vm]\nframe_stack_capacity = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "vm.frame_stack_capacity"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = VmConfig::parse("[vm]\nheap_size = 10\n").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParseError { .. }));
    }

    #[test]
    fn test_serialize_skips_unset_fields() {
        let mut config = VmConfig::default();
        config.section_mut().strict_types = Some(true);
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("strict_types = true"));
        assert!(!text.contains("profile"));
    }
}
