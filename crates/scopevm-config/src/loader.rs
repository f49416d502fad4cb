//! Configuration Loader
//!
//! Handles loading configuration from scopevm.toml and merging environment overrides.

use crate::vm::VmConfig;
use crate::{ConfigError, ConfigResult, CONFIG_FILE_NAME};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader
///
/// Loads configuration and merges it with proper precedence:
/// 1. Built-in defaults - lowest priority
/// 2. Project config (./scopevm.toml) - overrides defaults
/// 3. Environment variables (SCOPEVM_*) - overrides project
pub struct ConfigLoader {
    /// Apply `SCOPEVM_*` environment overrides
    env_overrides: bool,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// VM configuration
    pub vm: VmConfig,

    /// Directory where scopevm.toml was found
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            env_overrides: true,
        }
    }

    /// Create a loader that ignores `SCOPEVM_*` environment variables
    pub fn without_env() -> Self {
        Self {
            env_overrides: false,
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find scopevm.toml. A missing file is not
    /// an error; defaults are used instead.
    pub fn load_from_directory(&self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, vm) = self.find_project_config(start_dir)?;
        let vm = self.apply_env_overrides(vm)?;
        Ok(Config { vm, project_root })
    }

    /// Load configuration from a specific file
    pub fn load_from_file(&self, config_path: &Path) -> ConfigResult<Config> {
        let vm = VmConfig::load_from_file(config_path)?;
        let vm = self.apply_env_overrides(vm)?;
        Ok(Config {
            vm,
            project_root: config_path.parent().map(|p| p.to_path_buf()),
        })
    }

    /// Find scopevm.toml by walking up the directory tree
    fn find_project_config(&self, start_dir: &Path) -> ConfigResult<(Option<PathBuf>, VmConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.exists() {
                let config = VmConfig::load_from_file(&config_path)?;
                return Ok((Some(current), config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, VmConfig::default())),
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Recognised variables: SCOPEVM_OPERAND_STACK, SCOPEVM_FRAME_STACK,
    /// SCOPEVM_STRICT_TYPES, SCOPEVM_VERIFY, SCOPEVM_PROFILE.
    fn apply_env_overrides(&self, mut config: VmConfig) -> ConfigResult<VmConfig> {
        if !self.env_overrides {
            return Ok(config);
        }

        if let Ok(value) = env::var("SCOPEVM_OPERAND_STACK") {
            config.section_mut().operand_stack_capacity =
                Some(parse_capacity("SCOPEVM_OPERAND_STACK", &value)?);
        }
        if let Ok(value) = env::var("SCOPEVM_FRAME_STACK") {
            config.section_mut().frame_stack_capacity =
                Some(parse_capacity("SCOPEVM_FRAME_STACK", &value)?);
        }
        if let Ok(value) = env::var("SCOPEVM_STRICT_TYPES") {
            config.section_mut().strict_types = Some(parse_flag(&value));
        }
        if let Ok(value) = env::var("SCOPEVM_VERIFY") {
            config.section_mut().verify = Some(parse_flag(&value));
        }
        if let Ok(value) = env::var("SCOPEVM_PROFILE") {
            config.section_mut().profile = Some(parse_flag(&value));
        }

        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if a scopevm.toml was found
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_capacity(var: &str, value: &str) -> ConfigResult<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidValue {
            field: var.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let config_path = dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, content).unwrap();
        config_path
    }

    #[test]
    fn test_load_project_config() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[vm]\nframe_stack_capacity = 32\n");

        let config = ConfigLoader::without_env()
            .load_from_directory(temp_dir.path())
            .unwrap();

        assert_eq!(config.vm.frame_stack_capacity(), 32);
        assert!(config.is_project());
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[vm]\nstrict_types = true\n");

        let sub_dir = temp_dir.path().join("subdir");
        fs::create_dir(&sub_dir).unwrap();

        let config = ConfigLoader::without_env()
            .load_from_directory(&sub_dir)
            .unwrap();

        assert!(config.vm.strict_types());
        assert_eq!(config.project_root(), Some(temp_dir.path()));
    }

    #[test]
    #[serial]
    fn test_env_override_frame_stack() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[vm]\nframe_stack_capacity = 32\n");

        env::set_var("SCOPEVM_FRAME_STACK", "7");
        let config = ConfigLoader::new().load_from_directory(temp_dir.path());
        env::remove_var("SCOPEVM_FRAME_STACK");

        assert_eq!(config.unwrap().vm.frame_stack_capacity(), 7);
    }

    #[test]
    #[serial]
    fn test_env_override_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();

        env::set_var("SCOPEVM_OPERAND_STACK", "lots");
        let result = ConfigLoader::new().load_from_directory(temp_dir.path());
        env::remove_var("SCOPEVM_OPERAND_STACK");

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
