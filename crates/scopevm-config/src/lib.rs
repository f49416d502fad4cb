//! scopevm Configuration System
//!
//! Provides configuration for the scopevm virtual machine:
//! - VM settings (`scopevm.toml`, `[vm]` table)
//! - Environment variable overrides (`SCOPEVM_*`)
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Project config (./scopevm.toml, searched upward)
//! 3. Environment variables (SCOPEVM_*)
//!
//! # Example
//!
//! ```no_run
//! use scopevm_config::ConfigLoader;
//! use std::path::Path;
//!
//! let loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("frames: {}", config.vm.frame_stack_capacity());
//! ```

pub mod loader;
pub mod vm;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Name of the project configuration file
pub const CONFIG_FILE_NAME: &str = "scopevm.toml";

// Re-export main types
pub use loader::{Config, ConfigLoader};
pub use vm::{VmConfig, VmSection};
