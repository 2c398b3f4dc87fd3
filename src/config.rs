// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Configuration file types and parsing for bbmrd.
//!
//! JSON5 configuration format supporting comments and trailing commas:
//!
//! ```json5
//! {
//!   // Thread mesh interface
//!   thread_interface: "wpan0",
//!   backbone_interface: "eth0",
//!   backend: "kernel",      // or "smcroute"
//!   log_level: "info",
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::logging::Severity;

/// Routing backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Program the kernel MRT6 interface directly.
    #[default]
    Kernel,
    /// Drive an external smcrouted daemon via smcroutectl.
    Smcroute,
}

/// Daemon configuration (JSON5 file format).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Thread network interface name (MIF 0).
    #[serde(default = "default_thread_interface")]
    pub thread_interface: String,

    /// Backbone network interface name (MIF 1).
    #[serde(default = "default_backbone_interface")]
    pub backbone_interface: String,

    /// Routing backend.
    #[serde(default)]
    pub backend: BackendKind,

    /// Minimum log severity; defaults to info.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<Severity>,
}

fn default_thread_interface() -> String {
    "wpan0".to_string()
}

fn default_backbone_interface() -> String {
    "eth0".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thread_interface: default_thread_interface(),
            backbone_interface: default_backbone_interface(),
            backend: BackendKind::default(),
            log_level: None,
        }
    }
}

impl Config {
    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_interface_name(&self.thread_interface)?;
        validate_interface_name(&self.backbone_interface)?;

        if self.thread_interface == self.backbone_interface {
            return Err(ConfigError::SameInterface {
                name: self.thread_interface.clone(),
            });
        }

        Ok(())
    }
}

/// Validate an interface name
fn validate_interface_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::InvalidInterfaceName {
            name: name.to_string(),
            reason: "interface name cannot be empty".to_string(),
        });
    }
    if name.len() > 15 {
        // Linux IFNAMSIZ limit
        return Err(ConfigError::InvalidInterfaceName {
            name: name.to_string(),
            reason: "interface name exceeds 15 characters".to_string(),
        });
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    IoError(PathBuf, String),
    ParseError(String),
    InvalidInterfaceName { name: String, reason: String },
    SameInterface { name: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, err) => {
                write!(f, "failed to read {}: {}", path.display(), err)
            }
            ConfigError::ParseError(err) => write!(f, "failed to parse config: {}", err),
            ConfigError::InvalidInterfaceName { name, reason } => {
                write!(f, "invalid interface name {:?}: {}", name, reason)
            }
            ConfigError::SameInterface { name } => {
                write!(
                    f,
                    "thread and backbone interface are both {:?}; two interfaces are required",
                    name
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"{
                // comments are allowed
                thread_interface: "wpan1",
                backbone_interface: "enp3s0",
                backend: "smcroute",
                log_level: "debug",
            }"#,
        )
        .unwrap();

        assert_eq!(config.thread_interface, "wpan1");
        assert_eq!(config.backbone_interface, "enp3s0");
        assert_eq!(config.backend, BackendKind::Smcroute);
        assert_eq!(config.log_level, Some(Severity::Debug));
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = Config::parse("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.thread_interface, "wpan0");
        assert_eq!(config.backbone_interface, "eth0");
        assert_eq!(config.backend, BackendKind::Kernel);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Config::parse("not json5 {"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_interface_names() {
        let mut config = Config::default();
        config.thread_interface = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInterfaceName { .. })
        ));

        let mut config = Config::default();
        config.backbone_interface = "interface-name-way-too-long".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInterfaceName { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_identical_interfaces() {
        let mut config = Config::default();
        config.backbone_interface = config.thread_interface.clone();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SameInterface { .. })
        ));
    }

    #[test]
    fn test_load_from_missing_file() {
        let result = Config::load_from_file(Path::new("/nonexistent/bbmrd.json5"));
        assert!(matches!(result, Err(ConfigError::IoError(_, _))));
    }
}
