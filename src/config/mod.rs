//! Configuration module for tus-uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation. Every field has a default,
//! so an empty document is a valid configuration.
//!
//! # Example
//!
//! ```yaml
//! server:
//!   address: "0.0.0.0:1080"
//!   public_url: "https://uploads.example.com"
//!   base_path: "/files"
//!   shutdown_timeout_secs: 30
//! upload:
//!   directory: "${UPLOAD_DIR:-./upload}"
//!   max_size: 1073741824
//!   chunk_size: 1048576
//! metrics:
//!   enabled: true
//! ```

use crate::upload::{UploadLimits, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.base_path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "base_path '{}' must start with /",
                self.server.base_path
            )));
        }

        if let Some(ref url) = self.server.public_url {
            if !is_valid_http_url(url) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid public_url '{}': must start with http:// or https://",
                    url
                )));
            }
        }

        if self.upload.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "upload.chunk_size must be greater than 0".into(),
            ));
        }

        if self.upload.directory.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "upload.directory cannot be empty".into(),
            ));
        }

        Ok(())
    }
}

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    /// Scheme and authority used in `Location` headers.
    /// Defaults to `http://{bound address}`.
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            public_url: None,
            base_path: default_base_path(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:1080".to_string()
}

fn default_base_path() -> String {
    "/files".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Upload storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory holding one file per upload
    #[serde(default = "default_upload_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl UploadConfig {
    pub fn limits(&self) -> UploadLimits {
        UploadLimits {
            max_size: self.max_size,
            chunk_size: self.chunk_size,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            directory: default_upload_directory(),
            max_size: default_max_size(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_upload_directory() -> PathBuf {
    PathBuf::from("./upload")
}

fn default_max_size() -> u64 {
    DEFAULT_MAX_SIZE
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve `GET /metrics`
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}
