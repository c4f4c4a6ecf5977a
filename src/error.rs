//! Unified error types for Lookout

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Lookout operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // Healthcheck discovery errors
    #[error("Failed to read bundle config '{path}': {source}")]
    BundleRead { path: PathBuf, source: io::Error },

    #[error("Invalid bundle config '{path}': {message}")]
    BundleInvalid { path: PathBuf, message: String },

    #[error("Failed to parse healthcheck annotation: {0}")]
    AnnotationParse(#[from] serde_json::Error),

    #[error("Invalid healthcheck: {0}")]
    HealthcheckInvalid(String),

    // Timer errors
    #[error("Healthcheck timer for container '{0}' is already registered")]
    TimerAlreadyRegistered(String),

    #[error("Failed to start healthcheck timer for container '{container}': {message}")]
    TimerStart { container: String, message: String },

    // Probe errors
    #[error("Failed to run probe: {0}")]
    ProbeSpawn(String),

    // Reporting errors
    #[error("Failed to report status: {0}")]
    ReportFailed(String),

    #[error("Status channel is closed")]
    ChannelClosed,
}

/// Result type alias for Lookout operations
pub type Result<T> = std::result::Result<T, Error>;
