//! Configuration file parsing for Lookout
//!
//! Parses `lookout.toml` using serde. Every key is optional.

use crate::error::{Error, Result};
use crate::sickbay::discovery::DEFAULT_ANNOTATION;
use crate::sickbay::probe::DEFAULT_STDERR_LIMIT;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file used when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "lookout.toml";

/// Load configuration from a file
pub fn load(path: &Path) -> Result<LookoutConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: LookoutConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Load configuration, falling back to defaults when the default file is absent
///
/// An explicitly named file must exist.
pub fn load_or_default(path: &Path) -> Result<LookoutConfig> {
    match load(path) {
        Err(Error::ConfigRead { source, .. })
            if source.kind() == io::ErrorKind::NotFound
                && path == Path::new(DEFAULT_CONFIG_PATH) =>
        {
            Ok(LookoutConfig::default())
        }
        other => other,
    }
}

/// Supervisor settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookoutConfig {
    /// OCI runtime used for `<runtime> exec <id> <argv...>` probes
    #[serde(default = "default_runtime")]
    pub runtime: PathBuf,

    /// Annotation key holding the healthcheck JSON document
    #[serde(default = "default_annotation")]
    pub annotation: String,

    /// Bytes of probe stderr kept for logs
    #[serde(default = "default_stderr_limit")]
    pub stderr_limit: usize,

    /// How long a timer may wait to queue a status report (milliseconds)
    #[serde(default = "default_report_timeout_ms")]
    pub report_timeout_ms: u64,

    /// Capacity of the status report queue
    #[serde(default = "default_report_queue")]
    pub report_queue: usize,

    /// Leave healthchecks to systemd timers when systemd is running
    #[serde(default)]
    pub prefer_systemd: bool,
}

impl Default for LookoutConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            annotation: default_annotation(),
            stderr_limit: default_stderr_limit(),
            report_timeout_ms: default_report_timeout_ms(),
            report_queue: default_report_queue(),
            prefer_systemd: false,
        }
    }
}

impl LookoutConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.runtime.as_os_str().is_empty() {
            return Err(Error::ConfigValidation("runtime must not be empty".into()));
        }

        if self.annotation.is_empty() {
            return Err(Error::ConfigValidation(
                "annotation must not be empty".into(),
            ));
        }

        if !(1..=65536).contains(&self.stderr_limit) {
            return Err(Error::ConfigValidation(format!(
                "stderr_limit must be between 1 and 65536, got {}",
                self.stderr_limit
            )));
        }

        if !(1..=60_000).contains(&self.report_timeout_ms) {
            return Err(Error::ConfigValidation(format!(
                "report_timeout_ms must be between 1 and 60000, got {}",
                self.report_timeout_ms
            )));
        }

        if self.report_queue == 0 {
            return Err(Error::ConfigValidation(
                "report_queue must be at least 1".into(),
            ));
        }

        Ok(())
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_millis(self.report_timeout_ms)
    }
}

fn default_runtime() -> PathBuf {
    PathBuf::from("/usr/bin/crun")
}

fn default_annotation() -> String {
    DEFAULT_ANNOTATION.to_string()
}

fn default_stderr_limit() -> usize {
    DEFAULT_STDERR_LIMIT
}

fn default_report_timeout_ms() -> u64 {
    1000
}

fn default_report_queue() -> usize {
    64
}
