//! Healthcheck discovery from OCI bundle annotations
//!
//! The healthcheck travels as a single annotation whose value is a JSON
//! document:
//!
//! ```json
//! {"test": ["CMD-SHELL", "curl -sf http://localhost/health"],
//!  "interval": 30, "timeout": 5, "start_period": 10, "retries": 3}
//! ```
//!
//! Validation is all-or-nothing. Nothing is ever defaulted.

use crate::error::{Error, Result};
use crate::sickbay::config::HealthConfig;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Default annotation key carrying the healthcheck document
pub const DEFAULT_ANNOTATION: &str = "io.containers.healthcheck";

/// Longest accepted `CMD-SHELL` command string
pub const MAX_SHELL_COMMAND: usize = 4096;

/// Shell used for `CMD-SHELL` probes
const SHELL: &str = "/bin/sh";

/// Raw annotation document, before range and shape validation
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HealthcheckAnnotation {
    test: Vec<String>,
    interval: i64,
    timeout: i64,
    start_period: i64,
    retries: i64,
}

/// Parse and validate an annotation payload
pub fn parse_annotation(payload: &str) -> Result<HealthConfig> {
    let raw: HealthcheckAnnotation = serde_json::from_str(payload)?;
    let argv = parse_test(raw.test)?;
    HealthConfig::new(argv, raw.interval, raw.timeout, raw.start_period, raw.retries)
}

/// Turn a `["CMD", ...]` or `["CMD-SHELL", "..."]` array into a probe argv
fn parse_test(test: Vec<String>) -> Result<Vec<String>> {
    if test.len() < 2 {
        return Err(Error::HealthcheckInvalid(format!(
            "test needs a discriminator and at least one argument, got {} element(s)",
            test.len()
        )));
    }

    let mut parts = test.into_iter();
    let kind = parts.next().unwrap_or_default();
    let rest: Vec<String> = parts.collect();

    match kind.as_str() {
        "CMD" => Ok(rest),
        "CMD-SHELL" => {
            let [command]: [String; 1] = rest.try_into().map_err(|rest: Vec<String>| {
                Error::HealthcheckInvalid(format!(
                    "CMD-SHELL takes exactly one command string, got {}",
                    rest.len()
                ))
            })?;
            if command.is_empty() {
                return Err(Error::HealthcheckInvalid(
                    "CMD-SHELL command must not be empty".to_string(),
                ));
            }
            if command.len() > MAX_SHELL_COMMAND {
                return Err(Error::HealthcheckInvalid(format!(
                    "CMD-SHELL command is {} bytes, limit is {}",
                    command.len(),
                    MAX_SHELL_COMMAND
                )));
            }
            Ok(vec![SHELL.to_string(), "-c".to_string(), command])
        }
        other => Err(Error::HealthcheckInvalid(format!(
            "unsupported test discriminator '{}' (expected CMD or CMD-SHELL)",
            other
        ))),
    }
}

/// Discover the healthcheck of an OCI bundle
///
/// Returns `Ok(None)` when the bundle has no `config.json`, no annotations,
/// or no annotation under `key`. Whether that means "disabled" or is an error
/// is up to the caller.
pub fn discover_from_bundle(bundle: &Path, key: &str) -> Result<Option<HealthConfig>> {
    let path = bundle.join("config.json");
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "OCI config not found");
            return Ok(None);
        }
        Err(e) => return Err(Error::BundleRead { path, source: e }),
    };

    let root: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| Error::BundleInvalid {
            path: path.clone(),
            message: e.to_string(),
        })?;

    let Some(root) = root.as_object() else {
        return Err(Error::BundleInvalid {
            path,
            message: "root is not an object".to_string(),
        });
    };

    let annotations = match root.get("annotations") {
        None | Some(serde_json::Value::Null) => {
            debug!(path = %path.display(), "No annotations in OCI config");
            return Ok(None);
        }
        Some(serde_json::Value::Object(map)) => map,
        Some(_) => {
            return Err(Error::BundleInvalid {
                path,
                message: "annotations is not an object".to_string(),
            });
        }
    };

    match annotations.get(key) {
        None => {
            debug!(annotation = key, "No healthcheck annotation");
            Ok(None)
        }
        Some(serde_json::Value::String(payload)) => parse_annotation(payload).map(Some),
        Some(_) => Err(Error::BundleInvalid {
            path,
            message: format!("annotation '{}' is not a string", key),
        }),
    }
}
