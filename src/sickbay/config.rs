//! Healthcheck configuration
//!
//! A [`HealthConfig`] is only ever built through validation, so holding one
//! means every field is inside its allowed range.

use crate::error::{Error, Result};
use std::ops::RangeInclusive;
use std::time::Duration;

/// Allowed probe interval in seconds
pub const INTERVAL_RANGE: RangeInclusive<i64> = 1..=3600;

/// Allowed probe timeout in seconds
pub const TIMEOUT_RANGE: RangeInclusive<i64> = 1..=300;

/// Allowed start period in seconds
pub const START_PERIOD_RANGE: RangeInclusive<i64> = 0..=3600;

/// Allowed consecutive failure threshold
pub const RETRIES_RANGE: RangeInclusive<i64> = 0..=100;

/// Validated probe configuration for one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    test: Vec<String>,
    interval: u32,
    timeout: u32,
    start_period: u32,
    retries: u32,
    enabled: bool,
}

impl HealthConfig {
    /// Build an enabled config, validating every field
    pub fn new(
        test: Vec<String>,
        interval: i64,
        timeout: i64,
        start_period: i64,
        retries: i64,
    ) -> Result<Self> {
        if test.is_empty() {
            return Err(Error::HealthcheckInvalid(
                "test command must not be empty".to_string(),
            ));
        }
        if test[0].is_empty() {
            return Err(Error::HealthcheckInvalid(
                "test program must not be empty".to_string(),
            ));
        }
        if let Some(arg) = test.iter().find(|a| a.contains('\0')) {
            return Err(Error::HealthcheckInvalid(format!(
                "test argument {:?} contains a NUL byte",
                arg
            )));
        }

        Ok(Self {
            test,
            interval: check_range("interval", interval, &INTERVAL_RANGE)?,
            timeout: check_range("timeout", timeout, &TIMEOUT_RANGE)?,
            start_period: check_range("start_period", start_period, &START_PERIOD_RANGE)?,
            retries: check_range("retries", retries, &RETRIES_RANGE)?,
            enabled: true,
        })
    }

    /// A config representing "no healthcheck": disabled, with no test command
    #[allow(dead_code)]
    pub fn disabled() -> Self {
        Self {
            test: Vec::new(),
            interval: 30,
            timeout: 30,
            start_period: 0,
            retries: 3,
            enabled: false,
        }
    }

    /// Probe argv, program first
    pub fn test(&self) -> &[String] {
        &self.test
    }

    /// Seconds between probes
    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval))
    }

    /// Seconds a single probe may run before it is killed
    pub fn timeout(&self) -> u32 {
        self.timeout
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout))
    }

    /// Grace window in seconds during which failures do not count
    pub fn start_period(&self) -> u32 {
        self.start_period
    }

    /// Consecutive failures before the container is marked unhealthy
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Check that `value` lies in `range`, naming the field on failure
pub(crate) fn check_range(name: &str, value: i64, range: &RangeInclusive<i64>) -> Result<u32> {
    if !range.contains(&value) {
        return Err(Error::HealthcheckInvalid(format!(
            "{} must be between {} and {}, got {}",
            name,
            range.start(),
            range.end(),
            value
        )));
    }
    u32::try_from(value).map_err(|_| {
        Error::HealthcheckInvalid(format!("{} out of range: {}", name, value))
    })
}

// Builder helpers for tests
#[cfg(test)]
impl HealthConfig {
    /// Enabled config running `test` every second with no grace period
    pub fn for_test(test: &[&str]) -> Self {
        Self::new(test.iter().map(|s| s.to_string()).collect(), 1, 5, 0, 3).unwrap()
    }

    /// Set the start period
    pub fn with_start_period(mut self, secs: u32) -> Self {
        self.start_period = secs;
        self
    }

    /// Set the failure threshold
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the probe timeout
    pub fn with_timeout(mut self, secs: u32) -> Self {
        self.timeout = secs;
        self
    }
}
