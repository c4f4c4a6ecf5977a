//! Health state transitions
//!
//! [`step`] is a pure function: it takes the state a timer holds after the
//! previous tick plus this tick's probe outcome, and returns the next state
//! and whether the parent monitor must be told.
//!
//! Rules, in order:
//! 1. A tick that begins inside the start period stays `Starting`. Failures
//!    are not counted. Only the first such tick and failed probes report.
//! 2. After the start period:
//!    - infra failure: `Unhealthy` at once, reported, retries ignored
//!    - exit 0: `Healthy`, counter reset, always reported (heartbeat)
//!    - exit != 0: counter + 1, `Unhealthy` and reported once it reaches
//!      `retries`, otherwise logged locally only

use crate::sickbay::probe::ProbeOutcome;
use std::fmt;

/// Health status of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    /// No timer running
    #[default]
    None,
    /// Timer started, start period not yet over or no verdict yet
    Starting,
    /// Last probe passed
    Healthy,
    /// Failure threshold reached, or the probe could not be run
    Unhealthy,
}

impl HealthStatus {
    /// Wire name used in status events
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::None => "none",
            HealthStatus::Starting => "starting",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable health state owned by one timer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthState {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub start_period_remaining: u32,
    /// Whether the `starting` report for this session has gone out
    pub starting_reported: bool,
}

impl HealthState {
    /// State of a freshly started timer
    pub fn starting(start_period: u32) -> Self {
        Self {
            status: HealthStatus::Starting,
            consecutive_failures: 0,
            start_period_remaining: start_period,
            starting_reported: false,
        }
    }

    /// State of a stopped timer
    pub fn idle(start_period: u32) -> Self {
        Self {
            status: HealthStatus::None,
            ..Self::starting(start_period)
        }
    }
}

/// Result of feeding one probe outcome into the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: HealthState,
    pub report: bool,
}

/// Compute the next state for one tick
pub fn step(current: &HealthState, interval: u32, retries: u32, outcome: &ProbeOutcome) -> Transition {
    let mut next = *current;

    if current.start_period_remaining > 0 {
        next.start_period_remaining = current.start_period_remaining.saturating_sub(interval);
        next.status = HealthStatus::Starting;
        let report = !current.starting_reported || !outcome.passed();
        next.starting_reported = true;
        return Transition { state: next, report };
    }

    let report = match outcome {
        ProbeOutcome::InfraFailure(_) => {
            next.consecutive_failures = current.consecutive_failures.saturating_add(1);
            next.status = HealthStatus::Unhealthy;
            true
        }
        ProbeOutcome::Completed(0) => {
            next.consecutive_failures = 0;
            next.status = HealthStatus::Healthy;
            true
        }
        ProbeOutcome::Completed(_) => {
            next.consecutive_failures = current.consecutive_failures.saturating_add(1);
            if next.consecutive_failures >= retries {
                next.status = HealthStatus::Unhealthy;
                true
            } else {
                false
            }
        }
    };

    Transition { state: next, report }
}
