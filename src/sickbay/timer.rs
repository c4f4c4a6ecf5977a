//! Per-container healthcheck timer
//!
//! Each started [`HealthTimer`] owns one thread running the tick loop:
//! wait one interval, probe, step the state machine, publish a snapshot,
//! report if the transition calls for it. The loop is the only writer of
//! the health state while it runs. [`HealthTimer::stop`] cancels the loop
//! and joins it before touching the state again.

use crate::error::{Error as CrateError, Result as CrateResult};
use crate::sickbay::config::HealthConfig;
use crate::sickbay::machine::{self, HealthState, HealthStatus};
use crate::sickbay::probe::Probe;
use crate::sickbay::reporter::StatusReporter;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use state_machines::state_machine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime};
use tracing::{debug, error, info, warn};

state_machine! {
    name: TimerMachine,
    dynamic: true,
    initial: Idle,
    states: [Idle, Running],
    events {
        start {
            transition: { from: Idle, to: Running }
        }
        stop {
            transition: { from: Running, to: Idle }
        }
    }
}

/// Point-in-time copy of a timer's health fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub start_period_remaining: u32,
    pub last_check_time: Option<SystemTime>,
    pub active: bool,
}

impl HealthSnapshot {
    fn new(state: &HealthState, last_check_time: Option<SystemTime>, active: bool) -> Self {
        Self {
            status: state.status,
            consecutive_failures: state.consecutive_failures,
            start_period_remaining: state.start_period_remaining,
            last_check_time,
            active,
        }
    }
}

/// Healthcheck supervision session for one container
pub struct HealthTimer {
    container_id: String,
    config: HealthConfig,
    lifecycle: DynamicTimerMachine<()>,
    active: Arc<AtomicBool>,
    snapshot: Arc<Mutex<HealthSnapshot>>,
    probe: Arc<dyn Probe>,
    reporter: StatusReporter,
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HealthTimer {
    pub fn new(
        container_id: &str,
        config: HealthConfig,
        probe: Arc<dyn Probe>,
        reporter: StatusReporter,
    ) -> Self {
        let idle = HealthState::idle(config.start_period());
        Self {
            container_id: container_id.to_string(),
            config,
            lifecycle: TimerMachine::new(()).into_dynamic(),
            active: Arc::new(AtomicBool::new(false)),
            snapshot: Arc::new(Mutex::new(HealthSnapshot::new(&idle, None, false))),
            probe,
            reporter,
            cancel: None,
            handle: None,
        }
    }

    #[allow(dead_code)]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn status(&self) -> HealthStatus {
        self.snapshot().status
    }

    /// Copy of the current health fields
    pub fn snapshot(&self) -> HealthSnapshot {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enter `Starting` and spawn the tick loop
    pub fn start(&mut self) -> CrateResult<()> {
        if !self.config.is_enabled() || self.config.test().is_empty() {
            return Err(self.start_error("healthcheck is disabled or has no test command"));
        }
        if self.lifecycle.handle(TimerMachineEvent::Start).is_err() {
            return Err(self.start_error("timer is already active"));
        }

        let state = HealthState::starting(self.config.start_period());
        self.publish(HealthSnapshot::new(&state, Some(SystemTime::now()), true));
        self.active.store(true, Ordering::SeqCst);

        let (cancel_tx, cancel_rx) = channel::bounded(0);
        let tick = TickLoop {
            container_id: self.container_id.clone(),
            config: self.config.clone(),
            probe: Arc::clone(&self.probe),
            reporter: self.reporter.clone(),
            active: Arc::clone(&self.active),
            snapshot: Arc::clone(&self.snapshot),
            cancel: cancel_rx,
            state,
        };

        let spawned = thread::Builder::new()
            .name(format!("health-{}", short_id(&self.container_id)))
            .spawn(move || tick.run());

        match spawned {
            Ok(handle) => {
                self.cancel = Some(cancel_tx);
                self.handle = Some(handle);
                info!(
                    container_id = %self.container_id,
                    interval = self.config.interval(),
                    start_period = self.config.start_period(),
                    retries = self.config.retries(),
                    "Healthcheck timer started"
                );
                Ok(())
            }
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                let _ = self.lifecycle.handle(TimerMachineEvent::Stop);
                self.reset();
                Err(self.start_error(&format!("failed to spawn timer thread: {}", e)))
            }
        }
    }

    /// Cancel the tick loop and wait for it to exit
    ///
    /// An in-flight probe is not killed; this returns once it has finished
    /// and the loop has observed the cancellation. No-op on an idle timer.
    pub fn stop(&mut self) {
        if self.lifecycle.handle(TimerMachineEvent::Stop).is_err() {
            return;
        }

        self.active.store(false, Ordering::SeqCst);
        drop(self.cancel.take());

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(container_id = %self.container_id, "Healthcheck timer thread panicked");
            }
        }

        self.reset();
        info!(container_id = %self.container_id, "Healthcheck timer stopped");
    }

    fn reset(&self) {
        let idle = HealthState::idle(self.config.start_period());
        let last = self.snapshot().last_check_time;
        self.publish(HealthSnapshot::new(&idle, last, false));
    }

    fn publish(&self, snapshot: HealthSnapshot) {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    fn start_error(&self, message: &str) -> CrateError {
        CrateError::TimerStart {
            container: self.container_id.clone(),
            message: message.to_string(),
        }
    }
}

impl Drop for HealthTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State moved into the timer thread
struct TickLoop {
    container_id: String,
    config: HealthConfig,
    probe: Arc<dyn Probe>,
    reporter: StatusReporter,
    active: Arc<AtomicBool>,
    snapshot: Arc<Mutex<HealthSnapshot>>,
    cancel: Receiver<()>,
    state: HealthState,
}

impl TickLoop {
    fn run(mut self) {
        debug!(container_id = %self.container_id, "Healthcheck loop running");

        while self.wait_interval() {
            self.tick();
        }

        debug!(container_id = %self.container_id, "Healthcheck loop exited");
    }

    /// Sleep one interval; false once cancelled
    fn wait_interval(&self) -> bool {
        let deadline = Instant::now() + self.config.interval_duration();
        loop {
            if !self.active.load(Ordering::SeqCst) {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            match self.cancel.recv_timeout(remaining) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    fn tick(&mut self) {
        let outcome = self.probe.execute(&self.config, &self.container_id);
        let transition = machine::step(
            &self.state,
            self.config.interval(),
            self.config.retries(),
            &outcome,
        );
        self.state = transition.state;

        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) =
            HealthSnapshot::new(&self.state, Some(SystemTime::now()), true);

        if !outcome.passed() && !transition.report {
            info!(
                container_id = %self.container_id,
                exit_code = outcome.exit_code(),
                failures = self.state.consecutive_failures,
                retries = self.config.retries(),
                "Healthcheck failed"
            );
        }

        if transition.report {
            if let Err(e) =
                self.reporter
                    .report(&self.container_id, self.state.status, outcome.exit_code())
            {
                warn!(
                    container_id = %self.container_id,
                    status = %self.state.status,
                    error = %e,
                    "Failed to report healthcheck status"
                );
            }
        }
    }
}

/// First 12 characters of a container ID, for thread names
fn short_id(container_id: &str) -> &str {
    match container_id.char_indices().nth(12) {
        Some((idx, _)) => &container_id[..idx],
        None => container_id,
    }
}
