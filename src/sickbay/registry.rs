//! Registry of active healthcheck timers
//!
//! Keyed by container ID. Timers are stopped outside the registry lock, and
//! an ID stays reserved until its old loop has exited. One ID never has two
//! loops at once.

use crate::error::{Error, Result};
use crate::sickbay::config::HealthConfig;
use crate::sickbay::probe::Probe;
use crate::sickbay::reporter::StatusReporter;
use crate::sickbay::timer::{HealthSnapshot, HealthTimer};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

#[derive(Default)]
struct Inner {
    timers: HashMap<String, HealthTimer>,
    stopping: HashSet<String>,
    closed: bool,
}

/// Process-wide map from container ID to its running timer
pub struct TimerRegistry {
    inner: Mutex<Inner>,
    probe: Arc<dyn Probe>,
    reporter: StatusReporter,
}

impl TimerRegistry {
    /// Create an empty registry whose timers share `probe` and `reporter`
    pub fn new(probe: Arc<dyn Probe>, reporter: StatusReporter) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            probe,
            reporter,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create and start a timer for `container_id`
    pub fn register(&self, container_id: &str, config: HealthConfig) -> Result<HealthSnapshot> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(Error::TimerStart {
                container: container_id.to_string(),
                message: "healthcheck registry is shut down".to_string(),
            });
        }
        if inner.timers.contains_key(container_id) {
            return Err(Error::TimerAlreadyRegistered(container_id.to_string()));
        }
        if inner.stopping.contains(container_id) {
            return Err(Error::TimerStart {
                container: container_id.to_string(),
                message: "previous timer is still stopping".to_string(),
            });
        }

        let mut timer = HealthTimer::new(
            container_id,
            config,
            Arc::clone(&self.probe),
            self.reporter.clone(),
        );
        timer.start()?;
        let snapshot = timer.snapshot();
        inner.timers.insert(container_id.to_string(), timer);
        Ok(snapshot)
    }

    /// Stop and discard the timer for `container_id`, if any
    #[allow(dead_code)]
    pub fn unregister(&self, container_id: &str) -> bool {
        let removed = {
            let mut inner = self.lock();
            let removed = inner.timers.remove(container_id);
            if removed.is_some() {
                inner.stopping.insert(container_id.to_string());
            }
            removed
        };

        let Some(mut timer) = removed else {
            return false;
        };
        timer.stop();
        drop(timer);
        self.lock().stopping.remove(container_id);
        true
    }

    /// Stop and discard every timer; later registrations are refused
    pub fn shutdown(&self) {
        let timers: Vec<HealthTimer> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.timers.drain().map(|(_, timer)| timer).collect()
        };

        if timers.is_empty() {
            return;
        }

        let count = timers.len();
        for mut timer in timers {
            timer.stop();
        }
        info!(count, "Stopped healthcheck timers");
    }

    pub fn snapshot(&self, container_id: &str) -> Option<HealthSnapshot> {
        self.lock().timers.get(container_id).map(HealthTimer::snapshot)
    }

    #[allow(dead_code)]
    pub fn contains(&self, container_id: &str) -> bool {
        self.lock().timers.contains_key(container_id)
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.lock().timers.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[allow(dead_code)]
    pub fn container_ids(&self) -> Vec<String> {
        self.lock().timers.keys().cloned().collect()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sickbay::machine::HealthStatus;
    use crate::sickbay::testing::{MemorySink, ScriptedProbe, SlowProbe};
    use std::thread;
    use std::time::{Duration, Instant};

    fn registry() -> (TimerRegistry, Arc<ScriptedProbe>) {
        let (sink, _rx) = MemorySink::new();
        let (reporter, _thread) = StatusReporter::spawn(sink, 16, Duration::from_secs(1)).unwrap();
        let probe = Arc::new(ScriptedProbe::passing());
        (TimerRegistry::new(probe.clone(), reporter), probe)
    }

    #[test]
    fn test_register_starts_timer() {
        let (registry, _probe) = registry();
        let snapshot = registry.register("c1", HealthConfig::for_test(&["true"])).unwrap();
        assert_eq!(snapshot.status, HealthStatus::Starting);
        assert!(snapshot.active);
        assert!(registry.contains("c1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_register_fails() {
        let (registry, _probe) = registry();
        registry.register("c1", HealthConfig::for_test(&["true"])).unwrap();
        let err = registry
            .register("c1", HealthConfig::for_test(&["true"]))
            .unwrap_err();
        assert!(matches!(err, Error::TimerAlreadyRegistered(id) if id == "c1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_start_is_not_registered() {
        let (registry, _probe) = registry();
        assert!(registry.register("c1", HealthConfig::disabled()).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister() {
        let (registry, _probe) = registry();
        registry.register("c1", HealthConfig::for_test(&["true"])).unwrap();
        registry.register("c2", HealthConfig::for_test(&["true"])).unwrap();

        assert!(registry.unregister("c1"));
        assert!(!registry.unregister("c1"));
        assert!(!registry.unregister("missing"));
        assert_eq!(registry.container_ids(), vec!["c2".to_string()]);
        assert!(registry.snapshot("c1").is_none());
        assert!(registry.snapshot("c2").is_some());
    }

    #[test]
    fn test_id_reserved_until_old_loop_exits() {
        let (sink, _rx) = MemorySink::new();
        let (reporter, _thread) = StatusReporter::spawn(sink, 16, Duration::from_secs(1)).unwrap();
        let probe = Arc::new(SlowProbe::new(Duration::from_millis(1500)));
        let registry = TimerRegistry::new(probe.clone(), reporter);
        registry.register("c1", HealthConfig::for_test(&["true"])).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while probe.in_flight() == 0 {
            assert!(Instant::now() < deadline, "first check never started");
            thread::sleep(Duration::from_millis(10));
        }

        thread::scope(|s| {
            let stopping = s.spawn(|| registry.unregister("c1"));
            thread::sleep(Duration::from_millis(200));

            let err = registry
                .register("c1", HealthConfig::for_test(&["true"]))
                .unwrap_err();
            assert!(matches!(err, Error::TimerStart { container, .. } if container == "c1"));
            assert!(stopping.join().unwrap());
        });

        assert_eq!(probe.in_flight(), 0);
        registry.register("c1", HealthConfig::for_test(&["true"])).unwrap();
        thread::sleep(Duration::from_millis(1300));
        assert_eq!(probe.max_in_flight(), 1);
        registry.shutdown();
    }

    #[test]
    fn test_shutdown_stops_everything() {
        let (registry, probe) = registry();
        for id in ["a", "b", "c"] {
            registry.register(id, HealthConfig::for_test(&["true"])).unwrap();
        }

        registry.shutdown();
        assert!(registry.is_empty());

        let calls = probe.calls();
        std::thread::sleep(Duration::from_millis(1500));
        assert_eq!(probe.calls(), calls);

        assert!(registry.register("d", HealthConfig::for_test(&["true"])).is_err());
    }
}
