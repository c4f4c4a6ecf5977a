//! Test doubles for probes and the parent channel

use crate::sickbay::config::HealthConfig;
use crate::sickbay::probe::{Probe, ProbeOutcome};
use crate::sync_pipe::StatusSink;
use crossbeam::channel::{self, Receiver, Sender};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Sink forwarding every message to a channel the test can read
pub struct MemorySink {
    tx: Sender<(i32, String)>,
}

impl MemorySink {
    pub fn new() -> (Self, Receiver<(i32, String)>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }
}

impl StatusSink for MemorySink {
    fn send(&mut self, msg_type: i32, payload: &str) -> io::Result<()> {
        self.tx
            .send((msg_type, payload.to_string()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "receiver dropped"))
    }
}

/// Sink whose every write fails
pub struct FailingSink;

impl StatusSink for FailingSink {
    fn send(&mut self, _msg_type: i32, _payload: &str) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "parent went away"))
    }
}

/// Probe replaying a fixed script, then `fallback` forever
pub struct ScriptedProbe {
    script: Mutex<VecDeque<ProbeOutcome>>,
    fallback: ProbeOutcome,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(script: Vec<ProbeOutcome>, fallback: ProbeOutcome) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    /// Probe that always passes
    pub fn passing() -> Self {
        Self::new(Vec::new(), ProbeOutcome::Completed(0))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Probe for ScriptedProbe {
    fn execute(&self, _config: &HealthConfig, _container_id: &str) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Passing probe that takes `delay` per call and tracks overlapping calls
pub struct SlowProbe {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SlowProbe {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Probe for SlowProbe {
    fn execute(&self, _config: &HealthConfig, _container_id: &str) -> ProbeOutcome {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        ProbeOutcome::Completed(0)
    }
}

/// Sink that holds every write until `gate` is released or dropped
pub struct GatedSink {
    gate: Receiver<()>,
}

impl GatedSink {
    pub fn new() -> (Self, Sender<()>) {
        let (tx, rx) = channel::unbounded();
        (Self { gate: rx }, tx)
    }
}

impl StatusSink for GatedSink {
    fn send(&mut self, _msg_type: i32, _payload: &str) -> io::Result<()> {
        let _ = self.gate.recv();
        Ok(())
    }
}
