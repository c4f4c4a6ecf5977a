//! Probe execution
//!
//! Runs one probe with fork(2)/execvp(3) and classifies how it ended.
//!
//! - stdout goes to `/dev/null`
//! - stderr is captured through a non-blocking pipe, bounded, for logs only
//! - the child leads its own process group so a timed-out probe can be
//!   killed together with everything it spawned
//!
//! Anything that happens after the child exists is a [`ProbeOutcome::Completed`].
//! Only failures of the supervisor itself (pipe, fork, waitpid) are
//! [`ProbeOutcome::InfraFailure`].

use crate::error::{Error, Result};
use crate::sickbay::config::HealthConfig;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{kill, killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, pipe2, ForkResult, Pid};
use std::ffi::{CString, OsStr, OsString};
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default bound on captured probe stderr
pub const DEFAULT_STDERR_LIMIT: usize = 4096;

/// Exit code reported when the probe could not be run at all
pub const INFRA_EXIT_CODE: i32 = -1;

/// Exit code of a probe whose program could not be executed
pub const NOT_FOUND_EXIT_CODE: i32 = 127;

/// How often the child is polled while it runs
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Result of one probe invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The child ran and terminated; signals map to `128 + signal`
    Completed(i32),
    /// The supervisor could not spawn or observe the child
    InfraFailure(String),
}

impl ProbeOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, ProbeOutcome::Completed(0))
    }

    /// Exit code to report upstream
    pub fn exit_code(&self) -> i32 {
        match self {
            ProbeOutcome::Completed(code) => *code,
            ProbeOutcome::InfraFailure(_) => INFRA_EXIT_CODE,
        }
    }
}

/// Where the probe runs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExecMode {
    /// Spawn the test argv as-is
    #[default]
    Direct,
    /// Spawn `<runtime> exec <container-id> <test argv...>`
    Runtime(PathBuf),
}

/// Something that can run a container's probe once
pub trait Probe: Send + Sync {
    fn execute(&self, config: &HealthConfig, container_id: &str) -> ProbeOutcome;
}

/// Runs probes as child processes
#[derive(Debug, Clone)]
pub struct ProbeExecutor {
    mode: ExecMode,
    stderr_limit: usize,
}

impl ProbeExecutor {
    pub fn new(mode: ExecMode) -> Self {
        Self {
            mode,
            stderr_limit: DEFAULT_STDERR_LIMIT,
        }
    }

    /// Set the stderr capture bound
    pub fn with_stderr_limit(mut self, limit: usize) -> Self {
        self.stderr_limit = limit;
        self
    }

    /// Full argv spawned for `config` in this mode
    pub fn argv(&self, config: &HealthConfig, container_id: &str) -> Vec<OsString> {
        let test = config.test().iter().map(OsString::from);
        match &self.mode {
            ExecMode::Direct => test.collect(),
            ExecMode::Runtime(runtime) => {
                let mut argv = Vec::with_capacity(config.test().len() + 3);
                argv.push(runtime.as_os_str().to_os_string());
                argv.push(OsString::from("exec"));
                argv.push(OsString::from(container_id));
                argv.extend(test);
                argv
            }
        }
    }
}

impl Probe for ProbeExecutor {
    fn execute(&self, config: &HealthConfig, container_id: &str) -> ProbeOutcome {
        let argv = self.argv(config, container_id);

        match spawn_and_wait(&argv, config.timeout_duration(), self.stderr_limit) {
            Ok(run) => {
                if run.timed_out {
                    warn!(
                        container_id,
                        timeout = config.timeout(),
                        "Healthcheck probe timed out and was killed"
                    );
                }
                if !run.stderr.is_empty() {
                    debug!(
                        container_id,
                        exit_code = run.exit_code,
                        stderr = %String::from_utf8_lossy(&run.stderr).trim_end(),
                        "Healthcheck probe stderr"
                    );
                }
                ProbeOutcome::Completed(run.exit_code)
            }
            Err(e) => {
                warn!(container_id, error = %e, "Failed to execute healthcheck probe");
                ProbeOutcome::InfraFailure(e.to_string())
            }
        }
    }
}

/// Observed termination of one probe child
#[derive(Debug)]
struct ProbeRun {
    exit_code: i32,
    stderr: Vec<u8>,
    timed_out: bool,
}

/// Fork, exec `argv`, and wait for the child with timeout enforcement
///
/// Everything the child needs is prepared before fork(2) so that the child
/// only makes async-signal-safe calls before execvp(3).
fn spawn_and_wait<S: AsRef<OsStr>>(
    argv: &[S],
    timeout: Duration,
    stderr_limit: usize,
) -> Result<ProbeRun> {
    if argv.is_empty() {
        return Err(Error::ProbeSpawn("empty command".to_string()));
    }

    let args: Vec<CString> = argv
        .iter()
        .map(|a| CString::new(a.as_ref().as_bytes()))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::ProbeSpawn(format!("invalid argument: {}", e)))?;
    let mut arg_ptrs: Vec<*const libc::c_char> = args.iter().map(|s| s.as_ptr()).collect();
    arg_ptrs.push(std::ptr::null());

    let devnull = OpenOptions::new()
        .write(true)
        .open("/dev/null")
        .map_err(|e| Error::ProbeSpawn(format!("Failed to open /dev/null: {}", e)))?;

    let (stderr_read, stderr_write) = stderr_pipe()?;

    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            // No allocation and no locks from here on
            unsafe {
                libc::setpgid(0, 0);
                libc::signal(libc::SIGPIPE, libc::SIG_DFL);
                libc::dup2(devnull.as_raw_fd(), libc::STDOUT_FILENO);
                libc::dup2(stderr_write.as_raw_fd(), libc::STDERR_FILENO);
                libc::execvp(arg_ptrs[0], arg_ptrs.as_ptr());
                libc::_exit(NOT_FOUND_EXIT_CODE)
            }
        }
        Ok(ForkResult::Parent { child }) => {
            // Mirror the child's setpgid so killpg cannot race it
            unsafe {
                libc::setpgid(child.as_raw(), child.as_raw());
            }
            drop(stderr_write);
            drop(devnull);
            wait_for_child(child, File::from(stderr_read), timeout, stderr_limit)
        }
        Err(e) => Err(Error::ProbeSpawn(format!("Fork failed: {}", e))),
    }
}

/// Create the stderr pipe: both ends close-on-exec, read end non-blocking
fn stderr_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let (read, write) = pipe2(OFlag::O_CLOEXEC)
        .map_err(|e| Error::ProbeSpawn(format!("Failed to create stderr pipe: {}", e)))?;

    fcntl(&read, FcntlArg::F_GETFL)
        .map(OFlag::from_bits_truncate)
        .and_then(|flags| fcntl(&read, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)))
        .map_err(|e| Error::ProbeSpawn(format!("Failed to configure stderr pipe: {}", e)))?;

    Ok((read, write))
}

/// Poll the child until it terminates, killing its group after `timeout`
fn wait_for_child(
    child: Pid,
    mut stderr: File,
    timeout: Duration,
    stderr_limit: usize,
) -> Result<ProbeRun> {
    let start = Instant::now();
    let mut captured = Vec::new();
    let mut timed_out = false;

    let exit_code = loop {
        drain(&mut stderr, &mut captured, stderr_limit);

        match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                if !timed_out && start.elapsed() >= timeout {
                    if killpg(child, Signal::SIGKILL).is_err() {
                        let _ = kill(child, Signal::SIGKILL);
                    }
                    timed_out = true;
                }
                thread::sleep(POLL_INTERVAL);
            }
            Ok(WaitStatus::Exited(_, code)) => break code,
            Ok(WaitStatus::Signaled(_, signal, _)) => break 128 + signal as i32,
            Ok(_) => thread::sleep(POLL_INTERVAL),
            Err(Errno::EINTR) => continue,
            Err(e) => {
                return Err(Error::ProbeSpawn(format!("waitpid failed: {}", e)));
            }
        }
    };

    drain(&mut stderr, &mut captured, stderr_limit);

    Ok(ProbeRun {
        exit_code,
        stderr: captured,
        timed_out,
    })
}

/// Read whatever is buffered in the pipe, keeping at most `limit` bytes
fn drain(pipe: &mut File, captured: &mut Vec<u8>, limit: usize) {
    let mut chunk = [0u8; 1024];
    loop {
        match pipe.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(captured.len());
                captured.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}
