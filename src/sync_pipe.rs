//! Channel to the parent monitor
//!
//! Every message is one JSON line: `{"data": <type>, "message": <payload>}`.
//! The first failed write closes the channel for good, so a parent that went
//! away costs one error instead of one per report.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::os::unix::io::{FromRawFd, RawFd};

/// Message type reserved for healthcheck status updates
pub const MSG_HEALTHCHECK_STATUS: i32 = 2;

/// Destination for framed status messages
pub trait StatusSink: Send {
    fn send(&mut self, msg_type: i32, payload: &str) -> io::Result<()>;
}

impl<S: StatusSink + ?Sized> StatusSink for Box<S> {
    fn send(&mut self, msg_type: i32, payload: &str) -> io::Result<()> {
        (**self).send(msg_type, payload)
    }
}

#[derive(Serialize)]
struct Frame<'a> {
    data: i32,
    message: &'a str,
}

/// Frame one message as a newline-terminated JSON line
pub fn frame(msg_type: i32, payload: &str) -> io::Result<String> {
    let mut line = serde_json::to_string(&Frame {
        data: msg_type,
        message: payload,
    })?;
    line.push('\n');
    Ok(line)
}

/// Sync pipe inherited from the parent monitor
#[derive(Debug)]
pub struct SyncPipe {
    file: Option<File>,
}

impl SyncPipe {
    /// Take ownership of an inherited file descriptor
    ///
    /// The descriptor is marked close-on-exec so probe children never hold
    /// the parent's channel open.
    pub fn open(fd: RawFd) -> Result<Self> {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags < 0 {
            return Err(Error::ConfigValidation(format!(
                "sync pipe fd {} is not open: {}",
                fd,
                io::Error::last_os_error()
            )));
        }
        if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        // SAFETY: the fd is open and nothing else in this process owns it
        let file = unsafe { File::from_raw_fd(fd) };
        Ok(Self::from_file(file))
    }

    pub fn from_file(file: File) -> Self {
        Self { file: Some(file) }
    }

    #[allow(dead_code)]
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}

impl StatusSink for SyncPipe {
    fn send(&mut self, msg_type: i32, payload: &str) -> io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sync pipe is closed"));
        };

        let line = frame(msg_type, payload)?;
        if let Err(e) = file.write_all(line.as_bytes()).and_then(|_| file.flush()) {
            self.file = None;
            return Err(e);
        }
        Ok(())
    }
}

/// Writes framed messages to stdout when no parent pipe was given
#[derive(Debug, Default)]
pub struct StdoutSink;

impl StatusSink for StdoutSink {
    fn send(&mut self, msg_type: i32, payload: &str) -> io::Result<()> {
        let line = frame(msg_type, payload)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(line.as_bytes())?;
        stdout.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::io::IntoRawFd;

    #[test]
    fn test_frame_shape() {
        let line = frame(MSG_HEALTHCHECK_STATUS, r#"{"status":"healthy"}"#).unwrap();
        assert!(line.ends_with('\n'));

        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["data"], 2);
        assert_eq!(value["message"], r#"{"status":"healthy"}"#);
    }

    #[test]
    fn test_sync_pipe_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipe");
        let file = File::create(&path).unwrap();

        let mut pipe = SyncPipe::open(file.into_raw_fd()).unwrap();
        pipe.send(MSG_HEALTHCHECK_STATUS, "one").unwrap();
        pipe.send(MSG_HEALTHCHECK_STATUS, "two").unwrap();
        drop(pipe);

        let mut content = String::new();
        File::open(&path).unwrap().read_to_string(&mut content).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("\"two\""));
    }

    #[test]
    fn test_broken_pipe_closes_channel() {
        let mut fds = [0 as libc::c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        unsafe { libc::close(fds[0]) };

        let mut pipe = SyncPipe::open(fds[1]).unwrap();
        assert!(pipe.send(MSG_HEALTHCHECK_STATUS, "lost").is_err());
        assert!(pipe.is_closed());

        let err = pipe.send(MSG_HEALTHCHECK_STATUS, "lost").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_open_rejects_closed_fd() {
        assert!(SyncPipe::open(-1).is_err());
    }
}
