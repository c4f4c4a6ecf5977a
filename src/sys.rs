//! Host system detection

use std::env;
use std::fs;

/// Whether the host is managed by systemd
///
/// True when `NOTIFY_SOCKET` holds an absolute path, or when PID 1's command
/// line starts with `systemd`. An unreadable `/proc` counts as "no".
pub fn systemd_available() -> bool {
    let notify_socket = env::var("NOTIFY_SOCKET").ok();
    let pid1_cmdline = fs::read("/proc/1/cmdline").ok();
    detect_systemd(notify_socket.as_deref(), pid1_cmdline.as_deref())
}

fn detect_systemd(notify_socket: Option<&str>, pid1_cmdline: Option<&[u8]>) -> bool {
    if notify_socket.is_some_and(|s| s.starts_with('/')) {
        return true;
    }
    pid1_cmdline.is_some_and(|cmdline| cmdline.starts_with(b"systemd"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_socket_must_be_absolute() {
        assert!(detect_systemd(Some("/run/systemd/notify"), None));
        assert!(!detect_systemd(Some("@abstract"), None));
        assert!(!detect_systemd(Some(""), None));
    }

    #[test]
    fn test_pid1_cmdline() {
        assert!(detect_systemd(None, Some(b"systemd\0--system\0")));
        assert!(!detect_systemd(None, Some(b"/sbin/init\0")));
        assert!(!detect_systemd(None, Some(b"/lib/systemd/systemd\0")));
        assert!(!detect_systemd(None, None));
    }
}
