//! Liveness oracle for local sessions.
//!
//! A session's client key is usually the id of the process that registered
//! it. For sessions on this host we can ask the OS whether that process still
//! exists. Anything we cannot check is assumed alive: showing a dead session
//! is preferable to hiding a live one.

use tracing::debug;

/// Decides whether the process behind a session is still running.
pub trait LivenessProbe: Send + Sync {
    /// `true` unless the session is local and its process is known to be gone.
    fn is_alive(&self, client_key: Option<&str>, is_local: bool) -> bool;
}

/// Probe that signals the process named by the client key.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessProbe;

impl LivenessProbe for ProcessProbe {
    fn is_alive(&self, client_key: Option<&str>, is_local: bool) -> bool {
        let Some(key) = client_key else {
            return true;
        };
        if !is_local {
            return true;
        }
        match key.trim().parse::<i32>() {
            Ok(pid) if pid > 0 => process_exists(pid),
            _ => true,
        }
    }
}

#[cfg(unix)]
fn process_exists(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            debug!(pid, error = %e, "liveness probe inconclusive, assuming alive");
            true
        }
    }
}

#[cfg(not(unix))]
fn process_exists(pid: i32) -> bool {
    debug!(pid, "liveness probing unsupported on this platform, assuming alive");
    true
}

/// Name of this host, used to decide whether a session is local.
pub fn local_machine() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}
