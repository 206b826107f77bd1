//! Signal delivery by pid and by process group
//!
//! Unix delivers real signals through `nix`; elsewhere graceful signals are
//! best-effort and forced termination goes through `taskkill`.

use tracing::debug;

use crate::error::{ProcessError, Result};

/// Signals sent to a whole process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSignal {
    /// Ctrl-C equivalent, lets the child unwind its own descendants
    Interrupt,
    /// Polite termination request
    Terminate,
    /// Uncatchable termination
    Kill,
}

/// Per-pid signalling used to reap processes the supervisor does not own
pub trait Signaller: Send + Sync {
    /// Request graceful termination
    fn terminate(&self, pid: u32) -> Result<()>;

    /// Force termination
    fn force_kill(&self, pid: u32) -> Result<()>;

    /// Liveness check
    fn is_alive(&self, pid: u32) -> bool;
}

/// Signaller backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignaller;

impl Signaller for OsSignaller {
    fn terminate(&self, pid: u32) -> Result<()> {
        send(pid, GroupSignal::Terminate, false)
    }

    fn force_kill(&self, pid: u32) -> Result<()> {
        send(pid, GroupSignal::Kill, false)
    }

    fn is_alive(&self, pid: u32) -> bool {
        process_is_alive(pid)
    }
}

/// Signal every process in the group led by `pgid`.
///
/// A group that no longer exists is not an error.
pub fn signal_group(pgid: u32, signal: GroupSignal) -> Result<()> {
    debug!(pgid = %pgid, signal = ?signal, "Signalling process group");
    send(pgid, signal, true)
}

/// Returns whether a process with this pid exists.
pub fn process_is_alive(pid: u32) -> bool {
    if checked_pid(pid).is_err() {
        return false;
    }

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        return match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        };
    }

    #[cfg(not(unix))]
    {
        std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/NH"])
            .output()
            .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }
}

fn checked_pid(pid: u32) -> Result<i32> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(raw),
        _ => Err(ProcessError::InvalidPid(pid.to_string())),
    }
}

#[cfg(unix)]
fn send(pid: u32, signal: GroupSignal, group: bool) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let raw = checked_pid(pid)?;
    let signal = match signal {
        GroupSignal::Interrupt => Signal::SIGINT,
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };

    let outcome = if group {
        killpg(Pid::from_raw(raw), signal)
    } else {
        kill(Pid::from_raw(raw), signal)
    };

    match outcome {
        Ok(()) => Ok(()),
        // Already gone only matters for pid-targeted kills.
        Err(Errno::ESRCH) if group => Ok(()),
        Err(e) => Err(ProcessError::KillFailed {
            pid,
            reason: e.to_string(),
        }),
    }
}

#[cfg(not(unix))]
fn send(pid: u32, signal: GroupSignal, group: bool) -> Result<()> {
    checked_pid(pid)?;
    if signal == GroupSignal::Interrupt {
        return Ok(());
    }

    let mut args = vec!["/pid".to_string(), pid.to_string()];
    if signal == GroupSignal::Kill {
        args.push("/f".to_string());
    }
    if group {
        args.push("/t".to_string());
    }

    let output = std::process::Command::new("taskkill")
        .args(&args)
        .output()
        .map_err(|e| ProcessError::KillFailed {
            pid,
            reason: e.to_string(),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(ProcessError::KillFailed {
            pid,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
