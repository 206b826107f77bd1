//! Managed child process wrapper

use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info};

use crate::{
    config::ProcessConfig,
    error::{ProcessError, Result},
};

/// Wrapper around tokio::process::Child with lifecycle management
///
/// On unix the child is spawned as the leader of its own process group, so
/// signalling `pid` as a group reaches every descendant that did not move
/// itself into another group.
#[derive(Debug)]
pub struct ManagedChild {
    /// Underlying tokio child process
    child: Child,
    /// Process ID, also the process group ID
    pid: u32,
}

impl ManagedChild {
    /// Spawn a child with piped stdout/stderr and a closed stdin
    pub fn spawn(config: &ProcessConfig) -> Result<Self> {
        debug!(
            command = %config.command_line(),
            working_dir = ?config.working_dir,
            "Spawning process"
        );

        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = config.working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn()?;
        let pid = child.id().ok_or_else(|| {
            ProcessError::SpawnFailed(std::io::Error::new(
                std::io::ErrorKind::Other,
                "Failed to get process ID",
            ))
        })?;

        info!(pid = %pid, command = %config.command_line(), "Process spawned");

        Ok(Self { child, pid })
    }

    /// Get process ID
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Check if process is still running
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait for process to exit
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().await.map_err(Into::into)
    }

    /// Take stdout handle
    pub fn stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take stderr handle
    pub fn stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }
}
