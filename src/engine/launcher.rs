use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};

/// A spawned sandbox process leading its own process group.
///
/// Dropping it kills the whole group, so an execution that is abandoned
/// half-way (panic, cancelled future) never leaves processes behind.
pub struct RunningProcess {
    child: Child,
    #[cfg(unix)]
    pgid: Option<nix::unistd::Pid>,
    group_alive: bool,
    /// Once the leader is reaped its pid, and with it the group id, can be
    /// reused as soon as the group is empty.
    leader_reaped: bool,
}

/// Spawn `command` with piped output, no stdin, in a new process group.
pub fn launch(backend: &str, mut command: Command) -> Result<RunningProcess> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    command.process_group(0);

    let child = command
        .spawn()
        .map_err(|e| RunnerError::launch(backend, format!("failed to spawn process: {}", e)))?;

    debug!(backend = %backend, pid = ?child.id(), "Sandbox process spawned");

    Ok(RunningProcess {
        #[cfg(unix)]
        pgid: child
            .id()
            .map(|id| nix::unistd::Pid::from_raw(id as i32)),
        child,
        group_alive: true,
        leader_reaped: false,
    })
}

impl RunningProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Wait for the group leader to exit.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.leader_reaped = true;
        Ok(status)
    }

    /// Whether any process is still in the group.
    pub fn group_has_members(&self) -> bool {
        #[cfg(unix)]
        {
            // No signal, only the existence check.
            if let Some(pgid) = self.pgid {
                return nix::sys::signal::killpg(pgid, None).is_ok();
            }
        }
        false
    }

    /// Send SIGKILL to every process in the group. Idempotent.
    ///
    /// After the leader has been reaped the group is only signalled while it
    /// still has members; an empty group's id may already belong to someone
    /// else.
    pub fn terminate(&mut self) {
        if !self.group_alive {
            return;
        }
        self.group_alive = false;

        if self.leader_reaped && !self.group_has_members() {
            debug!("Process group already empty");
            return;
        }

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};

            if let Some(pgid) = self.pgid {
                match killpg(pgid, Signal::SIGKILL) {
                    Ok(()) => debug!(pgid = %pgid, "Killed process group"),
                    Err(Errno::ESRCH) => {}
                    Err(e) => warn!(pgid = %pgid, error = %e, "Failed to kill process group"),
                }
            }
        }

        // Covers platforms without process groups and a leader that changed group.
        if let Err(e) = self.child.start_kill() {
            if e.kind() != std::io::ErrorKind::InvalidInput {
                debug!(error = %e, "Failed to kill group leader");
            }
        }
    }

    /// Kill the group and reap the leader.
    pub async fn kill_and_reap(&mut self) -> std::io::Result<ExitStatus> {
        self.terminate();
        self.wait().await
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}
