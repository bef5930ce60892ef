use std::ffi::OsString;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::engine::registry::ExecutionProfile;
use crate::engine::traits::{BackendCapabilities, IsolationBackend};
use crate::engine::workspace::Workspace;
use crate::error::{Result, RunnerError};

/// Runs programs directly on the host, without any isolation.
///
/// The profile's `runtime` is ignored and the command runs with the workspace
/// as its working directory and a minimal environment. Only meant for
/// development and for testing the engine without a container runtime.
pub struct LocalBackend {
    path: Option<OsString>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self {
            path: std::env::var_os("PATH"),
        }
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IsolationBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    fn prepare(&self, profile: &ExecutionProfile, workspace: &Workspace) -> Result<Command> {
        let (program, args) = profile
            .command
            .split_first()
            .ok_or_else(|| RunnerError::launch(self.name(), "profile has an empty command"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(workspace.path())
            .env_clear()
            .env("HOME", workspace.path());
        if let Some(path) = &self.path {
            cmd.env("PATH", path);
        }

        debug!(program = %program, workspace = %workspace.id(), "Prepared local command");
        Ok(cmd)
    }
}
