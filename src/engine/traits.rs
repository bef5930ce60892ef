use async_trait::async_trait;
use tokio::process::Command;

use crate::engine::registry::ExecutionProfile;
use crate::engine::workspace::Workspace;
use crate::error::Result;

/// Capability flags indicating what isolation the backend enforces
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BackendCapabilities {
    /// Executed code cannot reach any network
    pub network_isolated: bool,
    /// Memory, CPU and process count ceilings are enforced
    pub resource_limits: bool,
    /// The backend can remove its whole environment in one step
    pub atomic_teardown: bool,
}

/// Trait for isolation backends.
///
/// A backend only decides *how* a staged program is invoked and torn down.
/// Spawning, deadline handling, output capture and workspace cleanup are done
/// by the engine, so every backend gets the same guarantees.
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    /// Returns the backend name (e.g., "docker", "local")
    fn name(&self) -> &str;

    /// Returns the capabilities of this backend
    fn capabilities(&self) -> BackendCapabilities;

    /// Create whatever has to exist before the program can start. Any error
    /// here is a launch failure; once this succeeds every exit status belongs
    /// to the program.
    async fn provision(&self, _profile: &ExecutionProfile, _workspace: &Workspace) -> Result<()> {
        Ok(())
    }

    /// Build the command that runs `profile` against the staged workspace.
    /// The engine takes care of stdio, process groups and kill-on-drop.
    fn prepare(&self, profile: &ExecutionProfile, workspace: &Workspace) -> Result<Command>;

    /// Remove anything the backend left running for this workspace.
    /// Awaited by the engine, for at most `EngineOptions::teardown_grace`,
    /// after a timeout or cancellation.
    async fn teardown(&self, _workspace: &Workspace) -> Result<()> {
        Ok(())
    }

    /// Non-blocking variant of [`teardown`](Self::teardown) used from `Drop`
    /// when an execution is abandoned, and when an awaited teardown overran
    /// its grace period. Best effort.
    fn teardown_detached(&self, _workspace: &Workspace) {}

    /// Check if the backend is ready to run programs.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
