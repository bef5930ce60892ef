use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::types::DockerConfig;
use crate::engine::registry::ExecutionProfile;
use crate::engine::traits::{BackendCapabilities, IsolationBackend};
use crate::engine::workspace::Workspace;
use crate::error::{Result, RunnerError};

/// Directory the staged file is mounted into and the program runs from
const GUEST_WORKDIR: &str = "/app";

/// Docker sandbox backend.
///
/// Every execution runs in a fresh `--rm` container with networking disabled,
/// hard memory/CPU/pid ceilings, all capabilities dropped and only the staged
/// source file bind-mounted read-only. The container is named after the
/// workspace so it can be force-removed even when the client process has
/// already been killed.
///
/// Creation and start are separate calls. `docker run` reuses the program's
/// exit status for its own failures (125), so a program exiting 125 would look
/// like a broken daemon. Failures of `docker create` are launch errors; the
/// status of `docker start --attach` is always the program's.
pub struct DockerBackend {
    binary: String,
    memory_limit_mb: u64,
    cpus: f64,
    pids_limit: u32,
}

impl DockerBackend {
    /// Create a new Docker backend, checking that the daemon is reachable.
    pub fn new(config: DockerConfig) -> Result<Self> {
        if !Self::is_available_with(&config.binary) {
            return Err(RunnerError::BackendNotAvailable {
                backend: "docker".to_string(),
                reason: "Docker daemon is not accessible. Ensure Docker is installed and running."
                    .to_string(),
            });
        }

        let backend = Self::unchecked(config);
        info!(
            binary = %backend.binary,
            memory_mb = backend.memory_limit_mb,
            cpus = backend.cpus,
            "Docker backend initialized"
        );
        Ok(backend)
    }

    /// Create the backend without probing the daemon.
    pub fn unchecked(config: DockerConfig) -> Self {
        Self {
            binary: config.binary,
            memory_limit_mb: config.memory_limit_mb,
            cpus: config.cpus,
            pids_limit: config.pids_limit,
        }
    }

    /// Returns true if `binary info` succeeds.
    pub fn is_available_with(binary: &str) -> bool {
        match std::process::Command::new(binary)
            .args(["info"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }

    fn container_name(workspace: &Workspace) -> String {
        workspace.id().to_string()
    }

    /// Arguments that create the container for one execution.
    fn create_args(&self, profile: &ExecutionProfile, workspace: &Workspace) -> Vec<String> {
        let memory = format!("{}m", self.memory_limit_mb);
        let mut args = vec![
            "create".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            Self::container_name(workspace),
            "--network=none".to_string(),
            format!("--memory={}", memory),
            // Same as --memory so the ceiling cannot be dodged through swap
            format!("--memory-swap={}", memory),
            format!("--cpus={}", self.cpus),
            format!("--pids-limit={}", self.pids_limit),
            "--cap-drop=ALL".to_string(),
            "--security-opt=no-new-privileges".to_string(),
            "-v".to_string(),
            format!(
                "{}:{}/{}:ro",
                workspace.staged_file().display(),
                GUEST_WORKDIR,
                profile.file_name
            ),
            "-w".to_string(),
            GUEST_WORKDIR.to_string(),
            profile.runtime.clone(),
        ];
        args.extend(profile.command.iter().cloned());
        args
    }

    fn start_args(workspace: &Workspace) -> Vec<String> {
        vec![
            "start".to_string(),
            "--attach".to_string(),
            Self::container_name(workspace),
        ]
    }

    fn remove_command(&self, name: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["rm", "--force", name]);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        cmd
    }
}

#[async_trait]
impl IsolationBackend for DockerBackend {
    fn name(&self) -> &str {
        "docker"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            network_isolated: true,
            resource_limits: true,
            atomic_teardown: true,
        }
    }

    async fn provision(&self, profile: &ExecutionProfile, workspace: &Workspace) -> Result<()> {
        if profile.command.is_empty() {
            return Err(RunnerError::launch(self.name(), "profile has an empty command"));
        }

        let name = Self::container_name(workspace);
        debug!(image = %profile.runtime, container = %name, "Creating container");

        // Dropped when the deadline fires first; the name is still torn down.
        let output = Command::new(&self.binary)
            .args(self.create_args(profile, workspace))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                RunnerError::launch(
                    self.name(),
                    format!("failed to run {} create: {}", self.binary, e),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.trim();
            return Err(RunnerError::launch(
                self.name(),
                if reason.is_empty() {
                    format!("{} create failed with {}", self.binary, output.status)
                } else {
                    reason.to_string()
                },
            ));
        }

        Ok(())
    }

    fn prepare(&self, profile: &ExecutionProfile, workspace: &Workspace) -> Result<Command> {
        debug!(image = %profile.runtime, container = %workspace.id(), "Prepared docker start");

        let mut cmd = Command::new(&self.binary);
        cmd.args(Self::start_args(workspace));
        Ok(cmd)
    }

    async fn teardown(&self, workspace: &Workspace) -> Result<()> {
        let name = Self::container_name(workspace);
        debug!(container = %name, "Removing container");

        let mut cmd = self.remove_command(&name);
        cmd.kill_on_drop(true);
        let output = cmd.output().await.map_err(|e| {
            RunnerError::Other(anyhow::anyhow!("failed to run {} rm: {}", self.binary, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Already gone through --rm
            if stderr.contains("No such container") {
                return Ok(());
            }
            warn!(container = %name, error = %stderr.trim(), "Failed to remove container");
            return Err(RunnerError::Other(anyhow::anyhow!(
                "failed to remove container {}: {}",
                name,
                stderr.trim()
            )));
        }

        info!(container = %name, "Container removed");
        Ok(())
    }

    fn teardown_detached(&self, workspace: &Workspace) {
        let name = Self::container_name(workspace);

        // Inside a runtime, tokio reaps the orphaned child in the background.
        let spawned = if tokio::runtime::Handle::try_current().is_ok() {
            let mut cmd = self.remove_command(&name);
            cmd.stderr(Stdio::null());
            cmd.spawn().map(drop)
        } else {
            std::process::Command::new(&self.binary)
                .args(["rm", "--force", &name])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(drop)
        };

        if let Err(e) = spawned {
            warn!(container = %name, error = %e, "Failed to schedule container removal");
        }
    }

    async fn health_check(&self) -> Result<bool> {
        match Command::new(&self.binary)
            .args(["info"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => Ok(status.success()),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ExecutionProfile {
        ExecutionProfile {
            runtime: "python:alpine".to_string(),
            file_name: "main.py".to_string(),
            command: vec!["python".to_string(), "main.py".to_string()],
        }
    }

    #[test]
    fn test_create_args_enforce_isolation() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::stage(Some(root.path()), &profile(), "print(1)").unwrap();
        let backend = DockerBackend::unchecked(DockerConfig::default());

        let args = backend.create_args(&profile(), &workspace);
        let has = |flag: &str| args.iter().any(|a| a == flag);

        assert_eq!(args[0], "create");
        assert!(has("--rm"));
        assert!(has("--network=none"));
        assert!(has("--memory=128m"));
        assert!(has("--memory-swap=128m"));
        assert!(has("--cpus=0.5"));
        assert!(has("--pids-limit=64"));
        assert!(has("--cap-drop=ALL"));

        let name_pos = args.iter().position(|a| a == "--name").unwrap();
        assert_eq!(args[name_pos + 1], workspace.id());

        let mount = format!("{}:/app/main.py:ro", workspace.staged_file().display());
        assert!(has(&mount));

        // Image followed by the profile command, nothing after
        assert_eq!(&args[args.len() - 3..], ["python:alpine", "python", "main.py"]);
    }

    #[test]
    fn test_prepare_attaches_to_the_created_container() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::stage(Some(root.path()), &profile(), "print(1)").unwrap();

        assert_eq!(
            DockerBackend::start_args(&workspace),
            ["start", "--attach", workspace.id()]
        );
    }

    #[tokio::test]
    async fn test_create_spawn_failure_is_launch_error() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::stage(Some(root.path()), &profile(), "print(1)").unwrap();
        let backend = DockerBackend::unchecked(DockerConfig {
            binary: "/nonexistent/docker".to_string(),
            ..DockerConfig::default()
        });

        let err = backend.provision(&profile(), &workspace).await.unwrap_err();
        assert!(matches!(err, RunnerError::Launch { ref backend, .. } if backend == "docker"));
    }

    #[tokio::test]
    async fn test_empty_command_is_launch_error() {
        let root = tempfile::tempdir().unwrap();
        let mut empty = profile();
        empty.command.clear();
        let workspace = Workspace::stage(Some(root.path()), &empty, "print(1)").unwrap();
        let backend = DockerBackend::unchecked(DockerConfig::default());

        assert!(matches!(
            backend.provision(&empty, &workspace).await,
            Err(RunnerError::Launch { .. })
        ));
    }

    #[test]
    fn test_missing_binary_is_not_available() {
        assert!(!DockerBackend::is_available_with("/nonexistent/docker"));

        let config = DockerConfig {
            binary: "/nonexistent/docker".to_string(),
            ..DockerConfig::default()
        };
        assert!(matches!(
            DockerBackend::new(config),
            Err(RunnerError::BackendNotAvailable { .. })
        ));
    }
}
