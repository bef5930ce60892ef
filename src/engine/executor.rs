use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::types::RunnerConfig;
use crate::engine::classifier::{classify, ExecutionState, Outcome, Termination};
use crate::engine::collector::{CapturedOutput, OutputCollector};
use crate::engine::factory::create_backend;
use crate::engine::launcher;
use crate::engine::registry::{ExecutionProfile, LanguageProfileRegistry};
use crate::engine::traits::IsolationBackend;
use crate::engine::workspace::Workspace;
use crate::error::{Result, RunnerError};

/// How long output readers may keep going after the program exited.
const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How long an awaited backend teardown may hold up the result.
const DEFAULT_TEARDOWN_GRACE: Duration = Duration::from_secs(5);

/// When an execution must stop: a point in time, optionally combined with a
/// cancellation token. Whichever fires first ends the execution.
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    cancel: Option<CancellationToken>,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    pub fn at(at: Instant) -> Self {
        Self { at, cancel: None }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at || self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Resolves once the deadline passes or the token is cancelled.
    pub async fn expired(&self) {
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(self.at) => {}
                    _ = token.cancelled() => {}
                }
            }
            None => tokio::time::sleep_until(self.at).await,
        }
    }
}

/// One call to [`Engine::execute`]. Owned by that call only.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub source: String,
    pub language: String,
    pub deadline: Deadline,
}

impl ExecutionRequest {
    pub fn new(source: impl Into<String>, language: impl Into<String>, deadline: Deadline) -> Self {
        Self {
            source: source.into(),
            language: language.into(),
            deadline,
        }
    }
}

/// Result of a completed engine call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub outcome: Outcome,
    /// Exit status of the program, `None` on timeout or signal death
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    /// Whether either stream hit the capture limit
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Per-stream capture limit in bytes
    pub output_limit_bytes: usize,
    /// Parent directory for workspaces (system temp dir if `None`)
    pub workspace_root: Option<PathBuf>,
    /// How long to wait for pipes to close after a normal exit
    pub drain_grace: Duration,
    /// How long to wait for the backend teardown after a timeout before
    /// handing it off to the background
    pub teardown_grace: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            output_limit_bytes: 64 * 1024,
            workspace_root: None,
            drain_grace: DEFAULT_DRAIN_GRACE,
            teardown_grace: DEFAULT_TEARDOWN_GRACE,
        }
    }
}

/// How a program ended and what it wrote to stdout and stderr.
type Captured = (Termination, CapturedOutput, CapturedOutput);

/// Runs untrusted snippets through an isolation backend.
///
/// The engine holds no per-execution state; any number of `execute` calls
/// may run concurrently on a shared reference.
pub struct Engine {
    registry: Arc<LanguageProfileRegistry>,
    backend: Arc<dyn IsolationBackend>,
    options: EngineOptions,
}

impl Engine {
    pub fn new(
        registry: Arc<LanguageProfileRegistry>,
        backend: Arc<dyn IsolationBackend>,
        options: EngineOptions,
    ) -> Self {
        Self {
            registry,
            backend,
            options,
        }
    }

    /// Build registry, backend and options from configuration.
    pub fn from_config(config: &RunnerConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(LanguageProfileRegistry::from_config(&config.languages));
        let backend = create_backend(config)?;
        let options = EngineOptions {
            output_limit_bytes: config.engine.output_limit_bytes,
            workspace_root: config.engine.workspace_root.clone(),
            ..EngineOptions::default()
        };

        Ok(Self::new(registry, backend, options))
    }

    pub fn registry(&self) -> &LanguageProfileRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &dyn IsolationBackend {
        self.backend.as_ref()
    }

    pub async fn execute_with_timeout(
        &self,
        source: impl Into<String>,
        language: impl Into<String>,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        self.execute(ExecutionRequest::new(source, language, Deadline::after(timeout)))
            .await
    }

    /// Run one snippet to completion or deadline.
    ///
    /// Program failures and timeouts are reported through
    /// [`ExecutionResult::outcome`]; only problems with the environment
    /// (unknown language, staging, launching) are errors.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let ExecutionRequest {
            source,
            language,
            deadline,
        } = request;

        let profile = self.registry.lookup(&language)?;
        let started = Instant::now();

        let workspace = Workspace::stage(self.options.workspace_root.as_deref(), profile, &source)?;
        let mut guard = ExecutionGuard::new(
            Arc::clone(&self.backend),
            workspace,
            self.options.teardown_grace,
        );

        let ran = self.run(profile, &deadline, &mut guard).await;
        guard.release().await;
        let (termination, stdout, stderr) = ran?;

        let truncated = stdout.truncated || stderr.truncated;
        let stdout = stdout.into_string();
        let stderr = stderr.into_string();

        let result = ExecutionResult {
            outcome: classify(termination),
            exit_code: termination.exit_code(),
            duration_ms: started.elapsed().as_millis() as u64,
            truncated,
            stdout,
            stderr,
        };

        info!(
            language = %language,
            backend = self.backend.name(),
            outcome = %result.outcome,
            exit_code = ?result.exit_code,
            duration_ms = result.duration_ms,
            truncated = result.truncated,
            "Execution finished"
        );

        Ok(result)
    }

    /// Provision, launch and wait, racing every step against the deadline.
    async fn run(
        &self,
        profile: &ExecutionProfile,
        deadline: &Deadline,
        guard: &mut ExecutionGuard,
    ) -> Result<Captured> {
        guard.begin_provisioning();
        let provisioned = tokio::select! {
            biased;
            _ = deadline.expired() => None,
            result = self.backend.provision(profile, guard.workspace()) => Some(result),
        };
        match provisioned {
            None => {
                guard.advance(ExecutionState::TimedOut);
                return Ok((
                    Termination::DeadlineElapsed,
                    CapturedOutput::default(),
                    CapturedOutput::default(),
                ));
            }
            Some(Err(e)) => {
                guard.advance(ExecutionState::LaunchFailed);
                return Err(e);
            }
            Some(Ok(())) => {}
        }

        let launched = self
            .backend
            .prepare(profile, guard.workspace())
            .and_then(|command| launcher::launch(self.backend.name(), command));
        let mut process = match launched {
            Ok(process) => process,
            Err(e) => {
                guard.advance(ExecutionState::LaunchFailed);
                return Err(e);
            }
        };
        guard.advance(ExecutionState::Launched);

        let limit = self.options.output_limit_bytes;
        let stdout = process
            .take_stdout()
            .map(|pipe| OutputCollector::spawn("stdout", pipe, limit));
        let stderr = process
            .take_stderr()
            .map(|pipe| OutputCollector::spawn("stderr", pipe, limit));

        let waited = tokio::select! {
            biased;
            _ = deadline.expired() => None,
            status = process.wait() => Some(status),
        };

        match waited {
            None => {
                // No output is accepted once the deadline has fired.
                let stdout = stdout.map(OutputCollector::abort).unwrap_or_default();
                let stderr = stderr.map(OutputCollector::abort).unwrap_or_default();
                if let Err(e) = process.kill_and_reap().await {
                    warn!(error = %e, "Failed to reap timed out process");
                }
                guard.advance(ExecutionState::TimedOut);
                Ok((Termination::DeadlineElapsed, stdout, stderr))
            }
            Some(Ok(status)) => {
                // The leader is gone; take down anything it left behind so
                // the pipes close.
                process.terminate();
                let grace = self.options.drain_grace;
                let stdout = finish(stdout, grace).await;
                let stderr = finish(stderr, grace).await;
                guard.advance(ExecutionState::Completed);
                Ok((Termination::from(status), stdout, stderr))
            }
            Some(Err(e)) => {
                process.terminate();
                Err(RunnerError::Io(e))
            }
        }
    }
}

async fn finish(collector: Option<OutputCollector>, grace: Duration) -> CapturedOutput {
    match collector {
        Some(collector) => collector.finish(grace).await,
        None => CapturedOutput::default(),
    }
}

/// Owns the workspace of one execution and guarantees it is released exactly
/// once, tearing down the backend environment first when the program did not
/// finish on its own.
struct ExecutionGuard {
    backend: Arc<dyn IsolationBackend>,
    workspace: Workspace,
    state: ExecutionState,
    /// The backend may have created something for this workspace
    provisioning_started: bool,
    teardown_grace: Duration,
}

impl ExecutionGuard {
    fn new(
        backend: Arc<dyn IsolationBackend>,
        workspace: Workspace,
        teardown_grace: Duration,
    ) -> Self {
        debug!(workspace = %workspace.id(), state = %ExecutionState::Staged, "Execution state");
        Self {
            backend,
            workspace,
            state: ExecutionState::Staged,
            provisioning_started: false,
            teardown_grace,
        }
    }

    fn begin_provisioning(&mut self) {
        self.provisioning_started = true;
    }

    fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    fn advance(&mut self, next: ExecutionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "Execution state");
        self.state = next;
    }

    /// Anything still running for this workspace has to be removed.
    fn needs_teardown(&self) -> bool {
        match self.state {
            ExecutionState::Launched | ExecutionState::TimedOut => true,
            ExecutionState::Staged | ExecutionState::LaunchFailed => self.provisioning_started,
            _ => false,
        }
    }

    async fn release(mut self) {
        if self.needs_teardown() {
            let teardown = self.backend.teardown(&self.workspace);
            match tokio::time::timeout(self.teardown_grace, teardown).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(workspace = %self.workspace.id(), error = %e, "Sandbox teardown failed");
                }
                Err(_) => {
                    warn!(
                        workspace = %self.workspace.id(),
                        grace_ms = self.teardown_grace.as_millis() as u64,
                        "Sandbox teardown overran its grace period, finishing in the background"
                    );
                    self.backend.teardown_detached(&self.workspace);
                }
            }
        }

        self.advance(ExecutionState::Released);
        if let Err(e) = self.workspace.release() {
            warn!(workspace = %self.workspace.id(), error = %e, "Failed to remove workspace");
        }
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if self.needs_teardown() {
            self.backend.teardown_detached(&self.workspace);
        }
        debug!(workspace = %self.workspace.id(), from = %self.state, "Execution abandoned");
        // The workspace removes itself when dropped after this.
    }
}
