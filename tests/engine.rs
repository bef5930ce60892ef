//! End-to-end engine behaviour using the local backend and a `sh` profile.

#![cfg(unix)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use coderunner::engine::{
    BackendCapabilities, Deadline, Engine, EngineOptions, ExecutionProfile, ExecutionRequest,
    IsolationBackend, LanguageProfileRegistry, LocalBackend, Outcome, Workspace,
};
use coderunner::RunnerError;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const OUTPUT_LIMIT: usize = 4096;

fn sh_profile(command: &[&str]) -> ExecutionProfile {
    ExecutionProfile {
        runtime: "local".to_string(),
        file_name: "main.sh".to_string(),
        command: command.iter().map(|s| s.to_string()).collect(),
    }
}

fn engine_in(root: &Path) -> Engine {
    engine_with(root, Arc::new(LocalBackend::new()))
}

fn engine_with(root: &Path, backend: Arc<dyn IsolationBackend>) -> Engine {
    let registry = LanguageProfileRegistry::new([
        ("sh", sh_profile(&["sh", "main.sh"])),
        ("broken", sh_profile(&["/nonexistent/interpreter", "main.sh"])),
    ]);
    Engine::new(
        Arc::new(registry),
        backend,
        EngineOptions {
            output_limit_bytes: OUTPUT_LIMIT,
            workspace_root: Some(root.to_path_buf()),
            drain_grace: Duration::from_secs(2),
            teardown_grace: Duration::from_millis(300),
        },
    )
}

/// Runs locally, but its teardown never finishes, like a hung daemon.
struct StuckTeardown {
    local: LocalBackend,
    detached: Arc<AtomicBool>,
}

#[async_trait]
impl IsolationBackend for StuckTeardown {
    fn name(&self) -> &str {
        "stuck"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    fn prepare(
        &self,
        profile: &ExecutionProfile,
        workspace: &Workspace,
    ) -> coderunner::Result<Command> {
        self.local.prepare(profile, workspace)
    }

    async fn teardown(&self, _workspace: &Workspace) -> coderunner::Result<()> {
        std::future::pending().await
    }

    fn teardown_detached(&self, _workspace: &Workspace) {
        self.detached.store(true, Ordering::SeqCst);
    }
}

fn workspace_count(root: &Path) -> usize {
    std::fs::read_dir(root).unwrap().count()
}

/// A process counts as gone once it no longer exists or is a zombie.
fn is_running(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(") ")
            .map(|(_, rest)| !rest.starts_with('Z') && !rest.starts_with('X'))
            .unwrap_or(false),
        Err(_) => false,
    }
}

async fn wait_until_gone(pid: i32) -> bool {
    for _ in 0..40 {
        if !is_running(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_prints_token() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());

    let result = engine
        .execute_with_timeout("echo token-42\n", "sh", Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.stdout, "token-42\n");
    assert_eq!(result.stderr, "");
    assert_eq!(result.exit_code, Some(0));
    assert!(!result.truncated);
    assert_eq!(workspace_count(root.path()), 0);
}

#[tokio::test]
async fn test_unsupported_language_touches_nothing() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());

    let err = engine
        .execute_with_timeout("puts 1", "cobol", Duration::from_secs(10))
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::UnsupportedLanguage { ref language } if language == "cobol"));
    assert!(!err.is_system_error());
    assert_eq!(workspace_count(root.path()), 0);
}

#[tokio::test]
async fn test_non_zero_exit_is_runtime_failure() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());

    let result = engine
        .execute_with_timeout("echo partial\necho boom >&2\nexit 3\n", "sh", Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::RuntimeFailure);
    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.stdout, "partial\n");
    assert_eq!(result.stderr, "boom\n");
    assert_eq!(workspace_count(root.path()), 0);
}

#[tokio::test]
async fn test_timeout_kills_whole_process_group() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());

    // The background sleep is a grandchild of the engine; it must die too.
    let script = "sleep 30 &\necho $!\nwait\n";
    let deadline = Duration::from_secs(1);
    let started = Instant::now();

    let result = engine
        .execute_with_timeout(script, "sh", deadline)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.outcome, Outcome::TimedOut);
    assert_eq!(result.exit_code, None);
    assert!(elapsed >= deadline, "returned before the deadline: {:?}", elapsed);
    assert!(elapsed < deadline + Duration::from_secs(2), "took {:?}", elapsed);

    let grandchild: i32 = result.stdout.trim().parse().unwrap();
    assert!(wait_until_gone(grandchild).await, "grandchild {} survived", grandchild);
    assert_eq!(workspace_count(root.path()), 0);
}

#[tokio::test]
async fn test_hung_teardown_does_not_hold_the_result() {
    let root = tempfile::tempdir().unwrap();
    let detached = Arc::new(AtomicBool::new(false));
    let engine = engine_with(
        root.path(),
        Arc::new(StuckTeardown {
            local: LocalBackend::new(),
            detached: Arc::clone(&detached),
        }),
    );

    let deadline = Duration::from_millis(500);
    let started = Instant::now();
    let result = engine
        .execute_with_timeout("sleep 30\n", "sh", deadline)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.outcome, Outcome::TimedOut);
    // Deadline plus the 300ms teardown grace, with slack for the kill.
    assert!(elapsed < deadline + Duration::from_millis(1800), "took {:?}", elapsed);
    assert!(detached.load(Ordering::SeqCst), "teardown was not handed off");
    assert_eq!(workspace_count(root.path()), 0);
}

#[tokio::test]
async fn test_cancellation_token_stops_execution() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());

    let token = CancellationToken::new();
    let deadline = Deadline::after(Duration::from_secs(30)).with_cancellation(token.clone());
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let started = Instant::now();
    let result = engine
        .execute(ExecutionRequest::new("sleep 30\n", "sh", deadline))
        .await
        .unwrap();
    canceller.await.unwrap();

    assert_eq!(result.outcome, Outcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(workspace_count(root.path()), 0);
}

#[tokio::test]
async fn test_expired_deadline_times_out() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());

    let deadline = Deadline::at(tokio::time::Instant::now());
    assert!(deadline.is_expired());

    let result = engine
        .execute(ExecutionRequest::new("sleep 5\n", "sh", deadline))
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::TimedOut);
    assert_eq!(workspace_count(root.path()), 0);
}

#[tokio::test]
async fn test_dropped_execution_cleans_up() {
    let root = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let pid_file = scratch.path().join("pids");
    let engine = engine_in(root.path());

    let script = format!(
        "echo $$ > {pids}\nsleep 30 &\necho $! >> {pids}\nwait\n",
        pids = pid_file.display()
    );

    // Abandon the execution future mid-run, as a cancelled caller would.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(500),
        engine.execute_with_timeout(script, "sh", Duration::from_secs(30)),
    )
    .await;
    assert!(abandoned.is_err());

    assert_eq!(workspace_count(root.path()), 0);

    let pids = std::fs::read_to_string(&pid_file).unwrap();
    for pid in pids.lines() {
        let pid: i32 = pid.trim().parse().unwrap();
        assert!(wait_until_gone(pid).await, "process {} survived", pid);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_executions_do_not_mix() {
    let root = tempfile::tempdir().unwrap();
    let engine = Arc::new(engine_in(root.path()));

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..16 {
        let engine = Arc::clone(&engine);
        tasks.spawn(async move {
            let script = format!("echo out-{i}\nsleep 0.2\necho err-{i} >&2\n");
            let result = engine
                .execute_with_timeout(script, "sh", Duration::from_secs(20))
                .await
                .unwrap();
            (i, result)
        });
    }

    let mut seen = 0;
    while let Some(joined) = tasks.join_next().await {
        let (i, result) = joined.unwrap();
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.stdout, format!("out-{i}\n"));
        assert_eq!(result.stderr, format!("err-{i}\n"));
        seen += 1;
    }

    assert_eq!(seen, 16);
    assert_eq!(workspace_count(root.path()), 0);
}

#[tokio::test]
async fn test_output_is_bounded() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());

    // Roughly 22 KB, well past the pipe buffer and the capture limit.
    let script = "i=0\nwhile [ $i -lt 2000 ]; do echo 0123456789; i=$((i+1)); done\necho done >&2\n";

    let result = engine
        .execute_with_timeout(script, "sh", Duration::from_secs(20))
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    assert!(result.truncated);
    assert_eq!(result.stdout.len(), OUTPUT_LIMIT);
    assert_eq!(result.stderr, "done\n");
}

#[tokio::test]
async fn test_stdin_is_closed() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());

    let result = engine
        .execute_with_timeout("cat\necho after\n", "sh", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.stdout, "after\n");
}

#[tokio::test]
async fn test_missing_interpreter_is_launch_error() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());

    let err = engine
        .execute_with_timeout("echo hi\n", "broken", Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::Launch { ref backend, .. } if backend == "local"));
    assert!(err.is_system_error());
    assert_eq!(workspace_count(root.path()), 0);
}

#[tokio::test]
async fn test_workspace_holds_only_the_source() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());

    let result = engine
        .execute_with_timeout("ls -A\n", "sh", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.stdout, "main.sh\n");
}
