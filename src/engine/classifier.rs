use std::fmt;
use std::process::ExitStatus;

use serde::{Deserialize, Serialize};

/// How a completed engine call ended.
///
/// None of these are errors: a program that crashes or runs out of time is a
/// normal result from the engine's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    RuntimeFailure,
    TimedOut,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::RuntimeFailure => write!(f, "runtime failure"),
            Outcome::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Terminal state of a launched process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process exited on its own before the deadline.
    /// `code` is `None` when it was killed by a signal.
    Exited { code: Option<i32> },
    /// The deadline fired first and the process group was killed.
    DeadlineElapsed,
}

impl From<ExitStatus> for Termination {
    fn from(status: ExitStatus) -> Self {
        Termination::Exited {
            code: status.code(),
        }
    }
}

impl Termination {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Termination::Exited { code } => *code,
            Termination::DeadlineElapsed => None,
        }
    }
}

pub fn classify(termination: Termination) -> Outcome {
    match termination {
        Termination::Exited { code: Some(0) } => Outcome::Success,
        Termination::Exited { .. } => Outcome::RuntimeFailure,
        Termination::DeadlineElapsed => Outcome::TimedOut,
    }
}

/// Lifecycle of one execution.
///
/// `Staged -> Launched -> {Completed | TimedOut}` or `Staged -> LaunchFailed`,
/// and every branch ends in `Released`. `Staged -> TimedOut` covers a deadline
/// that fires while the backend is still provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Staged,
    Launched,
    Completed,
    TimedOut,
    LaunchFailed,
    Released,
}

impl ExecutionState {
    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (Staged, Launched)
                | (Staged, LaunchFailed)
                | (Launched, Completed)
                | (Staged, TimedOut)
                | (Launched, TimedOut)
                | (Staged, Released)
                | (Launched, Released)
                | (Completed, Released)
                | (TimedOut, Released)
                | (LaunchFailed, Released)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ExecutionState::Released
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::Staged => "staged",
            ExecutionState::Launched => "launched",
            ExecutionState::Completed => "completed",
            ExecutionState::TimedOut => "timed_out",
            ExecutionState::LaunchFailed => "launch_failed",
            ExecutionState::Released => "released",
        };
        f.write_str(name)
    }
}
