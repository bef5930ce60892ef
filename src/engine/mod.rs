//! The execution engine: stage a snippet, run it inside an isolation backend
//! until it exits or its deadline fires, capture bounded output, classify the
//! result and clean up on every path.

mod backends;
mod classifier;
mod collector;
mod executor;
mod factory;
mod launcher;
mod registry;
mod traits;
mod workspace;

pub use backends::{DockerBackend, LocalBackend};
pub use classifier::{classify, ExecutionState, Outcome, Termination};
pub use collector::{CapturedOutput, OutputCollector};
pub use executor::{Deadline, Engine, EngineOptions, ExecutionRequest, ExecutionResult};
pub use factory::{available_backends, create_backend, BackendInfo};
pub use launcher::{launch, RunningProcess};
pub use registry::{ExecutionProfile, LanguageProfileRegistry};
pub use traits::{BackendCapabilities, IsolationBackend};
pub use workspace::{Workspace, WORKSPACE_PREFIX};
