use std::sync::Arc;

use tracing::{info, warn};

use crate::config::types::{BackendType, RunnerConfig};
use crate::engine::backends::{DockerBackend, LocalBackend};
use crate::engine::traits::{BackendCapabilities, IsolationBackend};
use crate::error::{Result, RunnerError};

/// Create an isolation backend based on the configuration.
///
/// `Auto` only ever selects an isolating backend; the local backend has to be
/// asked for explicitly.
pub fn create_backend(config: &RunnerConfig) -> Result<Arc<dyn IsolationBackend>> {
    let backend_type = resolve_backend_type(&config.engine.backend, &config.docker.binary)?;

    let backend: Arc<dyn IsolationBackend> = match backend_type {
        BackendType::Docker => Arc::new(DockerBackend::new(config.docker.clone())?),
        BackendType::Local => {
            warn!("Using the local backend: programs run on the host WITHOUT isolation");
            Arc::new(LocalBackend::new())
        }
        BackendType::Auto => {
            // Already resolved by resolve_backend_type
            unreachable!()
        }
    };

    info!(backend = backend.name(), "Isolation backend selected");
    Ok(backend)
}

/// Resolve the backend type, handling Auto selection.
fn resolve_backend_type(requested: &BackendType, docker_binary: &str) -> Result<BackendType> {
    match requested {
        BackendType::Auto => {
            if DockerBackend::is_available_with(docker_binary) {
                Ok(BackendType::Docker)
            } else {
                Err(RunnerError::BackendNotAvailable {
                    backend: "auto".to_string(),
                    reason: "No isolating backend available (is the Docker daemon running?)"
                        .to_string(),
                })
            }
        }
        other => Ok(other.clone()),
    }
}

/// Get information about available backends on this system.
///
/// Availability comes from each backend's health check and the isolation
/// columns from its declared capabilities.
pub async fn available_backends(config: &RunnerConfig) -> Vec<BackendInfo> {
    let candidates: [(Box<dyn IsolationBackend>, &'static str, &'static str); 2] = [
        (
            Box::new(DockerBackend::unchecked(config.docker.clone())),
            "Docker container sandbox",
            "Docker daemon not accessible",
        ),
        (
            Box::new(LocalBackend::new()),
            "Direct host execution (no isolation, development only)",
            "Local execution unavailable",
        ),
    ];

    let mut infos = Vec::with_capacity(candidates.len());
    for (backend, description, reason) in candidates {
        let available = backend.health_check().await.unwrap_or(false);
        let capabilities = backend.capabilities();
        infos.push(BackendInfo {
            name: backend.name().to_string(),
            available,
            isolated: capabilities.network_isolated && capabilities.resource_limits,
            capabilities,
            description,
            unavailable_reason: if available { None } else { Some(reason) },
        });
    }
    infos
}

/// Information about an isolation backend.
#[derive(Debug, serde::Serialize)]
pub struct BackendInfo {
    pub name: String,
    pub available: bool,
    /// Both network and resource isolation are enforced
    pub isolated: bool,
    pub capabilities: BackendCapabilities,
    pub description: &'static str,
    pub unavailable_reason: Option<&'static str>,
}
