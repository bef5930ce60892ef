use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{Result, RunnerError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub engine: EngineConfig,
    pub docker: DockerConfig,
    /// Execution profiles keyed by language identifier.
    /// A non-empty table replaces the built-in profiles entirely.
    pub languages: BTreeMap<String, LanguageConfig>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            docker: DockerConfig::default(),
            languages: default_languages(),
        }
    }
}

impl RunnerConfig {
    /// Check the parts of the configuration that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.languages.is_empty() {
            return Err(RunnerError::Config(
                "at least one language profile must be configured".to_string(),
            ));
        }

        for (id, language) in &self.languages {
            language.validate(id)?;
        }

        if self.engine.default_timeout_seconds == 0 {
            return Err(RunnerError::Config(
                "engine.default_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.engine.default_timeout_seconds > self.engine.max_timeout_seconds {
            return Err(RunnerError::Config(format!(
                "engine.default_timeout_seconds ({}) exceeds engine.max_timeout_seconds ({})",
                self.engine.default_timeout_seconds, self.engine.max_timeout_seconds
            )));
        }
        if self.engine.output_limit_bytes == 0 {
            return Err(RunnerError::Config(
                "engine.output_limit_bytes must be greater than 0".to_string(),
            ));
        }
        if self.docker.memory_limit_mb == 0 || self.docker.cpus <= 0.0 {
            return Err(RunnerError::Config(
                "docker memory and cpu limits must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// The type of isolation backend to use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Docker container sandbox
    Docker,
    /// Run directly on the host without isolation (development and tests only)
    Local,
    /// Automatically select the best available backend
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Which backend to use
    pub backend: BackendType,
    /// Deadline applied when the caller does not supply one
    pub default_timeout_seconds: u64,
    /// Upper bound the CLI enforces on caller supplied deadlines
    pub max_timeout_seconds: u64,
    /// Per-stream capture limit; extra output is discarded
    pub output_limit_bytes: usize,
    /// Parent directory for per-execution workspaces (system temp dir if unset)
    pub workspace_root: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            default_timeout_seconds: 10,
            max_timeout_seconds: 30,
            output_limit_bytes: 64 * 1024,
            workspace_root: None,
        }
    }
}

/// Docker-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Container runtime binary (docker, podman, ...)
    pub binary: String,
    /// Hard memory ceiling in MB (swap is pinned to the same value)
    pub memory_limit_mb: u64,
    /// CPU share ceiling
    pub cpus: f64,
    /// Maximum number of processes inside the container
    pub pids_limit: u32,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            memory_limit_mb: 128,
            cpus: 0.5,
            pids_limit: 64,
        }
    }
}

/// How to run one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Isolated environment image
    pub image: String,
    /// Name the source is staged under
    pub file_name: String,
    /// Command run inside the sandbox working directory
    pub command: Vec<String>,
}

impl LanguageConfig {
    fn validate(&self, id: &str) -> Result<()> {
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            return Err(RunnerError::Config(format!(
                "language '{}': command must not be empty",
                id
            )));
        }

        let mut components = std::path::Path::new(&self.file_name).components();
        let single_normal = matches!(
            (components.next(), components.next()),
            (Some(std::path::Component::Normal(_)), None)
        );
        if !single_normal {
            return Err(RunnerError::Config(format!(
                "language '{}': file_name '{}' must be a plain file name",
                id, self.file_name
            )));
        }

        Ok(())
    }
}

fn default_languages() -> BTreeMap<String, LanguageConfig> {
    let profile = |image: &str, file: &str, command: &[&str]| LanguageConfig {
        image: image.to_string(),
        file_name: file.to_string(),
        command: command.iter().map(|s| s.to_string()).collect(),
    };

    BTreeMap::from([
        (
            "python".to_string(),
            profile("python:alpine", "main.py", &["python", "main.py"]),
        ),
        (
            "ruby".to_string(),
            profile("ruby:alpine", "main.rb", &["ruby", "main.rb"]),
        ),
        (
            "javascript".to_string(),
            profile("node:alpine", "index.js", &["node", "index.js"]),
        ),
    ])
}
