use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Engine errors
    #[error("Unsupported language: {language}")]
    UnsupportedLanguage { language: String },

    #[error("Failed to stage workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("Failed to launch '{backend}' sandbox: {reason}")]
    Launch { backend: String, reason: String },

    #[error("Backend '{backend}' is not available: {reason}")]
    BackendNotAvailable { backend: String, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RunnerError {
    /// Errors that mean the environment failed, as opposed to bad caller input.
    pub fn is_system_error(&self) -> bool {
        matches!(
            self,
            Self::Workspace(_) | Self::Launch { .. } | Self::BackendNotAvailable { .. }
        )
    }

    pub(crate) fn launch(backend: &str, reason: impl Into<String>) -> Self {
        Self::Launch {
            backend: backend.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;
