use std::collections::BTreeMap;

use crate::config::types::LanguageConfig;
use crate::error::{Result, RunnerError};

/// Static description of how to run one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionProfile {
    /// Opaque identity of the isolated environment (image name for docker)
    pub runtime: String,
    /// File name the source is materialized under
    pub file_name: String,
    /// Invocation command, run from the directory holding the staged file
    pub command: Vec<String>,
}

impl From<&LanguageConfig> for ExecutionProfile {
    fn from(config: &LanguageConfig) -> Self {
        Self {
            runtime: config.image.clone(),
            file_name: config.file_name.clone(),
            command: config.command.clone(),
        }
    }
}

/// Immutable mapping from language identifier to execution profile.
///
/// Built once at startup and shared by reference; there is no way to mutate
/// it after construction, so concurrent lookups need no locking.
#[derive(Debug, Clone, Default)]
pub struct LanguageProfileRegistry {
    profiles: BTreeMap<String, ExecutionProfile>,
}

impl LanguageProfileRegistry {
    pub fn new<I, K>(profiles: I) -> Self
    where
        I: IntoIterator<Item = (K, ExecutionProfile)>,
        K: Into<String>,
    {
        Self {
            profiles: profiles.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn from_config(languages: &BTreeMap<String, LanguageConfig>) -> Self {
        Self::new(
            languages
                .iter()
                .map(|(id, config)| (id.clone(), ExecutionProfile::from(config))),
        )
    }

    /// Resolve a language identifier, failing fast for unknown ones.
    pub fn lookup(&self, language: &str) -> Result<&ExecutionProfile> {
        self.profiles
            .get(language)
            .ok_or_else(|| RunnerError::UnsupportedLanguage {
                language: language.to_string(),
            })
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExecutionProfile)> {
        self.profiles.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
