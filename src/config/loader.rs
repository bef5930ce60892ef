use std::path::{Path, PathBuf};

use crate::config::types::RunnerConfig;
use crate::error::{Result, RunnerError};

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "coderunner", "coderunner") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        // Fallback to home directory
        dirs_fallback().join(".coderunner").join("config.toml")
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values.
///
/// An explicitly requested path must exist; the default path may be absent.
pub fn load_config(config_path: Option<&Path>) -> Result<RunnerConfig> {
    let path = match config_path {
        Some(path) => {
            if !path.exists() {
                return Err(RunnerError::ConfigNotFound {
                    path: path.display().to_string(),
                });
            }
            path.to_path_buf()
        }
        None => get_config_path(),
    };

    if !path.exists() {
        // Return defaults if no config file exists
        return Ok(RunnerConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<RunnerConfig> {
    let config: RunnerConfig =
        toml::from_str(content).map_err(|e| RunnerError::TomlParse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Render a configuration back to TOML.
pub fn render_config(config: &RunnerConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| RunnerError::Config(e.to_string()))
}
