pub mod loader;
pub mod types;

pub use loader::{get_config_path, load_config, parse_config, render_config};
pub use types::{BackendType, DockerConfig, EngineConfig, LanguageConfig, RunnerConfig};
