use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::types::BackendType;

#[derive(Parser, Debug)]
#[clap(name = "coderunner")]
#[clap(version, about = "Run untrusted code snippets in isolated sandboxes")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "CODERUNNER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a source file in a sandbox
    Run(RunArgs),

    /// List the configured languages
    Languages,

    /// List isolation backends and whether they are usable here
    Backends,

    /// Write a default configuration file
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Source file to execute ("-" reads standard input)
    pub file: PathBuf,

    /// Language identifier (see `coderunner languages`)
    #[clap(long = "lang", short = 'l')]
    pub language: String,

    /// Deadline for the execution (e.g., "500ms", "5s", "1m")
    #[clap(long, short = 't', value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Backend override
    #[clap(long, value_enum)]
    pub backend: Option<BackendType>,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing configuration file
    #[clap(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the configuration file path
    Path,
}

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Parse a duration like "500ms", "30s", "5m" or a plain number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Duration must not be empty".to_string());
    }

    let (num_str, unit) = if let Some(n) = s.strip_suffix("ms") {
        (n, "ms")
    } else if let Some(n) = s.strip_suffix('s') {
        (n, "s")
    } else if let Some(n) = s.strip_suffix('m') {
        (n, "m")
    } else {
        (s, "s")
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("Invalid duration: {}", s))?;

    let duration = match unit {
        "ms" => Duration::from_millis(num),
        "m" => Duration::from_secs(num * 60),
        _ => Duration::from_secs(num),
    };

    if duration.is_zero() {
        return Err("Duration must be greater than zero".to_string());
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "coderunner", "run", "main.py", "--lang", "python", "-t", "3s", "--backend", "local",
        ]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.language, "python");
                assert_eq!(args.timeout, Some(Duration::from_secs(3)));
                assert_eq!(args.backend, Some(BackendType::Local));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
