use std::io::Write;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::cli::args::{ConfigAction, ConfigArgs, InitArgs, OutputFormat, RunArgs};
use crate::config::loader::{get_config_path, render_config};
use crate::config::types::RunnerConfig;
use crate::engine::{available_backends, Engine, ExecutionResult, LanguageProfileRegistry, Outcome};
use crate::error::{Result, RunnerError};

/// Process exit code used when the program ran past its deadline
pub const EXIT_TIMED_OUT: i32 = 124;

/// Execute a source file and print its result.
///
/// Returns the exit code the CLI should terminate with.
pub async fn run(args: RunArgs, mut config: RunnerConfig, format: OutputFormat) -> Result<i32> {
    info!(file = %args.file.display(), language = %args.language, "Running source file");

    if let Some(backend) = args.backend {
        config.engine.backend = backend;
    }

    let timeout = effective_timeout(args.timeout, &config);
    let source = read_source(&args.file).await?;

    let engine = Engine::from_config(&config)?;
    let result = engine
        .execute_with_timeout(source, args.language, timeout)
        .await?;

    output_execution_result(&result, timeout, format)?;

    Ok(match result.outcome {
        Outcome::Success => 0,
        Outcome::RuntimeFailure => 1,
        Outcome::TimedOut => EXIT_TIMED_OUT,
    })
}

/// List configured languages
pub async fn languages(config: RunnerConfig, format: OutputFormat) -> Result<()> {
    let registry = LanguageProfileRegistry::from_config(&config.languages);

    match format {
        OutputFormat::Text => {
            println!("{:<14} {:<20} {:<12} COMMAND", "LANGUAGE", "IMAGE", "FILE");
            println!("{}", "-".repeat(60));
            for (id, profile) in registry.iter() {
                println!(
                    "{:<14} {:<20} {:<12} {}",
                    id,
                    profile.runtime,
                    profile.file_name,
                    profile.command.join(" ")
                );
            }
        }
        OutputFormat::Json => {
            let json: Vec<_> = registry
                .iter()
                .map(|(id, profile)| {
                    serde_json::json!({
                        "language": id,
                        "image": profile.runtime,
                        "file_name": profile.file_name,
                        "command": profile.command,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }

    Ok(())
}

/// List isolation backends
pub async fn backends(config: RunnerConfig, format: OutputFormat) -> Result<()> {
    let infos = available_backends(&config).await;

    match format {
        OutputFormat::Text => {
            for info in &infos {
                let status = if info.available {
                    "available".to_string()
                } else {
                    format!(
                        "unavailable ({})",
                        info.unavailable_reason.unwrap_or("unknown reason")
                    )
                };
                let isolation = if info.isolated { "isolated" } else { "no isolation" };
                println!(
                    "{:<8} {:<56} {:<13} {}",
                    info.name, info.description, isolation, status
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&infos)?);
        }
    }

    Ok(())
}

/// Write a default configuration file
pub async fn init(args: InitArgs) -> Result<()> {
    let path = get_config_path();

    if path.exists() && !args.force {
        return Err(RunnerError::Config(format!(
            "Configuration already exists at {} (use --force to overwrite)",
            path.display()
        )));
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, render_config(&RunnerConfig::default())?).await?;

    println!("Wrote configuration to {}", path.display());
    Ok(())
}

/// Manage configuration
pub async fn config(args: ConfigArgs, config: RunnerConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => print!("{}", render_config(&config)?),
        ConfigAction::Path => println!("{}", get_config_path().display()),
    }
    Ok(())
}

/// Apply the configured default and ceiling to a requested timeout.
fn effective_timeout(requested: Option<Duration>, config: &RunnerConfig) -> Duration {
    let max = Duration::from_secs(config.engine.max_timeout_seconds);
    match requested {
        Some(timeout) if timeout > max => {
            warn!(
                requested_ms = timeout.as_millis() as u64,
                max_ms = max.as_millis() as u64,
                "Requested timeout exceeds the configured maximum, clamping"
            );
            max
        }
        Some(timeout) => timeout,
        None => Duration::from_secs(config.engine.default_timeout_seconds),
    }
}

async fn read_source(path: &std::path::Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut source = String::new();
        tokio::io::stdin().read_to_string(&mut source).await?;
        Ok(source)
    } else {
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

fn output_execution_result(
    result: &ExecutionResult,
    timeout: Duration,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Text => {
            print!("{}", result.stdout);
            std::io::stdout().flush()?;
            eprint!("{}", result.stderr);

            if result.truncated {
                eprintln!("[output truncated]");
            }
            if result.outcome == Outcome::TimedOut {
                eprintln!("Execution timed out after {:?}", timeout);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(result)?);
        }
    }
    Ok(())
}
