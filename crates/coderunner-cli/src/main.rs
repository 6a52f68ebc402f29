//! Coderunner CLI
//!
//! A command-line tool for running code in per-language container sandboxes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coderunner::{
    Config, EXAMPLE_CONFIG, ExecutionLimits, ExecutionRequest, Runner, TerminalReason,
};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coderunner")]
#[command(about = "A tool for running untrusted code in container sandboxes")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: coderunner.toml)
        #[arg(short, long, default_value = "coderunner.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a program (compile if needed, then execute)
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language ID (e.g., cpp, python)
        #[arg(short, long)]
        language: String,

        /// File whose contents become the program's standard input
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Wall time limit in seconds
        #[arg(short, long)]
        time_limit: Option<f64>,

        /// Output limit per channel in bytes
        #[arg(short, long)]
        output_limit: Option<u64>,
    },

    /// Provision a language's sandbox ahead of its first run
    Start {
        /// Language ID
        language: String,
    },

    /// Force-recreate a language's sandbox, interrupting any running program
    Stop {
        /// Language ID
        language: String,
    },

    /// Show the state of every sandbox
    List,

    /// List available languages
    Languages,

    /// Show loaded configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Run {
            source,
            language,
            input,
            time_limit,
            output_limit,
        } => {
            run_execute(
                config,
                &source,
                &language,
                input.as_deref(),
                time_limit,
                output_limit,
            )
            .await
        }
        Commands::Start { language } => start_sandbox(config, &language).await,
        Commands::Stop { language } => stop_sandbox(config, &language).await,
        Commands::List => list_sandboxes(config).await,
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

/// Create a runner that picks up sandboxes left running by earlier invocations
async fn connect(config: Config) -> Result<Runner> {
    let runner = Runner::new(config);
    let adopted = runner
        .sync_with_engine()
        .await
        .context("failed to query container engine")?;
    debug!(adopted, "existing sandboxes adopted");
    Ok(runner)
}

async fn run_execute(
    config: Config,
    source: &Path,
    language_id: &str,
    input: Option<&Path>,
    time_limit: Option<f64>,
    output_limit: Option<u64>,
) -> Result<()> {
    let language = config
        .get_language(language_id)
        .context("unknown language")?;
    info!(language = %language.name, "running program");

    let source_content = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let mut request = ExecutionRequest::new(language_id, source_content);
    if let Some(input_path) = input {
        let input_data = tokio::fs::read_to_string(input_path)
            .await
            .context("failed to read input file")?;
        request = request.with_stdin(input_data);
    }

    // Only explicitly-specified values, so they don't override per-language defaults
    if time_limit.is_some() || output_limit.is_some() {
        request = request.with_limits(ExecutionLimits {
            wall_time_limit: time_limit,
            max_output: output_limit,
            ..ExecutionLimits::unset()
        });
    }

    let runner = connect(config).await?;
    let result = runner
        .execute(request)
        .await
        .context("execution failed")?;

    // Output results
    if !result.stdout.is_empty() {
        print!("{}", result.stdout);
    }
    if !result.stderr.is_empty() {
        eprint!("{}", result.stderr);
    }

    // Log execution info via tracing (stderr), keeping stdout clean for piping
    info!(
        reason = ?result.terminal_reason,
        elapsed = format_args!("{:.3}s", result.elapsed.as_secs_f64()),
        exit_code = result.exit_code,
        failed_step = ?result.failed_step,
        "execution result"
    );
    if let Some(error) = &result.recreation_error {
        warn!(%error, "sandbox recreation failed, it will be rebuilt on next use");
    }

    // Exit with appropriate code
    match result.terminal_reason {
        TerminalReason::Completed if result.exit_code.unwrap_or(0) == 0 => Ok(()),
        TerminalReason::Completed => std::process::exit(result.exit_code.unwrap_or(1)),
        _ => std::process::exit(1),
    }
}

async fn start_sandbox(config: Config, language_id: &str) -> Result<()> {
    let runner = connect(config).await?;
    let info = runner
        .start_sandbox(language_id)
        .await
        .context("failed to start sandbox")?;

    println!(
        "Sandbox '{}' is {} ({})",
        info.name,
        info.state,
        info.engine_handle.as_deref().unwrap_or("no container")
    );
    Ok(())
}

async fn stop_sandbox(config: Config, language_id: &str) -> Result<()> {
    let runner = connect(config).await?;
    runner
        .stop_execution(language_id)
        .await
        .context("failed to stop sandbox")?;

    println!("Sandbox for '{language_id}' recreated");
    Ok(())
}

async fn list_sandboxes(config: Config) -> Result<()> {
    let runner = connect(config).await?;
    let sandboxes = runner.list_sandboxes();
    if sandboxes.is_empty() {
        warn!("no languages configured");
        return Ok(());
    }

    println!("Sandboxes:\n");
    for info in sandboxes {
        let container = match info.engine_handle {
            Some(ref handle) => handle.chars().take(12).collect::<String>(),
            None => "-".to_string(),
        };
        println!(
            "  {:<15} {:<30} {:<10} {}",
            info.language, info.name, info.state, container
        );
    }
    Ok(())
}

fn list_languages(config: &Config) {
    println!("Available languages:\n");

    let mut languages: Vec<_> = config.languages.iter().collect();
    languages.sort_by_key(|(id, _)| *id);

    for (id, lang) in languages {
        let lang_type = if lang.is_compiled() {
            "compiled"
        } else {
            "interpreted"
        };
        println!("  {:<15} {} ({}, {})", id, lang.name, lang_type, lang.image);
    }
}

fn show_config(config: &Config) {
    println!("Default limits:");
    println!(
        "  Wall time limit: {:?}",
        config.default_limits.wall_time_limit
    );
    println!("  Max output: {:?} bytes", config.default_limits.max_output);
    println!(
        "  Compile time limit: {:?}",
        config.default_limits.compile_time_limit
    );
    println!();
    println!("Docker binary: {}", config.docker_binary().display());
    println!("Container prefix: {}", config.container_prefix);
    println!("Working directory: {}", config.working_dir);
    println!("Build root: {}", config.build_root.display());
    println!("Acquire timeout: {}s", config.acquire_timeout);
    println!("Recreate after each run: {}", config.recreate_after_each_run);
    println!();
    println!("Languages configured: {}", config.languages.len());
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
