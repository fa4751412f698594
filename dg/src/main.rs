//! digestd - background digest orchestration
//!
//! CLI entry point for running the daemon and inspecting digest state.

use std::fs;

use clap::Parser;
use colored::Colorize;
use digeststore::DigestStatus;
use eyre::{Context, Result};
use tracing::info;

use digestd::cli::{Cli, Command, OutputFormat, get_log_path};
use digestd::config::Config;
use digestd::coordinator::Reconciler;
use digestd::daemon::{build_registry, run_daemon};
use digestd::state::StateManager;

fn setup_logging(verbose: bool) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Write to the log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate()?;
    info!(
        db_path = %config.storage.db_path.display(),
        root = %config.library.root.display(),
        "digestd loaded config"
    );

    match cli.command {
        Some(Command::Run) => cmd_run(&config).await,
        Some(Command::Status { format }) => cmd_status(&config, format).await,
        Some(Command::Digests { path, format }) => cmd_digests(&config, &path, format).await,
        Some(Command::Reset { digester }) => cmd_reset(&config, &digester).await,
        Some(Command::Digesters { format }) => cmd_digesters(&config, format),
        Some(Command::Backfill) => cmd_backfill(&config).await,
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

fn open_state(config: &Config) -> Result<StateManager> {
    StateManager::spawn(&config.storage.db_path).context("Failed to open digest store")
}

fn colored_status(status: DigestStatus) -> colored::ColoredString {
    match status {
        DigestStatus::Completed => status.as_str().green(),
        DigestStatus::Failed => status.as_str().red(),
        DigestStatus::InProgress => status.as_str().yellow(),
        DigestStatus::Skipped => status.as_str().dimmed(),
        DigestStatus::Todo => status.as_str().normal(),
    }
}

/// Run the daemon in the foreground
async fn cmd_run(config: &Config) -> Result<()> {
    println!("Starting digestd in foreground mode...");
    println!("Library: {}", config.library.root.display());
    run_daemon(config).await?;
    println!("digestd stopped");
    Ok(())
}

/// Show digest counts
async fn cmd_status(config: &Config, format: OutputFormat) -> Result<()> {
    let state = open_state(config)?;
    let stats = state.digest_stats().await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        OutputFormat::Text => {
            println!("{}", "digestd Status".bold());
            println!("--------------");
            println!("Database: {}", config.storage.db_path.display());
            println!("Total digest rows: {}", stats.total);
            for status in DigestStatus::all() {
                println!("  {:<12} {}", colored_status(status), stats.count(status));
            }
            if !stats.by_digester.is_empty() {
                println!();
                println!("{}", "By digester".bold());
                for (digester, counts) in &stats.by_digester {
                    let parts: Vec<String> = counts.iter().map(|(s, n)| format!("{}={}", s, n)).collect();
                    println!("  {:<16} {}", digester, parts.join(" "));
                }
            }
        }
    }
    Ok(())
}

/// Show every row of one file
async fn cmd_digests(config: &Config, path: &str, format: OutputFormat) -> Result<()> {
    let state = open_state(config)?;
    let rows = state.list_digests(path).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("No digests for {}", path);
                return Ok(());
            }
            println!("{}", path.bold());
            for row in &rows {
                let detail = match (&row.error, &row.content) {
                    (Some(error), _) => error.red().to_string(),
                    (None, Some(content)) => format!("{} bytes", content.len()),
                    (None, None) => "-".dimmed().to_string(),
                };
                println!(
                    "  {:<16} {:<12} attempts={} {}",
                    row.digester,
                    colored_status(row.status),
                    row.attempts,
                    detail
                );
            }
        }
    }
    Ok(())
}

/// Reset one digester everywhere
async fn cmd_reset(config: &Config, digester: &str) -> Result<()> {
    let registry = build_registry(config)?;
    if !registry.all_digest_types().iter().any(|name| name == digester) {
        println!("{} '{}' is not a registered digester output", "warning:".yellow(), digester);
    }

    let state = open_state(config)?;
    let rows = state.reset_digester(digester).await?;
    println!("Reset {} rows of {} to todo", rows, digester);
    Ok(())
}

/// List registered digesters
fn cmd_digesters(config: &Config, format: OutputFormat) -> Result<()> {
    let registry = build_registry(config)?;
    let info = registry.info();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        OutputFormat::Text => {
            println!("Registered digesters (execution order):");
            for entry in info {
                println!("  {} - {}", entry.name.bold(), entry.label);
                if !entry.description.is_empty() {
                    println!("      {}", entry.description);
                }
                println!("      outputs: {}", entry.outputs.join(", "));
                if !entry.upstreams.is_empty() {
                    println!("      reads: {}", entry.upstreams.join(", "));
                }
            }
        }
    }
    Ok(())
}

/// Create missing rows for every catalogued file
async fn cmd_backfill(config: &Config) -> Result<()> {
    let registry = build_registry(config)?;
    let state = open_state(config)?;
    let reconciler = Reconciler::new(registry, state, config.library.excluded_prefixes.clone());

    let stats = reconciler.ensure_all_digesters_for_existing_files().await?;
    println!("Backfill complete: {}", stats);
    Ok(())
}
