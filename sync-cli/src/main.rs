use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mirror_sync::{BackendHandle, ComparisonReport, DestinationTable, PullReport, ScanReport, SyncEngine};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, info};

mod config;
mod logging;

use config::{default_config_path, MirrorConfig};

#[derive(Parser)]
#[command(name = "mirror")]
#[command(about = "Mirror a content tree into relational tables")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Content tree root, overriding the config
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what a pull would change
    Scan {
        #[arg(long)]
        json: bool,
    },
    /// Apply every pending change to storage
    Pull {
        #[arg(long)]
        json: bool,
    },
    /// Compare the tree against the live contents of a table
    Compare {
        /// Destination table name, e.g. collections or config_files
        #[arg(short, long)]
        table: String,
        #[arg(long)]
        json: bool,
    },
    /// Create the manifest and destination tables
    InitSchema,
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default config file
    Generate {
        /// Where to write it (defaults to --config)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective config with secrets masked
    Show,
    /// Check the effective config
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = MirrorConfig::load_or_default(&config_path).await?;
    config.apply_env_overrides();
    if let Some(root) = &cli.root {
        config.scan.root = root.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    let _guard = logging::init(&config.logging)?;

    match cli.command {
        Commands::Config { action } => run_config(action, &config, &config_path).await,
        command => {
            config.validate().context("Invalid configuration")?;
            run_engine(command, &config).await
        }
    }
}

async fn run_config(action: ConfigAction, config: &MirrorConfig, config_path: &Path) -> Result<()> {
    match action {
        ConfigAction::Generate { output, force } => {
            let path = output.unwrap_or_else(|| config_path.to_path_buf());
            if path.exists() && !force {
                anyhow::bail!("{} already exists, pass --force to overwrite", path.display());
            }
            MirrorConfig::default().save(&path).await?;
            println!("Wrote default config to {}", path.display());
        }
        ConfigAction::Show => {
            print!("{}", config.redacted().to_toml()?);
        }
        ConfigAction::Validate => {
            config.validate()?;
            println!("Configuration is valid");
        }
    }
    Ok(())
}

async fn run_engine(command: Commands, config: &MirrorConfig) -> Result<()> {
    let handle = BackendHandle::new(config.backend.clone());
    let result = execute(command, config, &handle).await;
    handle.close().await;
    result
}

async fn execute(command: Commands, config: &MirrorConfig, handle: &BackendHandle) -> Result<()> {
    let engine = SyncEngine::from_handle(config.sync_options(), handle).await?;
    if let Some(kind) = handle.kind().await {
        info!("Using the {} backend", kind);
    }

    match command {
        Commands::Scan { json } => {
            let report = engine.scan().await?;
            if json {
                print_json(&report)?;
            } else {
                print_scan(&report);
            }
        }
        Commands::Pull { json } => {
            let report = engine.pull().await?;
            for failure in &report.failures {
                error!("Failed to apply {} ({}): {}", failure.path, failure.status, failure.message);
            }
            if json {
                print_json(&report)?;
            } else {
                print_pull(&report);
            }
        }
        Commands::Compare { table, json } => {
            let table = DestinationTable::from_str(&table)?;
            let report = engine.compare_tree(table).await?;
            if json {
                print_json(&report)?;
            } else {
                print_comparison(&report);
            }
        }
        Commands::InitSchema => {
            if engine.ensure_schema().await? {
                println!("Schema is ready");
            } else {
                println!("The active backend manages its own schema, nothing to do");
            }
        }
        Commands::Config { .. } => anyhow::bail!("config commands do not use a backend"),
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_scan(report: &ScanReport) {
    println!(
        "{} files scanned: {} new, {} modified, {} deleted",
        report.files_scanned, report.new_files, report.modified_files, report.deleted_files
    );
    for change in &report.changes {
        println!("  {:<8} {:<13} {}", change.status, change.table, change.path);
    }
    for path in &report.unreadable_files {
        println!("  unreadable {}", path);
    }
}

fn print_pull(report: &PullReport) {
    print_scan(&report.scan);
    println!(
        "Applied {} changes, {} failed, in {}ms",
        report.applied,
        report.failures.len(),
        report.duration_ms
    );
    for failure in &report.failures {
        println!("  FAILED {} ({}): {}", failure.path, failure.status, failure.message);
    }
}

fn print_comparison(report: &ComparisonReport) {
    let summary = &report.summary;
    println!(
        "{}: {} declared, {} similar, {} different, {} missing",
        report.table, summary.declared, summary.similar, summary.different, summary.missing
    );
    for file in &report.different {
        println!(
            "  different {} (declared {}, live {})",
            file.filename, file.declared_hash, file.live_hash
        );
    }
    for file in &report.missing {
        println!("  missing   {}", file.filename);
    }
}
