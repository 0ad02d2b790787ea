//! Agora CLI - Command-line tools for the agora governance engine.
//!
//! Writes and checks governance config files and replays JSON scripts
//! against a fresh engine, printing one JSON outcome per step.

pub mod config;
pub mod replay;
pub mod telemetry;

use std::path::PathBuf;

use agora_governance::{Collaborators, Engine, GovernanceConfig};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "agora")]
#[command(about = "Agora - token-weighted governance engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(short, long, global = true, default_value = "warn", env = "AGORA_LOG")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a config file with default values
    InitConfig {
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a config file
    CheckConfig { path: PathBuf },

    /// Replay a JSON script against a fresh engine
    Replay {
        script: PathBuf,

        /// Config file (defaults are used otherwise)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Stop at the first failing step and exit non-zero
        #[arg(long)]
        strict: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = telemetry::init_telemetry(&cli.log_level, cli.json_logs) {
        eprintln!("{}", format!("Error: {}", e).red());
        std::process::exit(1);
    }

    if let Err(e) = execute(cli.command) {
        eprintln!("{}", format!("Error: {:#}", e).red());
        std::process::exit(1);
    }
}

fn execute(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::InitConfig { path, force } => {
            config::write_config(&path, &GovernanceConfig::default(), force)?;
            println!("{}", format!("✓ Wrote default config to {}", path.display()).green());
        }
        Commands::CheckConfig { path } => {
            let config = config::load_config(&path)?;
            println!("{}", format!("✓ {} is valid", path.display()).green());
            println!(
                "  voting period {} / execution delay {} / default strategy {}",
                config.lifecycle.voting_period,
                config.lifecycle.execution_delay,
                config.strategies.default_strategy.name()
            );
        }
        Commands::Replay { script, config, strict } => {
            let governance = match &config {
                Some(path) => config::load_config(path)?,
                None => GovernanceConfig::default(),
            };
            if script.to_string_lossy().contains("..") {
                anyhow::bail!("Invalid path: directory traversal detected");
            }
            let contents = std::fs::read_to_string(&script)
                .map_err(|e| anyhow::anyhow!("Failed to read script '{}': {}", script.display(), e))?;
            let parsed = replay::parse_script(&contents)?;

            let engine = Engine::new(&governance, parsed.admin, Collaborators::for_admin(parsed.admin))?;
            info!(steps = parsed.steps.len(), admin = %parsed.admin, "replaying script");

            let outcomes = replay::run(&engine, &parsed, strict);
            for outcome in &outcomes {
                println!("{}", serde_json::to_string(outcome)?);
            }
            println!("{}", serde_json::to_string_pretty(&replay::summary(&engine))?);

            let failures = outcomes.iter().filter(|o| !o.ok).count();
            if failures > 0 {
                eprintln!("{}", format!("⚠ {} of {} steps failed", failures, outcomes.len()).yellow());
                if strict {
                    anyhow::bail!("replay stopped at step {}", outcomes.len() - 1);
                }
            }
        }
    }
    Ok(())
}
