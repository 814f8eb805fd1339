//! # Taskforge Configuration Validator
//!
//! Command-line tool that loads the layered configuration for an environment,
//! validates it and prints the result with secrets masked.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use taskforge::config::ConfigManager;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate Taskforge configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production, ...)
    #[arg(short, long)]
    environment: Option<String>,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate the configuration (default)
    Validate,

    /// Print the effective configuration as JSON, secrets masked
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let environment = cli
        .environment
        .clone()
        .unwrap_or_else(ConfigManager::detect_environment);

    let manager = match ConfigManager::load_with_env(cli.config_dir.clone(), &environment) {
        Ok(manager) => manager,
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            println!("❌ {e}");
            process::exit(1);
        }
    };

    match cli.command.unwrap_or(Commands::Validate) {
        Commands::Validate => {
            let engine = &manager.config().engine;
            println!("🔧 Validating Taskforge Configuration");
            println!("Environment: {}", manager.environment());
            println!("Config Directory: {}", manager.config_directory().display());
            println!();
            println!(
                "✅ engine: {} concurrent item(s), {} attempt(s), {}ms backoff unit",
                engine.max_concurrent_items, engine.max_attempts, engine.retry_base_delay_ms
            );
            match &manager.config().database.url {
                Some(_) => println!("✅ database: PostgreSQL store"),
                None => println!("✅ database: in-memory store (no url configured)"),
            }
            println!("\n🎉 Configuration is valid");
        }
        Commands::Show => match serde_json::to_string_pretty(&manager.debug_config()) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => {
                error!("Failed to render configuration: {}", e);
                process::exit(1);
            }
        },
    }

    info!("Configuration validation completed successfully");
}
