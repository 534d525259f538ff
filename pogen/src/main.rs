//! Command-line front end for purchase-order generation

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{generate, settings};
use pogen_core::AppConfig;

/// Generate purchase-order workbooks from vendor quotations
#[derive(Parser)]
#[command(name = "pogen")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to config file (defaults to ./pogen.toml when present)
    #[arg(short, long, global = true, value_name = "TOML")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a quotation and fill the purchase-order template
    Generate(generate::GenerateArgs),

    /// Show or clear remembered form fields
    Settings(settings::SettingsArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = AppConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Generate(args) => generate::run(args, &config),
        Commands::Settings(args) => settings::run(args, &config),
    }
}
