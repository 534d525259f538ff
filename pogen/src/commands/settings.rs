//! Settings command - show or clear remembered form fields

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::*;

use pogen_core::{AppConfig, SettingsRepository};

#[derive(Args)]
pub struct SettingsArgs {
    #[command(subcommand)]
    command: SettingsCommand,
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// Print the remembered fields
    Show,

    /// Reset the remembered fields to defaults
    Clear,
}

pub fn run(args: SettingsArgs, config: &AppConfig) -> Result<()> {
    let repo = SettingsRepository::new(&config.paths.settings_file);

    match args.command {
        SettingsCommand::Show => {
            let settings = repo.load();
            println!("{} {}", "Settings:".bold(), repo.path().display());
            let rows = [
                ("PO number", settings.po_number.as_str()),
                ("Project name", settings.project_name.as_str()),
                ("Purchaser", settings.purchaser_name.as_str()),
                ("Phone code", settings.phone_code.as_str()),
                ("Phone number", settings.phone_number.as_str()),
                ("Manager", settings.manager_name.as_str()),
            ];
            for (label, value) in rows {
                println!("  {:<14} {}", format!("{}:", label), value);
            }
            println!(
                "  {:<14} {}",
                "Remember:",
                if settings.remember {
                    "yes".green()
                } else {
                    "no".yellow()
                }
            );
        }
        SettingsCommand::Clear => {
            repo.clear()?;
            println!("{}", "✓ Remembered settings cleared".green());
        }
    }

    Ok(())
}
