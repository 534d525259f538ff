//! Generate command - one quotation in, one purchase order out

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use pogen_core::extract::GeminiExtractor;
use pogen_core::{
    AppConfig, CannedExtractor, Controller, ErrorKind, Extractor, FormInput, GenerationEvent,
    SettingsRepository, ValidationError, text,
};

#[derive(Args)]
pub struct GenerateArgs {
    /// Vendor quotation (PDF)
    #[arg(short, long, value_name = "PDF")]
    quotation: PathBuf,

    /// PO number, e.g. P-250719-001M
    #[arg(long)]
    po_number: Option<String>,

    #[arg(long)]
    project_name: Option<String>,

    /// Purchaser name
    #[arg(long)]
    purchaser: Option<String>,

    /// Phone country code, e.g. +60
    #[arg(long)]
    phone_code: Option<String>,

    /// Purchaser phone number without the country code
    #[arg(long)]
    phone: Option<String>,

    /// Approving manager or director
    #[arg(long)]
    manager: Option<String>,

    /// Issue date (defaults to today)
    #[arg(long, value_name = "DD/MM/YYYY")]
    date: Option<String>,

    /// Replay a recorded extraction response instead of calling the service
    #[arg(long, value_name = "JSON")]
    record: Option<PathBuf>,

    /// Save the purchase order here (file or directory); without it the
    /// transient file is kept
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Remember the form fields for next time
    #[arg(long, conflicts_with = "forget")]
    remember: bool,

    /// Forget remembered form fields after this run
    #[arg(long)]
    forget: bool,
}

pub fn run(args: GenerateArgs, config: &AppConfig) -> Result<()> {
    let settings = SettingsRepository::new(&config.paths.settings_file);
    let form = build_form(&args, &settings)?;

    let extractor: Arc<dyn Extractor> = match &args.record {
        Some(path) => Arc::new(
            CannedExtractor::from_file(path)
                .with_context(|| format!("Failed to read recorded response {}", path.display()))?,
        ),
        None => Arc::new(GeminiExtractor::from_config(&config.extraction)?),
    };
    debug!(extractor = extractor.name(), "Extractor ready");

    let (controller, events) = Controller::new(config, extractor, settings);
    let handle = controller.submit(&form)?;

    let mut outcome = None;
    for event in events.iter() {
        match event {
            GenerationEvent::Started { po_number } => {
                println!("{} {}", "Generating purchase order".bold(), po_number.cyan());
            }
            GenerationEvent::Finished(result) => {
                outcome = Some(result);
                break;
            }
        }
    }
    if handle.join().is_err() {
        anyhow::bail!("Generation worker stopped unexpectedly");
    }

    let document = match outcome {
        Some(Ok(document)) => document,
        Some(Err(e)) => {
            println!("{} {}", "✗".red().bold(), e);
            if e.kind() == ErrorKind::Parse {
                if let Some(raw) = e.raw_response() {
                    eprintln!("Raw response from the extraction service:\n{}", raw);
                }
            }
            return Err(e.into());
        }
        None => anyhow::bail!("Generation finished without a result"),
    };

    println!(
        "{} Total: RM {}",
        "✓ Purchase order generated.".green().bold(),
        document.total_cost.round_dp(2)
    );
    if document.inserted_rows > 0 {
        println!("  Item table expanded by {} rows", document.inserted_rows);
    }

    match &args.output {
        Some(output) => {
            let dest = resolve_output(output, &form.default_file_name());
            let saved = document.persist(&dest)?;
            println!("{} {}", "Saved:".bold(), saved.display());
        }
        None => {
            println!("{} {}", "Transient file:".bold(), document.path.display());
        }
    }

    controller.commit_settings(&form)?;
    Ok(())
}

/// Command-line values first, remembered settings for anything not given
fn build_form(args: &GenerateArgs, settings: &SettingsRepository) -> Result<FormInput> {
    let issue_date = match &args.date {
        Some(date) => text::parse_date(date)
            .ok_or_else(|| ValidationError::InvalidDate(date.clone()))?,
        None => Local::now().date_naive(),
    };

    let stored = settings.load();
    let mut form = FormInput::from_settings(&stored, issue_date);
    form.quotation_file = args.quotation.clone();

    let overrides = [
        (&args.po_number, &mut form.po_number),
        (&args.project_name, &mut form.project_name),
        (&args.purchaser, &mut form.purchaser_name),
        (&args.phone_code, &mut form.phone_code),
        (&args.phone, &mut form.phone_number),
        (&args.manager, &mut form.manager_name),
    ];
    for (value, field) in overrides {
        if let Some(value) = value {
            *field = value.clone();
        }
    }

    if args.remember {
        form.remember = true;
    } else if args.forget {
        form.remember = false;
    }

    Ok(form)
}

fn resolve_output(output: &Path, default_name: &str) -> PathBuf {
    if output.is_dir() {
        output.join(default_name)
    } else {
        output.to_path_buf()
    }
}
