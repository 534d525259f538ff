//! Form handling and the background generation worker
//!
//! Validation runs on the caller's thread. A valid request is handed to a
//! worker thread; at most one is in flight. The worker reports back over a
//! channel, so only the receiving (UI) thread ever acts on the outcome.

use chrono::{Local, NaiveDate};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::{PoError, Result, ValidationError};
use crate::extract::{Extractor, ReferenceArchive};
use crate::model::HeaderInfo;
use crate::populate::{GeneratedDocument, Populator};
use crate::settings::{SettingsRepository, UserSettings};

/// Fields entered by the user for one purchase order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormInput {
    pub po_number: String,
    pub issue_date: NaiveDate,
    pub project_name: String,
    pub purchaser_name: String,
    pub phone_code: String,
    pub phone_number: String,
    pub manager_name: String,
    pub quotation_file: PathBuf,
    pub remember: bool,
}

impl FormInput {
    /// Form pre-filled from remembered settings, dated `issue_date`
    pub fn from_settings(settings: &UserSettings, issue_date: NaiveDate) -> Self {
        Self {
            po_number: settings.po_number.clone(),
            issue_date,
            project_name: settings.project_name.clone(),
            purchaser_name: settings.purchaser_name.clone(),
            phone_code: settings.phone_code.clone(),
            phone_number: settings.phone_number.clone(),
            manager_name: settings.manager_name.clone(),
            quotation_file: PathBuf::new(),
            remember: settings.remember,
        }
    }

    /// Check required fields (all reported at once), the PO number format,
    /// then that the quotation file exists
    pub fn validate(&self) -> std::result::Result<HeaderInfo, ValidationError> {
        let required = [
            ("PO Number", self.po_number.trim().is_empty()),
            ("Project Name", self.project_name.trim().is_empty()),
            ("Purchaser Name", self.purchaser_name.trim().is_empty()),
            ("Quotation PDF", self.quotation_file.as_os_str().is_empty()),
        ];
        let missing: Vec<String> = required
            .iter()
            .filter(|(_, is_missing)| *is_missing)
            .map(|(name, _)| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields(missing));
        }

        let header = HeaderInfo::new(
            self.po_number.trim(),
            self.issue_date,
            self.project_name.trim(),
            self.purchaser_name.trim(),
            self.purchaser_phone(),
            self.manager_name.trim(),
        )?;

        if !self.quotation_file.is_file() {
            return Err(ValidationError::FileNotFound(self.quotation_file.clone()));
        }

        Ok(header)
    }

    /// Country code and number joined, empty when no number was entered
    pub fn purchaser_phone(&self) -> String {
        let number = self.phone_number.trim();
        if number.is_empty() {
            String::new()
        } else {
            format!("{}{}", self.phone_code.trim(), number)
        }
    }

    /// Suggested file name for the permanent copy
    pub fn default_file_name(&self) -> String {
        let po_number = self.po_number.trim();
        if po_number.is_empty() {
            format!("PO_{}.xlsx", Local::now().format("%Y%m%d_%H%M%S"))
        } else {
            format!("{}.xlsx", po_number)
        }
    }

    pub fn to_settings(&self) -> UserSettings {
        UserSettings {
            po_number: self.po_number.clone(),
            project_name: self.project_name.clone(),
            purchaser_name: self.purchaser_name.clone(),
            phone_code: self.phone_code.clone(),
            phone_number: self.phone_number.clone(),
            manager_name: self.manager_name.clone(),
            remember: self.remember,
        }
    }
}

/// Progress reported by the worker
#[derive(Debug)]
pub enum GenerationEvent {
    Started { po_number: String },
    Finished(Result<GeneratedDocument>),
}

/// Clears the in-flight flag when dropped, including during a panic
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Everything the worker needs, cloned out of the controller per run
#[derive(Clone)]
struct Pipeline {
    extractor: Arc<dyn Extractor>,
    populator: Populator,
    archive: ReferenceArchive,
    template: PathBuf,
    temp_dir: PathBuf,
}

impl Pipeline {
    fn run(&self, quotation: &Path, header: &HeaderInfo) -> Result<GeneratedDocument> {
        let document = fs::read(quotation)?;
        info!(
            extractor = self.extractor.name(),
            file = %quotation.display(),
            "Extracting quotation"
        );
        let record = self.extractor.extract(&document)?;

        if let Err(e) = self.archive.record(&record, header) {
            warn!(error = %e, "Could not write reference log entry");
        }

        self.populator
            .populate(&self.template, header, &record, &self.temp_dir)
    }
}

/// Single-flight coordinator between the form and the generation pipeline
pub struct Controller {
    pipeline: Pipeline,
    settings: SettingsRepository,
    in_flight: Arc<AtomicBool>,
    events: Sender<GenerationEvent>,
}

impl Controller {
    /// Create a controller and the receiving end of its event channel
    pub fn new(
        config: &AppConfig,
        extractor: Arc<dyn Extractor>,
        settings: SettingsRepository,
    ) -> (Self, Receiver<GenerationEvent>) {
        let (events, receiver) = mpsc::channel();
        let controller = Self {
            pipeline: Pipeline {
                extractor,
                populator: Populator::new(config.layout.clone()),
                archive: ReferenceArchive::new(&config.paths.archive_dir),
                template: config.paths.template.clone(),
                temp_dir: config.paths.temp_dir.clone(),
            },
            settings,
            in_flight: Arc::new(AtomicBool::new(false)),
            events,
        };
        (controller, receiver)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn settings(&self) -> &SettingsRepository {
        &self.settings
    }

    /// Validate `form` and start a generation run on a worker thread.
    ///
    /// Fails with `Validation` before any work, or with `Busy` while another
    /// run is in flight. The outcome arrives as [`GenerationEvent::Finished`].
    pub fn submit(&self, form: &FormInput) -> Result<JoinHandle<()>> {
        let header = form.validate()?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PoError::Busy);
        }
        let guard = InFlightGuard(Arc::clone(&self.in_flight));

        let pipeline = self.pipeline.clone();
        let events = self.events.clone();
        let quotation = form.quotation_file.clone();

        let handle = thread::Builder::new()
            .name("po-generation".to_string())
            .spawn(move || {
                let _ = events.send(GenerationEvent::Started {
                    po_number: header.po_number().to_string(),
                });

                let result = {
                    let _guard = guard;
                    panic::catch_unwind(AssertUnwindSafe(|| pipeline.run(&quotation, &header)))
                        .unwrap_or_else(|_| {
                            error!("Generation worker panicked");
                            Err(PoError::Io(std::io::Error::other(
                                "generation worker panicked",
                            )))
                        })
                };

                if let Err(e) = &result {
                    error!(kind = ?e.kind(), error = %e, "Generation failed");
                }
                let _ = events.send(GenerationEvent::Finished(result));
            })?;

        Ok(handle)
    }

    /// Store the form when the user asked to be remembered, otherwise reset
    /// the stored settings
    pub fn commit_settings(&self, form: &FormInput) -> Result<()> {
        if form.remember {
            self.settings.save(&form.to_settings())
        } else {
            self.settings.save(&UserSettings::default())
        }
    }
}
