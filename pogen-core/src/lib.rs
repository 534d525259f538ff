//! Purchase-order generation from vendor quotations
//!
//! A quotation is sent to an extraction service, the returned record is
//! merged with the purchaser's form fields, and the result is written into an
//! XLSX purchase-order template. The item table in the template grows when a
//! quotation has more lines than it reserves.
//!
//! ```no_run
//! use pogen_core::{AppConfig, Controller, FormInput, GenerationEvent, SettingsRepository};
//! use pogen_core::extract::CannedExtractor;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! let settings = SettingsRepository::new(&config.paths.settings_file);
//! let mut form = FormInput::from_settings(&settings.load(), chrono::Local::now().date_naive());
//! form.quotation_file = "quotation.pdf".into();
//!
//! let extractor = Arc::new(CannedExtractor::from_file("jsons/output_20250719_101500.json")?);
//! let (controller, events) = Controller::new(&config, extractor, settings);
//! controller.submit(&form)?;
//! while let Ok(event) = events.recv() {
//!     if let GenerationEvent::Finished(result) = event {
//!         result?.persist(Path::new(&form.default_file_name()))?;
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod extract;
pub mod model;
pub mod populate;
pub mod settings;
pub mod sheet;
pub mod text;

pub use config::{AppConfig, ExtractionConfig, PathsConfig, TemplateLayout};
pub use controller::{Controller, FormInput, GenerationEvent};
pub use error::{ErrorKind, PoError, Result, ValidationError};
pub use extract::{CannedExtractor, Extractor, ReferenceArchive, parse_response};
pub use model::{Contact, HeaderInfo, LineItem, SourceRecord, Terms};
pub use populate::{GeneratedDocument, PopulationSummary, Populator};
pub use settings::{SettingsRepository, UserSettings};
pub use sheet::{TableLayout, XlsxPackage};
