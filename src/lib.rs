//! pv-verify
//!
//! Rooftop solar verification: for each geocoded site, fetch imagery with
//! provider fallback, detect panels, estimate panel area and classify the
//! imagery's trustworthiness into one decision record.
//!
//! ## Architecture
//!
//! ```text
//! site_list ──▶ BatchRunner ──▶ SiteOrchestrator (per site)
//!                  │               ├── imagery::ProviderChain
//!                  │               ├── detection::DetectionAdapter
//!                  │               ├── quantify
//!                  │               └── qc::QualityController
//!                  └──▶ <id>.json, <id>_overlay.png, predictions.json
//! ```

pub mod batch;
pub mod config;
pub mod detection;
pub mod error;
pub mod imagery;
pub mod logging;
pub mod orchestrator;
pub mod overlay;
pub mod qc;
pub mod quantify;
pub mod record;
pub mod site;
pub mod site_list;

pub use batch::{AbortHandle, BatchRunner, BatchSummary};
pub use config::Config;
pub use error::{AppResult, BatchError, ConfigError};
pub use orchestrator::{OrchestratorSettings, SiteOrchestrator, SiteOutcome};
pub use record::{DecisionRecord, ImageMetadata};
pub use site::{SampleId, Site};
