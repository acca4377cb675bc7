#![forbid(unsafe_code)]

//! Core engine for the Scout telemetry dataset.
//!
//! This crate provides:
//! - Data model (readings, treatments, device status, snapshots)
//! - Snapshot and treatment merging
//! - Duration resolution and treatment classification
//! - Profile resolution
//! - Partitioning and entry projection
//! - Persistence (dataset cache, snapshot journal, CSV export)

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod units;
pub mod merge;
pub mod durations;
pub mod classify;
pub mod profile;
pub mod entries;
pub mod status;
pub mod partition;
pub mod engine;
pub mod cache;
pub mod journal;
pub mod export;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use classify::{classify, ClassifiedTreatments, TreatmentCategory};
pub use profile::{ProfileField, ProfileResolver, ProfileTreatments, TempBasalState};
pub use entries::{project_entries, EntryPoint};
pub use partition::{split_recent, SplitPayload};
pub use engine::{apply_snapshot, Dataset, DatasetSummary};
pub use journal::{journal_path, read_snapshots, JsonlJournal, SnapshotSink};
pub use export::append_entries_csv;
