//! # gazette-extract
//!
//! Extract student examination records from result-gazette tables and
//! reconcile them against a reference dataset.
//!
//! ## Why this crate?
//!
//! Gazette tables are irregular: a student's marks wrap onto several
//! physical rows, columns merge or shift from page to page, and most rows are
//! headers, legends or blank separators. A table extractor can recover the
//! cell grid, but turning that grid into one typed record per student (and
//! noticing when it went wrong) is the hard part. This crate does exactly
//! that, and delegates the geometry to an external table extractor.
//!
//! ## Pipeline Overview
//!
//! ```text
//! gazette (PDF / URL / grid dump)
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Grid      per-page table grids from the extractor (spawn_blocking)
//!  ├─ 3. Segment   anchor on registration numbers, one block per student
//!  ├─ 4. Fields    subject codes → names, marks → typed values, flags
//!  ├─ 5. Merge     per-page record sets, duplicate policy, conflicts
//!  └─ 6. Reconcile matched / missing / extra against a reference dataset
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gazette_extract::{extract, reconcile, report, ExtractionConfig, ReconcileOptions};
//! use gazette_extract::pipeline::identifier::IdentifierValidator;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::builder()
//!         .extractor("camelot-grid")
//!         .build()?;
//!     let output = extract("gazette.pdf", &config).await?;
//!     eprintln!("{} records from {} pages", output.stats.records, output.stats.processed_pages);
//!
//!     let reference = report::load_reference(
//!         "reference.json",
//!         &config.subjects,
//!         &IdentifierValidator::new(&config.identifier)?,
//!     )
//!     .await?;
//!     let diff = reconcile(&reference, &output.records, &ReconcileOptions::default());
//!     println!("missing: {:?}", diff.missing);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `gazette` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! gazette-extract = { version = "0.5", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod reconcile;
pub mod report;
pub mod stream;
pub mod subjects;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DuplicatePolicy, ExtractionConfig, ExtractionConfigBuilder, GridOptions, PageSelection};
pub use error::{GazetteError, GridSourceError, PageError};
pub use extract::{extract, extract_grids, extract_sync, extract_to_file, records_from_grid};
pub use model::{
    Identifier, MarkValue, Provenance, RecordFlag, RecordSet, StudentRecord, SubjectMark, TableGrid,
};
pub use output::{ExtractionOutput, ExtractionStats, GridOutput, PageResult};
pub use pipeline::grid::{CommandGridSource, DumpGridSource, GridSource};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback};
pub use reconcile::{reconcile, FieldMismatch, ReconcileOptions, ReconciliationReport};
pub use stream::extract_stream;
pub use subjects::SubjectTable;
