//! Error types for the gazette-extract library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`GazetteError`] - **Fatal**: extraction cannot proceed at all
//!   (missing document, no grid source configured, unreadable reference
//!   file). Returned as `Err(GazetteError)` from the top-level `extract*`
//!   functions.
//!
//! * [`PageError`] - **Non-fatal**: the grid source failed on a single page
//!   but every other page is fine. Stored inside
//!   [`crate::output::PageResult`] so callers see partial success rather than
//!   losing a whole gazette to one bad page.
//!
//! * [`GridSourceError`] - raised by [`crate::pipeline::grid::GridSource`]
//!   implementations and converted into a [`PageError`] by the orchestrator.
//!
//! Record-level anomalies (malformed identifiers, ambiguous blocks, unknown
//! subject codes, unparseable marks) are not errors at all: they travel as
//! [`crate::model::RecordFlag`] values on the affected record.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the gazette-extract library.
#[derive(Debug, Error)]
pub enum GazetteError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The grid source needs a PDF but the file is something else.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// Selected page numbers exceed the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    // ── Grid source errors ────────────────────────────────────────────────
    /// No grid source could be resolved for the input.
    #[error("No table-extraction backend is configured for '{input}'.\n{hint}")]
    GridSourceNotConfigured { input: String, hint: String },

    /// The grid source could not even report how many pages the document has.
    #[error("Grid source '{source_name}' cannot read '{path}': {detail}")]
    GridSourceUnavailable {
        source_name: String,
        path: PathBuf,
        detail: String,
    },

    /// Every selected page failed; there is nothing to return.
    #[error("All {total} pages failed.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    /// Some pages succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::ExtractionOutput::into_result`] when
    /// the caller wants to treat any page failure as an error.
    #[error("{failed}/{total} pages failed during extraction")]
    PartialFailure {
        success: usize,
        failed: usize,
        total: usize,
    },

    // ── Reference / JSON errors ───────────────────────────────────────────
    /// The reference dataset could not be read.
    #[error("Failed to load reference dataset '{path}': {detail}")]
    ReferenceLoadFailed { path: PathBuf, detail: String },

    /// A JSON document (record set, grid dump, subject table) did not parse.
    #[error("Malformed JSON in {what}: {source}")]
    MalformedJson {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Stored in [`crate::output::PageResult`] when a page fails. The overall
/// extraction continues unless ALL pages fail.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The external table extractor failed on this page.
    #[error("Page {page}: grid extraction failed: {detail}")]
    GridSourceFailed { page: usize, detail: String },

    /// The external table extractor did not answer in time.
    #[error("Page {page}: grid extraction timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

impl PageError {
    /// 1-indexed page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::GridSourceFailed { page, .. } | PageError::Timeout { page, .. } => *page,
        }
    }
}

/// Failure inside a [`crate::pipeline::grid::GridSource`] implementation.
#[derive(Debug, Error)]
pub enum GridSourceError {
    /// The extractor process could not be started.
    #[error("cannot start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The extractor process exited unsuccessfully.
    #[error("'{program}' exited with {status}: {stderr}")]
    ExitStatus {
        program: String,
        status: String,
        stderr: String,
    },

    /// The extractor produced output that is not a grid dump.
    #[error("malformed extractor output: {0}")]
    MalformedOutput(String),

    /// Reading a dump file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_display() {
        let e = GazetteError::PartialFailure {
            success: 9,
            failed: 1,
            total: 10,
        };
        let msg = e.to_string();
        assert!(msg.contains("1/10"), "got: {msg}");
    }

    #[test]
    fn all_pages_failed_display() {
        let e = GazetteError::AllPagesFailed {
            total: 3,
            first_error: "camelot crashed".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("All 3 pages"));
        assert!(msg.contains("camelot crashed"));
    }

    #[test]
    fn grid_source_unavailable_display() {
        let e = GazetteError::GridSourceUnavailable {
            source_name: "command:camelot-grid".into(),
            path: PathBuf::from("/tmp/gazette.pdf"),
            detail: "exit 2".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("command:camelot-grid"));
        assert!(msg.contains("gazette.pdf"));
    }

    #[test]
    fn page_error_reports_page() {
        let e = PageError::Timeout { page: 7, secs: 30 };
        assert_eq!(e.page(), 7);
        assert!(e.to_string().contains("30s"));

        let e = PageError::GridSourceFailed {
            page: 2,
            detail: "boom".into(),
        };
        assert_eq!(e.page(), 2);
        assert!(e.to_string().contains("boom"));
    }

    #[test]
    fn grid_source_exit_display() {
        let e = GridSourceError::ExitStatus {
            program: "extract-grid".into(),
            status: "exit status: 1".into(),
            stderr: "no tables".into(),
        };
        assert!(e.to_string().contains("extract-grid"));
        assert!(e.to_string().contains("no tables"));
    }
}
