//! Grid source boundary: where raw table grids come from.
//!
//! Locating cell boundaries on a scanned page is delegated to an external
//! table extractor (a stream-mode PDF table reader). This module defines the
//! [`GridSource`] trait the pipeline talks to, the JSON *grid dump* format
//! both built-in sources share, and the two sources themselves:
//!
//! * [`CommandGridSource`] - runs an extractor program once per page and
//!   reads a grid dump from its stdout.
//! * [`DumpGridSource`] - the document *is* a grid dump written earlier
//!   (for instance by `gazette --grids-only`).
//!
//! ## Grid dump format
//!
//! ```json
//! {"tables": [{"page": 1, "accuracy": 97.5, "rows": [["", "MU…01", "10411", "78"]]}]}
//! ```
//!
//! `accuracy` is optional and defaults to 100.
//!
//! ## Why blocking?
//!
//! Both sources either spawn a process or read a file and do nothing useful
//! while they wait. The orchestrator runs every call inside
//! `tokio::task::spawn_blocking` under a per-page timeout, so implementations
//! stay plain synchronous code.

use crate::config::GridOptions;
use crate::error::GridSourceError;
use crate::model::TableGrid;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Produces table grids for one page of a document.
///
/// Implementations must be `Send + Sync`: pages are extracted concurrently.
pub trait GridSource: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Whether the document must be a PDF (checked before any extraction).
    fn expects_pdf(&self) -> bool {
        true
    }

    /// Number of pages in `document`.
    fn page_count(&self, document: &Path) -> Result<usize, GridSourceError>;

    /// All tables found on `page` (1-indexed), in page order.
    fn extract_page(
        &self,
        document: &Path,
        page: usize,
        options: &GridOptions,
    ) -> Result<Vec<TableGrid>, GridSourceError>;
}

// ── Dump format ──────────────────────────────────────────────────────────

/// Serialised grids for any number of pages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridDump {
    pub tables: Vec<DumpTable>,
}

/// One table in a [`GridDump`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpTable {
    pub page: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    pub rows: Vec<Vec<String>>,
}

impl From<&TableGrid> for DumpTable {
    fn from(grid: &TableGrid) -> Self {
        Self {
            page: grid.page(),
            accuracy: Some(grid.confidence()),
            rows: grid
                .rows()
                .iter()
                .map(|r| r.iter().map(|c| c.text.clone()).collect())
                .collect(),
        }
    }
}

impl GridDump {
    pub fn from_json(json: &str) -> Result<Self, GridSourceError> {
        serde_json::from_str(json).map_err(|e| GridSourceError::MalformedOutput(e.to_string()))
    }

    pub fn from_grids<'a>(grids: impl IntoIterator<Item = &'a TableGrid>) -> Self {
        Self {
            tables: grids.into_iter().map(DumpTable::from).collect(),
        }
    }

    /// Highest page number present (0 for an empty dump).
    pub fn page_count(&self) -> usize {
        self.tables.iter().map(|t| t.page).max().unwrap_or(0)
    }

    /// Grids for `page`, numbered in dump order.
    pub fn grids_for_page(&self, page: usize) -> Vec<TableGrid> {
        self.tables
            .iter()
            .filter(|t| t.page == page)
            .enumerate()
            .map(|(i, t)| TableGrid::new(page, i, t.accuracy.unwrap_or(100.0), t.rows.clone()))
            .collect()
    }
}

// ── DumpGridSource ───────────────────────────────────────────────────────

/// Reads grids from a grid dump file given as the document.
///
/// The dump is parsed once and kept for the lifetime of the source, so a
/// run reads the file once rather than once per page. A changed file is not
/// picked up by a source that already loaded it.
#[derive(Debug, Default)]
pub struct DumpGridSource {
    cache: Mutex<Option<(PathBuf, Arc<GridDump>)>>,
}

impl DumpGridSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn load(&self, document: &Path) -> Result<Arc<GridDump>, GridSourceError> {
        let Ok(mut cache) = self.cache.lock() else {
            return Self::parse(document).map(Arc::new);
        };
        if let Some((path, dump)) = cache.as_ref() {
            if path == document {
                return Ok(Arc::clone(dump));
            }
        }
        let dump = Arc::new(Self::parse(document)?);
        debug!("Loaded grid dump {} ({} tables)", document.display(), dump.tables.len());
        *cache = Some((document.to_path_buf(), Arc::clone(&dump)));
        Ok(dump)
    }

    fn parse(document: &Path) -> Result<GridDump, GridSourceError> {
        let json = std::fs::read_to_string(document).map_err(|source| GridSourceError::Io {
            path: document.to_path_buf(),
            source,
        })?;
        GridDump::from_json(&json)
    }
}

impl GridSource for DumpGridSource {
    fn name(&self) -> &str {
        "dump"
    }

    fn expects_pdf(&self) -> bool {
        false
    }

    fn page_count(&self, document: &Path) -> Result<usize, GridSourceError> {
        Ok(self.load(document)?.page_count())
    }

    fn extract_page(
        &self,
        document: &Path,
        page: usize,
        _options: &GridOptions,
    ) -> Result<Vec<TableGrid>, GridSourceError> {
        Ok(self.load(document)?.grids_for_page(page))
    }
}

// ── CommandGridSource ────────────────────────────────────────────────────

/// Runs an external extractor program.
///
/// Invocation protocol:
///
/// ```text
/// <program> <args…> --page-count <document>                    → stdout: integer
/// <program> <args…> --pages <n> [--flavor f] [--row-tol x] … <document>  → stdout: grid dump
/// ```
#[derive(Debug, Clone)]
pub struct CommandGridSource {
    program: PathBuf,
    args: Vec<String>,
    label: String,
}

impl CommandGridSource {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let label = format!("command:{}", program.display());
        Self {
            program,
            args: Vec::new(),
            label,
        }
    }

    /// Arguments placed before the generated ones (e.g. a script path).
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Parse `"program arg1 arg2"` as found in an environment variable.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).with_args(parts))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run the extractor and return its stdout.
    fn run(&self, extra: &[String], document: &Path) -> Result<String, GridSourceError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).args(extra).arg(document);
        debug!("Running {:?}", cmd);

        let output = cmd.output().map_err(|source| GridSourceError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        if !output.status.success() {
            return Err(GridSourceError::ExitStatus {
                program: self.program.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        String::from_utf8(output.stdout)
            .map_err(|e| GridSourceError::MalformedOutput(format!("stdout is not UTF-8: {e}")))
    }
}

impl GridSource for CommandGridSource {
    fn name(&self) -> &str {
        &self.label
    }

    fn page_count(&self, document: &Path) -> Result<usize, GridSourceError> {
        let stdout = self.run(&["--page-count".to_string()], document)?;
        stdout.trim().parse::<usize>().map_err(|_| {
            GridSourceError::MalformedOutput(format!(
                "expected a page count, got '{}'",
                stdout.trim()
            ))
        })
    }

    fn extract_page(
        &self,
        document: &Path,
        page: usize,
        options: &GridOptions,
    ) -> Result<Vec<TableGrid>, GridSourceError> {
        let mut extra = vec!["--pages".to_string(), page.to_string()];
        extra.extend(options.to_args());
        let dump = GridDump::from_json(&self.run(&extra, document)?)?;
        // An extractor asked for one page may still label tables oddly;
        // everything it returns belongs to the requested page.
        let grids = dump
            .tables
            .into_iter()
            .enumerate()
            .map(|(i, t)| TableGrid::new(page, i, t.accuracy.unwrap_or(100.0), t.rows))
            .collect();
        Ok(grids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"{"tables": [
        {"page": 1, "accuracy": 97.5, "rows": [["", "MU0000000000000001", "10411", "78"]]},
        {"page": 1, "rows": [["Legend"]]},
        {"page": 3, "accuracy": 60.0, "rows": []}
    ]}"#;

    #[test]
    fn dump_pages() {
        let dump = GridDump::from_json(DUMP).unwrap();
        assert_eq!(dump.page_count(), 3);

        let p1 = dump.grids_for_page(1);
        assert_eq!(p1.len(), 2);
        assert_eq!(p1[0].confidence(), 97.5);
        assert_eq!(p1[1].confidence(), 100.0);
        assert_eq!(p1[1].table_index(), 1);

        assert!(dump.grids_for_page(2).is_empty());
    }

    #[test]
    fn dump_roundtrip_through_grids() {
        let dump = GridDump::from_json(DUMP).unwrap();
        let grids = dump.grids_for_page(1);
        let again = GridDump::from_grids(&grids);
        assert_eq!(again.tables[0], dump.tables[0]);
        assert_eq!(again.tables[1].rows, dump.tables[1].rows);
    }

    #[test]
    fn malformed_dump() {
        assert!(matches!(
            GridDump::from_json("{\"pages\": 1}"),
            Err(GridSourceError::MalformedOutput(_))
        ));
    }

    #[test]
    fn dump_source_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grids.json");
        std::fs::write(&path, DUMP).unwrap();

        let src = DumpGridSource::new();
        assert!(!src.expects_pdf());
        assert_eq!(src.page_count(&path).unwrap(), 3);
        let grids = src.extract_page(&path, 1, &GridOptions::default()).unwrap();
        assert_eq!(grids.len(), 2);
        assert_eq!(grids[0].page(), 1);
    }

    #[test]
    fn dump_source_parses_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grids.json");
        std::fs::write(&path, DUMP).unwrap();

        let src = DumpGridSource::new();
        assert_eq!(src.page_count(&path).unwrap(), 3);
        std::fs::remove_file(&path).unwrap();
        // Served from the parsed dump.
        let grids = src.extract_page(&path, 1, &GridOptions::default()).unwrap();
        assert_eq!(grids.len(), 2);

        let other = dir.path().join("other.json");
        assert!(matches!(
            src.page_count(&other),
            Err(GridSourceError::Io { .. })
        ));
    }

    #[test]
    fn dump_source_missing_file() {
        let err = DumpGridSource::new()
            .page_count(Path::new("/definitely/not/here.json"))
            .unwrap_err();
        assert!(matches!(err, GridSourceError::Io { .. }));
    }

    #[test]
    fn command_from_line() {
        let src = CommandGridSource::from_command_line("python3 tools/grid.py --quiet").unwrap();
        assert_eq!(src.program(), Path::new("python3"));
        assert_eq!(src.args, vec!["tools/grid.py", "--quiet"]);
        assert_eq!(src.name(), "command:python3");
        assert!(CommandGridSource::from_command_line("   ").is_none());
    }

    #[test]
    fn command_spawn_failure() {
        let src = CommandGridSource::new("/nonexistent/grid-extractor");
        let err = src.page_count(Path::new("x.pdf")).unwrap_err();
        assert!(matches!(err, GridSourceError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn command_runs_extractor() {
        // `sh -c <script> sh <args…>` stands in for a real extractor.
        let script = r#"
            case "$1" in
              --page-count) echo 2 ;;
              --pages) echo '{"tables": [{"page": 9, "accuracy": 80, "rows": [["a"]]}]}' ;;
              *) exit 3 ;;
            esac
        "#;
        let src = CommandGridSource::new("sh").with_args(["-c", script, "sh"]);
        let doc = Path::new("gazette.pdf");
        assert_eq!(src.page_count(doc).unwrap(), 2);

        let grids = src.extract_page(doc, 2, &GridOptions::default()).unwrap();
        assert_eq!(grids.len(), 1);
        assert_eq!(grids[0].page(), 2);
        assert_eq!(grids[0].confidence(), 80.0);
    }

    #[cfg(unix)]
    #[test]
    fn command_nonzero_exit() {
        let src = CommandGridSource::new("sh").with_args(["-c", "echo nope >&2; exit 4", "sh"]);
        let err = src.page_count(Path::new("gazette.pdf")).unwrap_err();
        match err {
            GridSourceError::ExitStatus { stderr, .. } => assert_eq!(stderr, "nope"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
