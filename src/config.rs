//! Configuration types for gazette extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Every knob lives in one struct so a
//! config can be shared across page tasks, logged, and diffed between runs.

use crate::error::GazetteError;
use crate::pipeline::grid::GridSource;
use crate::pipeline::identifier::{IdentifierPattern, IdentifierValidator};
use crate::progress::ProgressCallback;
use crate::subjects::SubjectTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Configuration for one extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use gazette_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .concurrency(8)
///     .max_block_height(6)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_block_height, 6);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Number of pages whose grids are extracted concurrently. Default: 4.
    ///
    /// Grid extraction is the slow step (an external process per page);
    /// segmentation and field mapping are cheap and share no state, so pages
    /// can be processed in parallel freely.
    pub concurrency: usize,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// Options passed through to the grid source.
    pub grid: GridOptions,

    /// Identifier grammar. Default: `MU` + 16 digits, case-sensitive prefix.
    pub identifier: IdentifierPattern,

    /// Subject code → name table. Default: [`SubjectTable::default`].
    pub subjects: Arc<SubjectTable>,

    /// Maximum number of non-empty rows one record block may span. Default: 8.
    ///
    /// Guards against runaway blocks when a multi-row header sits between two
    /// students. Lower it for gazettes with one-line records.
    pub max_block_height: usize,

    /// What to do when one identifier is extracted twice. Default: keep first.
    pub duplicate_policy: DuplicatePolicy,

    /// Pre-constructed grid source. Takes precedence over `extractor`.
    pub grid_source: Option<Arc<dyn GridSource>>,

    /// External extractor program, run as a [`crate::pipeline::grid::CommandGridSource`].
    pub extractor: Option<String>,

    /// Extra arguments placed before the generated ones.
    pub extractor_args: Vec<String>,

    /// Per-page grid extraction timeout in seconds. Default: 120.
    pub grid_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            pages: PageSelection::default(),
            grid: GridOptions::default(),
            identifier: IdentifierPattern::default(),
            subjects: Arc::new(SubjectTable::default()),
            max_block_height: 8,
            duplicate_policy: DuplicatePolicy::default(),
            grid_source: None,
            extractor: None,
            extractor_args: Vec::new(),
            grid_timeout_secs: 120,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("concurrency", &self.concurrency)
            .field("pages", &self.pages)
            .field("grid", &self.grid)
            .field("identifier", &self.identifier)
            .field("subjects", &self.subjects.len())
            .field("max_block_height", &self.max_block_height)
            .field("duplicate_policy", &self.duplicate_policy)
            .field(
                "grid_source",
                &self.grid_source.as_ref().map(|s| s.name().to_string()),
            )
            .field("extractor", &self.extractor)
            .field("extractor_args", &self.extractor_args)
            .field("grid_timeout_secs", &self.grid_timeout_secs)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn grid(mut self, options: GridOptions) -> Self {
        self.config.grid = options;
        self
    }

    pub fn identifier(mut self, pattern: IdentifierPattern) -> Self {
        self.config.identifier = pattern;
        self
    }

    pub fn subjects(mut self, table: SubjectTable) -> Self {
        self.config.subjects = Arc::new(table);
        self
    }

    pub fn max_block_height(mut self, rows: usize) -> Self {
        self.config.max_block_height = rows;
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.config.duplicate_policy = policy;
        self
    }

    pub fn grid_source(mut self, source: Arc<dyn GridSource>) -> Self {
        self.config.grid_source = Some(source);
        self
    }

    pub fn extractor(mut self, program: impl Into<String>) -> Self {
        self.config.extractor = Some(program.into());
        self
    }

    pub fn extractor_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.extractor_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn grid_timeout_secs(mut self, secs: u64) -> Self {
        self.config.grid_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, GazetteError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(GazetteError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_block_height == 0 {
            return Err(GazetteError::InvalidConfig(
                "Maximum block height must be ≥ 1".into(),
            ));
        }
        if c.grid_timeout_secs == 0 {
            return Err(GazetteError::InvalidConfig(
                "Grid timeout must be ≥ 1 second".into(),
            ));
        }
        // Compiles the identifier grammar once so a bad prefix fails here
        // rather than on the first page.
        IdentifierValidator::new(&c.identifier)?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Resolution applied when one identifier is extracted twice (typically a
/// student whose rows were split across a page break).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the record seen first; report the collision. (default)
    #[default]
    KeepFirst,
    /// Replace with the record seen last; report the collision.
    KeepLast,
    /// Add subjects the first record lacks; report the collision.
    MergeMarks,
}

/// Specifies which pages of the document to process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSelection {
    /// All pages (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 1-indexed page numbers.
    pub fn to_pages(&self, total_pages: usize) -> Vec<usize> {
        let mut pages: Vec<usize> = match self {
            PageSelection::All => (1..=total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![*p]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1);
                let e = (*end).min(total_pages);
                (s..=e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .copied()
                .filter(|&p| p >= 1 && p <= total_pages)
                .collect(),
        };
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}

/// Options handed opaquely to the grid source.
///
/// Named after the tolerances stream-mode table extractors expose. Unset
/// values are simply not passed, letting the extractor use its own default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridOptions {
    /// Parsing flavour, e.g. `stream` or `lattice`. Default: `stream`.
    pub flavor: Option<String>,
    /// Row detection tolerance. Default: 10.
    pub row_tol: Option<f64>,
    /// Column detection tolerance. Default: 0 (strict).
    pub column_tol: Option<f64>,
    /// Table edge tolerance. Default: 50.
    pub edge_tol: Option<f64>,
    /// Text-to-cell matching tolerance. Default: unset.
    pub text_tol: Option<f64>,
    /// Anything else, passed as `--key value`.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            flavor: Some("stream".to_string()),
            row_tol: Some(10.0),
            column_tol: Some(0.0),
            edge_tol: Some(50.0),
            text_tol: None,
            extra: BTreeMap::new(),
        }
    }
}

impl GridOptions {
    /// Render the options as command-line arguments.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ref flavor) = self.flavor {
            args.push("--flavor".to_string());
            args.push(flavor.clone());
        }
        let tolerances = [
            ("--row-tol", self.row_tol),
            ("--column-tol", self.column_tol),
            ("--edge-tol", self.edge_tol),
            ("--text-tol", self.text_tol),
        ];
        for (flag, value) in tolerances {
            if let Some(v) = value {
                args.push(flag.to_string());
                args.push(v.to_string());
            }
        }
        for (key, value) in &self.extra {
            args.push(format!("--{}", key.trim_start_matches('-')));
            args.push(value.clone());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let c = ExtractionConfig::builder().build().unwrap();
        assert_eq!(c.concurrency, 4);
        assert_eq!(c.max_block_height, 8);
        assert_eq!(c.duplicate_policy, DuplicatePolicy::KeepFirst);
        assert_eq!(c.subjects.len(), 14);
    }

    #[test]
    fn zero_block_height_rejected() {
        let err = ExtractionConfig::builder()
            .max_block_height(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("block height"));
    }

    #[test]
    fn concurrency_clamped_to_one() {
        let c = ExtractionConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn bad_identifier_prefix_rejected() {
        let err = ExtractionConfig::builder()
            .identifier(IdentifierPattern::new("M1", 16))
            .build()
            .unwrap_err();
        assert!(matches!(err, GazetteError::InvalidConfig(_)));
    }

    #[test]
    fn page_selection_to_pages() {
        assert_eq!(PageSelection::All.to_pages(3), vec![1, 2, 3]);
        assert_eq!(PageSelection::Single(3).to_pages(5), vec![3]);
        assert_eq!(PageSelection::Single(6).to_pages(5), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 4).to_pages(5), vec![2, 3, 4]);
        assert_eq!(PageSelection::Range(4, 9).to_pages(5), vec![4, 5]);
        assert_eq!(
            PageSelection::Set(vec![3, 1, 3, 9]).to_pages(5),
            vec![1, 3]
        );
    }

    #[test]
    fn grid_options_args() {
        let mut opts = GridOptions::default();
        opts.extra.insert("strip-text".into(), "\\n".into());
        let args = opts.to_args();
        assert_eq!(
            args,
            vec![
                "--flavor",
                "stream",
                "--row-tol",
                "10",
                "--column-tol",
                "0",
                "--edge-tol",
                "50",
                "--strip-text",
                "\\n",
            ]
        );
    }

    #[test]
    fn debug_hides_callback() {
        let c = ExtractionConfig::default();
        let s = format!("{c:?}");
        assert!(s.contains("max_block_height"));
    }
}
