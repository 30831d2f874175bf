//! Eager (whole-gazette) extraction entry points.
//!
//! ## Why eager vs. streaming?
//!
//! This module provides the simpler API: wait for all pages, then return one
//! merged [`RecordSet`]. Use [`crate::stream::extract_stream`] instead when
//! you want per-page results as soon as they are ready.
//!
//! ## Concurrency
//!
//! Grid extraction is the slow part (an external process per page), so pages
//! run concurrently with `buffer_unordered`. Each page builds and returns its
//! own fresh `RecordSet`; nothing is shared between page tasks. Page sets are
//! merged afterwards in page order, so the duplicate policy sees pages in the
//! same order on every run.

use crate::config::{DuplicatePolicy, ExtractionConfig, GridOptions, PageSelection};
use crate::error::{GazetteError, PageError};
use crate::model::{DuplicateIdentifier, RecordSet, TableGrid};
use crate::output::{ExtractionOutput, ExtractionStats, GridOutput, PageResult};
use crate::pipeline::grid::{CommandGridSource, DumpGridSource, GridDump, GridSource};
use crate::pipeline::identifier::IdentifierValidator;
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::segment::{self, MalformedIdentifier};
use crate::pipeline::fields;
use crate::report;
use crate::subjects::SubjectTable;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Environment variable naming the extractor command (`program arg…`).
pub const EXTRACTOR_ENV: &str = "GAZETTE_EXTRACTOR";

/// Extract every student record from a gazette.
///
/// # Arguments
/// * `input`  - local path or HTTP/HTTPS URL of a PDF, or a grid dump (`.json`)
/// * `config` - extraction configuration
///
/// # Returns
/// `Ok(ExtractionOutput)` even if some pages failed (check
/// `output.stats.failed_pages`, or call [`ExtractionOutput::into_result`]).
///
/// # Errors
/// Only fatal errors: unreadable input, no grid source, page count
/// unavailable, empty page selection, or every page failed.
pub async fn extract(
    input: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, GazetteError> {
    let total_start = Instant::now();
    let input = input.as_ref();
    info!("Starting extraction: {}", input);

    let prepared = prepare(input, config).await?;
    let selected = prepared.pages.len();
    let ctx = Arc::new(PageContext::new(prepared.source, prepared.input, config)?);

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_start(selected);
    }

    let mut pages: Vec<PageResult> = stream::iter(prepared.pages.iter().map(|&page| {
        let ctx = Arc::clone(&ctx);
        let cb = config.progress_callback.clone();
        async move {
            if let Some(ref cb) = cb {
                cb.on_page_start(page, selected);
            }
            let result = run_page(&ctx, page).await;
            if let Some(ref cb) = cb {
                match &result.error {
                    None => cb.on_page_complete(page, selected, result.record_count),
                    Some(e) => cb.on_page_error(page, selected, &e.to_string()),
                }
            }
            result
        }
    }))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;

    pages.sort_by_key(|p| p.page_num);

    let processed = pages.iter().filter(|p| p.is_ok()).count();
    let failed = pages.len() - processed;

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_complete(selected, processed);
    }

    if processed == 0 {
        let first_error = pages
            .iter()
            .find_map(|p| p.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(GazetteError::AllPagesFailed {
            total: pages.len(),
            first_error,
        });
    }

    // ── Merge in page order ──────────────────────────────────────────────
    let mut records = RecordSet::new();
    let mut conflicts: Vec<DuplicateIdentifier> = Vec::new();
    for page in pages.iter().filter(|p| p.is_ok()) {
        conflicts.extend(page.conflicts.iter().cloned());
        for conflict in records.merge(page.records.clone(), config.duplicate_policy) {
            warn!(
                "{} appears on page {} and page {} ({:?})",
                conflict.identifier,
                conflict.existing.page,
                conflict.incoming.page,
                conflict.resolution
            );
            conflicts.push(conflict);
        }
    }

    let stats = ExtractionStats {
        total_pages: prepared.total_pages,
        selected_pages: selected,
        processed_pages: processed,
        failed_pages: failed,
        tables: pages.iter().map(|p| p.tables).sum(),
        records: records.len(),
        flagged_records: records.iter().filter(|r| !r.flags.is_empty()).count(),
        low_confidence_records: records.iter().filter(|r| r.is_low_confidence()).count(),
        malformed_identifiers: pages.iter().map(|p| p.malformed.len()).sum(),
        duplicate_identifiers: conflicts.len(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Extraction complete: {} records from {}/{} pages, {}ms total",
        stats.records, processed, selected, stats.total_duration_ms
    );

    Ok(ExtractionOutput {
        records,
        conflicts,
        pages,
        stats,
    })
}

/// Extract and write the record set to `output_path` as JSON.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    input: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionStats, GazetteError> {
    let output = extract(input, config).await?;
    let json = report::record_set_to_json(&output.records)?;
    report::write_atomic(output_path, &json).await?;
    Ok(output.stats)
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, GazetteError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| GazetteError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input, config))
}

/// Fetch the raw table grids of the selected pages without segmenting them.
///
/// The result's dump can be written out and fed back in as input later.
pub async fn extract_grids(
    input: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<GridOutput, GazetteError> {
    let input = input.as_ref();
    info!("Extracting grids: {}", input);

    let prepared = prepare(input, config).await?;
    let document = prepared.input.path().to_path_buf();
    let timeout = config.grid_timeout_secs;

    let mut results: Vec<(usize, Result<Vec<TableGrid>, PageError>)> =
        stream::iter(prepared.pages.iter().map(|&page| {
            let source = Arc::clone(&prepared.source);
            let document = document.clone();
            let options = config.grid.clone();
            async move {
                let grids = fetch_grids(source, document, page, options, timeout).await;
                (page, grids)
            }
        }))
        .buffer_unordered(config.concurrency)
        .collect()
        .await;
    results.sort_by_key(|(page, _)| *page);

    let mut grids: Vec<TableGrid> = Vec::new();
    let mut errors: Vec<PageError> = Vec::new();
    for (_, result) in results {
        match result {
            Ok(page_grids) => grids.extend(page_grids),
            Err(e) => {
                warn!("{}", e);
                errors.push(e);
            }
        }
    }

    if errors.len() == prepared.pages.len() {
        return Err(GazetteError::AllPagesFailed {
            total: errors.len(),
            first_error: errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
        });
    }

    Ok(GridOutput {
        dump: GridDump::from_grids(&grids),
        errors,
    })
}

// ── Per-table core ───────────────────────────────────────────────────────

/// Records recovered from one table grid.
#[derive(Debug, Clone, Default)]
pub struct GridRecords {
    pub records: RecordSet,
    /// Identifiers that occurred in more than one block of the grid.
    pub conflicts: Vec<DuplicateIdentifier>,
    pub malformed: Vec<MalformedIdentifier>,
    pub discarded_rows: usize,
}

/// Segment one grid and map every block to a record.
///
/// Pure and independent of every other grid, so grids can be processed in
/// any order or in parallel.
pub fn records_from_grid(
    grid: &TableGrid,
    validator: &IdentifierValidator,
    subjects: &SubjectTable,
    max_block_height: usize,
    policy: DuplicatePolicy,
) -> GridRecords {
    let seg = segment::segment(grid, validator, max_block_height);
    let mut out = GridRecords {
        malformed: seg.malformed,
        discarded_rows: seg.discarded_rows,
        ..GridRecords::default()
    };
    for block in &seg.blocks {
        let record = fields::map_block(block, subjects);
        if let Some(conflict) = out.records.insert_with(record, policy) {
            warn!(
                "{} repeated on page {} table {} (rows {} and {})",
                conflict.identifier,
                grid.page(),
                grid.table_index(),
                conflict.existing.first_row,
                conflict.incoming.first_row
            );
            out.conflicts.push(conflict);
        }
    }
    out
}

// ── Grid source resolution ───────────────────────────────────────────────

/// Pick the grid source for `input`, from most to least specific:
///
/// 1. a pre-built source (`config.grid_source`)
/// 2. an extractor command (`config.extractor` + `config.extractor_args`)
/// 3. the `GAZETTE_EXTRACTOR` environment variable
/// 4. a grid dump, when the input ends in `.json`
pub fn resolve_grid_source(
    input: &str,
    config: &ExtractionConfig,
) -> Result<Arc<dyn GridSource>, GazetteError> {
    if let Some(ref source) = config.grid_source {
        return Ok(Arc::clone(source));
    }

    if let Some(ref program) = config.extractor {
        return Ok(Arc::new(
            CommandGridSource::new(program).with_args(config.extractor_args.iter().cloned()),
        ));
    }

    if let Ok(line) = std::env::var(EXTRACTOR_ENV) {
        if let Some(source) = CommandGridSource::from_command_line(&line) {
            return Ok(Arc::new(source));
        }
    }

    if input::is_grid_dump(input) {
        return Ok(Arc::new(DumpGridSource::new()));
    }

    Err(GazetteError::GridSourceNotConfigured {
        input: input.to_string(),
        hint: format!(
            "Pass --extractor <program>, set {EXTRACTOR_ENV}, \
             or supply a pre-extracted grid dump (.json)."
        ),
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Input, grid source and page list shared by every entry point.
pub(crate) struct Prepared {
    pub input: Arc<ResolvedInput>,
    pub source: Arc<dyn GridSource>,
    pub total_pages: usize,
    pub pages: Vec<usize>,
}

pub(crate) async fn prepare(
    input_str: &str,
    config: &ExtractionConfig,
) -> Result<Prepared, GazetteError> {
    let source = resolve_grid_source(input_str, config)?;
    debug!("Grid source: {}", source.name());

    let resolved = input::resolve_input(
        input_str,
        config.download_timeout_secs,
        source.expects_pdf(),
    )
    .await?;
    let document = resolved.path().to_path_buf();

    let total_pages = {
        let task = {
            let source = Arc::clone(&source);
            let document = document.clone();
            tokio::task::spawn_blocking(move || source.page_count(&document))
        };
        let unavailable = |detail: String| GazetteError::GridSourceUnavailable {
            source_name: source.name().to_string(),
            path: document.clone(),
            detail,
        };
        match tokio::time::timeout(Duration::from_secs(config.grid_timeout_secs), task).await {
            Err(_) => {
                return Err(unavailable(format!(
                    "no page count after {}s",
                    config.grid_timeout_secs
                )))
            }
            Ok(Err(join)) => return Err(unavailable(format!("worker failed: {join}"))),
            Ok(Ok(Err(e))) => return Err(unavailable(e.to_string())),
            Ok(Ok(Ok(n))) => n,
        }
    };
    info!("Document has {} pages", total_pages);

    let pages = config.pages.to_pages(total_pages);
    if pages.is_empty() {
        return Err(GazetteError::PageOutOfRange {
            page: first_requested(&config.pages),
            total: total_pages,
        });
    }
    debug!("Selected {} pages for extraction", pages.len());

    Ok(Prepared {
        input: Arc::new(resolved),
        source,
        total_pages,
        pages,
    })
}

/// The page to name in a `PageOutOfRange` error.
fn first_requested(selection: &PageSelection) -> usize {
    match selection {
        PageSelection::All => 0,
        PageSelection::Single(p) | PageSelection::Range(p, _) => *p,
        PageSelection::Set(pages) => pages.first().copied().unwrap_or(0),
    }
}

/// Everything a page task needs. Holding the resolved input keeps a
/// downloaded document on disk until the last page finishes.
pub(crate) struct PageContext {
    input: Arc<ResolvedInput>,
    source: Arc<dyn GridSource>,
    options: GridOptions,
    validator: IdentifierValidator,
    subjects: Arc<SubjectTable>,
    max_block_height: usize,
    policy: DuplicatePolicy,
    timeout_secs: u64,
}

impl PageContext {
    pub(crate) fn new(
        source: Arc<dyn GridSource>,
        input: Arc<ResolvedInput>,
        config: &ExtractionConfig,
    ) -> Result<Self, GazetteError> {
        Ok(Self {
            input,
            source,
            options: config.grid.clone(),
            validator: IdentifierValidator::new(&config.identifier)?,
            subjects: Arc::clone(&config.subjects),
            max_block_height: config.max_block_height,
            policy: config.duplicate_policy,
            timeout_secs: config.grid_timeout_secs,
        })
    }
}

/// Fetch, segment and map one page.
pub(crate) async fn run_page(ctx: &PageContext, page: usize) -> PageResult {
    let start = Instant::now();
    let grids = fetch_grids(
        Arc::clone(&ctx.source),
        ctx.input.path().to_path_buf(),
        page,
        ctx.options.clone(),
        ctx.timeout_secs,
    )
    .await;

    let grids = match grids {
        Ok(g) => g,
        Err(e) => {
            warn!("{}", e);
            return PageResult::failed(page, e, start.elapsed().as_millis() as u64);
        }
    };

    let mut result = PageResult {
        page_num: page,
        tables: grids.len(),
        ..PageResult::default()
    };
    for grid in &grids {
        let found = records_from_grid(
            grid,
            &ctx.validator,
            &ctx.subjects,
            ctx.max_block_height,
            ctx.policy,
        );
        result.conflicts.extend(found.conflicts);
        result.malformed.extend(found.malformed);
        result.discarded_rows += found.discarded_rows;
        result
            .conflicts
            .extend(result.records.merge(found.records, ctx.policy));
    }
    result.record_count = result.records.len();
    result.duration_ms = start.elapsed().as_millis() as u64;

    debug!(
        "Page {}: {} tables, {} records in {}ms",
        page, result.tables, result.record_count, result.duration_ms
    );
    result
}

/// Run the blocking grid source for one page under the configured timeout.
async fn fetch_grids(
    source: Arc<dyn GridSource>,
    document: std::path::PathBuf,
    page: usize,
    options: GridOptions,
    timeout_secs: u64,
) -> Result<Vec<TableGrid>, PageError> {
    let task = tokio::task::spawn_blocking(move || source.extract_page(&document, page, &options));
    match tokio::time::timeout(Duration::from_secs(timeout_secs), task).await {
        Err(_) => Err(PageError::Timeout {
            page,
            secs: timeout_secs,
        }),
        Ok(Err(join)) => Err(PageError::GridSourceFailed {
            page,
            detail: format!("worker failed: {join}"),
        }),
        Ok(Ok(Err(e))) => Err(PageError::GridSourceFailed {
            page,
            detail: e.to_string(),
        }),
        Ok(Ok(Ok(grids))) => Ok(grids),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MarkValue, RecordFlag};

    const ID1: &str = "MU0000000000000001";
    const ID2: &str = "MU0000000000000002";

    fn grid(page: usize, rows: &[&[&str]]) -> TableGrid {
        TableGrid::new(
            page,
            0,
            95.0,
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn records_from_example_grid() {
        let g = grid(
            1,
            &[
                &["Seat", "ERN", "Name", "Marks"],
                &["", ID1, "John Doe", "10411", "78", "10412", "65"],
                &["", "", "", "10413", "AB"],
                &["", ID2, "Jane Roe", "10411", "91"],
            ],
        );
        let found = records_from_grid(
            &g,
            &IdentifierValidator::default(),
            &SubjectTable::default(),
            8,
            DuplicatePolicy::KeepFirst,
        );
        assert_eq!(found.records.len(), 2);
        assert!(found.conflicts.is_empty());

        let r1 = found
            .records
            .get(&crate::model::Identifier::new_unchecked(ID1))
            .unwrap();
        assert_eq!(r1.marks.len(), 3);
        assert_eq!(r1.mark("10413").unwrap().mark, MarkValue::Absent);
        assert_eq!(r1.provenance.page, 1);
        assert_eq!(r1.provenance.confidence, 95.0);
    }

    #[test]
    fn legend_tables_yield_nothing() {
        let g = grid(3, &[&["Legend"], &["P = Pass", "F = Fail"]]);
        let found = records_from_grid(
            &g,
            &IdentifierValidator::default(),
            &SubjectTable::default(),
            8,
            DuplicatePolicy::KeepFirst,
        );
        assert!(found.records.is_empty());
        assert_eq!(found.discarded_rows, 2);
    }

    #[test]
    fn repeated_identifier_in_one_grid_is_a_conflict() {
        let g = grid(
            2,
            &[
                &[ID1, "10411", "78"],
                &[ID2, "10411", "50"],
                &[ID1, "10412", "60"],
            ],
        );
        let found = records_from_grid(
            &g,
            &IdentifierValidator::default(),
            &SubjectTable::default(),
            8,
            DuplicatePolicy::MergeMarks,
        );
        assert_eq!(found.records.len(), 2);
        assert_eq!(found.conflicts.len(), 1);
        assert_eq!(found.conflicts[0].existing.first_row, 0);
        assert_eq!(found.conflicts[0].incoming.first_row, 2);
        let merged = found
            .records
            .get(&crate::model::Identifier::new_unchecked(ID1))
            .unwrap();
        assert_eq!(merged.marks.len(), 2);
    }

    #[test]
    fn ambiguous_rows_are_flagged() {
        let g = grid(1, &[&[ID1, "10411", "78", ID2, "10411", "55"]]);
        let found = records_from_grid(
            &g,
            &IdentifierValidator::default(),
            &SubjectTable::default(),
            8,
            DuplicatePolicy::KeepFirst,
        );
        assert_eq!(found.records.len(), 2);
        assert!(found
            .records
            .iter()
            .all(|r| r.flags.iter().any(|f| matches!(f, RecordFlag::AmbiguousRow { .. }))));
    }

    #[test]
    fn resolution_prefers_explicit_extractor() {
        let config = ExtractionConfig::builder()
            .extractor("camelot-grid")
            .extractor_args(["--quiet"])
            .build()
            .unwrap();
        let source = resolve_grid_source("gazette.json", &config).unwrap();
        assert_eq!(source.name(), "command:camelot-grid");
        assert!(source.expects_pdf());
    }

    #[test]
    fn resolution_falls_back_to_dump() {
        let config = ExtractionConfig::default();
        // Only meaningful when the environment does not name an extractor.
        if std::env::var(EXTRACTOR_ENV).is_err() {
            let source = resolve_grid_source("grids.json", &config).unwrap();
            assert_eq!(source.name(), "dump");
            assert!(matches!(
                resolve_grid_source("gazette.pdf", &config),
                Err(GazetteError::GridSourceNotConfigured { .. })
            ));
        }
    }

    #[test]
    fn first_requested_page() {
        assert_eq!(first_requested(&PageSelection::All), 0);
        assert_eq!(first_requested(&PageSelection::Single(9)), 9);
        assert_eq!(first_requested(&PageSelection::Range(4, 6)), 4);
        assert_eq!(first_requested(&PageSelection::Set(vec![7, 2])), 7);
    }
}
