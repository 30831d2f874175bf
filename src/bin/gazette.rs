//! CLI binary for gazette-extract.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use gazette_extract::pipeline::identifier::{IdentifierPattern, IdentifierValidator};
use gazette_extract::progress::ProgressCallback;
use gazette_extract::{
    extract, extract_grids, reconcile, report, DuplicatePolicy, ExtractionConfig,
    ExtractionProgressCallback, GridOptions, PageSelection, ReconcileOptions, SubjectTable,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live progress bar plus one log line per
/// page. Pages may complete out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_extraction_start` tells us the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Counting pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting records from {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, records: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<12}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{records:>4} records")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Keep one line per page.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages extracted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages extracted  ({} failed)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract records through an external table extractor (stdout)
  gazette --extractor camelot-grid gazette.pdf

  # Write records to a file and compare against last year's dataset
  gazette --extractor camelot-grid gazette.pdf -o records.json \
      --reference students.json --report drift.json

  # Only ERNs matter, ignore mark differences
  gazette gazette.pdf --reference students.json --compare-marks false

  # Dump raw grids once, then iterate on segmentation offline
  gazette --extractor camelot-grid --grids-only gazette.pdf -o grids.json
  gazette grids.json --max-block-height 6 -o records.json

  # A different institution's registration numbers
  gazette grids.json --prefix PU --id-digits 12 --subjects subjects.json

EXTRACTOR PROTOCOL:
  <program> <args…> --page-count <document>
      prints the number of pages
  <program> <args…> --pages <n> [--flavor f] [--row-tol x] … <document>
      prints {"tables": [{"page": n, "accuracy": 97.5, "rows": [["…"]]}]}

ENVIRONMENT VARIABLES:
  GAZETTE_EXTRACTOR   Extractor command line used when --extractor is absent
                      (e.g. "python3 tools/grid.py")
  RUST_LOG            Override log filtering (e.g. gazette_extract=debug)
"#;

/// Extract student records from result-gazette tables.
#[derive(Parser, Debug)]
#[command(
    name = "gazette",
    version,
    about = "Extract student records from result-gazette tables and reconcile them",
    long_about = "Extract student examination records (registration number plus subject marks) \
from result-gazette tables and reconcile them against a reference dataset. Table grids come \
from an external extractor program or from a pre-extracted grid dump.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF path, HTTP/HTTPS URL, or grid dump (.json).
    input: String,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long, env = "GAZETTE_OUTPUT")]
    output: Option<PathBuf>,

    /// Reference dataset (JSON keyed by registration number) to reconcile against.
    #[arg(long, env = "GAZETTE_REFERENCE")]
    reference: Option<PathBuf>,

    /// Write the reconciliation report to this file.
    #[arg(long, env = "GAZETTE_REPORT", requires = "reference")]
    report: Option<PathBuf>,

    /// Compare marks of matched students, not just their presence.
    #[arg(long, env = "GAZETTE_COMPARE_MARKS", default_value_t = true,
          action = clap::ArgAction::Set)]
    compare_marks: bool,

    /// Numeric marks closer than this are considered equal.
    #[arg(long, env = "GAZETTE_MARK_TOLERANCE", default_value_t = 0.0)]
    mark_tolerance: f64,

    /// Table extractor program (see EXTRACTOR PROTOCOL).
    #[arg(long)]
    extractor: Option<String>,

    /// Extra argument passed to the extractor before the generated ones (repeatable).
    #[arg(long = "extractor-arg", allow_hyphen_values = true)]
    extractor_args: Vec<String>,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "GAZETTE_PAGES", default_value = "all")]
    pages: String,

    /// Extractor parsing flavour (stream or lattice).
    #[arg(long, env = "GAZETTE_FLAVOR")]
    flavor: Option<String>,

    /// Extractor row tolerance.
    #[arg(long, env = "GAZETTE_ROW_TOL")]
    row_tol: Option<f64>,

    /// Extractor column tolerance.
    #[arg(long, env = "GAZETTE_COLUMN_TOL")]
    column_tol: Option<f64>,

    /// Extractor edge tolerance.
    #[arg(long, env = "GAZETTE_EDGE_TOL")]
    edge_tol: Option<f64>,

    /// Extractor text tolerance.
    #[arg(long, env = "GAZETTE_TEXT_TOL")]
    text_tol: Option<f64>,

    /// Maximum non-empty rows per student block, anchor row included.
    #[arg(long, env = "GAZETTE_MAX_BLOCK_HEIGHT", default_value_t = 8)]
    max_block_height: usize,

    /// Subject table JSON ({"code": "name"}); defaults to the built-in 14 codes.
    #[arg(long, env = "GAZETTE_SUBJECTS")]
    subjects: Option<PathBuf>,

    /// Registration-number prefix.
    #[arg(long, env = "GAZETTE_PREFIX", default_value = "MU")]
    prefix: String,

    /// Digits after the registration-number prefix.
    #[arg(long, env = "GAZETTE_ID_DIGITS", default_value_t = 16)]
    id_digits: usize,

    /// Accept the prefix in any case when validating.
    #[arg(long, env = "GAZETTE_CASE_INSENSITIVE")]
    case_insensitive: bool,

    /// What to do when a registration number appears twice.
    #[arg(long, env = "GAZETTE_ON_DUPLICATE", value_enum, default_value = "keep-first")]
    on_duplicate: DuplicateArg,

    /// Number of pages extracted concurrently.
    #[arg(short, long, env = "GAZETTE_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Per-page extractor timeout in seconds.
    #[arg(long, env = "GAZETTE_GRID_TIMEOUT", default_value_t = 120)]
    grid_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "GAZETTE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Write the raw table grids (a grid dump) instead of records.
    #[arg(long)]
    grids_only: bool,

    /// Output the full extraction result (records, pages, stats) as JSON.
    #[arg(long, env = "GAZETTE_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "GAZETTE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "GAZETTE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "GAZETTE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum DuplicateArg {
    KeepFirst,
    KeepLast,
    MergeMarks,
}

impl From<DuplicateArg> for DuplicatePolicy {
    fn from(v: DuplicateArg) -> Self {
        match v {
            DuplicateArg::KeepFirst => DuplicatePolicy::KeepFirst,
            DuplicateArg::KeepLast => DuplicatePolicy::KeepLast,
            DuplicateArg::MergeMarks => DuplicatePolicy::MergeMarks,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs while it is visible.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.grids_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Grids-only mode ──────────────────────────────────────────────────
    if cli.grids_only {
        let grids = extract_grids(&cli.input, &config)
            .await
            .context("Grid extraction failed")?;
        let json =
            serde_json::to_string_pretty(&grids.dump).context("Failed to serialise grid dump")?;
        emit(&cli, &json).await?;
        if !cli.quiet {
            eprintln!(
                "{} {} tables",
                if grids.errors.is_empty() { green("✔") } else { cyan("⚠") },
                grids.dump.tables.len()
            );
            for e in &grids.errors {
                eprintln!("  {} {}", red("✗"), e);
            }
        }
        return Ok(());
    }

    // ── Run extraction ───────────────────────────────────────────────────
    let output = extract(&cli.input, &config)
        .await
        .context("Extraction failed")?;

    let json = if cli.json {
        serde_json::to_string_pretty(&output).context("Failed to serialise output")?
    } else {
        report::record_set_to_json(&output.records)?
    };
    emit(&cli, &json).await?;

    if !cli.quiet {
        let s = &output.stats;
        eprintln!(
            "{}  {} records  {}/{} pages  {}ms{}",
            if s.failed_pages == 0 { green("✔") } else { cyan("⚠") },
            bold(&s.records.to_string()),
            s.processed_pages,
            s.selected_pages,
            s.total_duration_ms,
            cli.output
                .as_ref()
                .map(|p| format!("  →  {}", bold(&p.display().to_string())))
                .unwrap_or_default(),
        );
        if s.flagged_records > 0 || s.duplicate_identifiers > 0 || s.malformed_identifiers > 0 {
            eprintln!(
                "   {} flagged ({} low confidence)  /  {} duplicate  /  {} malformed ERNs",
                yellow(&s.flagged_records.to_string()),
                s.low_confidence_records,
                yellow(&s.duplicate_identifiers.to_string()),
                yellow(&s.malformed_identifiers.to_string()),
            );
        }
    }

    // ── Reconcile ────────────────────────────────────────────────────────
    if let Some(ref reference_path) = cli.reference {
        let validator = IdentifierValidator::new(&config.identifier)?;
        let reference = report::load_reference(reference_path, &config.subjects, &validator)
            .await
            .context("Failed to load reference dataset")?;
        let options = ReconcileOptions {
            compare_marks: cli.compare_marks,
            mark_tolerance: cli.mark_tolerance,
        };
        let diff = reconcile(&reference, &output.records, &options);

        if let Some(ref report_path) = cli.report {
            report::write_atomic(report_path, &report::report_to_json(&diff)?)
                .await
                .context("Failed to write reconciliation report")?;
        }

        if !cli.quiet {
            let s = &diff.summary;
            eprintln!(
                "{}  {} matched  /  {} missing  /  {} extra  /  {} with mark differences",
                if diff.is_clean() { green("✔") } else { yellow("≠") },
                s.matched,
                red(&s.missing.to_string()),
                yellow(&s.extra.to_string()),
                yellow(&s.mismatched.to_string()),
            );
            if cli.report.is_none() {
                for id in &diff.missing {
                    eprintln!("   {} {}", red("-"), id);
                }
                for id in &diff.extra {
                    eprintln!("   {} {}", green("+"), id);
                }
            }
        }
    }

    Ok(())
}

/// Write `json` to `--output` (atomically) or stdout.
async fn emit(cli: &Cli, json: &str) -> Result<()> {
    match cli.output {
        Some(ref path) => report::write_atomic(path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(json.as_bytes())
                .and_then(|_| handle.write_all(b"\n"))
                .context("Failed to write to stdout")
        }
    }
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let pages = parse_pages(&cli.pages)?;

    let defaults = GridOptions::default();
    let grid = GridOptions {
        flavor: cli.flavor.clone().or(defaults.flavor),
        row_tol: cli.row_tol.or(defaults.row_tol),
        column_tol: cli.column_tol.or(defaults.column_tol),
        edge_tol: cli.edge_tol.or(defaults.edge_tol),
        text_tol: cli.text_tol.or(defaults.text_tol),
        extra: defaults.extra,
    };

    let mut identifier = IdentifierPattern::new(cli.prefix.trim(), cli.id_digits);
    if cli.case_insensitive {
        identifier = identifier.case_insensitive();
    }

    let subjects = match cli.subjects {
        Some(ref path) => SubjectTable::from_json_file(path)
            .with_context(|| format!("Failed to load subject table from {}", path.display()))?,
        None => SubjectTable::default(),
    };

    let mut builder = ExtractionConfig::builder()
        .concurrency(cli.concurrency)
        .pages(pages)
        .grid(grid)
        .identifier(identifier)
        .subjects(subjects)
        .max_block_height(cli.max_block_height)
        .duplicate_policy(cli.on_duplicate.clone().into())
        .grid_timeout_secs(cli.grid_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref program) = cli.extractor {
        builder = builder
            .extractor(program.clone())
            .extractor_args(cli.extractor_args.iter().cloned());
    }

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if pages.contains(&0) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got 0)");
        }

        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}
