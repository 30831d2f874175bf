//! Streaming extraction API: emit pages as they complete.
//!
//! ## Why stream?
//!
//! A gazette can run to hundreds of pages and the external extractor takes
//! seconds per page. A stream lets callers show partial results, feed a
//! progress bar, or load records into a database page by page instead of
//! waiting for the whole document.
//!
//! Unlike the eager [`crate::extract::extract`], pages are not merged: each
//! [`PageResult`] carries the records of that page alone, and pages arrive in
//! completion order (sort by `page_num` if order matters).

use crate::config::ExtractionConfig;
use crate::error::{GazetteError, PageError};
use crate::extract::{prepare, run_page, PageContext};
use crate::output::PageResult;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of page results.
pub type PageStream = Pin<Box<dyn Stream<Item = Result<PageResult, PageError>> + Send>>;

/// Extract records, streaming pages as they are ready.
///
/// # Returns
/// - `Ok(PageStream)` - a stream of `Result<PageResult, PageError>`
/// - `Err(GazetteError)` - fatal error (file not found, no grid source, etc.)
///
/// # Example
/// ```rust,no_run
/// use gazette_extract::{extract_stream, ExtractionConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::default();
/// let mut pages = extract_stream("grids.json", &config).await?;
/// while let Some(page) = pages.next().await {
///     match page {
///         Ok(p) => println!("Page {}: {} records", p.page_num, p.record_count),
///         Err(e) => eprintln!("Error: {e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn extract_stream(
    input: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<PageStream, GazetteError> {
    let input = input.as_ref();
    info!("Starting streaming extraction: {}", input);

    let prepared = prepare(input, config).await?;
    let ctx = Arc::new(PageContext::new(prepared.source, prepared.input, config)?);

    let s = stream::iter(prepared.pages.into_iter().map(move |page| {
        let ctx = Arc::clone(&ctx);
        async move {
            let mut result = run_page(&ctx, page).await;
            match result.error.take() {
                None => Ok(result),
                Some(e) => Err(e),
            }
        }
    }))
    .buffer_unordered(config.concurrency);

    Ok(Box::pin(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageSelection;
    use crate::pipeline::grid::DumpGridSource;
    use std::io::Write;

    const DUMP: &str = r#"{"tables": [
        {"page": 1, "rows": [["", "MU0000000000000001", "10411", "78"]]},
        {"page": 2, "rows": [["", "MU0000000000000002", "10411", "64"],
                             ["", "MU0000000000000003", "10412", "P"]]}
    ]}"#;

    fn dump_config() -> ExtractionConfig {
        ExtractionConfig::builder()
            .grid_source(Arc::new(DumpGridSource::new()))
            .build()
            .unwrap()
    }

    fn dump_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        f.write_all(DUMP.as_bytes()).unwrap();
        f
    }

    #[test]
    fn streams_every_selected_page() {
        let f = dump_file();
        let config = dump_config();
        let mut pages: Vec<PageResult> = tokio_test::block_on(async {
            let s = extract_stream(f.path().to_str().unwrap(), &config).await.unwrap();
            s.map(|r| r.unwrap()).collect::<Vec<_>>().await
        });
        pages.sort_by_key(|p| p.page_num);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].record_count, 1);
        assert_eq!(pages[1].record_count, 2);
    }

    #[test]
    fn page_selection_applies() {
        let f = dump_file();
        let config = ExtractionConfig::builder()
            .grid_source(Arc::new(DumpGridSource::new()))
            .pages(PageSelection::Single(2))
            .build()
            .unwrap();
        let pages: Vec<_> = tokio_test::block_on(async {
            extract_stream(f.path().to_str().unwrap(), &config)
                .await
                .unwrap()
                .collect::<Vec<_>>()
                .await
        });
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].as_ref().unwrap().page_num, 2);
    }

    #[test]
    fn missing_input_is_fatal() {
        let config = dump_config();
        let result = tokio_test::block_on(extract_stream("/no/such/grids.json", &config));
        assert!(matches!(result, Err(GazetteError::FileNotFound { .. })));
    }
}
