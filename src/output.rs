//! Result types returned by the extraction entry points.

use crate::error::{GazetteError, PageError};
use crate::model::{DuplicateIdentifier, RecordSet};
use crate::pipeline::grid::GridDump;
use crate::pipeline::segment::MalformedIdentifier;
use serde::{Deserialize, Serialize};

/// Everything one extraction run produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// All records, merged across pages under the configured duplicate policy.
    pub records: RecordSet,
    /// Every identifier that was produced more than once, in page order.
    pub conflicts: Vec<DuplicateIdentifier>,
    /// Per-page results sorted by page number, failed pages included.
    pub pages: Vec<PageResult>,
    pub stats: ExtractionStats,
}

impl ExtractionOutput {
    /// Strict view: any failed page turns the whole run into an error.
    pub fn into_result(self) -> Result<Self, GazetteError> {
        let failed = self.stats.failed_pages;
        if failed > 0 {
            return Err(GazetteError::PartialFailure {
                success: self.stats.processed_pages,
                failed,
                total: self.stats.selected_pages,
            });
        }
        Ok(self)
    }

    /// Errors of the pages that failed.
    pub fn page_errors(&self) -> impl Iterator<Item = &PageError> {
        self.pages.iter().filter_map(|p| p.error.as_ref())
    }
}

/// Outcome of one page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Tables the grid source returned for the page.
    pub tables: usize,
    /// Records found on this page alone (merged into
    /// [`ExtractionOutput::records`] by the eager API).
    #[serde(skip)]
    pub records: RecordSet,
    pub record_count: usize,
    /// Cells that looked like identifiers but could not be extracted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub malformed: Vec<MalformedIdentifier>,
    /// Rows dropped by the segmenter (rows of unidentifiable students and
    /// rows past the maximum block height).
    pub discarded_rows: usize,
    /// Identifiers repeated within this page.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<DuplicateIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,
    pub duration_ms: u64,
}

impl PageResult {
    pub(crate) fn failed(page_num: usize, error: PageError, duration_ms: u64) -> Self {
        Self {
            page_num,
            error: Some(error),
            duration_ms,
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Pages in the document.
    pub total_pages: usize,
    /// Pages picked by the page selection.
    pub selected_pages: usize,
    pub processed_pages: usize,
    pub failed_pages: usize,
    pub tables: usize,
    /// Records in the merged set.
    pub records: usize,
    /// Records carrying at least one flag.
    pub flagged_records: usize,
    /// Records whose block boundaries are uncertain.
    pub low_confidence_records: usize,
    pub malformed_identifiers: usize,
    pub duplicate_identifiers: usize,
    pub total_duration_ms: u64,
}

/// Raw grids of a run, as produced by [`crate::extract::extract_grids`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridOutput {
    /// Grids of every page that succeeded, in page order.
    pub dump: GridDump,
    /// Pages the grid source failed on.
    pub errors: Vec<PageError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(processed: usize, failed: usize) -> ExtractionOutput {
        let mut pages: Vec<PageResult> = (1..=processed)
            .map(|p| PageResult {
                page_num: p,
                ..PageResult::default()
            })
            .collect();
        for p in processed + 1..=processed + failed {
            pages.push(PageResult::failed(
                p,
                PageError::Timeout { page: p, secs: 5 },
                5000,
            ));
        }
        ExtractionOutput {
            pages,
            stats: ExtractionStats {
                selected_pages: processed + failed,
                processed_pages: processed,
                failed_pages: failed,
                ..ExtractionStats::default()
            },
            ..ExtractionOutput::default()
        }
    }

    #[test]
    fn into_result_accepts_clean_runs() {
        assert!(output(3, 0).into_result().is_ok());
    }

    #[test]
    fn into_result_rejects_partial_runs() {
        match output(2, 1).into_result() {
            Err(GazetteError::PartialFailure {
                success,
                failed,
                total,
            }) => assert_eq!((success, failed, total), (2, 1, 3)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn page_errors_lists_failures() {
        let out = output(1, 2);
        let pages: Vec<usize> = out.page_errors().map(PageError::page).collect();
        assert_eq!(pages, vec![2, 3]);
        assert!(!out.pages[1].is_ok());
    }

    #[test]
    fn page_json_omits_empty_fields() {
        let page = PageResult {
            page_num: 4,
            tables: 1,
            record_count: 0,
            ..PageResult::default()
        };
        let v = serde_json::to_value(&page).unwrap();
        assert!(v.get("error").is_none());
        assert!(v.get("records").is_none());
        assert!(v.get("malformed").is_none());
        assert_eq!(v["page_num"], 4);
    }
}
