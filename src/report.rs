//! Report emitter: JSON persistence for record sets and reconciliation reports.
//!
//! A record set is one JSON object per gazette, keyed by identifier:
//!
//! ```json
//! {
//!   "MU0000000000000001": {
//!     "marks": [{"code": "10411", "name": "Applied Mathematics-I", "mark": 78}],
//!     "provenance": {"page": 1, "table": 0, "first_row": 3, "last_row": 4, "confidence": 97.5}
//!   }
//! }
//! ```
//!
//! Reference datasets may use that shape or a plain code → mark map per
//! student (`{"MU…": {"marks": {"10411": 78}}}`); missing names are resolved
//! through the subject table.

use crate::error::GazetteError;
use crate::model::{Identifier, MarkValue, Provenance, RecordFlag, RecordSet, StudentRecord, SubjectMark};
use crate::pipeline::identifier::IdentifierValidator;
use crate::reconcile::ReconciliationReport;
use crate::subjects::SubjectTable;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Pretty-printed JSON for a record set.
pub fn record_set_to_json(records: &RecordSet) -> Result<String, GazetteError> {
    serde_json::to_string_pretty(records).map_err(|source| GazetteError::MalformedJson {
        what: "record set".to_string(),
        source,
    })
}

/// Parse a record set written by [`record_set_to_json`].
pub fn record_set_from_json(json: &str) -> Result<RecordSet, GazetteError> {
    serde_json::from_str(json).map_err(|source| GazetteError::MalformedJson {
        what: "record set".to_string(),
        source,
    })
}

/// Pretty-printed JSON for a reconciliation report.
pub fn report_to_json(report: &ReconciliationReport) -> Result<String, GazetteError> {
    serde_json::to_string_pretty(report).map_err(|source| GazetteError::MalformedJson {
        what: "reconciliation report".to_string(),
        source,
    })
}

// ── Reference loading ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ReferenceEntry {
    #[serde(default)]
    marks: ReferenceMarks,
    #[serde(default)]
    provenance: Provenance,
    #[serde(default)]
    flags: Vec<RecordFlag>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReferenceMarks {
    List(Vec<SubjectMark>),
    Map(BTreeMap<String, MarkValue>),
}

impl Default for ReferenceMarks {
    fn default() -> Self {
        ReferenceMarks::List(Vec::new())
    }
}

/// Parse a reference dataset.
///
/// Keys that fail `validator.is_valid` are kept (the reference is trusted)
/// but logged.
pub fn parse_reference(
    json: &str,
    subjects: &SubjectTable,
    validator: &IdentifierValidator,
) -> Result<RecordSet, GazetteError> {
    let entries: BTreeMap<String, ReferenceEntry> =
        serde_json::from_str(json).map_err(|source| GazetteError::MalformedJson {
            what: "reference dataset".to_string(),
            source,
        })?;

    let invalid = entries.keys().filter(|k| !validator.is_valid(k)).count();
    if invalid > 0 {
        warn!(
            "Reference dataset has {} key(s) that are not well-formed identifiers",
            invalid
        );
        for key in entries.keys().filter(|k| !validator.is_valid(k)) {
            debug!("Malformed reference key: {:?}", key);
        }
    }

    let records = entries.into_iter().map(|(key, entry)| {
        let marks = match entry.marks {
            ReferenceMarks::List(list) => list
                .into_iter()
                .map(|mut m| {
                    if m.name.is_empty() {
                        m.name = subjects.resolve(&m.code).to_string();
                    }
                    m
                })
                .collect(),
            ReferenceMarks::Map(map) => map
                .into_iter()
                .map(|(code, mark)| SubjectMark {
                    name: subjects.resolve(&code).to_string(),
                    code,
                    mark,
                })
                .collect(),
        };
        StudentRecord {
            identifier: Identifier::new_unchecked(key),
            marks,
            provenance: entry.provenance,
            flags: entry.flags,
        }
    });
    Ok(records.collect())
}

/// Read and parse a reference dataset from disk.
pub async fn load_reference(
    path: impl AsRef<Path>,
    subjects: &SubjectTable,
    validator: &IdentifierValidator,
) -> Result<RecordSet, GazetteError> {
    let path = path.as_ref();
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| GazetteError::ReferenceLoadFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    let records = parse_reference(&json, subjects, validator).map_err(|e| {
        GazetteError::ReferenceLoadFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        }
    })?;
    debug!("Loaded {} reference records from {}", records.len(), path.display());
    Ok(records)
}

// ── Atomic writes ────────────────────────────────────────────────────────

/// Write `contents` to `path` via a sibling temp file and a rename, so
/// readers never observe a half-written file.
pub async fn write_atomic(path: impl AsRef<Path>, contents: &str) -> Result<(), GazetteError> {
    let path = path.as_ref();
    let write_err = |source| GazetteError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}
