//! Reconciliation: diff an extracted [`RecordSet`] against a reference set.
//!
//! Identifiers are compared as sets: `missing = reference − extracted`,
//! `extra = extracted − reference`, `matched = reference ∩ extracted`. For
//! matched identifiers the marks can optionally be compared subject by
//! subject.
//!
//! Every collection in the report is a `BTreeSet`/`BTreeMap`, so the report
//! depends only on the contents of the two sets and never on the order their
//! records were inserted.

use crate::model::{Identifier, MarkValue, RecordSet, StudentRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Knobs for [`reconcile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    /// Compare marks of matched identifiers. Default: true.
    pub compare_marks: bool,
    /// Numeric marks closer than this are equal. Default: 0.
    pub mark_tolerance: f64,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            compare_marks: true,
            mark_tolerance: 0.0,
        }
    }
}

/// One subject-level difference for a matched identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldMismatch {
    MarkDiffers {
        code: String,
        reference: MarkValue,
        extracted: MarkValue,
    },
    /// Subject in the reference record, absent from the extracted one.
    MissingSubject { code: String, reference: MarkValue },
    /// Subject in the extracted record, absent from the reference.
    ExtraSubject { code: String, extracted: MarkValue },
}

impl FieldMismatch {
    pub fn code(&self) -> &str {
        match self {
            FieldMismatch::MarkDiffers { code, .. }
            | FieldMismatch::MissingSubject { code, .. }
            | FieldMismatch::ExtraSubject { code, .. } => code,
        }
    }
}

/// Counts for a [`ReconciliationReport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub reference_total: usize,
    pub extracted_total: usize,
    pub matched: usize,
    pub missing: usize,
    pub extra: usize,
    /// Matched identifiers with at least one field mismatch.
    pub mismatched: usize,
}

/// Result of comparing two record sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub matched: BTreeSet<Identifier>,
    pub missing: BTreeSet<Identifier>,
    pub extra: BTreeSet<Identifier>,
    /// Only identifiers with differences appear here.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mismatches: BTreeMap<Identifier, Vec<FieldMismatch>>,
    pub summary: ReconciliationSummary,
}

impl ReconciliationReport {
    /// No missing, no extra, no mismatched identifiers.
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.mismatches.is_empty()
    }
}

/// Compare `extracted` against `reference`. Read-only; never fails.
pub fn reconcile(
    reference: &RecordSet,
    extracted: &RecordSet,
    options: &ReconcileOptions,
) -> ReconciliationReport {
    let ref_ids: BTreeSet<&Identifier> = reference.identifiers().collect();
    let ext_ids: BTreeSet<&Identifier> = extracted.identifiers().collect();

    let matched: BTreeSet<Identifier> = ref_ids.intersection(&ext_ids).map(|id| (*id).clone()).collect();
    let missing: BTreeSet<Identifier> = ref_ids.difference(&ext_ids).map(|id| (*id).clone()).collect();
    let extra: BTreeSet<Identifier> = ext_ids.difference(&ref_ids).map(|id| (*id).clone()).collect();

    let mut mismatches = BTreeMap::new();
    if options.compare_marks {
        for id in &matched {
            let (Some(r), Some(e)) = (reference.get(id), extracted.get(id)) else {
                continue;
            };
            let diffs = compare_marks(r, e, options.mark_tolerance);
            if !diffs.is_empty() {
                debug!("{}: {} field mismatch(es)", id, diffs.len());
                mismatches.insert(id.clone(), diffs);
            }
        }
    }

    let summary = ReconciliationSummary {
        reference_total: reference.len(),
        extracted_total: extracted.len(),
        matched: matched.len(),
        missing: missing.len(),
        extra: extra.len(),
        mismatched: mismatches.len(),
    };

    ReconciliationReport {
        matched,
        missing,
        extra,
        mismatches,
        summary,
    }
}

/// Subject-by-subject comparison, sorted by code.
fn compare_marks(reference: &StudentRecord, extracted: &StudentRecord, tolerance: f64) -> Vec<FieldMismatch> {
    let ref_marks: BTreeMap<&str, &MarkValue> =
        reference.marks.iter().map(|m| (m.code.as_str(), &m.mark)).collect();
    let ext_marks: BTreeMap<&str, &MarkValue> =
        extracted.marks.iter().map(|m| (m.code.as_str(), &m.mark)).collect();

    let codes: BTreeSet<&str> = ref_marks.keys().chain(ext_marks.keys()).copied().collect();

    codes
        .into_iter()
        .filter_map(|code| match (ref_marks.get(code), ext_marks.get(code)) {
            (Some(r), Some(e)) if r.matches(e, tolerance) => None,
            (Some(r), Some(e)) => Some(FieldMismatch::MarkDiffers {
                code: code.to_string(),
                reference: (*r).clone(),
                extracted: (*e).clone(),
            }),
            (Some(r), None) => Some(FieldMismatch::MissingSubject {
                code: code.to_string(),
                reference: (*r).clone(),
            }),
            (None, Some(e)) => Some(FieldMismatch::ExtraSubject {
                code: code.to_string(),
                extracted: (*e).clone(),
            }),
            (None, None) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Provenance, SubjectMark};

    fn rec(id: &str, marks: &[(&str, MarkValue)]) -> StudentRecord {
        StudentRecord {
            identifier: Identifier::new_unchecked(id),
            marks: marks
                .iter()
                .map(|(code, mark)| SubjectMark {
                    code: code.to_string(),
                    name: String::new(),
                    mark: mark.clone(),
                })
                .collect(),
            provenance: Provenance::default(),
            flags: vec![],
        }
    }

    fn set(records: Vec<StudentRecord>) -> RecordSet {
        let mut s = RecordSet::new();
        for r in records {
            s.try_insert(r).unwrap();
        }
        s
    }

    fn ids(names: &[&str]) -> BTreeSet<Identifier> {
        names.iter().map(|n| Identifier::new_unchecked(*n)).collect()
    }

    #[test]
    fn set_classification() {
        let reference = set(vec![rec("A", &[]), rec("B", &[]), rec("C", &[])]);
        let extracted = set(vec![rec("B", &[]), rec("C", &[]), rec("D", &[])]);
        let report = reconcile(&reference, &extracted, &ReconcileOptions::default());

        assert_eq!(report.matched, ids(&["B", "C"]));
        assert_eq!(report.missing, ids(&["A"]));
        assert_eq!(report.extra, ids(&["D"]));
        assert_eq!(report.summary.matched, 2);
        assert_eq!(report.summary.reference_total, 3);
        assert!(!report.is_clean());
    }

    #[test]
    fn empty_reference_is_all_extra() {
        let extracted = set(vec![rec("A", &[]), rec("B", &[])]);
        let report = reconcile(&RecordSet::new(), &extracted, &ReconcileOptions::default());
        assert!(report.matched.is_empty());
        assert!(report.missing.is_empty());
        assert_eq!(report.extra, ids(&["A", "B"]));
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let a1 = set(vec![rec("A", &[]), rec("B", &[("10411", MarkValue::Numeric(1.0))])]);
        let a2 = set(vec![rec("B", &[("10411", MarkValue::Numeric(1.0))]), rec("A", &[])]);
        let b1 = set(vec![rec("C", &[]), rec("B", &[("10411", MarkValue::Numeric(2.0))])]);
        let b2 = set(vec![rec("B", &[("10411", MarkValue::Numeric(2.0))]), rec("C", &[])]);

        let opts = ReconcileOptions::default();
        assert_eq!(reconcile(&a1, &b1, &opts), reconcile(&a2, &b2, &opts));
    }

    #[test]
    fn field_mismatches_sorted_by_code() {
        let reference = set(vec![rec(
            "A",
            &[
                ("10413", MarkValue::Numeric(50.0)),
                ("10411", MarkValue::Numeric(78.0)),
                ("10412", MarkValue::Absent),
            ],
        )]);
        let extracted = set(vec![rec(
            "A",
            &[
                ("10411", MarkValue::Numeric(87.0)),
                ("10414", MarkValue::Pass),
                ("10412", MarkValue::Absent),
            ],
        )]);
        let report = reconcile(&reference, &extracted, &ReconcileOptions::default());
        let diffs = &report.mismatches[&Identifier::new_unchecked("A")];
        let codes: Vec<&str> = diffs.iter().map(FieldMismatch::code).collect();
        assert_eq!(codes, vec!["10411", "10413", "10414"]);
        assert!(matches!(diffs[1], FieldMismatch::MissingSubject { .. }));
        assert!(matches!(diffs[2], FieldMismatch::ExtraSubject { .. }));
        assert_eq!(report.summary.mismatched, 1);
    }

    #[test]
    fn tolerance_and_opt_out() {
        let reference = set(vec![rec("A", &[("10411", MarkValue::Numeric(78.0))])]);
        let extracted = set(vec![rec("A", &[("10411", MarkValue::Numeric(78.5))])]);

        let strict = reconcile(&reference, &extracted, &ReconcileOptions::default());
        assert_eq!(strict.summary.mismatched, 1);

        let loose = ReconcileOptions {
            mark_tolerance: 0.5,
            ..ReconcileOptions::default()
        };
        assert!(reconcile(&reference, &extracted, &loose).is_clean());

        let ids_only = ReconcileOptions {
            compare_marks: false,
            ..ReconcileOptions::default()
        };
        assert!(reconcile(&reference, &extracted, &ids_only).is_clean());
    }

    #[test]
    fn report_json_shape() {
        let reference = set(vec![rec("A", &[]), rec("B", &[])]);
        let extracted = set(vec![rec("B", &[]), rec("C", &[])]);
        let report = reconcile(&reference, &extracted, &ReconcileOptions::default());
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["matched"], serde_json::json!(["B"]));
        assert_eq!(v["missing"], serde_json::json!(["A"]));
        assert_eq!(v["extra"], serde_json::json!(["C"]));
        assert!(v.get("mismatches").is_none());
        assert_eq!(v["summary"]["extra"], 1);
    }
}
