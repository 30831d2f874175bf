//! Core data model: grids in, typed student records out.
//!
//! ```text
//! TableGrid ──segment──▶ RecordBlock ──map──▶ StudentRecord ──▶ RecordSet
//! ```
//!
//! A [`TableGrid`] is immutable once built; the segmenter only borrows it.
//! A [`RecordSet`] is assembled per page and merged in page order; once
//! handed to the reconciler it is only read.

use crate::config::DuplicatePolicy;
use crate::pipeline::normalize;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Grid ─────────────────────────────────────────────────────────────────

/// One text cell of an extracted table. `text` may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
    pub text: String,
}

impl Cell {
    /// Blank once normalised (whitespace and invisible characters only).
    pub fn is_empty(&self) -> bool {
        normalize::is_blank(&self.text)
    }
}

/// A table as produced by the grid source for one page.
///
/// Rows are fixed at construction; there is no way to mutate them afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TableGrid {
    page: usize,
    table_index: usize,
    confidence: f64,
    rows: Vec<Vec<Cell>>,
}

impl TableGrid {
    /// Build a grid from raw row text. `confidence` is clamped to 0–100.
    pub fn new(page: usize, table_index: usize, confidence: f64, rows: Vec<Vec<String>>) -> Self {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(r, cols)| {
                cols.into_iter()
                    .enumerate()
                    .map(|(c, text)| Cell { row: r, col: c, text })
                    .collect()
            })
            .collect();
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            page,
            table_index,
            confidence,
            rows,
        }
    }

    /// 1-indexed page this table came from.
    pub fn page(&self) -> usize {
        self.page
    }

    /// 0-indexed position of this table on its page.
    pub fn table_index(&self) -> usize {
        self.table_index
    }

    /// Source accuracy score, 0–100.
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

// ── Identifier ───────────────────────────────────────────────────────────

/// A student examination registration number (ERN), e.g. `MU0000000000000001`.
///
/// Extracted identifiers are always produced by
/// [`crate::pipeline::identifier::IdentifierValidator`], so they satisfy the
/// configured pattern. Identifiers read from a reference file are taken as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Wrap a string without validating it.
    pub fn new_unchecked(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── Marks ────────────────────────────────────────────────────────────────

/// A classified mark value.
///
/// Serialised as a JSON number (`Numeric`), `"P"` / `"F"` / `"AB"`, the raw
/// string (`Unparseable`), or `null` (`Missing`). Deserialising a string runs
/// it through [`MarkValue::classify`], so reference files that store marks as
/// strings (`"78"`) compare equal to extracted numeric marks.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkValue {
    Numeric(f64),
    Pass,
    Fail,
    Absent,
    /// No mark token followed the subject code.
    Missing,
    /// Raw text that is neither numeric nor a known token.
    Unparseable(String),
}

impl MarkValue {
    /// Classify a raw mark token.
    pub fn classify(raw: &str) -> Self {
        let token = raw.trim();
        if token.is_empty() {
            return MarkValue::Missing;
        }
        if is_decimal(token) {
            // Digit runs too long for an f64 overflow to infinity.
            if let Some(n) = token.parse::<f64>().ok().filter(|n| n.is_finite()) {
                return MarkValue::Numeric(n);
            }
        }
        match token.to_ascii_uppercase().as_str() {
            "P" => MarkValue::Pass,
            "F" => MarkValue::Fail,
            "AB" | "ABS" => MarkValue::Absent,
            _ => MarkValue::Unparseable(token.to_string()),
        }
    }

    /// Equality with an absolute tolerance on numeric marks.
    pub fn matches(&self, other: &MarkValue, tolerance: f64) -> bool {
        match (self, other) {
            (MarkValue::Numeric(a), MarkValue::Numeric(b)) => (a - b).abs() <= tolerance,
            (a, b) => a == b,
        }
    }
}

/// `\d+(\.\d+)?` without pulling a regex in for the hot path.
fn is_decimal(token: &str) -> bool {
    let (int, frac) = match token.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (token, None),
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    digits(int) && frac.is_none_or(digits)
}

impl fmt::Display for MarkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkValue::Numeric(n) => write!(f, "{n}"),
            MarkValue::Pass => f.write_str("P"),
            MarkValue::Fail => f.write_str("F"),
            MarkValue::Absent => f.write_str("AB"),
            MarkValue::Missing => f.write_str("-"),
            MarkValue::Unparseable(raw) => f.write_str(raw),
        }
    }
}

impl Serialize for MarkValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MarkValue::Numeric(n) => serializer.serialize_f64(*n),
            MarkValue::Pass => serializer.serialize_str("P"),
            MarkValue::Fail => serializer.serialize_str("F"),
            MarkValue::Absent => serializer.serialize_str("AB"),
            MarkValue::Missing => serializer.serialize_none(),
            MarkValue::Unparseable(raw) => serializer.serialize_str(raw),
        }
    }
}

impl<'de> Deserialize<'de> for MarkValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MarkVisitor;

        impl<'de> Visitor<'de> for MarkVisitor {
            type Value = MarkValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number, a mark token string, or null")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<MarkValue, E> {
                Ok(MarkValue::Numeric(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<MarkValue, E> {
                Ok(MarkValue::Numeric(v as f64))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<MarkValue, E> {
                Ok(MarkValue::Numeric(v as f64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<MarkValue, E> {
                Ok(MarkValue::classify(v))
            }

            fn visit_none<E: de::Error>(self) -> Result<MarkValue, E> {
                Ok(MarkValue::Missing)
            }

            fn visit_unit<E: de::Error>(self) -> Result<MarkValue, E> {
                Ok(MarkValue::Missing)
            }
        }

        deserializer.deserialize_any(MarkVisitor)
    }
}

/// One subject result inside a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectMark {
    /// 5-digit subject code.
    pub code: String,
    /// Canonical name, or the raw code when the subject table has no entry.
    #[serde(default)]
    pub name: String,
    pub mark: MarkValue,
}

// ── Records ──────────────────────────────────────────────────────────────

/// Where a record came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Provenance {
    /// 1-indexed page; 0 for records loaded from a reference file.
    pub page: usize,
    pub table: usize,
    pub first_row: usize,
    pub last_row: usize,
    /// Confidence inherited from the table grid (0–100).
    pub confidence: f64,
}

/// A non-fatal anomaly attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordFlag {
    /// Several distinct identifiers shared one row.
    AmbiguousRow { row: usize, identifiers: Vec<String> },
    /// The block hit the maximum height; trailing rows were dropped.
    OverlongBlock { dropped_rows: usize },
    /// Subject code has no entry in the subject table.
    UnresolvedSubjectCode { code: String },
    /// Mark token matched neither a number nor a known token.
    UnparseableMark { code: String, raw: String },
    /// No mark token followed the subject code.
    MissingMark { code: String },
    /// The same subject code occurred twice in the block.
    DuplicateSubject {
        code: String,
        kept_row: usize,
        dropped_row: usize,
    },
}

impl RecordFlag {
    /// Flags that cast doubt on the block boundaries themselves.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            RecordFlag::AmbiguousRow { .. } | RecordFlag::OverlongBlock { .. }
        )
    }
}

/// A validated student record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    /// Filled from the map key when a [`RecordSet`] is deserialised.
    #[serde(skip)]
    pub identifier: Identifier,
    /// Ordered by first appearance; codes are unique.
    pub marks: Vec<SubjectMark>,
    #[serde(default)]
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<RecordFlag>,
}

impl StudentRecord {
    pub fn mark(&self, code: &str) -> Option<&SubjectMark> {
        self.marks.iter().find(|m| m.code == code)
    }

    /// True when block segmentation itself was uncertain.
    pub fn is_low_confidence(&self) -> bool {
        self.flags.iter().any(RecordFlag::is_structural)
    }

    /// Absorb marks for codes this record does not have yet.
    fn merge_marks(&mut self, other: StudentRecord) {
        for mark in other.marks {
            if self.mark(&mark.code).is_none() {
                self.marks.push(mark);
            }
        }
        self.flags.extend(other.flags);
    }
}

/// The same identifier produced twice in one extraction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateIdentifier {
    pub identifier: Identifier,
    /// Provenance of the record already in the set.
    pub existing: Provenance,
    /// Provenance of the record that collided with it.
    pub incoming: Provenance,
    /// How the collision was resolved.
    pub resolution: DuplicatePolicy,
}

/// Records keyed by identifier, iterated in identifier order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    records: BTreeMap<Identifier, StudentRecord>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &Identifier) -> Option<&StudentRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.records.contains_key(id)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &Identifier> {
        self.records.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StudentRecord> {
        self.records.values()
    }

    pub fn into_records(self) -> impl Iterator<Item = StudentRecord> {
        self.records.into_values()
    }

    /// Insert a record unless its identifier is already present, in which
    /// case the record is handed back untouched.
    pub fn try_insert(&mut self, record: StudentRecord) -> Result<(), Box<StudentRecord>> {
        if self.records.contains_key(&record.identifier) {
            return Err(Box::new(record));
        }
        self.records.insert(record.identifier.clone(), record);
        Ok(())
    }

    /// Insert `record`, resolving a collision with `policy`.
    ///
    /// Returns the conflict when the identifier was already present.
    pub fn insert_with(
        &mut self,
        record: StudentRecord,
        policy: DuplicatePolicy,
    ) -> Option<DuplicateIdentifier> {
        let incoming = match self.try_insert(record) {
            Ok(()) => return None,
            Err(rec) => *rec,
        };
        let existing = self.records.get_mut(&incoming.identifier)?;
        let conflict = DuplicateIdentifier {
            identifier: incoming.identifier.clone(),
            existing: existing.provenance.clone(),
            incoming: incoming.provenance.clone(),
            resolution: policy,
        };
        match policy {
            DuplicatePolicy::KeepFirst => {}
            DuplicatePolicy::KeepLast => *existing = incoming,
            DuplicatePolicy::MergeMarks => existing.merge_marks(incoming),
        }
        Some(conflict)
    }

    /// Move every record of `other` into `self`, returning the conflicts.
    pub fn merge(&mut self, other: RecordSet, policy: DuplicatePolicy) -> Vec<DuplicateIdentifier> {
        other
            .into_records()
            .filter_map(|record| self.insert_with(record, policy))
            .collect()
    }
}

/// Later records replace earlier ones with the same identifier.
impl FromIterator<StudentRecord> for RecordSet {
    fn from_iter<I: IntoIterator<Item = StudentRecord>>(iter: I) -> Self {
        Self {
            records: iter
                .into_iter()
                .map(|r| (r.identifier.clone(), r))
                .collect(),
        }
    }
}

impl Serialize for RecordSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.records.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RecordSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut records = BTreeMap::<Identifier, StudentRecord>::deserialize(deserializer)?;
        for (id, record) in records.iter_mut() {
            record.identifier = id.clone();
        }
        Ok(Self { records })
    }
}
