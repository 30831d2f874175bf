//! Field mapping: turn a record block into a typed [`StudentRecord`].
//!
//! Column alignment differs page to page (and extractors merge neighbouring
//! columns), so marks are found by position rather than by column header:
//! every non-empty cell is split into tokens at whitespace and separator
//! punctuation (`(10411)`, `10411:`, `10411-78`), a 5-digit token is a
//! subject code, and the token right after it on the same row is its mark.
//!
//! ```text
//! "" | MU…01 | John Doe | 10411 | 78 | 10412 65 |
//!                          code   mark  code  mark
//! ```
//!
//! Nothing is discarded silently: unknown codes keep their raw code as name,
//! odd mark tokens are kept verbatim, and both are flagged.

use crate::model::{MarkValue, Provenance, RecordFlag, StudentRecord, SubjectMark};
use crate::pipeline::segment::RecordBlock;
use crate::subjects::SubjectTable;
use tracing::debug;

/// Width of a subject code.
pub const SUBJECT_CODE_LEN: usize = 5;

/// A cell token with its position in the block.
#[derive(Debug)]
struct Token<'a> {
    row: usize,
    text: &'a str,
}

/// Characters that separate tokens besides whitespace.
const SEPARATORS: &[char] = &['(', ')', '[', ']', '{', '}', ':', ';', ',', '/', '|', '-'];

fn is_separator(c: char) -> bool {
    c.is_whitespace() || SEPARATORS.contains(&c)
}

/// `true` for exactly five ASCII digits.
pub fn is_subject_code(token: &str) -> bool {
    token.len() == SUBJECT_CODE_LEN && token.bytes().all(|b| b.is_ascii_digit())
}

/// Map one block to a record. Pure: the same block always gives the same record.
pub fn map_block(block: &RecordBlock, subjects: &SubjectTable) -> StudentRecord {
    let mut marks: Vec<SubjectMark> = Vec::new();
    // Row each kept code was taken from.
    let mut kept_rows: Vec<usize> = Vec::new();
    let mut flags = block.flags.clone();

    // Rows run anchor-first, so the first occurrence of a code is the one
    // nearest the anchor.
    for row in &block.rows {
        let tokens = row_tokens(block, row.index, &row.cells);
        let mut i = 0;
        while i < tokens.len() {
            let token = &tokens[i];
            if !is_subject_code(token.text) {
                i += 1;
                continue;
            }
            let code = token.text;
            let raw_mark = tokens
                .get(i + 1)
                .filter(|next| !is_subject_code(next.text))
                .map(|next| next.text);
            i += if raw_mark.is_some() { 2 } else { 1 };

            if let Some(pos) = marks.iter().position(|m| m.code == code) {
                debug!(
                    "{}: subject {} repeated on row {}, keeping row {}",
                    block.identifier, code, token.row, kept_rows[pos]
                );
                flags.push(RecordFlag::DuplicateSubject {
                    code: code.to_string(),
                    kept_row: kept_rows[pos],
                    dropped_row: token.row,
                });
                continue;
            }

            let mark = raw_mark.map(MarkValue::classify).unwrap_or(MarkValue::Missing);
            match &mark {
                MarkValue::Missing => flags.push(RecordFlag::MissingMark {
                    code: code.to_string(),
                }),
                MarkValue::Unparseable(raw) => flags.push(RecordFlag::UnparseableMark {
                    code: code.to_string(),
                    raw: raw.clone(),
                }),
                _ => {}
            }
            let name = match subjects.name(code) {
                Some(name) => name.to_string(),
                None => {
                    flags.push(RecordFlag::UnresolvedSubjectCode {
                        code: code.to_string(),
                    });
                    code.to_string()
                }
            };

            marks.push(SubjectMark {
                code: code.to_string(),
                name,
                mark,
            });
            kept_rows.push(token.row);
        }
    }

    StudentRecord {
        identifier: block.identifier.clone(),
        marks,
        provenance: Provenance {
            page: block.page,
            table: block.table,
            first_row: block.first_row,
            last_row: block.last_row,
            confidence: block.confidence,
        },
        flags,
    }
}

/// Tokens of a row in column order, skipping the identifier cell.
fn row_tokens<'a>(
    block: &RecordBlock,
    row: usize,
    cells: &'a [crate::model::Cell],
) -> Vec<Token<'a>> {
    let id = block.identifier.as_str();
    cells
        .iter()
        .filter(|c| !c.is_empty())
        .filter(|c| {
            let compact: String = c.text.chars().filter(|ch| ch.is_alphanumeric()).collect();
            !compact.eq_ignore_ascii_case(id)
        })
        .flat_map(|c| {
            c.text
                .split(is_separator)
                .filter(|t| !t.is_empty())
                .map(move |text| Token { row, text })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cell, Identifier};
    use crate::pipeline::segment::BlockRow;

    const ID: &str = "MU0000000000000001";

    fn block(rows: &[(usize, &[&str])]) -> RecordBlock {
        RecordBlock {
            identifier: Identifier::new_unchecked(ID),
            page: 1,
            table: 0,
            first_row: rows.first().map(|r| r.0).unwrap_or(0),
            last_row: rows.last().map(|r| r.0).unwrap_or(0),
            confidence: 88.0,
            rows: rows
                .iter()
                .map(|(index, cells)| BlockRow {
                    index: *index,
                    cells: cells
                        .iter()
                        .enumerate()
                        .map(|(col, text)| Cell {
                            row: *index,
                            col,
                            text: text.to_string(),
                        })
                        .collect(),
                })
                .collect(),
            flags: vec![],
        }
    }

    #[test]
    fn example_row() {
        let b = block(&[(0, &["", ID, "John Doe", "10411", "78", "10412", "65"])]);
        let r = map_block(&b, &SubjectTable::default());
        assert_eq!(r.identifier.as_str(), ID);
        assert_eq!(
            r.marks,
            vec![
                SubjectMark {
                    code: "10411".into(),
                    name: "Applied Mathematics-I".into(),
                    mark: MarkValue::Numeric(78.0),
                },
                SubjectMark {
                    code: "10412".into(),
                    name: "Applied Physics".into(),
                    mark: MarkValue::Numeric(65.0),
                },
            ]
        );
        assert!(r.flags.is_empty());
        assert_eq!(r.provenance.confidence, 88.0);
    }

    #[test]
    fn merged_columns() {
        let b = block(&[(0, &[ID, "10411 78 10413", "AB"])]);
        let r = map_block(&b, &SubjectTable::default());
        assert_eq!(r.marks[0].mark, MarkValue::Numeric(78.0));
        assert_eq!(r.marks[1].code, "10413");
        assert_eq!(r.marks[1].mark, MarkValue::Absent);
    }

    #[test]
    fn punctuated_codes() {
        let b = block(&[(0, &["", ID, "A", "(10411)", "78", "10412:", "65", "10413-AB"])]);
        let r = map_block(&b, &SubjectTable::default());
        let codes: Vec<&str> = r.marks.iter().map(|m| m.code.as_str()).collect();
        assert_eq!(codes, vec!["10411", "10412", "10413"]);
        assert_eq!(r.marks[0].mark, MarkValue::Numeric(78.0));
        assert_eq!(r.marks[1].mark, MarkValue::Numeric(65.0));
        assert_eq!(r.marks[2].mark, MarkValue::Absent);
        assert!(r.flags.is_empty());
    }

    #[test]
    fn marks_across_continuation_rows() {
        let b = block(&[(4, &[ID, "10411", "78"]), (5, &["", "10414", "P"])]);
        let r = map_block(&b, &SubjectTable::default());
        assert_eq!(r.marks.len(), 2);
        assert_eq!(r.marks[1].mark, MarkValue::Pass);
        assert_eq!((r.provenance.first_row, r.provenance.last_row), (4, 5));
    }

    #[test]
    fn duplicate_code_keeps_nearest_anchor() {
        let b = block(&[(2, &[ID, "10411", "78"]), (3, &["", "10411", "12"])]);
        let r = map_block(&b, &SubjectTable::default());
        assert_eq!(r.marks.len(), 1);
        assert_eq!(r.marks[0].mark, MarkValue::Numeric(78.0));
        assert_eq!(
            r.flags,
            vec![RecordFlag::DuplicateSubject {
                code: "10411".into(),
                kept_row: 2,
                dropped_row: 3,
            }]
        );
    }

    #[test]
    fn unknown_code_is_kept_and_flagged() {
        let b = block(&[(0, &[ID, "99999", "40"])]);
        let r = map_block(&b, &SubjectTable::default());
        assert_eq!(r.marks[0].name, "99999");
        assert_eq!(
            r.flags,
            vec![RecordFlag::UnresolvedSubjectCode {
                code: "99999".into()
            }]
        );
    }

    #[test]
    fn odd_marks_are_flagged() {
        let b = block(&[(0, &[ID, "10411", "78+", "10412", "10413"])]);
        let r = map_block(&b, &SubjectTable::default());
        assert_eq!(r.marks.len(), 3);
        assert_eq!(r.marks[0].mark, MarkValue::Unparseable("78+".into()));
        assert_eq!(r.marks[1].mark, MarkValue::Missing);
        assert_eq!(r.marks[2].mark, MarkValue::Missing);
        assert!(r.flags.contains(&RecordFlag::UnparseableMark {
            code: "10411".into(),
            raw: "78+".into()
        }));
        assert!(r.flags.contains(&RecordFlag::MissingMark {
            code: "10412".into()
        }));
    }

    #[test]
    fn block_flags_are_inherited() {
        let mut b = block(&[(0, &[ID, "10411", "78"])]);
        b.flags.push(RecordFlag::OverlongBlock { dropped_rows: 1 });
        let r = map_block(&b, &SubjectTable::default());
        assert!(r.is_low_confidence());
    }

    #[test]
    fn mapping_is_idempotent() {
        let b = block(&[(0, &[ID, "10411", "78", "10411", "1", "55555", "x"])]);
        let t = SubjectTable::default();
        assert_eq!(map_block(&b, &t), map_block(&b, &t));
    }

    #[test]
    fn subject_code_shape() {
        assert!(is_subject_code("10411"));
        assert!(!is_subject_code("1041"));
        assert!(!is_subject_code("104111"));
        assert!(!is_subject_code("1041a"));
    }
}
