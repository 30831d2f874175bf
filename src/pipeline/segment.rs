//! Record segmentation: cut a table grid into per-student row blocks.
//!
//! A row is an *anchor* when one of its cells yields an identifier. Each
//! anchor opens a block that runs until the next anchor, the end of the grid,
//! or the configured maximum height, whichever comes first.
//!
//! ```text
//! row 0   Seat No | ERN | Name | ...        header   → discarded
//! row 1   (blank)                           separator → discarded
//! row 2   ... | MU…01 | John Doe | 10411 …  anchor   ┐
//! row 3   ... |       |          | 10413 …           ┘ block #1
//! row 4   ... | MU…02 | Jane Roe | 10411 …  anchor   ┐ block #2
//! ```
//!
//! A row whose identifier cell is malformed cannot be attributed, so it and
//! its continuation rows are skipped rather than absorbed by the block above.
//!
//! Nothing here fails: tables without anchors (legends, cover pages) yield no
//! blocks, and suspicious structure is attached to the block as a
//! [`RecordFlag`].

use crate::model::{Cell, Identifier, RecordFlag, TableGrid};
use crate::pipeline::identifier::IdentifierValidator;
use crate::pipeline::normalize;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One non-empty grid row kept inside a block, with normalised cell text.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRow {
    /// Row index within the table.
    pub index: usize,
    pub cells: Vec<Cell>,
}

/// A contiguous run of rows believed to belong to one student.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBlock {
    pub identifier: Identifier,
    pub page: usize,
    pub table: usize,
    pub first_row: usize,
    pub last_row: usize,
    pub confidence: f64,
    /// Anchor row first, then continuation rows in grid order.
    pub rows: Vec<BlockRow>,
    pub flags: Vec<RecordFlag>,
}

/// A cell that looks like an identifier but fails the grammar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedIdentifier {
    pub page: usize,
    pub table: usize,
    pub row: usize,
    pub column: usize,
    pub text: String,
}

/// Result of segmenting one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segmentation {
    pub blocks: Vec<RecordBlock>,
    pub malformed: Vec<MalformedIdentifier>,
    /// Non-empty rows that ended up in no block.
    pub discarded_rows: usize,
}

/// Per-row scan result.
struct ScannedRow {
    index: usize,
    cells: Vec<Cell>,
    /// Distinct identifiers with the column they first occur in.
    anchors: Vec<(usize, Identifier)>,
    /// A cell looked like an identifier but failed the grammar.
    malformed: bool,
}

impl ScannedRow {
    fn is_empty(&self) -> bool {
        self.cells.iter().all(Cell::is_empty)
    }
}

/// Open block plus the rows it had to turn away.
struct OpenBlock {
    block: RecordBlock,
    overflow: usize,
}

impl OpenBlock {
    fn close(mut self) -> RecordBlock {
        if self.overflow > 0 {
            warn!(
                "Block {} (page {}, row {}) exceeded the height limit; dropped {} rows",
                self.block.identifier, self.block.page, self.block.first_row, self.overflow
            );
            self.block.flags.push(RecordFlag::OverlongBlock {
                dropped_rows: self.overflow,
            });
        }
        self.block
    }
}

/// Segment `grid` into record blocks.
///
/// `max_block_height` counts non-empty rows including the anchor row and is
/// treated as at least 1.
pub fn segment(
    grid: &TableGrid,
    validator: &IdentifierValidator,
    max_block_height: usize,
) -> Segmentation {
    let max_block_height = max_block_height.max(1);
    let mut out = Segmentation::default();
    let mut open: Option<OpenBlock> = None;
    // Set after an ambiguous or malformed anchor row: continuation rows
    // cannot be attributed.
    let mut orphaned = false;

    for row in grid.rows() {
        let scanned = scan_row(grid, row, validator, &mut out.malformed);
        if scanned.is_empty() {
            continue;
        }

        if scanned.anchors.is_empty() && scanned.malformed {
            // The row belongs to a student we cannot identify; it must not
            // feed the block above it.
            if let Some(ob) = open.take() {
                out.blocks.push(ob.close());
            }
            orphaned = true;
            warn!(
                "Page {} table {}: skipping row {} with a malformed identifier",
                grid.page(),
                grid.table_index(),
                scanned.index
            );
            out.discarded_rows += 1;
            continue;
        }

        match scanned.anchors.len() {
            0 => match open.as_mut() {
                Some(ob) if ob.block.rows.len() < max_block_height => {
                    ob.block.last_row = scanned.index;
                    ob.block.rows.push(BlockRow {
                        index: scanned.index,
                        cells: scanned.cells,
                    });
                }
                Some(ob) => {
                    ob.overflow += 1;
                    out.discarded_rows += 1;
                }
                None => {
                    if orphaned {
                        debug!(
                            "Page {} table {}: dropping row {} after an unattributable anchor row",
                            grid.page(),
                            grid.table_index(),
                            scanned.index
                        );
                    }
                    out.discarded_rows += 1;
                }
            },
            1 => {
                if let Some(ob) = open.take() {
                    out.blocks.push(ob.close());
                }
                orphaned = false;
                let identifier = scanned.anchors[0].1.clone();
                open = Some(OpenBlock {
                    block: new_block(grid, identifier, scanned.index, scanned.cells, vec![]),
                    overflow: 0,
                });
            }
            _ => {
                if let Some(ob) = open.take() {
                    out.blocks.push(ob.close());
                }
                orphaned = true;
                out.blocks.extend(split_ambiguous_row(grid, scanned));
            }
        }
    }

    if let Some(ob) = open.take() {
        out.blocks.push(ob.close());
    }

    debug!(
        "Page {} table {}: {} blocks, {} malformed identifiers, {} rows discarded",
        grid.page(),
        grid.table_index(),
        out.blocks.len(),
        out.malformed.len(),
        out.discarded_rows
    );
    out
}

fn scan_row(
    grid: &TableGrid,
    row: &[Cell],
    validator: &IdentifierValidator,
    malformed: &mut Vec<MalformedIdentifier>,
) -> ScannedRow {
    let index = row.first().map(|c| c.row).unwrap_or_default();
    let mut anchors: Vec<(usize, Identifier)> = Vec::new();
    let mut has_malformed = false;
    let cells: Vec<Cell> = row
        .iter()
        .map(|c| Cell {
            row: c.row,
            col: c.col,
            text: normalize::clean_cell(&c.text),
        })
        .collect();

    for cell in cells.iter().filter(|c| !c.is_empty()) {
        let ids = validator.extract_all(&cell.text);
        if ids.is_empty() {
            if validator.resembles(&cell.text) {
                has_malformed = true;
                malformed.push(MalformedIdentifier {
                    page: grid.page(),
                    table: grid.table_index(),
                    row: cell.row,
                    column: cell.col,
                    text: cell.text.clone(),
                });
            }
            continue;
        }
        for id in ids {
            if !anchors.iter().any(|(_, seen)| *seen == id) {
                anchors.push((cell.col, id));
            }
        }
    }

    ScannedRow {
        index,
        cells,
        anchors,
        malformed: has_malformed,
    }
}

fn new_block(
    grid: &TableGrid,
    identifier: Identifier,
    row: usize,
    cells: Vec<Cell>,
    flags: Vec<RecordFlag>,
) -> RecordBlock {
    RecordBlock {
        identifier,
        page: grid.page(),
        table: grid.table_index(),
        first_row: row,
        last_row: row,
        confidence: grid.confidence(),
        rows: vec![BlockRow { index: row, cells }],
        flags,
    }
}

/// One single-row block per identifier, cells split at the anchor columns.
///
/// Cells left of the first anchor belong to the first block. When several
/// anchors share one cell, only the first of them receives the span.
fn split_ambiguous_row(grid: &TableGrid, row: ScannedRow) -> Vec<RecordBlock> {
    let ScannedRow {
        index,
        cells,
        anchors,
        ..
    } = row;
    let all_ids: Vec<String> = anchors.iter().map(|(_, id)| id.to_string()).collect();
    warn!(
        "Page {} table {}: row {} holds {} identifiers ({}); splitting",
        grid.page(),
        grid.table_index(),
        index,
        anchors.len(),
        all_ids.join(", ")
    );

    let mut cols: Vec<usize> = anchors.iter().map(|(c, _)| *c).collect();
    cols.sort_unstable();
    cols.dedup();

    anchors
        .iter()
        .enumerate()
        .map(|(i, (col, id))| {
            let start = if Some(col) == cols.first() { 0 } else { *col };
            let end = cols
                .iter()
                .copied()
                .find(|c| c > col)
                .unwrap_or(usize::MAX);
            let shares_cell = anchors[..i].iter().any(|(c, _)| c == col);
            let span: Vec<Cell> = if shares_cell {
                Vec::new()
            } else {
                cells
                    .iter()
                    .filter(|c| c.col >= start && c.col < end)
                    .cloned()
                    .collect()
            };
            new_block(
                grid,
                id.clone(),
                index,
                span,
                vec![RecordFlag::AmbiguousRow {
                    row: index,
                    identifiers: all_ids.clone(),
                }],
            )
        })
        .collect()
}
