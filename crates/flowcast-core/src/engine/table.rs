//! Delimited table loading for prefix matrices.
//!
//! A matrix table is a header line followed by data rows, separated by a
//! single-character delimiter (`;` for the shipped matrices). Three columns
//! are required: `prefixes`, `targets` and `Support`; every other column is
//! treated as a probability column named after an activity.
//!
//! The `prefixes` cell encodes an ordered activity tuple in the historical
//! wire form, e.g. `()`, `('A',)` or `('A', 'B')`. Quoting and delimiter
//! mechanics live here; the matrix itself only ever sees decoded rows.

use crate::engine::errors::EngineError;

/// Default cell delimiter for matrix tables.
pub const DEFAULT_DELIMITER: char = ';';

/// A parsed, untyped table: trimmed header names plus trimmed row cells.
#[derive(Debug, Clone)]
pub struct RawTable {
    /// Column names, in file order, whitespace-trimmed.
    pub columns: Vec<String>,
    /// Data rows; every row has exactly `columns.len()` cells.
    pub rows: Vec<Vec<String>>,
}

/// Parses a delimited table from text.
///
/// The first non-empty line is the header. Rows with a cell count different
/// from the header are rejected. Cells and header names are trimmed.
pub fn parse_table(source: &str, delimiter: char) -> Result<RawTable, EngineError> {
    let mut lines = source.lines().filter(|l| !l.trim().is_empty());

    let header = lines
        .next()
        .ok_or_else(|| EngineError::MalformedTable("empty table".into()))?;
    let columns: Vec<String> = header
        .split(delimiter)
        .map(|c| c.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (i, line) in lines.enumerate() {
        let cells: Vec<String> = line
            .split(delimiter)
            .map(|c| c.trim().to_string())
            .collect();
        if cells.len() != columns.len() {
            return Err(EngineError::MalformedTable(format!(
                "row {} has {} cells, expected {}",
                i + 2,
                cells.len(),
                columns.len()
            )));
        }
        rows.push(cells);
    }

    Ok(RawTable { columns, rows })
}

/// Decodes a prefix cell (`()`, `('A',)`, `('A', 'B')`) into an ordered
/// activity list.
///
/// Activity labels are single-quoted; a quote inside a label is escaped by
/// doubling. Trailing commas (the one-element tuple form) are accepted.
pub fn parse_prefix(encoded: &str) -> Result<Vec<String>, EngineError> {
    let trimmed = encoded.trim();
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| {
            EngineError::MalformedTable(format!("prefix cell is not a tuple: {trimmed:?}"))
        })?;

    let mut out = Vec::new();
    let mut chars = inner.chars().peekable();

    loop {
        // Skip separators between elements.
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }
        match chars.next() {
            None => break,
            Some('\'') => {
                let mut label = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => {
                            // Doubled quote is an escaped quote inside the label.
                            if chars.peek() == Some(&'\'') {
                                chars.next();
                                label.push('\'');
                            } else {
                                break;
                            }
                        }
                        Some(c) => label.push(c),
                        None => {
                            return Err(EngineError::MalformedTable(format!(
                                "unterminated label in prefix cell: {trimmed:?}"
                            )))
                        }
                    }
                }
                out.push(label);
            }
            Some(c) => {
                return Err(EngineError::MalformedTable(format!(
                    "unexpected character {c:?} in prefix cell: {trimmed:?}"
                )))
            }
        }
    }

    Ok(out)
}
