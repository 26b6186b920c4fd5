//! SELECTED_OUTPUT table parsing.

use ndarray::{Array2, ArrayView1};

use crate::{Result, SolverError};

/// The materialized punch table: one row per punched shift, columns named
/// by the USER_PUNCH headings.
#[derive(Debug, Clone)]
pub struct PunchTable {
    pub columns: Vec<String>,
    pub data: Array2<f64>,

    /// Rows discarded because they did not match the header cardinality
    /// or did not parse as numbers (repeated header lines, truncated
    /// writes on a killed run)
    pub dropped_rows: usize,
}

impl PunchTable {
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Column view by heading name.
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_index(name).map(|i| self.data.column(i))
    }
}

/// Parse a whitespace-delimited SELECTED_OUTPUT file.
///
/// The first non-empty line is the header. PHREEQC re-prints headers when
/// USER_PUNCH is redefined between simulations and may leave a truncated
/// final line when killed; both are dropped and counted, never fatal.
pub fn parse_selected_output(text: &str) -> Result<PunchTable> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header = lines.next().ok_or_else(|| SolverError::MalformedOutput {
        reason: "empty selected output".into(),
    })?;
    let columns: Vec<String> = header.split_whitespace().map(|s| s.to_string()).collect();
    if columns.len() < 2 || columns.iter().all(|c| c.parse::<f64>().is_ok()) {
        return Err(SolverError::MalformedOutput {
            reason: format!("first line is not a header row: '{}'", header.trim()),
        });
    }

    let ncols = columns.len();
    let mut flat: Vec<f64> = Vec::new();
    let mut dropped = 0usize;
    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != ncols {
            dropped += 1;
            continue;
        }
        let mut row = Vec::with_capacity(ncols);
        let mut ok = true;
        for field in &fields {
            match field.parse::<f64>() {
                Ok(v) => row.push(v),
                Err(_) => {
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            flat.extend(row);
        } else {
            dropped += 1;
        }
    }

    let nrows = flat.len() / ncols;
    let data = Array2::from_shape_vec((nrows, ncols), flat).map_err(|e| {
        SolverError::MalformedOutput {
            reason: format!("table shape: {}", e),
        }
    })?;

    Ok(PunchTable {
        columns,
        data,
        dropped_rows: dropped,
    })
}
