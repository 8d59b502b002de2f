//! Tabular text import: one `key,f1,...,f_dim` row per item.

use crate::sink::ItemBatch;
use arbor_common::{ArborError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// Reads comma-separated item rows.
#[derive(Debug, Clone, Copy)]
pub struct TabularImporter {
    dim: usize,
}

impl TabularImporter {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    /// Parses every row into one batch. Any malformed row fails the whole
    /// read.
    pub fn read<R: BufRead>(&self, reader: R) -> Result<ItemBatch> {
        let mut batch = ItemBatch::new();

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let (key, vector) = self.parse_row(&line, i + 1)?;
            batch.push(key, vector);
        }

        info!(items = batch.len(), dim = self.dim, "read tabular items");
        Ok(batch)
    }

    /// Reads a tabular file.
    pub fn read_file(&self, path: &Path) -> Result<ItemBatch> {
        self.read(BufReader::new(File::open(path)?))
    }

    fn parse_row(&self, line: &str, line_no: usize) -> Result<(i32, Vec<f64>)> {
        let fields = split_fields(line);
        if fields.len() != self.dim + 1 {
            return Err(ArborError::ParseError {
                line: line_no,
                reason: format!(
                    "expected key and {} components, found {} fields",
                    self.dim,
                    fields.len()
                ),
            });
        }

        let key = fields[0].parse::<i32>().map_err(|e| ArborError::ParseError {
            line: line_no,
            reason: format!("invalid key {:?}: {}", fields[0], e),
        })?;

        let vector = fields[1..]
            .iter()
            .map(|f| {
                f.parse::<f64>().map_err(|e| ArborError::ParseError {
                    line: line_no,
                    reason: format!("invalid component {:?}: {}", f, e),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((key, vector))
    }
}

/// Splits a row on commas, trimming surrounding whitespace and one pair of
/// enclosing double quotes per field.
///
/// Fields are numeric, so a quoted field never contains a comma and is not
/// unescaped.
pub(crate) fn split_fields(line: &str) -> Vec<&str> {
    line.split(',').map(unquote).collect()
}

fn unquote(field: &str) -> &str {
    let field = field.trim();
    field
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .map(str::trim)
        .unwrap_or(field)
}
