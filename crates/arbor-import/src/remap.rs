//! External key remapping for foreign dump imports.

use crate::tabular::split_fields;
use arbor_common::{ArborError, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Translation from sequential foreign record positions to external keys.
///
/// Source rows are `externalKey,foreignIndex`.
#[derive(Debug, Clone, Default)]
pub struct KeyRemap {
    keys: HashMap<usize, i32>,
}

impl KeyRemap {
    /// Parses remap rows. Blank lines are skipped; a later row for the same
    /// foreign index replaces an earlier one.
    pub fn read<R: BufRead>(reader: R) -> Result<Self> {
        let mut keys = HashMap::new();

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = i + 1;
            if line.trim().is_empty() {
                continue;
            }

            let fields = split_fields(&line);
            if fields.len() != 2 {
                return Err(ArborError::ParseError {
                    line: line_no,
                    reason: format!("expected 2 fields, found {}", fields.len()),
                });
            }

            let key = fields[0].parse::<i32>().map_err(|e| ArborError::ParseError {
                line: line_no,
                reason: format!("invalid key {:?}: {}", fields[0], e),
            })?;
            let index = fields[1]
                .parse::<usize>()
                .map_err(|e| ArborError::ParseError {
                    line: line_no,
                    reason: format!("invalid index {:?}: {}", fields[1], e),
                })?;
            keys.insert(index, key);
        }

        Ok(Self { keys })
    }

    /// Loads a remap file.
    pub fn load(path: &Path) -> Result<Self> {
        Self::read(BufReader::new(File::open(path)?))
    }

    /// External key for a foreign index.
    pub fn key_for(&self, index: usize) -> Result<i32> {
        self.keys
            .get(&index)
            .copied()
            .ok_or(ArborError::MappingNotFound { index })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_remap() {
        let remap = KeyRemap::read("100,0\n200, 1\n\n300,2\n".as_bytes()).unwrap();
        assert_eq!(remap.len(), 3);
        assert_eq!(remap.key_for(0).unwrap(), 100);
        assert_eq!(remap.key_for(1).unwrap(), 200);
        assert_eq!(remap.key_for(2).unwrap(), 300);
    }

    #[test]
    fn test_missing_index() {
        let remap = KeyRemap::read("100,0\n".as_bytes()).unwrap();
        assert!(matches!(
            remap.key_for(3),
            Err(ArborError::MappingNotFound { index: 3 })
        ));
    }

    #[test]
    fn test_later_row_wins() {
        let remap = KeyRemap::read("1,0\n2,0\n".as_bytes()).unwrap();
        assert_eq!(remap.len(), 1);
        assert_eq!(remap.key_for(0).unwrap(), 2);
    }

    #[test]
    fn test_parse_errors_carry_line() {
        let err = KeyRemap::read("1,0\nabc,1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ArborError::ParseError { line: 2, .. }));

        let err = KeyRemap::read("1,-4\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ArborError::ParseError { line: 1, .. }));

        let err = KeyRemap::read("1,2,3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ArborError::ParseError { line: 1, .. }));
    }
}
