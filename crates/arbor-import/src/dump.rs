//! Foreign binary dump import.
//!
//! The dump is a flat array of fixed records:
//!
//! ```text
//! n_descendants  4 bytes   i32
//! children       2×4 bytes ignored
//! v              D×8 bytes f64
//! ```
//!
//! Leaf records (`n_descendants == 1`) are expected contiguously at the start
//! of the file. Reading stops at the first record that is not a leaf, even if
//! leaf records follow it.

use crate::remap::KeyRemap;
use crate::sink::ItemBatch;
use arbor_common::{ArborError, Result};
use bytes::Buf;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Byte order of a foreign dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl FromStr for ByteOrder {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "little" | "le" => Ok(ByteOrder::Little),
            "big" | "be" => Ok(ByteOrder::Big),
            _ => Err(ArborError::InvalidParameter {
                name: "byte_order".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ByteOrder::Little => write!(f, "little"),
            ByteOrder::Big => write!(f, "big"),
        }
    }
}

/// Reads leaf records from a foreign dump.
#[derive(Debug, Clone)]
pub struct ForeignDumpImporter {
    dim: usize,
    order: ByteOrder,
    remap: Option<KeyRemap>,
}

impl ForeignDumpImporter {
    pub fn new(dim: usize, order: ByteOrder) -> Self {
        Self {
            dim,
            order,
            remap: None,
        }
    }

    /// Uses `remap` to translate record positions into keys.
    ///
    /// Without a remap the key of a record is its position.
    pub fn with_remap(mut self, remap: KeyRemap) -> Self {
        self.remap = Some(remap);
        self
    }

    /// Size of one foreign record.
    pub fn record_size(&self) -> usize {
        4 + 2 * 4 + 8 * self.dim
    }

    /// Reads leading leaf records into one batch.
    ///
    /// A missing remap entry fails the whole read. A trailing partial record
    /// is ignored.
    pub fn read<R: Read>(&self, mut reader: R) -> Result<ItemBatch> {
        let mut batch = ItemBatch::new();
        let mut record = vec![0u8; self.record_size()];

        for index in 0.. {
            match reader.read_exact(&mut record) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let mut buf = record.as_slice();
            let n_descendants = match self.order {
                ByteOrder::Little => buf.get_i32_le(),
                ByteOrder::Big => buf.get_i32(),
            };
            if n_descendants != 1 {
                debug!(index, n_descendants, "stopping at first non-leaf record");
                break;
            }
            buf.advance(2 * 4);

            let vector = (0..self.dim)
                .map(|_| match self.order {
                    ByteOrder::Little => buf.get_f64_le(),
                    ByteOrder::Big => buf.get_f64(),
                })
                .collect();

            let key = match &self.remap {
                Some(remap) => remap.key_for(index)?,
                None => i32::try_from(index).map_err(|_| ArborError::InvalidParameter {
                    name: "index".to_string(),
                    value: index.to_string(),
                })?,
            };
            batch.push(key, vector);
        }

        info!(
            items = batch.len(),
            order = %self.order,
            remapped = self.remap.is_some(),
            "read foreign dump"
        );
        Ok(batch)
    }

    /// Reads a dump file.
    pub fn read_file(&self, path: &Path) -> Result<ItemBatch> {
        self.read(BufReader::new(File::open(path)?))
    }
}
