//! Batch importers for the Arbor node store.
//!
//! This crate provides:
//! - The `ItemSink` batch interface and a leaf-writing sink
//! - Tabular (`key,f1,...,f_dim`) import
//! - Foreign binary dump import with optional key remapping
//!
//! Every importer parses its whole input before delivering anything, so a
//! failed import never adds a partial batch.

mod dump;
mod remap;
mod sink;
mod tabular;

pub use dump::{ByteOrder, ForeignDumpImporter};
pub use remap::KeyRemap;
pub use sink::{ItemBatch, ItemSink, LeafWriter};
pub use tabular::TabularImporter;

use arbor_common::Result;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Options shared by the importers.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Vector dimensionality.
    pub dim: usize,
    /// Byte order of a foreign dump.
    pub byte_order: ByteOrder,
    /// Key remap file for a foreign dump.
    pub remap: Option<PathBuf>,
}

/// Returns true if `path` is read as tabular text.
pub fn is_tabular(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

/// Reads `from` into a batch, choosing the importer by file extension.
pub fn read_items(from: &Path, options: &ImportOptions) -> Result<ItemBatch> {
    if is_tabular(from) {
        if options.remap.is_some() {
            warn!(path = %from.display(), "key remap only applies to foreign dumps, ignoring");
        }
        return TabularImporter::new(options.dim).read_file(from);
    }

    let mut importer = ForeignDumpImporter::new(options.dim, options.byte_order);
    if let Some(path) = &options.remap {
        importer = importer.with_remap(KeyRemap::load(path)?);
    }
    importer.read_file(from)
}

/// Reads `from` and delivers every item to `sink` as one batch.
///
/// Returns the number of items added.
pub fn import_file(from: &Path, options: &ImportOptions, sink: &mut dyn ItemSink) -> Result<usize> {
    read_items(from, options)?.deliver(sink)
}
