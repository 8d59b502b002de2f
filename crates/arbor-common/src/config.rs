//! Configuration structures for Arbor.

use crate::error::{ArborError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current meta file format version.
pub const META_FORMAT_VERSION: u32 = 1;

/// Shape of the forest stored in a node file.
///
/// These three values fix the record size of a store. They must never change
/// for an existing node file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Number of trees in the forest (length of every node's parent array).
    pub trees: usize,
    /// Vector dimensionality.
    pub dim: usize,
    /// Bucket threshold K: nodes with 2..=K descendants hold item ids directly.
    pub bucket_size: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            trees: 10,
            dim: 100,
            bucket_size: 50,
        }
    }
}

impl ForestConfig {
    /// Creates a forest configuration.
    pub fn new(trees: usize, dim: usize, bucket_size: usize) -> Self {
        Self {
            trees,
            dim,
            bucket_size,
        }
    }

    /// Width in bytes of the variant tail shared by every node kind.
    pub fn tail_width(&self) -> usize {
        2 * 4 + 8 * self.dim
    }

    /// Checks that the configuration describes a representable record.
    pub fn validate(&self) -> Result<()> {
        if self.trees == 0 {
            return Err(invalid("trees", self.trees));
        }
        if self.dim == 0 {
            return Err(invalid("dim", self.dim));
        }
        if self.bucket_size < 2 {
            return Err(invalid("bucket_size", self.bucket_size));
        }
        if 4 * self.bucket_size > self.tail_width() {
            return Err(ArborError::ConfigError(format!(
                "bucket size {} does not fit in a record tail of {} bytes (dim {})",
                self.bucket_size,
                self.tail_width(),
                self.dim
            )));
        }
        Ok(())
    }
}

fn invalid(name: &str, value: usize) -> ArborError {
    ArborError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}

/// Storage configuration for a node store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the node and meta files.
    pub data_dir: PathBuf,
    /// Base name of the store files.
    pub name: String,
    /// Forest shape.
    pub forest: ForestConfig,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            name: "index".to_string(),
            forest: ForestConfig::default(),
            fsync_enabled: true,
        }
    }
}

impl StoreConfig {
    /// Path of the fixed-record node file.
    pub fn node_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.tree", self.name))
    }

    /// Path of the JSON meta file.
    pub fn meta_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.meta", self.name))
    }

    /// Path of the lock file that marks the store as open.
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.lock", self.name))
    }

    /// Builds a configuration for an existing store from its meta file.
    pub fn from_meta(data_dir: impl Into<PathBuf>, name: impl Into<String>) -> Result<Self> {
        let mut config = Self {
            data_dir: data_dir.into(),
            name: name.into(),
            ..Default::default()
        };
        let meta = StoreMeta::load(&config.meta_path())?;
        config.forest = meta.forest;
        Ok(config)
    }
}

/// Contents of the meta file stored next to a node file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    /// Meta format version.
    pub version: u32,
    /// Forest shape the node file was created with.
    pub forest: ForestConfig,
}

impl StoreMeta {
    /// Creates meta for the given forest.
    pub fn new(forest: ForestConfig) -> Self {
        Self {
            version: META_FORMAT_VERSION,
            forest,
        }
    }

    /// Reads and parses a meta file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let meta: StoreMeta = serde_json::from_slice(&data)?;
        if meta.version != META_FORMAT_VERSION {
            return Err(ArborError::ConfigError(format!(
                "unsupported meta version {} in {}",
                meta.version,
                path.display()
            )));
        }
        meta.forest.validate()?;
        Ok(meta)
    }

    /// Writes the meta file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}
