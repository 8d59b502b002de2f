//! The batch "add items" interface fed by the importers.

use arbor_common::{ArborError, NodeId, Result};
use arbor_storage::{Node, NodeStore};
use tracing::info;

/// Receiver of imported items, given as parallel key and vector arrays.
pub trait ItemSink {
    /// Adds one batch. `keys[i]` belongs to `vectors[i]`.
    fn add_items(&mut self, keys: &[i32], vectors: &[Vec<f64>]) -> Result<()>;
}

/// Parallel key/vector buffers filled by one importer pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemBatch {
    pub keys: Vec<i32>,
    pub vectors: Vec<Vec<f64>>,
}

impl ItemBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: i32, vector: Vec<f64>) {
        self.keys.push(key);
        self.vectors.push(vector);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Hands the whole batch to `sink` in a single call.
    pub fn deliver(self, sink: &mut dyn ItemSink) -> Result<usize> {
        let count = self.len();
        sink.add_items(&self.keys, &self.vectors)?;
        Ok(count)
    }
}

/// Sink that stores every item as a leaf node, detached from all trees.
pub struct LeafWriter<'a> {
    store: &'a NodeStore,
    created: Vec<NodeId>,
}

impl<'a> LeafWriter<'a> {
    pub fn new(store: &'a NodeStore) -> Self {
        Self {
            store,
            created: Vec::new(),
        }
    }

    /// Ids of the leaves created so far, in creation order.
    pub fn created(&self) -> &[NodeId] {
        &self.created
    }
}

impl ItemSink for LeafWriter<'_> {
    fn add_items(&mut self, keys: &[i32], vectors: &[Vec<f64>]) -> Result<()> {
        if keys.len() != vectors.len() {
            return Err(ArborError::InvalidParameter {
                name: "vectors".to_string(),
                value: format!("{} vectors for {} keys", vectors.len(), keys.len()),
            });
        }

        let forest = self.store.forest();
        if let Some(bad) = vectors.iter().find(|v| v.len() != forest.dim) {
            return Err(ArborError::DimensionMismatch {
                expected: forest.dim,
                actual: bad.len(),
            });
        }

        for (key, vector) in keys.iter().zip(vectors) {
            let id = self
                .store
                .create(&Node::leaf(*key, vector.clone(), forest.trees))?;
            self.created.push(id);
        }

        info!(items = keys.len(), "added leaf items");
        Ok(())
    }
}
