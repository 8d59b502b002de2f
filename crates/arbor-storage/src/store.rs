//! Node store: the storage engine of the forest.
//!
//! Records live in one flat file, slot `id` at `id * record_size`. The store
//! owns a single long-lived handle on that file:
//!
//! - `find` holds a shared lock over the full record while reading it.
//! - `update` holds an exclusive lock over the full record while writing it.
//! - `update_parent` holds an exclusive lock over the 4 bytes of one parent
//!   entry, so writers on different trees of the same node never contend.
//! - `create` goes through the [`AppendSerializer`], the only place that
//!   advances the node count.
//!
//! Opening a store takes an exclusive OS lock on `<name>.lock`, so only one
//! `NodeStore` in any process owns a store and its append path at a time.
//!
//! The node count is never stored; it is the file size divided by the record
//! size, recomputed whenever an operation needs it.

use crate::append::AppendSerializer;
use crate::codec::{PARENT_SIZE, RecordLayout};
use crate::disk::NodeFile;
use crate::flock::StoreLock;
use crate::lock::RegionLock;
use crate::node::Node;
use arbor_common::{
    ArborError, ForestConfig, NodeId, ParentRef, Result, StoreConfig, StoreMeta,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Persistent store of forest nodes.
pub struct NodeStore {
    config: StoreConfig,
    layout: RecordLayout,
    file: Arc<NodeFile>,
    locks: Arc<RegionLock>,
    appender: AppendSerializer,
    _owner: StoreLock,
}

impl NodeStore {
    /// Opens or creates the store described by `config`.
    ///
    /// A new store gets a meta file recording its forest shape. An existing
    /// store must have been created with the same shape. Fails with
    /// `StoreInUse` while another `NodeStore`, in this or any other process,
    /// has the store open.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let layout = RecordLayout::new(&config.forest)?;
        std::fs::create_dir_all(&config.data_dir)?;
        let owner = StoreLock::acquire(&config.lock_path())?;

        let meta_path = config.meta_path();
        if meta_path.exists() {
            let meta = StoreMeta::load(&meta_path)?;
            if meta.forest != config.forest {
                return Err(ArborError::ConfigError(format!(
                    "{} was created with {:?}, opened with {:?}",
                    meta_path.display(),
                    meta.forest,
                    config.forest
                )));
            }
        } else {
            StoreMeta::new(config.forest).save(&meta_path)?;
        }

        let node_path = config.node_path();
        let file = Arc::new(NodeFile::open(
            &node_path,
            layout.record_size(),
            config.fsync_enabled,
        )?);
        let locks = RegionLock::for_file(&node_path, file.file())?;
        if !locks.claim_appender() {
            return Err(ArborError::StoreInUse(node_path.display().to_string()));
        }

        let opened = Self::start(config, layout, file, Arc::clone(&locks), owner);
        if opened.is_err() {
            locks.release_appender();
        }
        opened
    }

    fn start(
        config: StoreConfig,
        layout: RecordLayout,
        file: Arc<NodeFile>,
        locks: Arc<RegionLock>,
        owner: StoreLock,
    ) -> Result<Self> {
        let len = file.len()?;
        let count = file.record_count()?;
        let trailing = len % layout.record_size() as u64;
        if trailing != 0 {
            warn!(
                path = %file.path().display(),
                trailing,
                "ignoring partial record at end of node file"
            );
        }

        let appender = AppendSerializer::spawn(Arc::clone(&file), Arc::clone(&locks), NodeId(count))?;
        info!(
            path = %file.path().display(),
            nodes = count,
            record_size = layout.record_size(),
            "opened node store"
        );

        Ok(Self {
            config,
            layout,
            file,
            locks,
            appender,
            _owner: owner,
        })
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the forest shape.
    pub fn forest(&self) -> &ForestConfig {
        &self.config.forest
    }

    /// Returns the record layout.
    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    /// Size of one record in bytes.
    pub fn record_size(&self) -> usize {
        self.layout.record_size()
    }

    /// Number of node slots, tombstones included.
    pub fn node_count(&self) -> Result<u32> {
        self.file.record_count()
    }

    /// Appends `node` and returns its newly assigned id.
    ///
    /// The id in `node` is ignored.
    pub fn create(&self, node: &Node) -> Result<NodeId> {
        let record = self.layout.encode(node)?;
        let id = self.appender.append(record)?;
        debug!(id = %id, n_descendants = node.n_descendants(), "created node");
        Ok(id)
    }

    /// Reads node `id`.
    pub fn find(&self, id: NodeId) -> Result<Node> {
        let offset = self.layout.record_offset(id);
        let guard = self
            .locks
            .lock_shared(offset, self.layout.record_size() as u64)?;
        let record = self.file.read_record(id)?;
        guard.release();

        self.layout.decode(id, &record)
    }

    /// Rewrites the full record of `node.id` with `node`.
    pub fn update(&self, node: &Node) -> Result<()> {
        let record = self.layout.encode(node)?;
        self.ensure_exists(node.id)?;

        let offset = self.layout.record_offset(node.id);
        let _guard = self.locks.lock_exclusive(offset, record.len() as u64)?;
        self.file.write_at(offset, &record)?;
        debug!(id = %node.id, free = node.free, "updated node");
        Ok(())
    }

    /// Sets `parents[tree]` of node `id`, leaving every other byte untouched.
    pub fn update_parent(&self, id: NodeId, tree: usize, parent: ParentRef) -> Result<()> {
        let within = self.layout.parent_offset(tree)?;
        if let ParentRef::Node(p) = parent {
            if p > NodeId::MAX {
                return Err(ArborError::InvalidNode(format!(
                    "parent id {} does not fit in a record",
                    p
                )));
            }
        }
        self.ensure_exists(id)?;

        let offset = self.layout.record_offset(id) + within as u64;
        let _guard = self.locks.lock_exclusive(offset, PARENT_SIZE as u64)?;
        self.file.write_at(offset, &parent.to_i32().to_be_bytes())?;
        debug!(id = %id, tree, parent = ?parent, "updated parent");
        Ok(())
    }

    /// Marks `node` free and rewrites its full record.
    ///
    /// This is not a read-modify-write: every field of `node` is persisted as
    /// given.
    pub fn delete(&self, mut node: Node) -> Result<()> {
        node.free = true;
        self.update(&node)
    }

    /// Iterates over every slot from id 0, tombstones included.
    ///
    /// The node count is taken once, when iteration starts. The first failed
    /// read is yielded as an error and ends the iteration.
    pub fn iter(&self) -> Result<NodeIter<'_>> {
        let count = self.node_count()?;
        Ok(NodeIter {
            store: self,
            next: 0,
            count,
            failed: false,
        })
    }

    /// Flushes the node file to disk.
    pub fn flush(&self) -> Result<()> {
        self.file.flush()
    }

    fn ensure_exists(&self, id: NodeId) -> Result<()> {
        if id.0 >= self.node_count()? {
            return Err(ArborError::NodeNotFound { id: id.0 });
        }
        Ok(())
    }
}

impl Drop for NodeStore {
    fn drop(&mut self) {
        self.appender.shutdown();
        self.locks.release_appender();
        debug!(path = %self.file.path().display(), "closed node store");
    }
}

/// Forward-only iterator over the nodes of a store.
pub struct NodeIter<'a> {
    store: &'a NodeStore,
    next: u32,
    count: u32,
    failed: bool,
}

impl Iterator for NodeIter<'_> {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.count {
            return None;
        }

        let id = NodeId(self.next);
        self.next += 1;
        let result = self.store.find(id);
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let remaining = (self.count - self.next) as usize;
        (0, Some(remaining))
    }
}

impl std::iter::FusedIterator for NodeIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> StoreConfig {
        StoreConfig {
            data_dir: dir.to_path_buf(),
            name: "test".to_string(),
            forest: ForestConfig::new(3, 2, 4),
            fsync_enabled: false,
        }
    }

    #[test]
    fn test_open_writes_meta() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let store = NodeStore::open(config.clone()).unwrap();

        assert!(config.meta_path().exists());
        assert!(config.node_path().exists());
        assert_eq!(store.node_count().unwrap(), 0);
        assert_eq!(store.record_size(), 45);
    }

    #[test]
    fn test_open_rejects_mismatched_forest() {
        let dir = tempdir().unwrap();
        drop(NodeStore::open(test_config(dir.path())).unwrap());

        let mut config = test_config(dir.path());
        config.forest.dim = 3;
        assert!(matches!(
            NodeStore::open(config),
            Err(ArborError::ConfigError(_))
        ));
    }

    #[test]
    fn test_open_twice_in_process() {
        let dir = tempdir().unwrap();
        let store = NodeStore::open(test_config(dir.path())).unwrap();
        assert!(matches!(
            NodeStore::open(test_config(dir.path())),
            Err(ArborError::StoreInUse(_))
        ));

        drop(store);
        assert!(NodeStore::open(test_config(dir.path())).is_ok());
    }

    #[test]
    fn test_create_find() {
        let dir = tempdir().unwrap();
        let store = NodeStore::open(test_config(dir.path())).unwrap();

        let leaf = Node::leaf(11, vec![0.5, -0.5], 3);
        let id = store.create(&leaf).unwrap();
        assert_eq!(id, NodeId(0));

        let found = store.find(id).unwrap();
        assert_eq!(found, leaf.with_id(id));
    }

    #[test]
    fn test_create_ignores_supplied_id() {
        let dir = tempdir().unwrap();
        let store = NodeStore::open(test_config(dir.path())).unwrap();

        let node = Node::leaf(1, vec![0.0, 0.0], 3).with_id(NodeId(99));
        assert_eq!(store.create(&node).unwrap(), NodeId(0));
        assert_eq!(store.create(&node).unwrap(), NodeId(1));
    }

    #[test]
    fn test_find_missing() {
        let dir = tempdir().unwrap();
        let store = NodeStore::open(test_config(dir.path())).unwrap();
        assert!(matches!(
            store.find(NodeId(0)),
            Err(ArborError::NodeNotFound { id: 0 })
        ));
    }

    #[test]
    fn test_update_replaces_record() {
        let dir = tempdir().unwrap();
        let store = NodeStore::open(test_config(dir.path())).unwrap();
        let id = store.create(&Node::leaf(1, vec![1.0, 1.0], 3)).unwrap();

        let bucket = Node::bucket(vec![NodeId(4), NodeId(5)], 3)
            .with_id(id)
            .with_parent(0, ParentRef::Root);
        store.update(&bucket).unwrap();

        assert_eq!(store.find(id).unwrap(), bucket);
    }

    #[test]
    fn test_update_missing_node() {
        let dir = tempdir().unwrap();
        let store = NodeStore::open(test_config(dir.path())).unwrap();
        let node = Node::leaf(1, vec![1.0, 1.0], 3).with_id(NodeId(3));

        assert!(matches!(
            store.update(&node),
            Err(ArborError::NodeNotFound { id: 3 })
        ));
        assert_eq!(store.node_count().unwrap(), 0);
    }

    #[test]
    fn test_update_parent_bounds() {
        let dir = tempdir().unwrap();
        let store = NodeStore::open(test_config(dir.path())).unwrap();
        let id = store.create(&Node::leaf(1, vec![1.0, 1.0], 3)).unwrap();

        assert!(matches!(
            store.update_parent(id, 3, ParentRef::Root),
            Err(ArborError::TreeIndexOutOfRange { index: 3, trees: 3 })
        ));
        assert!(matches!(
            store.update_parent(NodeId(1), 0, ParentRef::Root),
            Err(ArborError::NodeNotFound { id: 1 })
        ));
    }

    #[test]
    fn test_reopen_continues_ids() {
        let dir = tempdir().unwrap();
        {
            let store = NodeStore::open(test_config(dir.path())).unwrap();
            store.create(&Node::leaf(1, vec![0.0, 0.0], 3)).unwrap();
            store.create(&Node::leaf(2, vec![0.0, 0.0], 3)).unwrap();
        }

        let store = NodeStore::open(test_config(dir.path())).unwrap();
        assert_eq!(store.node_count().unwrap(), 2);
        let id = store.create(&Node::leaf(3, vec![0.0, 0.0], 3)).unwrap();
        assert_eq!(id, NodeId(2));
        assert_eq!(store.find(NodeId(1)).unwrap().key(), Some(2));
    }

    #[test]
    fn test_partial_trailing_record_is_overwritten() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        {
            let store = NodeStore::open(config.clone()).unwrap();
            store.create(&Node::leaf(1, vec![0.0, 0.0], 3)).unwrap();
        }
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(config.node_path())
                .unwrap();
            f.write_all(&[0xFF; 10]).unwrap();
        }

        let store = NodeStore::open(config).unwrap();
        assert_eq!(store.node_count().unwrap(), 1);
        let id = store.create(&Node::leaf(2, vec![1.0, 2.0], 3)).unwrap();
        assert_eq!(id, NodeId(1));
        assert_eq!(store.find(id).unwrap().key(), Some(2));
        assert_eq!(store.node_count().unwrap(), 2);
    }

    #[test]
    fn test_iter_size_hint() {
        let dir = tempdir().unwrap();
        let store = NodeStore::open(test_config(dir.path())).unwrap();
        for key in 0..3 {
            store.create(&Node::leaf(key, vec![0.0, 0.0], 3)).unwrap();
        }

        let mut iter = store.iter().unwrap();
        assert_eq!(iter.size_hint(), (0, Some(3)));
        iter.next();
        assert_eq!(iter.size_hint(), (0, Some(2)));
    }
}
