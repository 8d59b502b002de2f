//! Storage engine for Arbor.
//!
//! This crate provides:
//! - Store ownership through an OS advisory lock
//! - Region locks for byte-range shared/exclusive access to node files
//! - The fixed-size record codec for leaf, bucket, and internal nodes
//! - The append serializer assigning dense node ids
//! - NodeStore, the create/find/update/delete/iterate engine

mod append;
mod codec;
mod disk;
mod flock;
mod lock;
mod node;
mod store;

pub use append::AppendSerializer;
pub use codec::{PARENT_SIZE, RecordLayout};
pub use disk::NodeFile;
pub use flock::StoreLock;
pub use lock::{ByteRange, LockMode, RegionGuard, RegionLock};
pub use node::{Node, NodeKind};
pub use store::{NodeIter, NodeStore};
