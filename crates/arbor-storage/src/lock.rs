//! Advisory byte-range locks over node files.
//!
//! A [`RegionLock`] is the lock table of one underlying file. Tables are
//! shared through a process-wide registry keyed by file identity (device and
//! inode on Unix), so every handle opened on the same file sees the same
//! locks. Two regions conflict only when their byte ranges overlap and at
//! least one of them is exclusive.
//!
//! Acquisition blocks until the region is free. There is no timeout and no
//! re-entrancy: a caller must never request a conflicting region it already
//! holds.

use arbor_common::{ArborError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::trace;

/// Lock mode of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Read lock; compatible with other shared locks.
    Shared,
    /// Write lock; compatible with nothing that overlaps.
    Exclusive,
}

impl LockMode {
    fn conflicts_with(self, other: LockMode) -> bool {
        !(self == LockMode::Shared && other == LockMode::Shared)
    }
}

/// Half-open byte span `[offset, offset + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub len: u64,
}

impl ByteRange {
    /// Creates a non-empty range.
    pub fn new(offset: u64, len: u64) -> Result<Self> {
        if len == 0 {
            return Err(ArborError::InvalidParameter {
                name: "len".to_string(),
                value: "0".to_string(),
            });
        }
        if offset.checked_add(len).is_none() {
            return Err(ArborError::LockFailed(format!(
                "range at offset {} with length {} overflows",
                offset, len
            )));
        }
        Ok(Self { offset, len })
    }

    /// Exclusive end of the range.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }

    /// Returns true if the two ranges share at least one byte.
    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FileKey {
    #[cfg(unix)]
    Inode { dev: u64, ino: u64 },
    #[cfg(not(unix))]
    Path(std::path::PathBuf),
}

#[cfg(unix)]
fn file_key(_path: &Path, file: &File) -> Result<FileKey> {
    use std::os::unix::fs::MetadataExt;
    let meta = file.metadata()?;
    Ok(FileKey::Inode {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

#[cfg(not(unix))]
fn file_key(path: &Path, _file: &File) -> Result<FileKey> {
    Ok(FileKey::Path(path.canonicalize()?))
}

fn registry() -> &'static Mutex<HashMap<FileKey, Weak<RegionLock>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<FileKey, Weak<RegionLock>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

struct HeldRegion {
    token: u64,
    range: ByteRange,
    mode: LockMode,
}

/// Byte-range lock table for one file.
pub struct RegionLock {
    held: Mutex<Vec<HeldRegion>>,
    released: Condvar,
    next_token: AtomicU64,
    /// Set while a store owns the append path of this file.
    appender: AtomicBool,
}

impl RegionLock {
    /// Creates a table that is not registered for any file.
    pub fn new() -> Self {
        Self {
            held: Mutex::new(Vec::new()),
            released: Condvar::new(),
            next_token: AtomicU64::new(1),
            appender: AtomicBool::new(false),
        }
    }

    /// Returns the lock table shared by every handle on `file`.
    pub fn for_file(path: &Path, file: &File) -> Result<Arc<Self>> {
        let key = file_key(path, file)?;
        let mut tables = registry().lock();
        tables.retain(|_, table| table.strong_count() > 0);

        if let Some(table) = tables.get(&key).and_then(Weak::upgrade) {
            return Ok(table);
        }

        let table = Arc::new(Self::new());
        tables.insert(key, Arc::downgrade(&table));
        Ok(table)
    }

    /// Blocks until `range` can be held in `mode`, then holds it.
    pub fn lock(self: &Arc<Self>, range: ByteRange, mode: LockMode) -> RegionGuard {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let mut held = self.held.lock();
        let mut waited = false;

        while held
            .iter()
            .any(|h| h.range.overlaps(&range) && mode.conflicts_with(h.mode))
        {
            if !waited {
                trace!(offset = range.offset, len = range.len, ?mode, "waiting for region");
                waited = true;
            }
            self.released.wait(&mut held);
        }

        held.push(HeldRegion { token, range, mode });
        RegionGuard {
            table: Arc::clone(self),
            token,
            range,
            mode,
        }
    }

    /// Acquires a shared lock over `[offset, offset + len)`.
    pub fn lock_shared(self: &Arc<Self>, offset: u64, len: u64) -> Result<RegionGuard> {
        let range = ByteRange::new(offset, len)?;
        Ok(self.lock(range, LockMode::Shared))
    }

    /// Acquires an exclusive lock over `[offset, offset + len)`.
    pub fn lock_exclusive(self: &Arc<Self>, offset: u64, len: u64) -> Result<RegionGuard> {
        let range = ByteRange::new(offset, len)?;
        Ok(self.lock(range, LockMode::Exclusive))
    }

    /// Number of regions currently held.
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    /// Claims the append path. Returns false if another owner holds it.
    pub(crate) fn claim_appender(&self) -> bool {
        !self.appender.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn release_appender(&self) {
        self.appender.store(false, Ordering::Release);
    }

    fn release(&self, token: u64) {
        let mut held = self.held.lock();
        if let Some(pos) = held.iter().position(|h| h.token == token) {
            held.swap_remove(pos);
        }
        drop(held);
        self.released.notify_all();
    }
}

impl Default for RegionLock {
    fn default() -> Self {
        Self::new()
    }
}

/// A held region. The region is released when the guard is dropped.
#[must_use = "the region is released as soon as the guard is dropped"]
pub struct RegionGuard {
    table: Arc<RegionLock>,
    token: u64,
    range: ByteRange,
    mode: LockMode,
}

impl RegionGuard {
    pub fn range(&self) -> ByteRange {
        self.range
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Releases the region explicitly.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for RegionGuard {
    fn drop(&mut self) {
        self.table.release(self.token);
    }
}

impl std::fmt::Debug for RegionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionGuard")
            .field("range", &self.range)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_byte_range_overlap() {
        let a = ByteRange::new(0, 10).unwrap();
        let b = ByteRange::new(10, 10).unwrap();
        let c = ByteRange::new(5, 10).unwrap();
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
        assert_eq!(b.end(), 20);
    }

    #[test]
    fn test_byte_range_rejects_empty_and_overflow() {
        assert!(matches!(
            ByteRange::new(0, 0),
            Err(ArborError::InvalidParameter { .. })
        ));
        assert!(matches!(
            ByteRange::new(u64::MAX, 2),
            Err(ArborError::LockFailed(_))
        ));
    }

    #[test]
    fn test_disjoint_exclusive_regions_do_not_block() {
        let locks = Arc::new(RegionLock::new());
        let a = locks.lock_exclusive(0, 10).unwrap();
        let b = locks.lock_exclusive(10, 10).unwrap();
        assert_eq!(locks.held_count(), 2);
        drop(a);
        drop(b);
        assert_eq!(locks.held_count(), 0);
    }

    #[test]
    fn test_shared_regions_overlap() {
        let locks = Arc::new(RegionLock::new());
        let a = locks.lock_shared(0, 100).unwrap();
        let b = locks.lock_shared(50, 100).unwrap();
        assert_eq!(a.mode(), LockMode::Shared);
        assert_eq!(b.range(), ByteRange::new(50, 100).unwrap());
        assert_eq!(locks.held_count(), 2);
    }

    #[test]
    fn test_exclusive_blocks_overlapping_shared() {
        let locks = Arc::new(RegionLock::new());
        let acquired = AtomicBool::new(false);
        let writer = locks.lock_exclusive(0, 64).unwrap();

        thread::scope(|s| {
            s.spawn(|| {
                let _reader = locks.lock_shared(32, 64).unwrap();
                acquired.store(true, Ordering::SeqCst);
            });

            thread::sleep(Duration::from_millis(50));
            assert!(!acquired.load(Ordering::SeqCst));
            writer.release();
        });

        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(locks.held_count(), 0);
    }

    #[test]
    fn test_shared_blocks_overlapping_exclusive() {
        let locks = Arc::new(RegionLock::new());
        let acquired = AtomicBool::new(false);
        let reader = locks.lock_shared(0, 8).unwrap();

        thread::scope(|s| {
            s.spawn(|| {
                let _writer = locks.lock_exclusive(4, 4).unwrap();
                acquired.store(true, Ordering::SeqCst);
            });

            thread::sleep(Duration::from_millis(50));
            assert!(!acquired.load(Ordering::SeqCst));
            drop(reader);
        });

        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_for_file_shares_table_across_handles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodes.tree");
        let first = File::create(&path).unwrap();
        let second = File::open(&path).unwrap();

        let a = RegionLock::for_file(&path, &first).unwrap();
        let b = RegionLock::for_file(&path, &second).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other_path = dir.path().join("other.tree");
        let other = File::create(&other_path).unwrap();
        let c = RegionLock::for_file(&other_path, &other).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_appender_claim() {
        let locks = RegionLock::new();
        assert!(locks.claim_appender());
        assert!(!locks.claim_appender());
        locks.release_appender();
        assert!(locks.claim_appender());
    }
}
