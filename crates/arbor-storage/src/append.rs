//! Single-writer append path for node creation.
//!
//! All creations are handed to one worker thread through a bounded queue of
//! capacity one. The worker owns the next-id counter, so "read the record
//! count, then append" is one step no other writer can interleave with. Ids
//! are handed out in the order requests reach the worker and are contiguous:
//! the counter only advances after a successful write and sync, and a failed
//! append is cut from the file so its slot is never counted.

use crate::disk::NodeFile;
use crate::lock::RegionLock;
use arbor_common::{ArborError, NodeId, Result};
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// A pending append.
struct AppendRequest {
    record: Bytes,
    reply: Sender<Result<NodeId>>,
}

/// The worker side: sole owner of the next id.
struct AppendWorker {
    file: Arc<NodeFile>,
    locks: Arc<RegionLock>,
    next_id: NodeId,
    requests: Receiver<AppendRequest>,
}

impl AppendWorker {
    fn run(mut self) {
        while let Ok(request) = self.requests.recv() {
            let result = self.append(&request.record);
            // The caller may have gone away; the record is written either way.
            let _ = request.reply.send(result);
        }
        debug!(next_id = %self.next_id, "append serializer stopped");
    }

    fn append(&mut self, record: &[u8]) -> Result<NodeId> {
        let id = self.next_id;
        if id > NodeId::MAX {
            return Err(ArborError::Internal("node id space exhausted".to_string()));
        }

        let offset = self.file.offset(id);
        // Hold the new slot so a concurrent find never sees it half written.
        let _guard = self.locks.lock_exclusive(offset, record.len() as u64)?;
        if let Err(e) = self.file.append_at(offset, record) {
            warn!(id = %id, error = %e, "append failed");
            return Err(e);
        }

        self.next_id = id.next();
        Ok(id)
    }
}

/// Handle to the append worker.
pub struct AppendSerializer {
    requests: Option<Sender<AppendRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl AppendSerializer {
    /// Starts the worker. `next_id` is the record count of the file.
    pub fn spawn(file: Arc<NodeFile>, locks: Arc<RegionLock>, next_id: NodeId) -> Result<Self> {
        let (tx, rx) = bounded(1);
        let worker = AppendWorker {
            file,
            locks,
            next_id,
            requests: rx,
        };

        let handle = thread::Builder::new()
            .name("arbor-append".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            requests: Some(tx),
            worker: Some(handle),
        })
    }

    /// Appends one encoded record and returns its id.
    ///
    /// Blocks until the worker admits the request and the write completes.
    pub fn append(&self, record: Bytes) -> Result<NodeId> {
        let requests = self
            .requests
            .as_ref()
            .ok_or(ArborError::SerializerStopped)?;

        let (reply, response) = bounded(1);
        requests
            .send(AppendRequest { record, reply })
            .map_err(|_| ArborError::SerializerStopped)?;

        response.recv().map_err(|_| ArborError::SerializerStopped)?
    }

    /// Stops accepting requests and waits for the worker to drain.
    pub fn shutdown(&mut self) {
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("append worker panicked");
            }
        }
    }
}

impl Drop for AppendSerializer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn spawn_serializer(record_size: usize) -> (AppendSerializer, Arc<NodeFile>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let file = Arc::new(NodeFile::open(&dir.path().join("a.tree"), record_size, false).unwrap());
        let locks = Arc::new(RegionLock::new());
        let serializer = AppendSerializer::spawn(Arc::clone(&file), locks, NodeId(0)).unwrap();
        (serializer, file, dir)
    }

    #[test]
    fn test_sequential_ids() {
        let (serializer, file, _dir) = spawn_serializer(4);

        for expected in 0..5u32 {
            let id = serializer.append(Bytes::from(expected.to_be_bytes().to_vec())).unwrap();
            assert_eq!(id, NodeId(expected));
        }

        assert_eq!(file.record_count().unwrap(), 5);
        assert_eq!(file.read_record(NodeId(3)).unwrap(), 3u32.to_be_bytes().to_vec());
    }

    #[test]
    fn test_resumes_from_next_id() {
        let dir = tempdir().unwrap();
        let file = Arc::new(NodeFile::open(&dir.path().join("a.tree"), 2, false).unwrap());
        file.write_at(0, &[1, 1, 2, 2]).unwrap();

        let serializer =
            AppendSerializer::spawn(Arc::clone(&file), Arc::new(RegionLock::new()), NodeId(2))
                .unwrap();
        assert_eq!(serializer.append(Bytes::from_static(&[3, 3])).unwrap(), NodeId(2));
        assert_eq!(file.read_record(NodeId(2)).unwrap(), vec![3, 3]);
    }

    #[test]
    fn test_concurrent_appends_are_dense() {
        let (serializer, file, _dir) = spawn_serializer(8);

        let ids: Vec<NodeId> = thread::scope(|s| {
            let handles: Vec<_> = (0..16u64)
                .map(|i| {
                    let serializer = &serializer;
                    s.spawn(move || serializer.append(Bytes::from(i.to_be_bytes().to_vec())).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let unique: HashSet<NodeId> = ids.iter().copied().collect();
        let expected: HashSet<NodeId> = (0..16).map(NodeId).collect();
        assert_eq!(unique, expected);
        assert_eq!(file.record_count().unwrap(), 16);
    }

    #[test]
    fn test_append_after_shutdown() {
        let (mut serializer, _file, _dir) = spawn_serializer(1);
        serializer.shutdown();
        assert!(matches!(
            serializer.append(Bytes::from_static(&[0])),
            Err(ArborError::SerializerStopped)
        ));
    }
}
