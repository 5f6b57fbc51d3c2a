//! Job event listeners
//!
//! Listeners run synchronously on the task that detected the event, so
//! callbacks of a running job may be invoked concurrently.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::error::{Ds3Error, Result};
use crate::protocol::{BulkObject, ChecksumType, Metadata};

pub type DataTransferredListener = Arc<dyn Fn(u64) + Send + Sync>;
pub type ObjectCompletedListener = Arc<dyn Fn(&str) + Send + Sync>;
pub type ChecksumListener = Arc<dyn Fn(&BulkObject, ChecksumType, &str) + Send + Sync>;
pub type MetadataReceivedListener = Arc<dyn Fn(&str, &Metadata) + Send + Sync>;

/// Handle returned on registration, used to remove the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Slot<L> = RwLock<Vec<(ListenerId, L)>>;

/// Observer registry of one job
pub struct EventRegistry {
    job_id: Uuid,
    next_id: AtomicU64,
    started: AtomicBool,
    data_transferred: Slot<DataTransferredListener>,
    object_completed: Slot<ObjectCompletedListener>,
    checksum: Slot<ChecksumListener>,
    metadata_received: Slot<MetadataReceivedListener>,
}

fn register<L>(slot: &Slot<L>, id: ListenerId, listener: L) {
    slot.write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .push((id, listener));
}

fn unregister<L>(slot: &Slot<L>, id: ListenerId) -> bool {
    let mut listeners = slot.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    let before = listeners.len();
    listeners.retain(|(existing, _)| *existing != id);
    listeners.len() != before
}

/// Listeners are cloned out so none run under the lock
fn snapshot<L: Clone>(slot: &Slot<L>) -> Vec<L> {
    slot.read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .iter()
        .map(|(_, listener)| listener.clone())
        .collect()
}

impl EventRegistry {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            next_id: AtomicU64::new(1),
            started: AtomicBool::new(false),
            data_transferred: RwLock::new(Vec::new()),
            object_completed: RwLock::new(Vec::new()),
            checksum: RwLock::new(Vec::new()),
            metadata_received: RwLock::new(Vec::new()),
        }
    }

    fn next(&self) -> Result<ListenerId> {
        if self.started.load(Ordering::Acquire) {
            return Err(Ds3Error::JobRunning(self.job_id));
        }
        Ok(ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    /// Called with the byte count of every completed part
    pub fn on_data_transferred<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let id = self.next()?;
        let listener: DataTransferredListener = Arc::new(listener);
        register(&self.data_transferred, id, listener);
        Ok(id)
    }

    /// Called once per object, when its last part completes
    pub fn on_object_completed<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = self.next()?;
        let listener: ObjectCompletedListener = Arc::new(listener);
        register(&self.object_completed, id, listener);
        Ok(id)
    }

    /// Called with every checksum before the part is sent
    pub fn on_checksum<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&BulkObject, ChecksumType, &str) + Send + Sync + 'static,
    {
        let id = self.next()?;
        let listener: ChecksumListener = Arc::new(listener);
        register(&self.checksum, id, listener);
        Ok(id)
    }

    /// Called with the metadata returned for an object's first part
    pub fn on_metadata_received<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&str, &Metadata) + Send + Sync + 'static,
    {
        let id = self.next()?;
        let listener: MetadataReceivedListener = Arc::new(listener);
        register(&self.metadata_received, id, listener);
        Ok(id)
    }

    /// Remove a listener; returns whether it was registered
    pub fn remove(&self, id: ListenerId) -> Result<bool> {
        if self.started.load(Ordering::Acquire) {
            return Err(Ds3Error::JobRunning(self.job_id));
        }
        Ok(unregister(&self.data_transferred, id)
            | unregister(&self.object_completed, id)
            | unregister(&self.checksum, id)
            | unregister(&self.metadata_received, id))
    }

    /// Freeze the registry; later changes fail with `JobRunning`
    pub(crate) fn start(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub(crate) fn emit_data_transferred(&self, bytes: u64) {
        for listener in snapshot(&self.data_transferred) {
            listener(bytes);
        }
    }

    pub(crate) fn emit_object_completed(&self, name: &str) {
        for listener in snapshot(&self.object_completed) {
            listener(name);
        }
    }

    pub(crate) fn emit_checksum(&self, object: &BulkObject, checksum_type: ChecksumType, value: &str) {
        for listener in snapshot(&self.checksum) {
            listener(object, checksum_type, value);
        }
    }

    pub(crate) fn emit_metadata_received(&self, name: &str, metadata: &Metadata) {
        for listener in snapshot(&self.metadata_received) {
            listener(name, metadata);
        }
    }
}
