//! Per-object progress of a job
//!
//! The name map is fixed at construction. Each name owns its own mutex, so
//! parts of different objects never contend.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::events::EventRegistry;
use crate::error::{Ds3Error, Result};
use crate::protocol::BulkObject;

#[derive(Debug, Default)]
struct ObjectPartState {
    parts: HashSet<(u64, u64)>,
    outstanding: HashSet<(u64, u64)>,
    bytes_transferred: u64,
    completed: bool,
}

/// Tracks outstanding ranges per object and fires progress events
pub struct JobPartTracker {
    objects: HashMap<String, Mutex<ObjectPartState>>,
    events: Arc<EventRegistry>,
    total_bytes: u64,
    transferred_bytes: AtomicU64,
    remaining_objects: AtomicUsize,
}

impl JobPartTracker {
    /// Create a new tracker over the parts of a job
    pub fn new<'a, I>(parts: I, events: Arc<EventRegistry>) -> Self
    where
        I: IntoIterator<Item = &'a BulkObject>,
    {
        let mut states: HashMap<String, ObjectPartState> = HashMap::new();
        let mut total_bytes = 0;
        for part in parts {
            let state = states.entry(part.name.clone()).or_default();
            if state.parts.insert((part.offset, part.length)) {
                state.outstanding.insert((part.offset, part.length));
                total_bytes += part.length;
            }
        }

        let remaining = states.len();
        Self {
            objects: states
                .into_iter()
                .map(|(name, state)| (name, Mutex::new(state)))
                .collect(),
            events,
            total_bytes,
            transferred_bytes: AtomicU64::new(0),
            remaining_objects: AtomicUsize::new(remaining),
        }
    }

    /// Record a part transferred in full
    pub fn complete_part(&self, name: &str, offset: u64, length: u64) -> Result<()> {
        self.complete_part_with_bytes(name, offset, length, length)
    }

    /// Record a part of which `bytes` were actually moved
    ///
    /// Fires a data-transferred event for `bytes` and, when this was the
    /// object's last outstanding part, one object-completed event. Reporting
    /// the same part twice is ignored.
    pub fn complete_part_with_bytes(
        &self,
        name: &str,
        offset: u64,
        length: u64,
        bytes: u64,
    ) -> Result<()> {
        let unknown = || Ds3Error::UnknownObjectPart {
            name: name.to_string(),
            offset,
            length,
        };
        let slot = self.objects.get(name).ok_or_else(unknown)?;

        let object_completed = {
            let mut state = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if !state.parts.contains(&(offset, length)) {
                return Err(unknown());
            }
            if !state.outstanding.remove(&(offset, length)) {
                debug!("Part {}:{}:{} already completed", name, offset, length);
                return Ok(());
            }
            state.bytes_transferred += bytes;
            if state.outstanding.is_empty() && !state.completed {
                state.completed = true;
                true
            } else {
                false
            }
        };

        self.transferred_bytes.fetch_add(bytes, Ordering::AcqRel);
        self.events.emit_data_transferred(bytes);

        if object_completed {
            self.remaining_objects.fetch_sub(1, Ordering::AcqRel);
            debug!("Object {} completed", name);
            self.events.emit_object_completed(name);
        }
        Ok(())
    }

    pub fn contains_part(&self, part: &BulkObject) -> bool {
        self.objects
            .get(&part.name)
            .map(|slot| {
                slot.lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .parts
                    .contains(&(part.offset, part.length))
            })
            .unwrap_or(false)
    }

    /// Bytes transferred so far for one object
    pub fn object_bytes_transferred(&self, name: &str) -> Option<u64> {
        self.objects.get(name).map(|slot| {
            slot.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .bytes_transferred
        })
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Acquire)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining_objects.load(Ordering::Acquire) == 0
    }
}
