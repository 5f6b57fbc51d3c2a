//! Shared job lifecycle

use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use uuid::Uuid;

use super::channels::ObjectChannelBuilder;
use super::events::EventRegistry;
use super::tracker::JobPartTracker;
use crate::commands::Ds3Commands;
use crate::error::{Ds3Error, Result};
use crate::protocol::{Chunk, MasterObjectList};

/// Default number of requests a job keeps in flight
pub const DEFAULT_MAX_PARALLEL_REQUESTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Running,
    Complete,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Created => "created",
            JobState::Running => "running",
            JobState::Complete => "complete",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A write or read job that can be run once
#[async_trait]
pub trait Job: Send + Sync {
    fn job_id(&self) -> Uuid;

    fn bucket_name(&self) -> &str;

    fn state(&self) -> JobState;

    /// Listener registration; closed once the transfer starts
    fn events(&self) -> &EventRegistry;

    fn tracker(&self) -> &JobPartTracker;

    /// Move every outstanding part of the job
    async fn transfer(&self, channel_builder: Arc<dyn ObjectChannelBuilder>) -> Result<()>;
}

/// State common to write and read jobs
pub(crate) struct JobCore {
    pub(crate) client: Arc<dyn Ds3Commands>,
    pub(crate) master: MasterObjectList,
    /// Chunks left after filtering, in server order
    pub(crate) chunks: Vec<Chunk>,
    pub(crate) events: Arc<EventRegistry>,
    pub(crate) tracker: Arc<JobPartTracker>,
    pub(crate) retry_after: i32,
    pub(crate) max_parallel_requests: usize,
    state: Mutex<JobState>,
}

impl fmt::Debug for JobCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobCore")
            .field("job_id", &self.master.job_id)
            .field("bucket_name", &self.master.bucket_name)
            .field("chunks", &self.chunks.len())
            .field("state", &self.state())
            .finish()
    }
}

impl JobCore {
    pub(crate) fn new(
        client: Arc<dyn Ds3Commands>,
        master: MasterObjectList,
        chunks: Vec<Chunk>,
        retry_after: i32,
    ) -> Self {
        let events = Arc::new(EventRegistry::new(master.job_id));
        let tracker = Arc::new(JobPartTracker::new(
            chunks.iter().flat_map(|chunk| chunk.objects.iter()),
            events.clone(),
        ));
        info!(
            "Ready to start transfer for job {} with {} chunk(s)",
            master.job_id,
            chunks.len()
        );

        Self {
            client,
            master,
            chunks,
            events,
            tracker,
            retry_after,
            max_parallel_requests: DEFAULT_MAX_PARALLEL_REQUESTS,
            state: Mutex::new(JobState::Created),
        }
    }

    pub(crate) fn job_id(&self) -> Uuid {
        self.master.job_id
    }

    pub(crate) fn state(&self) -> JobState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Created -> Running, only once
    pub(crate) fn begin(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state != JobState::Created {
            return Err(Ds3Error::JobRunning(self.job_id()));
        }
        *state = JobState::Running;
        self.events.start();
        Ok(())
    }

    pub(crate) fn finish(&self, result: &Result<()>) {
        let next = match result {
            Ok(()) => {
                info!(
                    "Job {} complete: {} bytes transferred",
                    self.job_id(),
                    self.tracker.transferred_bytes()
                );
                JobState::Complete
            }
            Err(e) => {
                error!("Job {} failed ({}): {}", self.job_id(), e.category(), e);
                JobState::Failed
            }
        };
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
    }
}
