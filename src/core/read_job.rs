//! Read jobs: download object ranges as the server makes chunks available

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::allocator::ChunkAllocator;
use super::channels::{JobChannels, ObjectChannelBuilder};
use super::events::EventRegistry;
use super::job::{Job, JobCore, JobState};
use super::tracker::JobPartTracker;
use super::transferrer::{ChunkTransferrer, ItemTransferrer};
use crate::commands::{Ds3Commands, GetObjectRequest};
use crate::error::Result;
use crate::protocol::{BulkObject, Chunk, MasterObjectList, Range};

/// Delay before asking again when none of the available chunks are ours
const AVAILABLE_POLL_SECONDS: u64 = 1;

#[derive(Debug)]
pub struct ReadJob {
    core: JobCore,
    partial_ranges: BTreeMap<String, Vec<Range>>,
}

impl ReadJob {
    /// Create a new read job
    ///
    /// `partial_ranges` lists, per object name, the only byte ranges to
    /// fetch; objects not listed are read whole.
    pub fn new(
        client: Arc<dyn Ds3Commands>,
        master: MasterObjectList,
        partial_ranges: BTreeMap<String, Vec<Range>>,
        retry_after: i32,
    ) -> Self {
        let chunks: Vec<Chunk> = master
            .chunks
            .iter()
            .filter(|chunk| !chunk.is_empty())
            .cloned()
            .collect();
        Self {
            core: JobCore::new(client, master, chunks, retry_after),
            partial_ranges,
        }
    }

    pub fn with_max_parallel_requests(mut self, max_parallel_requests: usize) -> Self {
        self.core.max_parallel_requests = max_parallel_requests.max(1);
        self
    }

    pub fn master_object_list(&self) -> &MasterObjectList {
        &self.core.master
    }

    async fn run(&self, channel_builder: Arc<dyn ObjectChannelBuilder>) -> Result<()> {
        if self.core.chunks.is_empty() {
            info!("There is nothing to transfer for job {}", self.core.job_id());
            return Ok(());
        }

        let channels = Arc::new(JobChannels::new(
            channel_builder,
            self.core.chunks.iter().flat_map(|chunk| chunk.objects.iter()),
        ));
        let getter = Arc::new(GetObjectTransferrer {
            bucket: self.core.master.bucket_name.clone(),
            job_id: self.core.job_id(),
            channels,
            events: self.core.events.clone(),
            partial_ranges: self.partial_ranges.clone(),
        });
        let transferrer = ChunkTransferrer::new(
            getter,
            self.core.client.clone(),
            self.core.tracker.clone(),
            self.core.max_parallel_requests,
        );
        let mut allocator = ChunkAllocator::new(self.core.client.clone(), self.core.retry_after);

        let mut outstanding: HashMap<Uuid, &Chunk> = self
            .core
            .chunks
            .iter()
            .map(|chunk| (chunk.chunk_id, chunk))
            .collect();

        while !outstanding.is_empty() {
            let available = allocator.next_available(self.core.job_id()).await?;
            let ready: Vec<Chunk> = available
                .chunks
                .iter()
                .filter_map(|chunk| outstanding.remove(&chunk.chunk_id))
                .cloned()
                .collect();

            if ready.is_empty() {
                debug!("None of the available chunks are outstanding for this job");
                allocator.back_off(AVAILABLE_POLL_SECONDS).await?;
                continue;
            }

            let nodes = if available.nodes.is_empty() {
                &self.core.master.nodes
            } else {
                &available.nodes
            };
            transferrer.transfer_chunks(nodes, &ready).await?;
            debug!("{} chunk(s) left to read", outstanding.len());
        }
        Ok(())
    }
}

#[async_trait]
impl Job for ReadJob {
    fn job_id(&self) -> Uuid {
        self.core.job_id()
    }

    fn bucket_name(&self) -> &str {
        &self.core.master.bucket_name
    }

    fn state(&self) -> JobState {
        self.core.state()
    }

    fn events(&self) -> &EventRegistry {
        &self.core.events
    }

    fn tracker(&self) -> &JobPartTracker {
        &self.core.tracker
    }

    async fn transfer(&self, channel_builder: Arc<dyn ObjectChannelBuilder>) -> Result<()> {
        self.core.begin()?;
        debug!("Starting job transfer");
        let result = self.run(channel_builder).await;
        self.core.finish(&result);
        result
    }
}

struct GetObjectTransferrer {
    bucket: String,
    job_id: Uuid,
    channels: Arc<JobChannels>,
    events: Arc<EventRegistry>,
    partial_ranges: BTreeMap<String, Vec<Range>>,
}

impl GetObjectTransferrer {
    /// Sub-ranges to request for a part; `[None]` fetches the whole part
    fn ranges_for(&self, object: &BulkObject) -> Vec<Option<Range>> {
        match self.partial_ranges.get(&object.name) {
            None => vec![None],
            Some(requested) => match object.range() {
                None => Vec::new(),
                Some(blob) => requested
                    .iter()
                    .filter_map(|range| blob.intersect(range))
                    .map(Some)
                    .collect(),
            },
        }
    }
}

#[async_trait]
impl ItemTransferrer for GetObjectTransferrer {
    async fn transfer_item(
        &self,
        client: Arc<dyn Ds3Commands>,
        object: &BulkObject,
    ) -> Result<u64> {
        let channel = self.channels.acquire(&object.name).await?;
        let mut metadata_sent = false;
        let mut bytes_written = 0;

        for range in self.ranges_for(object) {
            let mut request = GetObjectRequest::new(
                &self.bucket,
                &object.name,
                self.job_id,
                object.offset,
                channel.clone(),
            );
            if let Some(range) = range {
                request = request.with_range(range);
            }

            let response = client.get_object(request).await?;
            bytes_written += response.bytes_written;
            if object.offset == 0 && !metadata_sent && !response.metadata.is_empty() {
                self.events
                    .emit_metadata_received(&object.name, &response.metadata);
                metadata_sent = true;
            }
        }

        self.channels.release(&object.name).await?;
        Ok(bytes_written)
    }
}
