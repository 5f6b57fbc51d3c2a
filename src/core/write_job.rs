//! Write jobs: upload every object range of a bulk put

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::AsyncSeekExt;
use tracing::{debug, info};
use uuid::Uuid;

use super::allocator::ChunkAllocator;
use super::channels::{JobChannels, ObjectChannelBuilder};
use super::events::EventRegistry;
use super::job::{Job, JobCore, JobState};
use super::tracker::JobPartTracker;
use super::transferrer::{ChunkTransferrer, ItemTransferrer};
use crate::commands::{Ds3Commands, PutObjectRequest};
use crate::error::Result;
use crate::protocol::request::LockedChannel;
use crate::protocol::{
    checksum, filter_chunks, BulkObject, ChecksumType, MasterObjectList, RequestChecksum,
    SharedChannel,
};

/// Caller-supplied checksum for a part, replacing the computed one
#[async_trait]
pub trait ChecksumFunction: Send + Sync {
    async fn compute(&self, object: &BulkObject, channel: &SharedChannel) -> Result<String>;
}

#[async_trait]
impl<F> ChecksumFunction for F
where
    F: Fn(&BulkObject) -> String + Send + Sync,
{
    async fn compute(&self, object: &BulkObject, _channel: &SharedChannel) -> Result<String> {
        Ok(self(object))
    }
}

/// Supplies user metadata sent with an object's first part
pub trait MetadataAccess: Send + Sync {
    fn metadata(&self, name: &str) -> BTreeMap<String, String>;
}

impl<F> MetadataAccess for F
where
    F: Fn(&str) -> BTreeMap<String, String> + Send + Sync,
{
    fn metadata(&self, name: &str) -> BTreeMap<String, String> {
        self(name)
    }
}

pub struct WriteJob {
    core: JobCore,
    checksum_type: ChecksumType,
    checksum_function: Option<Arc<dyn ChecksumFunction>>,
    metadata_access: Option<Arc<dyn MetadataAccess>>,
}

impl fmt::Debug for WriteJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteJob")
            .field("core", &self.core)
            .field("checksum_type", &self.checksum_type)
            .field("checksum_function", &self.checksum_function.is_some())
            .field("metadata_access", &self.metadata_access.is_some())
            .finish()
    }
}

impl WriteJob {
    /// Create a new write job; ranges already in the server cache are skipped
    pub fn new(
        client: Arc<dyn Ds3Commands>,
        master: MasterObjectList,
        retry_after: i32,
        checksum_type: ChecksumType,
    ) -> Self {
        let chunks = filter_chunks(&master.chunks, |o| !o.in_cache);
        Self {
            core: JobCore::new(client, master, chunks, retry_after),
            checksum_type,
            checksum_function: None,
            metadata_access: None,
        }
    }

    pub fn with_max_parallel_requests(mut self, max_parallel_requests: usize) -> Self {
        self.core.max_parallel_requests = max_parallel_requests.max(1);
        self
    }

    pub fn with_checksum_type(mut self, checksum_type: ChecksumType) -> Self {
        self.checksum_type = checksum_type;
        self
    }

    /// Use `function` instead of hashing the data; needs a checksum type
    pub fn with_checksum<C: ChecksumFunction + 'static>(mut self, function: C) -> Self {
        self.checksum_function = Some(Arc::new(function));
        self
    }

    pub fn with_metadata<M: MetadataAccess + 'static>(mut self, access: M) -> Self {
        self.metadata_access = Some(Arc::new(access));
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
        let putter = Arc::new(PutObjectTransferrer {
            bucket: self.core.master.bucket_name.clone(),
            job_id: self.core.job_id(),
            channels,
            events: self.core.events.clone(),
            checksum_type: self.checksum_type,
            checksum_function: self.checksum_function.clone(),
            metadata_access: self.metadata_access.clone(),
        });
        let transferrer = ChunkTransferrer::new(
            putter,
            self.core.client.clone(),
            self.core.tracker.clone(),
            self.core.max_parallel_requests,
        );
        let mut allocator = ChunkAllocator::new(self.core.client.clone(), self.core.retry_after);

        for chunk in &self.core.chunks {
            debug!("Allocating chunk: {}", chunk.chunk_id);
            let allocated = allocator.allocate(chunk).await?;
            let tracker = &self.core.tracker;
            // Already cached on the server: done without moving any bytes
            for cached in allocated
                .objects
                .iter()
                .filter(|o| o.in_cache && tracker.contains_part(o))
            {
                debug!("Part {}:{} already in cache", cached.name, cached.offset);
                tracker.complete_part_with_bytes(&cached.name, cached.offset, cached.length, 0)?;
            }
            let pending = allocated.filtered(|o| !o.in_cache && tracker.contains_part(o));
            transferrer
                .transfer_chunks(&self.core.master.nodes, std::slice::from_ref(&pending))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Job for WriteJob {
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

struct PutObjectTransferrer {
    bucket: String,
    job_id: Uuid,
    channels: Arc<JobChannels>,
    events: Arc<EventRegistry>,
    checksum_type: ChecksumType,
    checksum_function: Option<Arc<dyn ChecksumFunction>>,
    metadata_access: Option<Arc<dyn MetadataAccess>>,
}

impl PutObjectTransferrer {
    async fn checksum(&self, object: &BulkObject, channel: &SharedChannel) -> Result<Option<String>> {
        if self.checksum_type == ChecksumType::None {
            return Ok(None);
        }

        if let Some(function) = &self.checksum_function {
            info!("Getting checksum from user supplied callback for blob: {}", object);
            return Ok(Some(function.compute(object, channel).await?));
        }

        info!("Calculating {} checksum for blob: {}", self.checksum_type, object);
        let mut locked = LockedChannel::lock(channel).await;
        locked.channel().seek(SeekFrom::Start(object.offset)).await?;
        checksum::compute(self.checksum_type, &mut locked, object.length).await
    }
}

#[async_trait]
impl ItemTransferrer for PutObjectTransferrer {
    async fn transfer_item(
        &self,
        client: Arc<dyn Ds3Commands>,
        object: &BulkObject,
    ) -> Result<u64> {
        let channel = self.channels.acquire(&object.name).await?;
        let mut request = PutObjectRequest::new(
            &self.bucket,
            &object.name,
            self.job_id,
            object.offset,
            object.length,
            channel.clone(),
        );

        if object.offset == 0 {
            if let Some(access) = &self.metadata_access {
                for (key, value) in access.metadata(&object.name) {
                    request = request.with_metadata(key, value);
                }
            }
        }

        if let Some(value) = self.checksum(object, &channel).await? {
            self.events.emit_checksum(object, self.checksum_type, &value);
            request = request.with_checksum(RequestChecksum::Value(value), self.checksum_type);
        }

        client.put_object(request).await?;
        self.channels.release(&object.name).await?;
        Ok(object.length)
    }
}
