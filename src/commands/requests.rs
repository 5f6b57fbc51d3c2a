//! Typed command inputs and outputs

use uuid::Uuid;

use crate::protocol::{
    Chunk, ChecksumType, ChunkOrdering, Ds3Object, MasterObjectList, Metadata, Priority, Range,
    RequestChecksum, SharedChannel, WriteOptimization,
};

/// Create a write job for a set of objects
#[derive(Debug, Clone)]
pub struct BulkPutRequest {
    pub bucket: String,
    pub objects: Vec<Ds3Object>,
    pub priority: Option<Priority>,
    pub write_optimization: Option<WriteOptimization>,
    pub max_upload_size: Option<u64>,
}

impl BulkPutRequest {
    pub fn new(bucket: impl Into<String>, objects: Vec<Ds3Object>) -> Self {
        Self {
            bucket: bucket.into(),
            objects,
            priority: None,
            write_optimization: None,
            max_upload_size: None,
        }
    }

    pub fn with_priority(mut self, priority: Option<Priority>) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_write_optimization(mut self, optimization: Option<WriteOptimization>) -> Self {
        self.write_optimization = optimization;
        self
    }

    pub fn with_max_upload_size(mut self, size: Option<u64>) -> Self {
        self.max_upload_size = size;
        self
    }
}

/// Create a read job for a set of objects
#[derive(Debug, Clone)]
pub struct BulkGetRequest {
    pub bucket: String,
    pub objects: Vec<Ds3Object>,
    pub priority: Option<Priority>,
    pub chunk_ordering: Option<ChunkOrdering>,
}

impl BulkGetRequest {
    pub fn new(bucket: impl Into<String>, objects: Vec<Ds3Object>) -> Self {
        Self {
            bucket: bucket.into(),
            objects,
            priority: None,
            chunk_ordering: None,
        }
    }

    pub fn with_priority(mut self, priority: Option<Priority>) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_chunk_ordering(mut self, ordering: ChunkOrdering) -> Self {
        self.chunk_ordering = Some(ordering);
        self
    }
}

/// Upload one range of an object as part of a job
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub job_id: Uuid,
    pub offset: u64,
    pub length: u64,
    /// Source; the range is read from `offset`
    pub channel: SharedChannel,
    pub checksum: RequestChecksum,
    pub checksum_type: ChecksumType,
    pub metadata: Vec<(String, String)>,
}

impl PutObjectRequest {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        job_id: Uuid,
        offset: u64,
        length: u64,
        channel: SharedChannel,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            job_id,
            offset,
            length,
            channel,
            checksum: RequestChecksum::None,
            checksum_type: ChecksumType::None,
            metadata: Vec::new(),
        }
    }

    pub fn with_checksum(mut self, checksum: RequestChecksum, checksum_type: ChecksumType) -> Self {
        self.checksum = checksum;
        self.checksum_type = checksum_type;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

/// Download one range of an object as part of a job
pub struct GetObjectRequest {
    pub bucket: String,
    pub key: String,
    pub job_id: Uuid,
    pub offset: u64,
    /// Destination; data is written at its position within the object
    pub channel: SharedChannel,
    /// Sub-range to fetch instead of the whole blob
    pub range: Option<Range>,
}

impl GetObjectRequest {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        job_id: Uuid,
        offset: u64,
        channel: SharedChannel,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            job_id,
            offset,
            channel,
            range: None,
        }
    }

    pub fn with_range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }

    /// Position in the channel the first received byte belongs to
    pub fn write_position(&self) -> u64 {
        self.range.map(|r| r.start).unwrap_or(self.offset)
    }
}

/// Result of a chunk allocation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocateJobChunkResponse {
    Allocated(Chunk),
    /// Server cannot take the chunk yet; retry after this many seconds
    RetryLater(u64),
}

/// Result of an available-chunks query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailableJobChunksResponse {
    Available(MasterObjectList),
    RetryLater(u64),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetObjectResponse {
    pub metadata: Metadata,
    pub content_length: Option<u64>,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadObjectResponse {
    pub size: Option<u64>,
    pub etag: Option<String>,
    pub metadata: Metadata,
}
