//! Typed DS3 commands
//!
//! [`Ds3Commands`] is the boundary between the job engine and the wire. The
//! real implementation is [`Ds3Client`]; the engine only ever sees the trait.

mod client;
mod requests;

pub use client::Ds3Client;
pub use requests::{
    AllocateJobChunkResponse, AvailableJobChunksResponse, BulkGetRequest, BulkPutRequest,
    GetObjectRequest, GetObjectResponse, HeadObjectResponse, PutObjectRequest,
};

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::{MasterObjectList, Node};

/// Trait defining DS3 job and object operations
#[async_trait]
pub trait Ds3Commands: Send + Sync {
    /// Start a write job
    async fn bulk_put(&self, request: BulkPutRequest) -> Result<MasterObjectList>;

    /// Start a read job
    async fn bulk_get(&self, request: BulkGetRequest) -> Result<MasterObjectList>;

    /// Ask the server to reserve cache space for a write chunk
    async fn allocate_job_chunk(&self, chunk_id: Uuid) -> Result<AllocateJobChunkResponse>;

    /// Chunks of a read job the server can serve right now
    async fn get_available_job_chunks(&self, job_id: Uuid) -> Result<AvailableJobChunksResponse>;

    async fn get_job(&self, job_id: Uuid) -> Result<MasterObjectList>;

    /// Every active job; the returned descriptors carry no chunks
    async fn get_jobs(&self) -> Result<Vec<MasterObjectList>>;

    /// Touch a job, returning its descriptor with what is left to transfer
    async fn modify_job(&self, job_id: Uuid) -> Result<MasterObjectList>;

    async fn cancel_job(&self, job_id: Uuid) -> Result<()>;

    async fn put_object(&self, request: PutObjectRequest) -> Result<()>;

    async fn get_object(&self, request: GetObjectRequest) -> Result<GetObjectResponse>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<HeadObjectResponse>;

    /// Commands addressed to one of a job's storage nodes
    fn for_node(&self, node: &Node) -> Result<Arc<dyn Ds3Commands>>;
}
