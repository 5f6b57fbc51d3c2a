/*!
 * Entry points for starting and recovering bulk jobs
 */

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::job::DEFAULT_MAX_PARALLEL_REQUESTS;
use super::read_job::ReadJob;
use super::write_job::WriteJob;
use crate::commands::{BulkGetRequest, BulkPutRequest, Ds3Client, Ds3Commands};
use crate::config::{ReadJobOptions, WriteJobOptions};
use crate::error::{Ds3Error, Result};
use crate::protocol::{partial_ranges, ChecksumType, ChunkOrdering, Ds3Object, RequestType};

/// Unlimited allocation retries
pub const DEFAULT_RETRY_AFTER: i32 = -1;

/// Starts write and read jobs against a DS3 endpoint
#[derive(Clone)]
pub struct Ds3ClientHelpers {
    client: Arc<dyn Ds3Commands>,
    retry_after: i32,
    max_parallel_requests: usize,
}

impl Ds3ClientHelpers {
    pub fn new(client: Arc<dyn Ds3Commands>) -> Self {
        Self {
            client,
            retry_after: DEFAULT_RETRY_AFTER,
            max_parallel_requests: DEFAULT_MAX_PARALLEL_REQUESTS,
        }
    }

    pub fn from_client(client: Ds3Client) -> Self {
        Self::new(Arc::new(client))
    }

    /// Number of RETRY-LATER answers tolerated in a row; negative is unlimited
    pub fn with_retry_after(mut self, retry_after: i32) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn with_max_parallel_requests(mut self, max_parallel_requests: usize) -> Self {
        self.max_parallel_requests = max_parallel_requests.max(1);
        self
    }

    pub fn client(&self) -> &Arc<dyn Ds3Commands> {
        &self.client
    }

    /// Create a bulk put job on the server
    pub async fn start_write_job(
        &self,
        bucket: &str,
        objects: Vec<Ds3Object>,
        options: WriteJobOptions,
    ) -> Result<WriteJob> {
        let request = BulkPutRequest::new(bucket, objects)
            .with_priority(options.priority)
            .with_write_optimization(options.write_optimization)
            .with_max_upload_size(options.max_upload_size);
        let master = self.client.bulk_put(request).await?;
        info!("Started write job {} on bucket {}", master.job_id, bucket);

        Ok(WriteJob::new(
            self.client.clone(),
            master,
            self.retry_after,
            options.checksum_type,
        )
        .with_max_parallel_requests(self.max_parallel_requests))
    }

    /// Create a bulk get job on the server
    ///
    /// Objects carrying ranges are read partially.
    pub async fn start_read_job(
        &self,
        bucket: &str,
        objects: Vec<Ds3Object>,
        options: ReadJobOptions,
    ) -> Result<ReadJob> {
        let ranges = partial_ranges(&objects);
        let request = BulkGetRequest::new(bucket, objects)
            .with_priority(options.priority)
            .with_chunk_ordering(ChunkOrdering::None);
        let master = self.client.bulk_get(request).await?;
        info!("Started read job {} on bucket {}", master.job_id, bucket);

        Ok(
            ReadJob::new(self.client.clone(), master, ranges, self.retry_after)
                .with_max_parallel_requests(self.max_parallel_requests),
        )
    }

    /// Resume a write job; only the parts the server still lacks are sent
    ///
    /// The recovered job does not checksum; use
    /// [`WriteJob::with_checksum_type`] to turn it back on.
    pub async fn recover_write_job(&self, job_id: Uuid) -> Result<WriteJob> {
        let master = self.client.modify_job(job_id).await?;
        expect_direction(RequestType::Put, master.request_type)?;
        info!("Recovered write job {}", job_id);

        Ok(
            WriteJob::new(self.client.clone(), master, self.retry_after, ChecksumType::None)
                .with_max_parallel_requests(self.max_parallel_requests),
        )
    }

    /// Resume a read job; recovered reads always fetch whole blobs
    pub async fn recover_read_job(&self, job_id: Uuid) -> Result<ReadJob> {
        let master = self.client.modify_job(job_id).await?;
        expect_direction(RequestType::Get, master.request_type)?;
        info!("Recovered read job {}", job_id);

        Ok(
            ReadJob::new(
                self.client.clone(),
                master,
                Default::default(),
                self.retry_after,
            )
            .with_max_parallel_requests(self.max_parallel_requests),
        )
    }
}

fn expect_direction(expected: RequestType, actual: RequestType) -> Result<()> {
    if expected != actual {
        return Err(Ds3Error::JobRecovery {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Prepend `prefix` to every object name
pub fn add_prefix(objects: Vec<Ds3Object>, prefix: &str) -> Vec<Ds3Object> {
    objects
        .into_iter()
        .map(|object| Ds3Object {
            name: format!("{}{}", prefix, object.name),
            ..object
        })
        .collect()
}

/// Strip `prefix` from object names that start with it
pub fn remove_prefix(objects: Vec<Ds3Object>, prefix: &str) -> Vec<Ds3Object> {
    objects
        .into_iter()
        .map(|object| match object.name.strip_prefix(prefix) {
            Some(stripped) => Ds3Object {
                name: stripped.to_string(),
                ..object
            },
            None => object,
        })
        .collect()
}
