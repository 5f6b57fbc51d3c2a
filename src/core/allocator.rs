//! Chunk allocation with server-driven backoff
//!
//! Both write allocation and read availability share one retry budget per
//! job. The budget is restored after every success; a negative budget never
//! runs out.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::commands::{AllocateJobChunkResponse, AvailableJobChunksResponse, Ds3Commands};
use crate::error::{Ds3Error, Result};
use crate::protocol::{Chunk, MasterObjectList};

/// Retries the server may ask for before a job gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    initial: i32,
    left: i32,
}

impl RetryBudget {
    pub fn new(initial: i32) -> Self {
        Self {
            initial,
            left: initial,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(-1)
    }

    pub fn left(&self) -> i32 {
        self.left
    }

    pub fn reset(&mut self) {
        self.left = self.initial;
    }

    /// Spend one retry
    pub fn consume(&mut self) -> Result<()> {
        if self.left == 0 {
            return Err(Ds3Error::NoMoreRetries(self.initial));
        }
        if self.left > 0 {
            self.left -= 1;
        }
        Ok(())
    }
}

/// Obtains chunks from the server, sleeping whenever it asks to retry later
pub struct ChunkAllocator {
    client: Arc<dyn Ds3Commands>,
    budget: RetryBudget,
}

impl ChunkAllocator {
    pub fn new(client: Arc<dyn Ds3Commands>, retry_after: i32) -> Self {
        Self {
            client,
            budget: RetryBudget::new(retry_after),
        }
    }

    pub fn budget(&self) -> RetryBudget {
        self.budget
    }

    /// Reserve server cache space for a write chunk
    pub async fn allocate(&mut self, chunk: &Chunk) -> Result<Chunk> {
        loop {
            match self.client.allocate_job_chunk(chunk.chunk_id).await? {
                AllocateJobChunkResponse::Allocated(allocated) => {
                    info!("Allocated chunk {}", chunk.chunk_id);
                    self.budget.reset();
                    return Ok(allocated);
                }
                AllocateJobChunkResponse::RetryLater(seconds) => {
                    info!("Chunk {} not allocated, retry later", chunk.chunk_id);
                    self.back_off(seconds).await?;
                }
            }
        }
    }

    /// Wait until some chunks of a read job can be served
    pub async fn next_available(&mut self, job_id: Uuid) -> Result<MasterObjectList> {
        loop {
            match self.client.get_available_job_chunks(job_id).await? {
                AvailableJobChunksResponse::Available(list) => {
                    info!("{} chunk(s) available for job {}", list.chunks.len(), job_id);
                    self.budget.reset();
                    return Ok(list);
                }
                AvailableJobChunksResponse::RetryLater(seconds) => {
                    info!("No chunks available for job {}, retry later", job_id);
                    self.back_off(seconds).await?;
                }
            }
        }
    }

    /// Consume one retry and sleep for the server's delay
    pub(crate) async fn back_off(&mut self, seconds: u64) -> Result<()> {
        self.budget.consume()?;
        warn!(
            "Will retry in {} seconds ({} retries left)",
            seconds,
            if self.budget.left() < 0 {
                "unlimited".to_string()
            } else {
                self.budget.left().to_string()
            }
        );
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        Ok(())
    }
}
