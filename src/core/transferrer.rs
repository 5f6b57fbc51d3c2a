//! Parallel transfer of the parts of one or more chunks
//!
//! Uses tokio's `JoinSet` for the tasks and a `Semaphore` to bound how many
//! requests are in flight. The first failure aborts the remaining tasks.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};
use uuid::Uuid;

use super::tracker::JobPartTracker;
use crate::commands::Ds3Commands;
use crate::error::{Ds3Error, Result};
use crate::protocol::{BulkObject, Chunk, Node};

/// Moves a single part between its channel and the server
#[async_trait]
pub trait ItemTransferrer: Send + Sync {
    /// Returns the number of bytes actually moved
    async fn transfer_item(&self, client: Arc<dyn Ds3Commands>, object: &BulkObject)
        -> Result<u64>;
}

pub struct ChunkTransferrer {
    item_transferrer: Arc<dyn ItemTransferrer>,
    client: Arc<dyn Ds3Commands>,
    tracker: Arc<JobPartTracker>,
    max_parallel_requests: usize,
}

impl ChunkTransferrer {
    pub fn new(
        item_transferrer: Arc<dyn ItemTransferrer>,
        client: Arc<dyn Ds3Commands>,
        tracker: Arc<JobPartTracker>,
        max_parallel_requests: usize,
    ) -> Self {
        Self {
            item_transferrer,
            client,
            tracker,
            max_parallel_requests: max_parallel_requests.max(1),
        }
    }

    /// Transfer every part of `chunks`, each against the chunk's node
    pub async fn transfer_chunks(&self, nodes: &[Node], chunks: &[Chunk]) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel_requests));
        let mut join_set: JoinSet<Result<()>> = JoinSet::new();
        let mut node_clients: HashMap<Uuid, Arc<dyn Ds3Commands>> = HashMap::new();

        for chunk in chunks {
            let client = self.client_for(chunk, nodes, &mut node_clients)?;
            debug!(
                "Transferring chunk {} ({} part(s))",
                chunk.chunk_number,
                chunk.objects.len()
            );

            for object in chunk.objects.iter().cloned() {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| Ds3Error::TaskFailed(e.to_string()))?;

                while let Some(finished) = join_set.try_join_next() {
                    Self::check(finished, &mut join_set)?;
                }

                let item_transferrer = self.item_transferrer.clone();
                let tracker = self.tracker.clone();
                let client = client.clone();
                join_set.spawn(async move {
                    let result = item_transferrer.transfer_item(client, &object).await;
                    drop(permit);
                    tracker.complete_part_with_bytes(
                        &object.name,
                        object.offset,
                        object.length,
                        result?,
                    )
                });
            }
        }

        while let Some(finished) = join_set.join_next().await {
            Self::check(finished, &mut join_set)?;
        }
        Ok(())
    }

    fn check(
        finished: std::result::Result<Result<()>, tokio::task::JoinError>,
        join_set: &mut JoinSet<Result<()>>,
    ) -> Result<()> {
        let result = match finished {
            Ok(result) => result,
            Err(join_error) => Err(Ds3Error::from(join_error)),
        };
        if let Err(e) = &result {
            error!("Part transfer failed, aborting remaining transfers: {}", e);
            join_set.abort_all();
        }
        result
    }

    fn client_for(
        &self,
        chunk: &Chunk,
        nodes: &[Node],
        cache: &mut HashMap<Uuid, Arc<dyn Ds3Commands>>,
    ) -> Result<Arc<dyn Ds3Commands>> {
        let Some(node) = chunk
            .node_id
            .and_then(|id| nodes.iter().find(|node| node.id == id))
        else {
            return Ok(self.client.clone());
        };

        if let Some(client) = cache.get(&node.id) {
            return Ok(client.clone());
        }
        let client = self.client.for_node(node)?;
        cache.insert(node.id, client.clone());
        Ok(client)
    }
}
