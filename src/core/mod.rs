/*!
 * Bulk job engine: chunk allocation, parallel transfers and progress events
 */

pub mod allocator;
pub mod channels;
pub mod events;
pub mod helpers;
pub mod job;
pub mod read_job;
pub mod tracker;
pub mod transferrer;
pub mod write_job;

pub use allocator::{ChunkAllocator, RetryBudget};
pub use channels::{FileObjectGetter, FileObjectPutter, ObjectChannelBuilder};
pub use events::{EventRegistry, ListenerId};
pub use helpers::{add_prefix, remove_prefix, Ds3ClientHelpers, DEFAULT_RETRY_AFTER};
pub use job::{Job, JobState, DEFAULT_MAX_PARALLEL_REQUESTS};
pub use read_job::ReadJob;
pub use tracker::JobPartTracker;
pub use transferrer::{ChunkTransferrer, ItemTransferrer};
pub use write_job::{ChecksumFunction, MetadataAccess, WriteJob};
