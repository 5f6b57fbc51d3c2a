/*!
 * ds3-client - bulk transfer client for DS3 object storage
 *
 * - AWS-style request signing and optional payload checksums
 * - Bulk write and read jobs split into server-planned chunks
 * - Parallel part transfers with per-object completion events
 * - Resumable jobs through the server's job descriptor
 */

pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod protocol;

// Re-export commonly used types
pub use commands::{Ds3Client, Ds3Commands};
pub use config::{ConnectionDetails, Credentials, LogConfig, ReadJobOptions, WriteJobOptions};
pub use core::{
    Ds3ClientHelpers, FileObjectGetter, FileObjectPutter, Job, JobState, ObjectChannelBuilder,
    ReadJob, WriteJob,
};
pub use error::{Ds3Error, Result};
pub use protocol::{BulkObject, ChecksumType, Ds3Object, MasterObjectList, Range};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
