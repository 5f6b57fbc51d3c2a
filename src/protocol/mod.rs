/*!
 * DS3 wire protocol: request signing, checksums, HTTP transport and the
 * XML job model
 */

pub mod checksum;
pub mod request;
pub mod signer;
pub mod transport;
pub mod types;
pub mod xml;

pub use checksum::{ChecksumType, RequestChecksum};
pub use request::{
    shared_channel, ByteChannel, Ds3Request, HttpVerb, RequestBody, SharedChannel, WebResponse,
};
pub use signer::{SignatureDetails, Signer};
pub use transport::{HttpTransport, NetworkClient};
pub use types::{
    filter_chunks, partial_ranges, BulkObject, Chunk, ChunkOrdering, Ds3Object, JobStatus,
    MasterObjectList, Metadata, Node, Priority, Range, RequestType, WriteOptimization,
};
