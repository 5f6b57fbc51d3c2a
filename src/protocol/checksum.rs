/*!
 * Streaming checksum calculation for request bodies
 *
 * Values are base64 encoded; CRC values are encoded from their four
 * big-endian bytes.
 */

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::error::Result;

/// Block size used when hashing a body
pub const READ_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Digest algorithms the server accepts for object payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChecksumType {
    #[default]
    None,
    Md5,
    Sha256,
    Sha512,
    Crc32,
    Crc32c,
}

impl ChecksumType {
    /// Request header carrying the digest, `None` when no checksum is sent
    pub fn header_name(&self) -> Option<&'static str> {
        match self {
            ChecksumType::None => None,
            ChecksumType::Md5 => Some("Content-MD5"),
            ChecksumType::Sha256 => Some("Content-SHA256"),
            ChecksumType::Sha512 => Some("Content-SHA512"),
            ChecksumType::Crc32 => Some("Content-CRC32"),
            ChecksumType::Crc32c => Some("Content-CRC32C"),
        }
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChecksumType::None => "NONE",
            ChecksumType::Md5 => "MD5",
            ChecksumType::Sha256 => "SHA256",
            ChecksumType::Sha512 => "SHA512",
            ChecksumType::Crc32 => "CRC32",
            ChecksumType::Crc32c => "CRC32C",
        };
        write!(f, "{}", name)
    }
}

/// How a request body's checksum header is produced
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RequestChecksum {
    /// No checksum header
    #[default]
    None,
    /// Hash the body with the request's checksum type before sending
    Compute,
    /// Send this precomputed value
    Value(String),
}

/// Streaming hasher that calculates a checksum incrementally
pub enum StreamingHasher {
    Md5(Md5),
    Sha256(Sha256),
    Sha512(Sha512),
    Crc32(crc32fast::Hasher),
    Crc32c(u32),
}

impl StreamingHasher {
    /// Create a new streaming hasher, `None` for [`ChecksumType::None`]
    pub fn new(checksum_type: ChecksumType) -> Option<Self> {
        match checksum_type {
            ChecksumType::None => None,
            ChecksumType::Md5 => Some(StreamingHasher::Md5(Md5::new())),
            ChecksumType::Sha256 => Some(StreamingHasher::Sha256(Sha256::new())),
            ChecksumType::Sha512 => Some(StreamingHasher::Sha512(Sha512::new())),
            ChecksumType::Crc32 => Some(StreamingHasher::Crc32(crc32fast::Hasher::new())),
            ChecksumType::Crc32c => Some(StreamingHasher::Crc32c(0)),
        }
    }

    /// Update the hash with new data
    pub fn update(&mut self, data: &[u8]) {
        match self {
            StreamingHasher::Md5(h) => h.update(data),
            StreamingHasher::Sha256(h) => h.update(data),
            StreamingHasher::Sha512(h) => h.update(data),
            StreamingHasher::Crc32(h) => h.update(data),
            StreamingHasher::Crc32c(crc) => *crc = crc32c::crc32c_append(*crc, data),
        }
    }

    /// Finalize and return the base64 encoded digest
    pub fn finalize(self) -> String {
        match self {
            StreamingHasher::Md5(h) => BASE64.encode(h.finalize()),
            StreamingHasher::Sha256(h) => BASE64.encode(h.finalize()),
            StreamingHasher::Sha512(h) => BASE64.encode(h.finalize()),
            StreamingHasher::Crc32(h) => BASE64.encode(h.finalize().to_be_bytes()),
            StreamingHasher::Crc32c(crc) => BASE64.encode(crc.to_be_bytes()),
        }
    }
}

/// Hash up to `length` bytes of `reader`
///
/// Returns `None` for [`ChecksumType::None`] without touching the reader.
/// A reader shorter than `length` is hashed up to its end.
pub async fn compute<R>(
    checksum_type: ChecksumType,
    reader: &mut R,
    length: u64,
) -> Result<Option<String>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let Some(mut hasher) = StreamingHasher::new(checksum_type) else {
        return Ok(None);
    };

    let block = length.min(READ_BUFFER_SIZE as u64) as usize;
    let mut buffer = vec![0u8; block.max(1)];
    let mut remaining = length;

    while remaining > 0 {
        let want = remaining.min(buffer.len() as u64) as usize;
        let n = reader.read(&mut buffer[..want]).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        remaining -= n as u64;
    }

    let value = hasher.finalize();
    debug!("Computed {} checksum over {} bytes", checksum_type, length - remaining);
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn digest(checksum_type: ChecksumType, data: &[u8]) -> String {
        let mut hasher = StreamingHasher::new(checksum_type).unwrap();
        hasher.update(data);
        hasher.finalize()
    }

    #[test]
    fn test_known_values() {
        assert_eq!(digest(ChecksumType::Md5, b"hello world"), "XrY7u+Ae7tCTyyK7j1rNww==");
        assert_eq!(digest(ChecksumType::Crc32, b"123456789"), "y/Q5Jg==");
        assert_eq!(digest(ChecksumType::Crc32c, b"123456789"), "4waSgw==");
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut hasher = StreamingHasher::new(ChecksumType::Sha512).unwrap();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), digest(ChecksumType::Sha512, b"hello world"));
    }

    #[test]
    fn test_header_names() {
        assert_eq!(ChecksumType::None.header_name(), None);
        assert_eq!(ChecksumType::Md5.header_name(), Some("Content-MD5"));
        assert_eq!(ChecksumType::Crc32c.header_name(), Some("Content-CRC32C"));
        assert_eq!(ChecksumType::Sha256.to_string(), "SHA256");
    }

    #[tokio::test]
    async fn test_compute_respects_length() {
        let mut reader = Cursor::new(b"hello world and more".to_vec());
        let value = compute(ChecksumType::Md5, &mut reader, 11).await.unwrap();
        assert_eq!(value.as_deref(), Some("XrY7u+Ae7tCTyyK7j1rNww=="));
    }

    #[tokio::test]
    async fn test_compute_none_reads_nothing() {
        let mut reader = Cursor::new(b"data".to_vec());
        assert!(compute(ChecksumType::None, &mut reader, 4).await.unwrap().is_none());
        assert_eq!(reader.position(), 0);
    }
}
