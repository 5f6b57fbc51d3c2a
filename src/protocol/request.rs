//! Logical requests and responses exchanged with the server

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::header::HeaderMap;
use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite, ReadBuf};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::checksum::{ChecksumType, RequestChecksum};
use super::signer::AMZ_META_HEADER;
use crate::error::{Ds3Error, Result};

/// Default content type of request bodies
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// HTTP verbs used by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVerb {
    Get,
    Put,
    Post,
    Delete,
    Head,
}

impl HttpVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVerb::Get => "GET",
            HttpVerb::Put => "PUT",
            HttpVerb::Post => "POST",
            HttpVerb::Delete => "DELETE",
            HttpVerb::Head => "HEAD",
        }
    }

    pub(crate) fn method(&self) -> reqwest::Method {
        match self {
            HttpVerb::Get => reqwest::Method::GET,
            HttpVerb::Put => reqwest::Method::PUT,
            HttpVerb::Post => reqwest::Method::POST,
            HttpVerb::Delete => reqwest::Method::DELETE,
            HttpVerb::Head => reqwest::Method::HEAD,
        }
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Random-access byte source or sink for object data
pub trait ByteChannel: AsyncRead + AsyncWrite + AsyncSeek + Send + Sync + Unpin {}

impl<T> ByteChannel for T where T: AsyncRead + AsyncWrite + AsyncSeek + Send + Sync + Unpin {}

/// Channel shared between the transfers of one object's ranges
pub type SharedChannel = Arc<Mutex<Box<dyn ByteChannel>>>;

/// Wrap a channel so it can be shared between requests
pub fn shared_channel<C: ByteChannel + 'static>(channel: C) -> SharedChannel {
    Arc::new(Mutex::new(Box::new(channel)))
}

/// Reader over a locked channel; the lock is held until the reader drops
pub(crate) struct LockedChannel {
    guard: OwnedMutexGuard<Box<dyn ByteChannel>>,
}

impl LockedChannel {
    pub(crate) async fn lock(channel: &SharedChannel) -> Self {
        Self {
            guard: Arc::clone(channel).lock_owned().await,
        }
    }

    pub(crate) fn channel(&mut self) -> &mut Box<dyn ByteChannel> {
        &mut self.guard
    }
}

impl AsyncRead for LockedChannel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut **self.get_mut().guard).poll_read(cx, buf)
    }
}

/// Payload of a request
pub enum RequestBody {
    /// In-memory payload such as an XML document
    Bytes(Bytes),
    /// `length` bytes of a seekable channel starting at `start`
    Channel {
        channel: SharedChannel,
        start: u64,
        length: u64,
    },
    /// Forward-only stream; cannot be resent after a redirect
    Stream {
        reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
        length: u64,
    },
}

impl RequestBody {
    pub fn len(&self) -> u64 {
        match self {
            RequestBody::Bytes(bytes) => bytes.len() as u64,
            RequestBody::Channel { length, .. } | RequestBody::Stream { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_rewindable(&self) -> bool {
        !matches!(self, RequestBody::Stream { .. })
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            RequestBody::Channel { start, length, .. } => f
                .debug_struct("Channel")
                .field("start", start)
                .field("length", length)
                .finish(),
            RequestBody::Stream { length, .. } => {
                f.debug_struct("Stream").field("length", length).finish()
            }
        }
    }
}

/// A logical request, turned into signed HTTP exchanges by a
/// [`NetworkClient`](super::transport::NetworkClient)
#[derive(Debug)]
pub struct Ds3Request {
    pub verb: HttpVerb,
    pub path: String,
    /// Query parameters; `None` values render as a bare key
    pub query: BTreeMap<String, Option<String>>,
    /// Caller headers, a key may repeat
    pub headers: Vec<(String, String)>,
    pub content_type: String,
    pub body: Option<RequestBody>,
    pub checksum: RequestChecksum,
    pub checksum_type: ChecksumType,
}

impl Ds3Request {
    /// Create a new request for `path`
    pub fn new(verb: HttpVerb, path: impl Into<String>) -> Self {
        Self {
            verb,
            path: path.into(),
            query: BTreeMap::new(),
            headers: vec![("Naming-Convention".to_string(), "s3".to_string())],
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            body: None,
            checksum: RequestChecksum::None,
            checksum_type: ChecksumType::None,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.insert(key.into(), Some(value.to_string()));
        self
    }

    /// Add a query key without a value, e.g. `?delete`
    pub fn with_flag(mut self, key: impl Into<String>) -> Self {
        self.query.insert(key.into(), None);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a user metadata header, prefixing `x-amz-meta-` when missing
    pub fn with_metadata(self, key: &str, value: impl Into<String>) -> Self {
        let name = if key.to_lowercase().starts_with(AMZ_META_HEADER) {
            key.to_string()
        } else {
            format!("{}{}", AMZ_META_HEADER, key)
        };
        self.with_header(name, value)
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_checksum(mut self, checksum: RequestChecksum, checksum_type: ChecksumType) -> Self {
        self.checksum = checksum;
        self.checksum_type = checksum_type;
        self
    }

    /// Rendered query string without the leading `?`
    pub fn query_string(&self) -> String {
        use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
        const QUERY: &AsciiSet = &NON_ALPHANUMERIC
            .remove(b'-')
            .remove(b'_')
            .remove(b'.')
            .remove(b'~');
        self.query
            .iter()
            .map(|(key, value)| match value {
                Some(value) => format!(
                    "{}={}",
                    utf8_percent_encode(key, QUERY),
                    utf8_percent_encode(value, QUERY)
                ),
                None => utf8_percent_encode(key, QUERY).to_string(),
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Status, headers and a streamed body
pub struct WebResponse {
    status: u16,
    headers: HeaderMap,
    body: BoxStream<'static, Result<Bytes>>,
}

impl WebResponse {
    pub fn new(status: u16, headers: HeaderMap, body: BoxStream<'static, Result<Bytes>>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Response with an in-memory body
    pub fn from_bytes(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let stream = if body.is_empty() {
            stream::empty().boxed()
        } else {
            stream::once(async move { Ok(body) }).boxed()
        };
        Self::new(status, headers, stream)
    }

    pub(crate) fn from_reqwest(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes_stream().map_err(Ds3Error::from).boxed();
        Self::new(status, headers, body)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if present and valid text
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Declared body length
    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length").and_then(|v| v.trim().parse().ok())
    }

    /// All `x-amz-meta-*` headers with the prefix removed
    pub fn metadata(&self) -> BTreeMap<String, Vec<String>> {
        let mut metadata: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in self.headers.iter() {
            let name = name.as_str();
            if let Some(key) = name.strip_prefix(AMZ_META_HEADER) {
                if let Ok(value) = value.to_str() {
                    metadata.entry(key.to_string()).or_default().push(value.to_string());
                }
            }
        }
        metadata
    }

    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes>> {
        self.body
    }

    /// Collect the whole body
    pub async fn bytes(self) -> Result<Bytes> {
        let chunks: Vec<Bytes> = self.body.try_collect().await?;
        Ok(chunks.concat().into())
    }

    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl fmt::Debug for WebResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish()
    }
}
