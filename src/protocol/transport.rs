//! HTTP transport: turns a [`Ds3Request`] into signed exchanges
//!
//! Redirects are handled here instead of by the HTTP stack so the body can
//! be rewound and the request re-signed before every resend.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, Stream};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, DATE, HOST};
use reqwest::StatusCode;
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use super::checksum::{self, RequestChecksum};
use super::request::{Ds3Request, LockedChannel, RequestBody, SharedChannel, WebResponse};
use super::signer::{self, SignatureDetails, Signer};
use super::types::Node;
use crate::config::ConnectionDetails;
use crate::error::{Ds3Error, Result};

/// Idle connections kept per host
pub const MAX_CONNECTIONS_PER_HOST: usize = 50;

/// RFC 1123 date as sent in the Date header
pub const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Sends logical requests to a DS3 endpoint
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Perform the exchange, following temporary redirects
    async fn get_response(&self, request: Ds3Request) -> Result<WebResponse>;

    fn connection_details(&self) -> &ConnectionDetails;

    /// Client for one of a job's storage nodes, sharing this client's settings
    fn for_node(&self, node: &Node) -> Result<Arc<dyn NetworkClient>>;
}

/// [`NetworkClient`] backed by a pooled reqwest client
pub struct HttpTransport {
    details: ConnectionDetails,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a new transport for the given connection details
    pub fn new(details: ConnectionDetails) -> Result<Self> {
        details.validate()?;

        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(MAX_CONNECTIONS_PER_HOST);

        if !details.certificate_verification {
            warn!(
                "Certificate verification disabled for {}; any certificate and host name will be accepted",
                details.host_field()
            );
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(proxy) = &details.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }

        Ok(Self {
            client: builder.build()?,
            details,
        })
    }

    fn build_url(&self, request: &Ds3Request) -> String {
        let mut url = format!(
            "{}{}",
            self.details.base_url(),
            signer::escape_path(&request.path)
        );
        if !request.query.is_empty() {
            url.push('?');
            url.push_str(&request.query_string());
        }
        url
    }

    /// Checksum header value, computed once per request
    async fn build_hash(&self, request: &Ds3Request) -> Result<Option<String>> {
        if request.checksum_type.header_name().is_none() {
            return Ok(None);
        }

        match (&request.checksum, &request.body) {
            (RequestChecksum::None, _) => Ok(None),
            (RequestChecksum::Value(value), _) => Ok(Some(value.clone())),
            (RequestChecksum::Compute, None) => Ok(None),
            (RequestChecksum::Compute, Some(RequestBody::Bytes(bytes))) => {
                let mut reader: &[u8] = bytes;
                checksum::compute(request.checksum_type, &mut reader, bytes.len() as u64).await
            }
            (
                RequestChecksum::Compute,
                Some(RequestBody::Channel {
                    channel,
                    start,
                    length,
                }),
            ) => {
                let mut locked = LockedChannel::lock(channel).await;
                locked.channel().seek(SeekFrom::Start(*start)).await?;
                checksum::compute(request.checksum_type, &mut locked, *length).await
            }
            (RequestChecksum::Compute, Some(RequestBody::Stream { .. })) => {
                Err(Ds3Error::RequiresRewind)
            }
        }
    }

    /// One signed exchange; the body is rewound to its start first
    async fn execute(
        &self,
        request: &Ds3Request,
        url: &str,
        hash: Option<&str>,
    ) -> Result<reqwest::Response> {
        let date = Utc::now().format(DATE_FORMAT).to_string();

        let mut builder = self
            .client
            .request(request.verb.method(), url)
            .header(HOST, self.details.host_field())
            .header(DATE, &date)
            .header(CONTENT_TYPE, &request.content_type);

        if let (Some(hash), Some(name)) = (hash, request.checksum_type.header_name()) {
            builder = builder.header(name, hash);
        }

        let authorization = Signer::authorization(&SignatureDetails {
            verb: request.verb,
            content_hash: hash.unwrap_or(""),
            content_type: &request.content_type,
            date: &date,
            canonicalized_amz_headers: signer::canonicalize_amz_headers(&request.headers),
            canonicalized_resource: signer::canonicalize_resource(&request.path, &request.query),
            credentials: &self.details.credentials,
        })?;
        builder = builder.header(AUTHORIZATION, authorization);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match &request.body {
            None => builder,
            Some(RequestBody::Bytes(bytes)) => builder.body(bytes.clone()),
            Some(RequestBody::Channel {
                channel,
                start,
                length,
            }) => {
                let stream =
                    channel_body(channel.clone(), *start, *length, self.details.buffer_size);
                builder
                    .header(CONTENT_LENGTH, *length)
                    .body(reqwest::Body::wrap_stream(stream))
            }
            Some(RequestBody::Stream { .. }) => return Err(Ds3Error::RequiresRewind),
        };

        Ok(builder.send().await?)
    }
}

/// Stream `length` bytes of `channel` from `start`
///
/// The channel is locked only while a block is read, at an explicit
/// position, so a body the HTTP stack still holds after a redirect never
/// blocks the resend.
pub(crate) fn channel_body(
    channel: SharedChannel,
    start: u64,
    length: u64,
    buffer_size: usize,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    let block_size = buffer_size.max(1) as u64;
    stream::try_unfold(
        (channel, start, length),
        move |(channel, position, remaining)| async move {
            if remaining == 0 {
                return Ok(None);
            }
            let size = remaining.min(block_size);
            let block = read_block(&channel, position, size as usize).await;
            block.map(|block| Some((block, (channel, position + size, remaining - size))))
        },
    )
}

async fn read_block(channel: &SharedChannel, position: u64, size: usize) -> std::io::Result<Bytes> {
    let mut block = vec![0u8; size];
    let mut locked = channel.lock().await;
    locked.seek(SeekFrom::Start(position)).await?;
    locked.read_exact(&mut block).await?;
    Ok(Bytes::from(block))
}

#[async_trait]
impl NetworkClient for HttpTransport {
    async fn get_response(&self, request: Ds3Request) -> Result<WebResponse> {
        if let Some(body) = &request.body {
            if !body.is_rewindable() {
                return Err(Ds3Error::RequiresRewind);
            }
        }

        let url = self.build_url(&request);
        info!("Sending request: {} {}", request.verb, url);

        let hash = self.build_hash(&request).await?;
        if let Some(hash) = &hash {
            debug!("{} checksum for {}: {}", request.checksum_type, request.path, hash);
        }

        let mut redirects: u32 = 0;
        loop {
            let response = self.execute(&request, &url, hash.as_deref()).await?;
            if response.status() != StatusCode::TEMPORARY_REDIRECT {
                info!("Got response from server: {}", response.status());
                return Ok(WebResponse::from_reqwest(response));
            }
            drop(response);

            if redirects == self.details.retries {
                return Err(Ds3Error::TooManyRedirects(redirects));
            }
            redirects += 1;
            info!("Performing retry - attempt: {}", redirects);
        }
    }

    fn connection_details(&self) -> &ConnectionDetails {
        &self.details
    }

    fn for_node(&self, node: &Node) -> Result<Arc<dyn NetworkClient>> {
        Ok(Arc::new(HttpTransport {
            details: self.details.with_node(node),
            client: self.client.clone(),
        }))
    }
}
