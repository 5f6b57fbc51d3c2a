//! DS3 client implementation

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};
use uuid::Uuid;

use super::requests::{
    AllocateJobChunkResponse, AvailableJobChunksResponse, BulkGetRequest, BulkPutRequest,
    GetObjectRequest, GetObjectResponse, HeadObjectResponse, PutObjectRequest,
};
use super::Ds3Commands;
use crate::config::ConnectionDetails;
use crate::error::{Ds3Error, Result};
use crate::protocol::request::LockedChannel;
use crate::protocol::{
    xml, Ds3Request, HttpTransport, HttpVerb, MasterObjectList, NetworkClient, Node, RequestBody,
    SharedChannel, WebResponse,
};

/// Client for a DS3 endpoint
#[derive(Clone)]
pub struct Ds3Client {
    network: Arc<dyn NetworkClient>,
}

impl Ds3Client {
    /// Create a new client with its own connection pool
    pub fn new(details: ConnectionDetails) -> Result<Self> {
        Ok(Self::with_network(Arc::new(HttpTransport::new(details)?)))
    }

    /// Create a client on top of an existing transport
    pub fn with_network(network: Arc<dyn NetworkClient>) -> Self {
        Self { network }
    }

    pub fn connection_details(&self) -> &ConnectionDetails {
        self.network.connection_details()
    }

    /// Client addressed at a job's storage node
    pub fn new_for_node(&self, node: &Node) -> Result<Ds3Client> {
        Ok(Self::with_network(self.network.for_node(node)?))
    }

    async fn send(&self, request: Ds3Request, expected: &[u16]) -> Result<WebResponse> {
        let response = self.network.get_response(request).await?;
        check_status(response, expected).await
    }

    async fn master_object_list(&self, request: Ds3Request) -> Result<MasterObjectList> {
        let response = self.send(request, &[200]).await?;
        let body = response.text().await?;
        xml::parse_master_object_list(&body)
    }
}

fn object_path(bucket: &str, key: &str) -> String {
    format!("/{}/{}", bucket, key)
}

fn job_path(job_id: Uuid) -> String {
    format!("/_rest_/job/{}", job_id)
}

async fn check_status(response: WebResponse, expected: &[u16]) -> Result<WebResponse> {
    if expected.contains(&response.status()) {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(Ds3Error::FailedRequest { status, body })
}

fn retry_after(response: &WebResponse) -> Result<u64> {
    response
        .header("Retry-After")
        .and_then(|value| value.trim().parse().ok())
        .ok_or(Ds3Error::RetryAfterExpected)
}

/// Stream a response body into `channel` starting at `position`
///
/// Fails when a declared Content-Length disagrees with the bytes received.
pub(crate) async fn write_body(
    mut body: BoxStream<'static, Result<Bytes>>,
    channel: &SharedChannel,
    position: u64,
    content_length: Option<u64>,
    file_name: &str,
) -> Result<u64> {
    let mut locked = LockedChannel::lock(channel).await;
    let sink = locked.channel();
    sink.seek(SeekFrom::Start(position)).await?;

    let mut total_bytes = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        sink.write_all(&chunk).await?;
        total_bytes += chunk.len() as u64;
    }
    sink.flush().await?;

    if let Some(content_length) = content_length {
        if content_length != total_bytes {
            return Err(Ds3Error::ContentLengthMismatch {
                file_name: file_name.to_string(),
                content_length,
                total_bytes,
            });
        }
    }
    Ok(total_bytes)
}

#[async_trait]
impl Ds3Commands for Ds3Client {
    async fn bulk_put(&self, request: BulkPutRequest) -> Result<MasterObjectList> {
        let payload = xml::bulk_request_body(&request.objects, true)?;
        let mut ds3_request = Ds3Request::new(
            HttpVerb::Put,
            format!("/_rest_/bucket/{}", request.bucket),
        )
        .with_query("operation", "start_bulk_put")
        .with_body(RequestBody::Bytes(Bytes::from(payload)));

        if let Some(priority) = request.priority {
            ds3_request = ds3_request.with_query("priority", priority.as_str());
        }
        if let Some(optimization) = request.write_optimization {
            ds3_request = ds3_request.with_query("write_optimization", optimization.as_str());
        }
        if let Some(size) = request.max_upload_size {
            ds3_request = ds3_request.with_query("max_upload_size", size);
        }

        let list = self.master_object_list(ds3_request).await?;
        info!("Created write job {} with {} chunk(s)", list.job_id, list.chunks.len());
        Ok(list)
    }

    async fn bulk_get(&self, request: BulkGetRequest) -> Result<MasterObjectList> {
        let payload = xml::bulk_request_body(&request.objects, false)?;
        let mut ds3_request = Ds3Request::new(
            HttpVerb::Put,
            format!("/_rest_/bucket/{}", request.bucket),
        )
        .with_query("operation", "start_bulk_get")
        .with_body(RequestBody::Bytes(Bytes::from(payload)));

        if let Some(priority) = request.priority {
            ds3_request = ds3_request.with_query("priority", priority.as_str());
        }
        if let Some(ordering) = request.chunk_ordering {
            ds3_request =
                ds3_request.with_query("chunk_client_processing_order_guarantee", ordering.as_str());
        }

        let list = self.master_object_list(ds3_request).await?;
        info!("Created read job {} with {} chunk(s)", list.job_id, list.chunks.len());
        Ok(list)
    }

    async fn allocate_job_chunk(&self, chunk_id: Uuid) -> Result<AllocateJobChunkResponse> {
        let request = Ds3Request::new(HttpVerb::Put, format!("/_rest_/job_chunk/{}", chunk_id))
            .with_query("operation", "allocate");
        let response = self.send(request, &[200, 503]).await?;

        if response.status() == 503 {
            return Ok(AllocateJobChunkResponse::RetryLater(retry_after(&response)?));
        }
        let body = response.text().await?;
        Ok(AllocateJobChunkResponse::Allocated(xml::parse_chunk(&body)?))
    }

    async fn get_available_job_chunks(&self, job_id: Uuid) -> Result<AvailableJobChunksResponse> {
        let request =
            Ds3Request::new(HttpVerb::Get, "/_rest_/job_chunk").with_query("job", job_id);
        let response = self.send(request, &[200]).await?;

        let retry = retry_after(&response);
        let list = xml::parse_master_object_list(&response.text().await?)?;
        if list.chunks.is_empty() {
            return Ok(AvailableJobChunksResponse::RetryLater(retry?));
        }
        Ok(AvailableJobChunksResponse::Available(list))
    }

    async fn get_job(&self, job_id: Uuid) -> Result<MasterObjectList> {
        self.master_object_list(Ds3Request::new(HttpVerb::Get, job_path(job_id)))
            .await
    }

    async fn get_jobs(&self) -> Result<Vec<MasterObjectList>> {
        let response = self
            .send(Ds3Request::new(HttpVerb::Get, "/_rest_/job"), &[200])
            .await?;
        xml::parse_jobs(&response.text().await?)
    }

    async fn modify_job(&self, job_id: Uuid) -> Result<MasterObjectList> {
        self.master_object_list(Ds3Request::new(HttpVerb::Put, job_path(job_id)))
            .await
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<()> {
        self.send(Ds3Request::new(HttpVerb::Delete, job_path(job_id)), &[204])
            .await?;
        info!("Cancelled job {}", job_id);
        Ok(())
    }

    async fn put_object(&self, request: PutObjectRequest) -> Result<()> {
        let mut ds3_request = Ds3Request::new(
            HttpVerb::Put,
            object_path(&request.bucket, &request.key),
        )
        .with_query("job", request.job_id)
        .with_query("offset", request.offset)
        .with_checksum(request.checksum, request.checksum_type)
        .with_body(RequestBody::Channel {
            channel: request.channel,
            start: request.offset,
            length: request.length,
        });

        for (key, value) in &request.metadata {
            ds3_request = ds3_request.with_metadata(key, value.as_str());
        }

        self.send(ds3_request, &[200]).await?;
        Ok(())
    }

    async fn get_object(&self, request: GetObjectRequest) -> Result<GetObjectResponse> {
        let position = request.write_position();
        let mut ds3_request = Ds3Request::new(
            HttpVerb::Get,
            object_path(&request.bucket, &request.key),
        )
        .with_query("job", request.job_id)
        .with_query("offset", request.offset);
        if let Some(range) = request.range {
            ds3_request = ds3_request.with_header("Range", range.header_value());
        }

        let response = self.send(ds3_request, &[200, 206]).await?;
        let metadata = response.metadata();
        let content_length = response.content_length();
        let bytes_written = write_body(
            response.into_stream(),
            &request.channel,
            position,
            content_length,
            &request.key,
        )
        .await?;

        debug!("Read {} bytes of {} at {}", bytes_written, request.key, position);
        Ok(GetObjectResponse {
            metadata,
            content_length,
            bytes_written,
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<HeadObjectResponse> {
        let response = self
            .send(Ds3Request::new(HttpVerb::Head, object_path(bucket, key)), &[200])
            .await?;
        Ok(HeadObjectResponse {
            size: response.content_length(),
            etag: response.header("ETag").map(|s| s.trim_matches('"').to_string()),
            metadata: response.metadata(),
        })
    }

    fn for_node(&self, node: &Node) -> Result<Arc<dyn Ds3Commands>> {
        Ok(Arc::new(self.new_for_node(node)?))
    }
}
