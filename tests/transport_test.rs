/*!
 * Transport integration tests against a local mock DS3 endpoint
 *
 * The mock server records every request it receives so the tests can
 * inspect signing headers, checksums and redirect handling end to end.
 */

use axum::body::to_bytes;
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use ds3_client::commands::{
    AllocateJobChunkResponse, AvailableJobChunksResponse, BulkPutRequest, Ds3Client, Ds3Commands,
};
use ds3_client::config::{ConnectionDetails, ConnectionDetailsBuilder, Credentials};
use ds3_client::protocol::{
    shared_channel, ChecksumType, Ds3Object, Ds3Request, HttpTransport, HttpVerb, NetworkClient,
    RequestBody, RequestChecksum, RequestType,
};
use ds3_client::Ds3Error;

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
}

#[derive(Clone, Default)]
struct MockState {
    requests: Arc<Mutex<Vec<Recorded>>>,
    hits: Arc<AtomicUsize>,
}

impl MockState {
    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a server answering every request with `respond(hit_number)`
async fn start_server<F>(respond: F) -> (String, MockState)
where
    F: Fn(usize) -> Response + Clone + Send + Sync + 'static,
{
    let state = MockState::default();
    let recorder = state.clone();

    let app = Router::new().fallback(move |request: Request| {
        let state = recorder.clone();
        let respond = respond.clone();
        async move {
            let (parts, body) = request.into_parts();
            let body = to_bytes(body, usize::MAX).await.unwrap();
            state.requests.lock().unwrap().push(Recorded {
                method: parts.method.to_string(),
                uri: parts.uri.to_string(),
                headers: parts.headers,
                body,
            });
            let hit = state.hits.fetch_add(1, Ordering::SeqCst);
            respond(hit)
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr.to_string(), state)
}

fn credentials() -> Credentials {
    Credentials::new("client-id", "secret-key")
}

#[tokio::test]
async fn test_requests_are_signed() {
    let (endpoint, state) = start_server(|_| (StatusCode::OK, "ok").into_response()).await;
    let transport = HttpTransport::new(ConnectionDetails::new(&endpoint, credentials())).unwrap();

    let response = transport
        .get_response(Ds3Request::new(HttpVerb::Get, "/bucket/object.txt"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");

    let requests = state.requests();
    assert_eq!(requests.len(), 1);
    let headers = &requests[0].headers;
    assert_eq!(requests[0].method, "GET");
    assert_eq!(headers["host"], endpoint.as_str());
    assert!(headers.contains_key("date"));
    assert_eq!(headers["naming-convention"], "s3");
    assert!(headers["authorization"]
        .to_str()
        .unwrap()
        .starts_with("AWS client-id:"));
}

#[tokio::test]
async fn test_redirects_followed_up_to_retry_limit() {
    // Two redirects, then success
    let (endpoint, state) = start_server(|hit| {
        if hit < 2 {
            StatusCode::TEMPORARY_REDIRECT.into_response()
        } else {
            (StatusCode::OK, "done").into_response()
        }
    })
    .await;
    let details = ConnectionDetailsBuilder::new(&endpoint, credentials())
        .retries(2)
        .build()
        .unwrap();
    let transport = HttpTransport::new(details).unwrap();

    let response = transport
        .get_response(Ds3Request::new(HttpVerb::Get, "/bucket/object.txt"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(state.requests().len(), 3);
}

#[tokio::test]
async fn test_too_many_redirects() {
    let (endpoint, state) =
        start_server(|_| StatusCode::TEMPORARY_REDIRECT.into_response()).await;
    let details = ConnectionDetailsBuilder::new(&endpoint, credentials())
        .retries(2)
        .build()
        .unwrap();
    let transport = HttpTransport::new(details).unwrap();

    let err = transport
        .get_response(Ds3Request::new(HttpVerb::Get, "/bucket/object.txt"))
        .await
        .unwrap_err();
    assert!(matches!(err, Ds3Error::TooManyRedirects(2)), "got {err}");
    assert_eq!(state.requests().len(), 3);
}

#[tokio::test]
async fn test_channel_body_resent_after_redirect() {
    let (endpoint, state) = start_server(|hit| {
        if hit == 0 {
            StatusCode::TEMPORARY_REDIRECT.into_response()
        } else {
            StatusCode::OK.into_response()
        }
    })
    .await;
    let transport = HttpTransport::new(ConnectionDetails::new(&endpoint, credentials())).unwrap();

    let channel = shared_channel(Cursor::new(b"hello world".to_vec()));
    let request = Ds3Request::new(HttpVerb::Put, "/bucket/object.txt")
        .with_body(RequestBody::Channel {
            channel,
            start: 2,
            length: 5,
        })
        .with_checksum(RequestChecksum::Compute, ChecksumType::Sha256);
    transport.get_response(request).await.unwrap();

    let expected = STANDARD.encode(Sha256::digest(b"llo w"));
    let requests = state.requests();
    assert_eq!(requests.len(), 2);
    for recorded in &requests {
        assert_eq!(recorded.body.as_ref(), b"llo w");
        assert_eq!(recorded.headers["content-length"], "5");
        assert_eq!(recorded.headers["content-sha256"], expected.as_str());
    }
}

#[tokio::test]
async fn test_stream_body_requires_rewind() {
    let (endpoint, state) = start_server(|_| StatusCode::OK.into_response()).await;
    let transport = HttpTransport::new(ConnectionDetails::new(&endpoint, credentials())).unwrap();

    let request = Ds3Request::new(HttpVerb::Put, "/bucket/object.txt").with_body(
        RequestBody::Stream {
            reader: Box::new(Cursor::new(b"data".to_vec())),
            length: 4,
        },
    );
    // Spawned so the request future has to be Send
    let err = tokio::spawn(async move { transport.get_response(request).await })
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, Ds3Error::RequiresRewind));
    assert!(state.requests().is_empty());
}

#[tokio::test]
async fn test_redirect_before_body_is_read() {
    let hits = Arc::new(AtomicUsize::new(0));
    let received = Arc::new(Mutex::new(Vec::new()));
    let (counter, sink) = (hits.clone(), received.clone());

    // The first answer goes out without touching the request body
    let app = Router::new().fallback(move |request: Request| {
        let counter = counter.clone();
        let sink = sink.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return StatusCode::TEMPORARY_REDIRECT.into_response();
            }
            let body = to_bytes(request.into_body(), usize::MAX).await.unwrap();
            sink.lock().unwrap().push(body);
            StatusCode::OK.into_response()
        }
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let details = ConnectionDetailsBuilder::new(&endpoint, credentials())
        .buffer_size(1024)
        .build()
        .unwrap();
    let transport = HttpTransport::new(details).unwrap();
    let data: Vec<u8> = (0..8 * 1024).map(|i| (i % 251) as u8).collect();
    let request = Ds3Request::new(HttpVerb::Put, "/bucket/object.bin").with_body(
        RequestBody::Channel {
            channel: shared_channel(Cursor::new(data.clone())),
            start: 0,
            length: data.len() as u64,
        },
    );

    let response = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        transport.get_response(request),
    )
    .await
    .expect("resend blocked after redirect")
    .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(received.lock().unwrap()[0].as_ref(), data.as_slice());
}

const BULK_PUT_RESPONSE: &str = r#"<MasterObjectList BucketName="bucket" JobId="1a85e743-ec8f-4789-afec-97e587a26936" Priority="NORMAL" RequestType="PUT" StartDate="2014-07-01T20:12:52.000Z"><Nodes><Node EndPoint="10.0.0.1" HttpPort="80" Id="a02053b9-0147-11e4-8d6a-002590c1177c"/></Nodes><Objects ChunkId="f58370c2-2538-4e78-a9f8-e4d2676bdf44" ChunkNumber="0" NodeId="a02053b9-0147-11e4-8d6a-002590c1177c"><Object Name="file1" InCache="false" Length="10" Offset="0"/><Object Name="file2" InCache="true" Length="4" Offset="0"/></Objects></MasterObjectList>"#;

#[tokio::test]
async fn test_bulk_put_command() {
    let (endpoint, state) =
        start_server(|_| (StatusCode::OK, BULK_PUT_RESPONSE).into_response()).await;
    let client = Ds3Client::new(ConnectionDetails::new(&endpoint, credentials())).unwrap();

    let list = client
        .bulk_put(
            BulkPutRequest::new(
                "bucket",
                vec![
                    Ds3Object::with_size("file1", 10),
                    Ds3Object::with_size("file2", 4),
                ],
            )
            .with_max_upload_size(Some(1024)),
        )
        .await
        .unwrap();

    assert_eq!(list.request_type, RequestType::Put);
    assert_eq!(list.chunks.len(), 1);
    assert_eq!(list.chunks[0].objects.len(), 2);
    assert!(list.chunks[0].objects[1].in_cache);

    let requests = state.requests();
    assert_eq!(requests[0].method, "PUT");
    assert!(requests[0].uri.starts_with("/_rest_/bucket/bucket?"));
    assert!(requests[0].uri.contains("operation=start_bulk_put"));
    assert!(requests[0].uri.contains("max_upload_size=1024"));
    let body = String::from_utf8(requests[0].body.to_vec()).unwrap();
    assert!(body.contains(r#"Name="file1""#));
    assert!(body.contains(r#"Size="10""#));
}

#[tokio::test]
async fn test_failed_request_carries_status() {
    let (endpoint, _state) =
        start_server(|_| (StatusCode::NOT_FOUND, "no such job").into_response()).await;
    let client = Ds3Client::new(ConnectionDetails::new(&endpoint, credentials())).unwrap();

    let err = client.get_job(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.status_code(), Some(404));
    match err {
        Ds3Error::FailedRequest { body, .. } => assert_eq!(body, "no such job"),
        other => panic!("unexpected error: {other}"),
    }
}

const CHUNK_RESPONSE: &str = r#"<Objects ChunkId="203f6886-b058-4f7c-a012-8779176453b1" ChunkNumber="3" NodeId="a02053b9-0147-11e4-8d6a-002590c1177c"><Object Name="file1" InCache="false" Length="10" Offset="0"/></Objects>"#;

const NO_CHUNKS_RESPONSE: &str = r#"<MasterObjectList BucketName="bucket" JobId="1a85e743-ec8f-4789-afec-97e587a26936" RequestType="GET"><Nodes/></MasterObjectList>"#;

async fn client_for<F>(respond: F) -> (Ds3Client, MockState)
where
    F: Fn(usize) -> Response + Clone + Send + Sync + 'static,
{
    let (endpoint, state) = start_server(respond).await;
    let client = Ds3Client::new(ConnectionDetails::new(&endpoint, credentials())).unwrap();
    (client, state)
}

#[tokio::test]
async fn test_allocate_chunk_replies() {
    let (client, state) = client_for(|hit| match hit {
        0 => (StatusCode::SERVICE_UNAVAILABLE, [("Retry-After", "5")]).into_response(),
        1 => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        _ => (StatusCode::OK, CHUNK_RESPONSE).into_response(),
    })
    .await;
    let chunk_id = Uuid::new_v4();

    let first = client.allocate_job_chunk(chunk_id).await.unwrap();
    assert_eq!(first, AllocateJobChunkResponse::RetryLater(5));

    let err = client.allocate_job_chunk(chunk_id).await.unwrap_err();
    assert!(matches!(err, Ds3Error::RetryAfterExpected), "got {err}");

    match client.allocate_job_chunk(chunk_id).await.unwrap() {
        AllocateJobChunkResponse::Allocated(chunk) => {
            assert_eq!(chunk.chunk_number, 3);
            assert_eq!(chunk.objects[0].name, "file1");
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    let requests = state.requests();
    assert_eq!(requests[0].method, "PUT");
    assert_eq!(
        requests[0].uri,
        format!("/_rest_/job_chunk/{}?operation=allocate", chunk_id)
    );
}

#[tokio::test]
async fn test_allocate_unexpected_status() {
    let (client, _state) =
        client_for(|_| (StatusCode::CONFLICT, "chunk gone").into_response()).await;
    let err = client.allocate_job_chunk(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.status_code(), Some(409));
}

#[tokio::test]
async fn test_available_chunks_replies() {
    let (client, state) = client_for(|hit| match hit {
        0 => (StatusCode::OK, [("Retry-After", "7")], NO_CHUNKS_RESPONSE).into_response(),
        1 => (StatusCode::OK, NO_CHUNKS_RESPONSE).into_response(),
        _ => (StatusCode::OK, BULK_PUT_RESPONSE).into_response(),
    })
    .await;
    let job_id = Uuid::new_v4();

    let first = client.get_available_job_chunks(job_id).await.unwrap();
    assert_eq!(first, AvailableJobChunksResponse::RetryLater(7));

    let err = client.get_available_job_chunks(job_id).await.unwrap_err();
    assert!(matches!(err, Ds3Error::RetryAfterExpected), "got {err}");

    match client.get_available_job_chunks(job_id).await.unwrap() {
        AvailableJobChunksResponse::Available(list) => assert_eq!(list.chunks.len(), 1),
        other => panic!("unexpected reply: {other:?}"),
    }

    let requests = state.requests();
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].uri, format!("/_rest_/job_chunk?job={}", job_id));
}
