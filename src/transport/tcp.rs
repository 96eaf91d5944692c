//! TCP client transport.
//!
//! Every call opens a fresh connection, writes one request frame, reads one
//! response frame and closes. The whole exchange, connect included, runs
//! under the caller's deadline, so a stalled replica costs at most one
//! deadline per probe.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

use super::{MAX_FRAME_LENGTH, RpcError, RpcResult, RunRequest, RunResponse, Transport};
use crate::dispatch::Endpoint;

/// Builds the frame codec shared by client and server.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Transport that talks to replicas over plain TCP.
///
/// Stateless: no connections are pooled between calls.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use dfsfleet::dispatch::Endpoint;
/// use dfsfleet::transport::{RunRequest, TcpTransport, Transport};
///
/// # async fn example() -> anyhow::Result<()> {
/// let transport = TcpTransport::new();
/// let endpoint: Endpoint = "localhost:50051".parse()?;
/// let response = transport
///     .call(&endpoint, &RunRequest::default(), Duration::from_secs(3))
///     .await?;
/// println!("visited {} vertices", response.visited_count);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn call(
        &self,
        endpoint: &Endpoint,
        request: &RunRequest,
        deadline: Duration,
    ) -> RpcResult<RunResponse> {
        tokio::time::timeout(deadline, exchange(endpoint, request))
            .await
            .map_err(|_| RpcError::DeadlineExceeded(deadline))?
    }
}

async fn exchange(endpoint: &Endpoint, request: &RunRequest) -> RpcResult<RunResponse> {
    let stream = TcpStream::connect(endpoint.as_str())
        .await
        .map_err(|e| RpcError::Unavailable(format!("{}: {}", endpoint, e)))?;
    let _ = stream.set_nodelay(true);

    let mut framed = Framed::new(stream, frame_codec());

    let payload = serde_json::to_vec(request)
        .map_err(|e| RpcError::Protocol(format!("encoding request: {}", e)))?;
    framed
        .send(Bytes::from(payload))
        .await
        .map_err(|e| RpcError::Unavailable(format!("sending to {}: {}", endpoint, e)))?;

    debug!("Request sent to {}", endpoint);

    let frame = match framed.next().await {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => {
            return Err(RpcError::Unavailable(format!(
                "reading from {}: {}",
                endpoint, e
            )));
        }
        None => {
            return Err(RpcError::Unavailable(format!(
                "{} closed the connection without responding",
                endpoint
            )));
        }
    };

    serde_json::from_slice(&frame)
        .map_err(|e| RpcError::Protocol(format!("invalid response from {}: {}", endpoint, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn closed_endpoint() -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string().parse().unwrap()
    }

    #[tokio::test]
    async fn test_refused_connection_is_unavailable() {
        let endpoint = closed_endpoint().await;
        let err = TcpTransport::new()
            .call(&endpoint, &RunRequest::default(), Duration::from_secs(2))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_silent_replica_hits_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint: Endpoint = listener.local_addr().unwrap().to_string().parse().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            // Read the request but never answer.
            let _ = socket.read(&mut buf).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let deadline = Duration::from_millis(200);
        let err = TcpTransport::new()
            .call(&endpoint, &RunRequest::default(), deadline)
            .await
            .unwrap_err();

        assert_eq!(err, RpcError::DeadlineExceeded(deadline));
        server.abort();
    }

    #[tokio::test]
    async fn test_garbage_response_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint: Endpoint = listener.local_addr().unwrap().to_string().parse().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = socket.read(&mut buf).await;
            let body = b"not json";
            socket
                .write_all(&(body.len() as u32).to_be_bytes())
                .await
                .unwrap();
            socket.write_all(body).await.unwrap();
        });

        let err = TcpTransport::new()
            .call(&endpoint, &RunRequest::default(), Duration::from_secs(2))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "PROTOCOL");
    }
}
