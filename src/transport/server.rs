//! Replica-side server for the remote-procedure interface.
//!
//! The server accepts TCP connections and answers each request frame with
//! exactly one response frame. Connections are handled concurrently, but
//! calls into the [`ComputeService`] are bounded by a fixed-size worker
//! pool so a burst of requests cannot spawn an unbounded number of
//! external processes.
//!
//! A connection that sends an undecodable frame is closed; other
//! connections are unaffected.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::RunRequest;
use super::tcp::frame_codec;
use crate::compute::ComputeService;

/// TCP server exposing a [`ComputeService`] to dispatchers.
///
/// # Example
///
/// ```no_run
/// use tokio_util::sync::CancellationToken;
/// use dfsfleet::compute::ProcessAdapter;
/// use dfsfleet::config::ComputeConfig;
/// use dfsfleet::transport::ComputeServer;
///
/// # async fn example() -> anyhow::Result<()> {
/// let adapter = ProcessAdapter::new(ComputeConfig::default());
/// let server = ComputeServer::bind("0.0.0.0:50051", adapter, 10).await?;
/// server.serve(CancellationToken::new()).await?;
/// # Ok(())
/// # }
/// ```
pub struct ComputeServer<S> {
    listener: TcpListener,
    service: Arc<S>,
    workers: Arc<Semaphore>,
}

impl<S: ComputeService + 'static> ComputeServer<S> {
    /// Binds a server to `addr`.
    ///
    /// # Arguments
    ///
    /// * `addr` - Listen address, e.g. `"0.0.0.0:50051"` (port 0 picks a free port)
    /// * `service` - The compute service answering requests
    /// * `max_workers` - Maximum number of requests executing at once
    pub async fn bind(addr: &str, service: S, max_workers: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;

        Ok(Self {
            listener,
            service: Arc::new(service),
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
        })
    }

    /// Returns the address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read local address")
    }

    /// Accepts connections until `shutdown` is cancelled.
    ///
    /// Requests already executing when shutdown is requested run to
    /// completion on their own tasks.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        info!("Listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    debug!("Connection established from {}", peer);

                    let service = self.service.clone();
                    let workers = self.workers.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, service, workers).await {
                            warn!("Connection from {} closed: {:#}", peer, e);
                        }
                    });
                }
            }
        }
    }
}

/// Serves request frames on one connection until the peer hangs up.
async fn handle_connection<S: ComputeService>(
    stream: TcpStream,
    service: Arc<S>,
    workers: Arc<Semaphore>,
) -> Result<()> {
    let mut framed = Framed::new(stream, frame_codec());

    while let Some(frame) = framed.next().await {
        let frame = frame.context("Failed to read request frame")?;
        let request: RunRequest =
            serde_json::from_slice(&frame).context("Failed to decode request")?;

        let response = {
            let _permit = workers
                .acquire()
                .await
                .context("Worker pool closed")?;
            service.run(request).await
        };

        let payload = serde_json::to_vec(&response).context("Failed to encode response")?;
        framed
            .send(Bytes::from(payload))
            .await
            .context("Failed to send response")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::dispatch::Endpoint;
    use crate::transport::{RunResponse, TcpTransport, Transport};

    /// Echoes the request fields back and tracks peak concurrency.
    #[derive(Default)]
    struct EchoService {
        active: AtomicUsize,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ComputeService for EchoService {
        async fn run(&self, request: RunRequest) -> RunResponse {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            RunResponse {
                found: request.use_distributed_hint,
                visited_count: request.vertex_count,
                runtime_ms: request.target_vertex as f64,
                ..Default::default()
            }
        }
    }

    async fn start(service: EchoService, workers: usize) -> (Endpoint, CancellationToken) {
        let server = ComputeServer::bind("127.0.0.1:0", service, workers)
            .await
            .unwrap();
        let endpoint: Endpoint = server.local_addr().unwrap().to_string().parse().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.serve(shutdown.clone()));
        (endpoint, shutdown)
    }

    #[tokio::test]
    async fn test_round_trip_through_server() {
        let (endpoint, shutdown) = start(EchoService::default(), 4).await;

        let request = RunRequest {
            target_vertex: 7,
            vertex_count: 100,
            use_distributed_hint: true,
        };
        let response = TcpTransport::new()
            .call(&endpoint, &request, Duration::from_secs(2))
            .await
            .unwrap();

        assert!(response.found);
        assert_eq!(response.visited_count, 100);
        assert_eq!(response.runtime_ms, 7.0);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrency() {
        let peak = Arc::new(AtomicUsize::new(0));
        let service = EchoService {
            active: AtomicUsize::new(0),
            peak: peak.clone(),
        };
        let (endpoint, shutdown) = start(service, 1).await;

        let calls = (0..4).map(|_| {
            let endpoint = endpoint.clone();
            async move {
                TcpTransport::new()
                    .call(&endpoint, &RunRequest::default(), Duration::from_secs(5))
                    .await
            }
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_malformed_frame_only_closes_that_connection() {
        let (endpoint, shutdown) = start(EchoService::default(), 2).await;

        let mut bad = TcpStream::connect(endpoint.as_str()).await.unwrap();
        let body = b"{not json";
        bad.write_all(&(body.len() as u32).to_be_bytes()).await.unwrap();
        bad.write_all(body).await.unwrap();

        let response = TcpTransport::new()
            .call(&endpoint, &RunRequest::default(), Duration::from_secs(2))
            .await;
        assert!(response.is_ok());
        shutdown.cancel();
    }
}
