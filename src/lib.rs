//! dfsfleet: fault-tolerant dispatch of graph-search requests to compute replicas.
//!
//! A streaming driver generates requests at a controlled rate and sends each
//! one to a fixed set of replicas, failing over in round-robin order when a
//! replica cannot be reached. Each replica runs an external search
//! executable per request and reports the metrics parsed from its output.
//!
//! # Architecture
//!
//! ```text
//!  RequestGenerator ──► FailoverDispatcher ──TCP──► ComputeServer ──► ProcessAdapter ──► executable
//!                              │                                            │
//!                              ▼                                            ▼
//!                   StatsAggregator, Recorders                    parse_metrics(stdout)
//! ```
//!
//! The main components are:
//!
//! - **Metrics**: Parse the executable's textual output ([`metrics`])
//! - **Compute**: Run one request as a child process ([`compute`])
//! - **Transport**: Length-delimited JSON over TCP, client and server ([`transport`])
//! - **Dispatch**: Round-robin failover across replicas ([`dispatch`])
//! - **Generator**: Rate-controlled event source ([`generator`])
//! - **Report / Stats**: CSV event log, console output, counters ([`report`], [`stats`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use dfsfleet::config::load_config;
//! use dfsfleet::dispatch::{FailoverDispatcher, ReplicaSet};
//! use dfsfleet::generator::RequestGenerator;
//! use dfsfleet::pipeline::Pipeline;
//! use dfsfleet::report::NullRecorder;
//! use dfsfleet::transport::TcpTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("dfsfleet.toml"))?;
//!     let replicas = ReplicaSet::from_addresses(&config.dispatch.replicas)?;
//!     let dispatcher = FailoverDispatcher::new(replicas, TcpTransport::new(), Duration::from_secs(3));
//!
//!     let pipeline = Pipeline::new(dispatcher, Arc::new(NullRecorder));
//!     let mut generator = RequestGenerator::new(10.0, Duration::from_secs(60));
//!     pipeline.run(&mut generator, &CancellationToken::new()).await;
//!     Ok(())
//! }
//! ```

pub mod compute;
pub mod config;
pub mod dispatch;
pub mod generator;
pub mod metrics;
pub mod pipeline;
pub mod report;
pub mod stats;
pub mod transport;

// Re-export commonly used types
pub use compute::{ComputeService, ProcessAdapter};
pub use config::{Config, load_config};
pub use dispatch::{DispatchResult, DispatchStatus, Endpoint, FailoverDispatcher, ReplicaSet};
pub use generator::{RequestEvent, RequestGenerator};
pub use metrics::{SearchMetrics, parse_metrics};
pub use pipeline::Pipeline;
pub use report::Recorder;
pub use stats::StatsAggregator;
pub use transport::{ComputeServer, RpcError, TcpTransport, Transport};
