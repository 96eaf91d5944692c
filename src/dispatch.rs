//! Round-robin failover dispatch across a fixed replica set.
//!
//! One [`RequestEvent`] is sent to the replicas in a cyclic order that
//! starts at `request_id % N`. Each probe gets its own deadline; the first
//! probe that yields a response ends the dispatch with
//! [`DispatchStatus::Success`]. If all `N` probes fail at the transport
//! level the dispatch ends with [`DispatchStatus::Failed`] and the
//! [`DispatchTarget::AllReplicas`] sentinel.
//!
//! ```text
//! request_id = 5, N = 3        start = 5 % 3 = 2
//!
//!   attempt 1 ─► replica[2]  ✗ UNAVAILABLE
//!   attempt 2 ─► replica[0]  ✓ response      ─► SUCCESS, attempt_number = 2
//!   (replica[1] never probed)
//! ```
//!
//! A response whose computation failed (non-zero exit, timeout, launch
//! failure) still ends the dispatch successfully; only transport errors
//! cause failover.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::generator::RequestEvent;
use crate::report::{NullRecorder, Recorder};
use crate::stats::StatsAggregator;
use crate::transport::{RpcError, RunRequest, RunResponse, Transport};

/// Endpoint string recorded when every replica failed.
pub const ALL_REPLICAS: &str = "ALL_REPLICAS";

/// Errors building a replica set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("replica set is empty")]
    EmptyReplicaSet,

    #[error("invalid endpoint '{0}': expected host:port")]
    InvalidEndpoint(String),
}

/// Network address of one replica, in `host:port` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Endpoint {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let valid = match s.rsplit_once(':') {
            Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
            None => false,
        };
        if !valid {
            return Err(DispatchError::InvalidEndpoint(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered, non-empty set of replicas, fixed for the life of a run.
#[derive(Debug, Clone)]
pub struct ReplicaSet {
    endpoints: Vec<Endpoint>,
}

impl ReplicaSet {
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, DispatchError> {
        if endpoints.is_empty() {
            return Err(DispatchError::EmptyReplicaSet);
        }
        Ok(Self { endpoints })
    }

    /// Parses a list of `host:port` strings.
    pub fn from_addresses<S: AsRef<str>>(addresses: &[S]) -> Result<Self, DispatchError> {
        let endpoints = addresses
            .iter()
            .map(|a| a.as_ref().parse())
            .collect::<Result<Vec<Endpoint>, _>>()?;
        Self::new(endpoints)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Yields `(attempt_number, endpoint)` pairs in probe order for
    /// `request_id`: every replica exactly once, starting at
    /// `request_id % len`, attempt numbers counting from 1.
    pub fn probe_order(&self, request_id: u64) -> impl Iterator<Item = (usize, &Endpoint)> + '_ {
        let n = self.endpoints.len();
        let start = (request_id % n as u64) as usize;
        (0..n).map(move |offset| (offset + 1, &self.endpoints[(start + offset) % n]))
    }
}

/// Terminal status of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    Success,
    Failed,
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchStatus::Success => f.write_str("SUCCESS"),
            DispatchStatus::Failed => f.write_str("FAILED"),
        }
    }
}

/// Where a dispatch ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchTarget {
    /// The replica that answered.
    Replica(Endpoint),
    /// Every replica failed.
    AllReplicas,
}

impl fmt::Display for DispatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchTarget::Replica(endpoint) => endpoint.fmt(f),
            DispatchTarget::AllReplicas => f.write_str(ALL_REPLICAS),
        }
    }
}

impl Serialize for DispatchTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failed { code: String, message: String },
}

impl From<&RpcError> for AttemptOutcome {
    fn from(err: &RpcError) -> Self {
        AttemptOutcome::Failed {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// One probe within a dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub request_id: u64,
    pub endpoint: Endpoint,
    pub attempt_number: usize,
    pub latency_ms: f64,
    pub outcome: AttemptOutcome,
}

/// Terminal record of one dispatch. Exactly one is produced per event.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub request_id: u64,
    pub event_timestamp: DateTime<Utc>,
    /// Wall-clock time at which the terminal outcome was known.
    pub processing_timestamp: DateTime<Utc>,
    pub target: DispatchTarget,
    /// 1-based position of the final probe; equals the replica count on failure.
    pub attempt_number: usize,
    pub status: DispatchStatus,
    /// Latency of the successful probe; 0.0 on failure.
    pub latency_ms: f64,
    /// Time from dispatch start to the terminal outcome.
    pub total_latency_ms: f64,
    pub response: Option<RunResponse>,
    pub error_message: Option<String>,
    pub attempts: Vec<AttemptRecord>,
}

impl DispatchResult {
    pub fn is_success(&self) -> bool {
        self.status == DispatchStatus::Success
    }

    /// Number of failed probes that preceded the terminal outcome.
    pub fn failed_attempts(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| matches!(a.outcome, AttemptOutcome::Failed { .. }))
            .count()
    }
}

/// Sends requests across a [`ReplicaSet`] with round-robin failover.
///
/// The dispatcher is reentrant: statistics are atomic and the recorder
/// serializes its own writes, so one instance can be shared across
/// concurrent dispatches.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use dfsfleet::dispatch::{FailoverDispatcher, ReplicaSet};
/// use dfsfleet::generator::RequestEvent;
/// use dfsfleet::transport::TcpTransport;
///
/// # async fn example() -> anyhow::Result<()> {
/// let replicas = ReplicaSet::from_addresses(&["localhost:50051", "localhost:50052"])?;
/// let dispatcher = FailoverDispatcher::new(replicas, TcpTransport::new(), Duration::from_secs(3));
///
/// let result = dispatcher.dispatch(&RequestEvent::new(0)).await;
/// println!("{} via {}", result.status, result.target);
/// # Ok(())
/// # }
/// ```
pub struct FailoverDispatcher<T> {
    replicas: ReplicaSet,
    transport: T,
    per_call_timeout: Duration,
    use_distributed_hint: bool,
    stats: Arc<StatsAggregator>,
    recorder: Arc<dyn Recorder>,
}

impl<T: Transport> FailoverDispatcher<T> {
    pub fn new(replicas: ReplicaSet, transport: T, per_call_timeout: Duration) -> Self {
        Self {
            replicas,
            transport,
            per_call_timeout,
            use_distributed_hint: true,
            stats: Arc::new(StatsAggregator::new()),
            recorder: Arc::new(NullRecorder),
        }
    }

    /// Shares `stats` with the dispatcher; counters are updated per dispatch.
    pub fn with_stats(mut self, stats: Arc<StatsAggregator>) -> Self {
        self.stats = stats;
        self
    }

    /// Sets the sink receiving every terminal result.
    pub fn with_recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_distributed_hint(mut self, hint: bool) -> Self {
        self.use_distributed_hint = hint;
        self
    }

    pub fn replicas(&self) -> &ReplicaSet {
        &self.replicas
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    /// Builds the wire request for `event`; absent fields become 0.
    pub fn request_for(&self, event: &RequestEvent) -> RunRequest {
        RunRequest {
            target_vertex: event.target_vertex.unwrap_or(0),
            vertex_count: event.vertex_count.unwrap_or(0),
            use_distributed_hint: self.use_distributed_hint,
        }
    }

    /// Dispatches `event` to completion and returns its terminal result.
    ///
    /// Never fails: exhausting every replica is reported as a
    /// [`DispatchStatus::Failed`] result. The result has already been
    /// counted and handed to the recorder when this returns.
    pub async fn dispatch(&self, event: &RequestEvent) -> DispatchResult {
        let started = Instant::now();
        self.stats.record_issued();

        let request = self.request_for(event);
        let mut attempts = Vec::with_capacity(self.replicas.len());
        let mut last_error: Option<RpcError> = None;

        for (attempt_number, endpoint) in self.replicas.probe_order(event.request_id) {
            let probe_started = Instant::now();
            let outcome = self
                .transport
                .call(endpoint, &request, self.per_call_timeout)
                .await;
            let latency_ms = millis(probe_started.elapsed());

            match outcome {
                Ok(response) => {
                    attempts.push(AttemptRecord {
                        request_id: event.request_id,
                        endpoint: endpoint.clone(),
                        attempt_number,
                        latency_ms,
                        outcome: AttemptOutcome::Success,
                    });

                    if let Some(remote) = response.remote_error() {
                        warn!(
                            request_id = event.request_id,
                            endpoint = %endpoint,
                            "Replica answered but the computation failed: {}",
                            remote
                        );
                    }

                    let result = DispatchResult {
                        request_id: event.request_id,
                        event_timestamp: event.event_timestamp,
                        processing_timestamp: Utc::now(),
                        target: DispatchTarget::Replica(endpoint.clone()),
                        attempt_number,
                        status: DispatchStatus::Success,
                        latency_ms,
                        total_latency_ms: millis(started.elapsed()),
                        response: Some(response),
                        error_message: None,
                        attempts,
                    };
                    return self.finish(result).await;
                }
                Err(err) => {
                    warn!(
                        request_id = event.request_id,
                        endpoint = %endpoint,
                        attempt = attempt_number,
                        code = err.code(),
                        "Probe failed: {}",
                        err
                    );
                    attempts.push(AttemptRecord {
                        request_id: event.request_id,
                        endpoint: endpoint.clone(),
                        attempt_number,
                        latency_ms,
                        outcome: AttemptOutcome::from(&err),
                    });
                    last_error = Some(err);
                }
            }
        }

        let error_message = last_error.map(|err| format!("{}: {}", err.code(), err));
        warn!(
            request_id = event.request_id,
            "All {} replicas failed",
            self.replicas.len()
        );

        let result = DispatchResult {
            request_id: event.request_id,
            event_timestamp: event.event_timestamp,
            processing_timestamp: Utc::now(),
            target: DispatchTarget::AllReplicas,
            attempt_number: self.replicas.len(),
            status: DispatchStatus::Failed,
            latency_ms: 0.0,
            total_latency_ms: millis(started.elapsed()),
            response: None,
            error_message,
            attempts,
        };
        self.finish(result).await
    }

    async fn finish(&self, result: DispatchResult) -> DispatchResult {
        self.stats.record_outcome(result.status);

        debug!(
            request_id = result.request_id,
            status = %result.status,
            target = %result.target,
            attempts = ?result.attempts,
            "Dispatch complete"
        );

        self.recorder.on_result(&result).await;
        result
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
