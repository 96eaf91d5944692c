//! Rate-controlled request generation.
//!
//! [`RequestGenerator`] emits one [`RequestEvent`] every `1/R` seconds for a
//! bounded duration. After each emitted event it sleeps for whatever is
//! left of the interval: a slow iteration shortens or skips the next sleep
//! but never causes a burst of catch-up events.
//!
//! ```text
//!  IDLE ──run()──► RUNNING ──elapsed ≥ D or cancelled──► STOPPED
//!
//!  t=0      t=1/R     t=2/R          (slow emit)        t=k/R
//!   │ emit    │ emit    │ emit ──────────────────┐        │
//!   └─sleep───┴─sleep───┘                        └─emit───┴─ ...
//! ```
//!
//! An external source can feed the pipeline instead by supplying
//! [`EventStamp`] batches; see [`Pipeline::run_batches`](crate::pipeline::Pipeline::run_batches).

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Identity and creation time of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStamp {
    pub request_id: u64,
    pub event_timestamp: DateTime<Utc>,
}

/// One request to dispatch. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEvent {
    /// Zero-based sequence number; also selects the first replica probed.
    pub request_id: u64,
    pub event_timestamp: DateTime<Utc>,
    pub target_vertex: Option<u64>,
    pub vertex_count: Option<u64>,
}

impl RequestEvent {
    /// Creates an event stamped with the current time and no request fields.
    pub fn new(request_id: u64) -> Self {
        Self {
            request_id,
            event_timestamp: Utc::now(),
            target_vertex: None,
            vertex_count: None,
        }
    }

    pub fn with_request(mut self, target_vertex: Option<u64>, vertex_count: Option<u64>) -> Self {
        self.target_vertex = target_vertex;
        self.vertex_count = vertex_count;
        self
    }

    pub fn stamp(&self) -> EventStamp {
        EventStamp {
            request_id: self.request_id,
            event_timestamp: self.event_timestamp,
        }
    }
}

/// Request fields copied into every generated event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestTemplate {
    pub target_vertex: Option<u64>,
    pub vertex_count: Option<u64>,
}

impl RequestTemplate {
    pub fn new(target_vertex: Option<u64>, vertex_count: Option<u64>) -> Self {
        Self {
            target_vertex,
            vertex_count,
        }
    }

    /// Builds the event for an externally supplied stamp.
    pub fn event(&self, stamp: EventStamp) -> RequestEvent {
        RequestEvent {
            request_id: stamp.request_id,
            event_timestamp: stamp.event_timestamp,
            target_vertex: self.target_vertex,
            vertex_count: self.vertex_count,
        }
    }
}

/// Lifecycle of a [`RequestGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Idle,
    Running,
    Stopped,
}

/// Emits request events at a fixed rate for a bounded duration.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use dfsfleet::generator::RequestGenerator;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut generator = RequestGenerator::new(20.0, Duration::from_millis(200));
/// let emitted = generator
///     .run(&CancellationToken::new(), |event| async move {
///         println!("event #{}", event.request_id);
///     })
///     .await;
/// assert!(emitted <= 5);
/// # }
/// ```
#[derive(Debug)]
pub struct RequestGenerator {
    rate: f64,
    duration: Duration,
    template: RequestTemplate,
    state: GeneratorState,
}

impl RequestGenerator {
    /// Creates an idle generator emitting `rate` events per second for `duration`.
    pub fn new(rate: f64, duration: Duration) -> Self {
        Self {
            rate,
            duration,
            template: RequestTemplate::default(),
            state: GeneratorState::Idle,
        }
    }

    /// Raises the duration to `floor` if it is shorter.
    pub fn with_min_duration(mut self, floor: Duration) -> Self {
        if self.duration < floor {
            warn!(
                "Duration {}s is below the minimum, using {}s",
                self.duration.as_secs_f64(),
                floor.as_secs_f64()
            );
            self.duration = floor;
        }
        self
    }

    pub fn with_request_template(mut self, template: RequestTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn state(&self) -> GeneratorState {
        self.state
    }

    /// Target time between consecutive events.
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.rate).unwrap_or(Duration::MAX)
    }

    /// Number of events a full, unloaded run produces.
    pub fn expected_events(&self) -> u64 {
        (self.rate * self.duration.as_secs_f64()).round() as u64
    }

    /// Runs the generator, awaiting `emit` for each event in turn.
    ///
    /// Stops once the duration has elapsed or `cancel` fires. Cancellation
    /// is checked before each event; an `emit` already in progress is
    /// awaited to completion. Returns the number of events emitted.
    pub async fn run<F, Fut>(&mut self, cancel: &CancellationToken, mut emit: F) -> u64
    where
        F: FnMut(RequestEvent) -> Fut,
        Fut: Future<Output = ()>,
    {
        if !(self.rate.is_finite() && self.rate > 0.0) {
            warn!("Request rate {} is not positive, nothing to generate", self.rate);
            self.state = GeneratorState::Stopped;
            return 0;
        }

        self.state = GeneratorState::Running;
        let interval = self.interval();
        let started = Instant::now();
        let mut request_id = 0u64;

        info!(
            rate = self.rate,
            interval_ms = interval.as_millis() as u64,
            duration_secs = self.duration.as_secs_f64(),
            "Request generator running"
        );

        loop {
            if cancel.is_cancelled() {
                info!("Request generator cancelled after {} events", request_id);
                break;
            }
            if started.elapsed() >= self.duration {
                break;
            }

            let iteration = Instant::now();
            let event = self.template.event(EventStamp {
                request_id,
                event_timestamp: Utc::now(),
            });
            emit(event).await;
            request_id += 1;

            let remaining = interval.saturating_sub(iteration.elapsed());
            if remaining.is_zero() {
                debug!(request_id, "Iteration overran its interval, not sleeping");
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = cancel.cancelled() => {}
            }
        }

        self.state = GeneratorState::Stopped;
        request_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn test_emits_rate_times_duration() {
        let mut generator = RequestGenerator::new(10.0, Duration::from_secs(2));
        let ids = Arc::new(Mutex::new(Vec::new()));

        let sink = ids.clone();
        let emitted = generator
            .run(&CancellationToken::new(), move |event| {
                let sink = sink.clone();
                async move { sink.lock().unwrap().push(event.request_id) }
            })
            .await;

        assert!(emitted.abs_diff(generator.expected_events()) <= 1);
        assert_eq!(*ids.lock().unwrap(), (0..emitted).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_transitions() {
        let mut generator = RequestGenerator::new(5.0, Duration::from_secs(1));
        assert_eq!(generator.state(), GeneratorState::Idle);

        generator
            .run(&CancellationToken::new(), |_| async {})
            .await;

        assert_eq!(generator.state(), GeneratorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_emit_does_not_burst() {
        let mut generator = RequestGenerator::new(10.0, Duration::from_secs(1));
        let times = Arc::new(Mutex::new(Vec::new()));

        let sink = times.clone();
        let emitted = generator
            .run(&CancellationToken::new(), move |event| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(Instant::now());
                    if event.request_id == 0 {
                        tokio::time::sleep(Duration::from_millis(350)).await;
                    }
                }
            })
            .await;

        // 0.00, then 0.35, 0.45, ... 0.95 with no catch-up
        assert_eq!(emitted, 8);
        let times = times.lock().unwrap();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_generation() {
        let mut generator = RequestGenerator::new(10.0, Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let emitted = generator.run(&cancel, |_| async {}).await;

        assert!((5..=6).contains(&emitted), "emitted {}", emitted);
        assert_eq!(generator.state(), GeneratorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_emits_nothing() {
        let mut generator = RequestGenerator::new(10.0, Duration::from_secs(5));
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(generator.run(&cancel, |_| async {}).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_positive_rate_emits_nothing() {
        let mut generator = RequestGenerator::new(0.0, Duration::from_secs(5));
        assert_eq!(generator.run(&CancellationToken::new(), |_| async {}).await, 0);
        assert_eq!(generator.state(), GeneratorState::Stopped);
    }

    #[test]
    fn test_min_duration_only_raises() {
        let generator = RequestGenerator::new(1.0, Duration::from_secs(30))
            .with_min_duration(Duration::from_secs(60));
        assert_eq!(generator.duration(), Duration::from_secs(60));

        let generator = RequestGenerator::new(1.0, Duration::from_secs(90))
            .with_min_duration(Duration::from_secs(60));
        assert_eq!(generator.duration(), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_template_fields_are_copied() {
        let mut generator = RequestGenerator::new(10.0, Duration::from_millis(100))
            .with_request_template(RequestTemplate::new(Some(42000), Some(50000)));
        let events = Arc::new(Mutex::new(Vec::new()));

        let sink = events.clone();
        generator
            .run(&CancellationToken::new(), move |event| {
                let sink = sink.clone();
                async move { sink.lock().unwrap().push(event) }
            })
            .await;

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target_vertex, Some(42000));
        assert_eq!(events[0].vertex_count, Some(50000));
    }
}
