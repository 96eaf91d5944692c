//! Wires event sources to the dispatcher and recorders.
//!
//! ```text
//!  RequestGenerator ─┐                                 ┌─► CsvRecorder
//!                    ├─► FailoverDispatcher ─► Recorder ┤
//!  EventStamp batches┘          │                      └─► ConsoleRecorder
//!                               ▼
//!                        StatsAggregator ──every K results──► on_progress
//! ```
//!
//! With `max_in_flight == 1` every event is dispatched to completion before
//! the next one is generated, so the achieved rate falls below the target
//! when replicas are slow or failing. A larger limit dispatches events on
//! spawned tasks; the generator waits for a free slot once the limit is
//! reached.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{Stream, StreamExt};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::dispatch::FailoverDispatcher;
use crate::generator::{EventStamp, RequestEvent, RequestGenerator, RequestTemplate};
use crate::report::{Recorder, RunSummary};
use crate::stats::StatsAggregator;
use crate::transport::Transport;

struct Shared<T> {
    dispatcher: FailoverDispatcher<T>,
    recorder: Arc<dyn Recorder>,
    stats: Arc<StatsAggregator>,
    completed: AtomicU64,
}

impl<T: Transport> Shared<T> {
    async fn process(&self, event: RequestEvent, report_every: u64) {
        self.dispatcher.dispatch(&event).await;

        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if report_every > 0 && done % report_every == 0 {
            self.recorder.on_progress(&self.stats.snapshot()).await;
        }
    }
}

/// A streaming run: event source, dispatcher, statistics and recorders.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use dfsfleet::dispatch::{FailoverDispatcher, ReplicaSet};
/// use dfsfleet::generator::RequestGenerator;
/// use dfsfleet::pipeline::Pipeline;
/// use dfsfleet::report::CsvRecorder;
/// use dfsfleet::transport::TcpTransport;
///
/// # async fn example() -> anyhow::Result<()> {
/// let replicas = ReplicaSet::from_addresses(&["localhost:50051", "localhost:50052"])?;
/// let dispatcher = FailoverDispatcher::new(replicas, TcpTransport::new(), Duration::from_secs(3));
/// let recorder = Arc::new(CsvRecorder::create("streaming_events.csv".as_ref())?);
///
/// let pipeline = Pipeline::new(dispatcher, recorder).with_report_every(20);
/// let mut generator = RequestGenerator::new(10.0, Duration::from_secs(60));
/// let summary = pipeline.run(&mut generator, &CancellationToken::new()).await;
/// println!("{} issued", summary.snapshot.issued);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<T> {
    shared: Arc<Shared<T>>,
    max_in_flight: usize,
    report_every: u64,
    log_file: Option<PathBuf>,
}

impl<T: Transport + 'static> Pipeline<T> {
    /// Creates a pipeline around `dispatcher`, routing every terminal
    /// result and report to `recorder`.
    pub fn new(dispatcher: FailoverDispatcher<T>, recorder: Arc<dyn Recorder>) -> Self {
        let stats = Arc::new(StatsAggregator::new());
        let dispatcher = dispatcher
            .with_stats(stats.clone())
            .with_recorder(recorder.clone());

        Self {
            shared: Arc::new(Shared {
                dispatcher,
                recorder,
                stats,
                completed: AtomicU64::new(0),
            }),
            max_in_flight: 1,
            report_every: 0,
            log_file: None,
        }
    }

    /// Maximum dispatches in progress at once (at least 1).
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.clamp(1, Semaphore::MAX_PERMITS.min(u32::MAX as usize));
        self
    }

    /// Report statistics every `n` results; 0 disables periodic reports.
    pub fn with_report_every(mut self, n: u64) -> Self {
        self.report_every = n;
        self
    }

    /// Event log path included in the run summary.
    pub fn with_log_file(mut self, path: PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.shared.stats
    }

    /// Drives `generator` to completion, dispatching every event it emits.
    ///
    /// Returns once the generator has stopped and every dispatch it
    /// started has finished.
    pub async fn run(&self, generator: &mut RequestGenerator, cancel: &CancellationToken) -> RunSummary {
        let run_id = Uuid::new_v4();
        let span = info_span!("stream", %run_id);

        async {
            info!(
                replicas = self.shared.dispatcher.replicas().len(),
                rate = generator.rate(),
                duration_secs = generator.duration().as_secs_f64(),
                max_in_flight = self.max_in_flight,
                "Starting request stream"
            );

            let started = Instant::now();
            let slots = self.slots();
            let slots_ref = slots.as_ref();

            generator
                .run(cancel, move |event| self.submit(event, slots_ref))
                .await;
            self.drain(slots_ref).await;

            self.finish(started, Some(generator.rate())).await
        }
        .instrument(span)
        .await
    }

    /// Dispatches externally generated events, batch by batch.
    ///
    /// Each stamp becomes an event carrying `template`'s request fields.
    /// Cancellation is checked between batches and between events.
    pub async fn run_batches<S>(
        &self,
        mut batches: S,
        template: RequestTemplate,
        cancel: &CancellationToken,
    ) -> RunSummary
    where
        S: Stream<Item = Vec<EventStamp>> + Unpin,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!("batches", %run_id);

        async {
            info!(
                replicas = self.shared.dispatcher.replicas().len(),
                max_in_flight = self.max_in_flight,
                "Consuming external event batches"
            );

            let started = Instant::now();
            let slots = self.slots();
            let mut batch_count = 0u64;

            'batches: loop {
                let batch = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = batches.next() => match next {
                        Some(batch) => batch,
                        None => break,
                    },
                };
                batch_count += 1;

                for stamp in batch {
                    if cancel.is_cancelled() {
                        warn!("Cancelled inside batch {}", batch_count);
                        break 'batches;
                    }
                    self.submit(template.event(stamp), slots.as_ref()).await;
                }
            }
            self.drain(slots.as_ref()).await;

            info!("Processed {} batches", batch_count);
            self.finish(started, None).await
        }
        .instrument(span)
        .await
    }

    fn slots(&self) -> Option<Arc<Semaphore>> {
        (self.max_in_flight > 1).then(|| Arc::new(Semaphore::new(self.max_in_flight)))
    }

    async fn submit(&self, event: RequestEvent, slots: Option<&Arc<Semaphore>>) {
        let report_every = self.report_every;

        let Some(slots) = slots else {
            self.shared.process(event, report_every).await;
            return;
        };

        let Ok(permit) = slots.clone().acquire_owned().await else {
            warn!(request_id = event.request_id, "Dispatch pool closed, dropping event");
            return;
        };
        let shared = self.shared.clone();
        tokio::spawn(
            async move {
                shared.process(event, report_every).await;
                drop(permit);
            }
            .in_current_span(),
        );
    }

    /// Waits until every spawned dispatch has released its slot.
    async fn drain(&self, slots: Option<&Arc<Semaphore>>) {
        if let Some(slots) = slots {
            let _ = slots.acquire_many(self.max_in_flight as u32).await;
        }
    }

    async fn finish(&self, started: Instant, target_rate: Option<f64>) -> RunSummary {
        let summary = RunSummary {
            snapshot: self.shared.stats.snapshot(),
            target_rate,
            duration: started.elapsed(),
            log_file: self.log_file.clone(),
        };

        info!(
            issued = summary.snapshot.issued,
            succeeded = summary.snapshot.succeeded,
            failed = summary.snapshot.failed,
            actual_rate = format!("{:.2}", summary.actual_rate()),
            "Stream finished"
        );

        self.shared.recorder.on_run_complete(&summary).await;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DispatchResult, DispatchStatus, Endpoint, ReplicaSet};
    use crate::stats::StatsSnapshot;
    use crate::transport::{RpcError, RpcResult, RunRequest, RunResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_stream::wrappers::ReceiverStream;

    /// Replica "down:1" refuses; every other replica answers after `delay`.
    struct DelayedTransport {
        delay: Duration,
    }

    #[async_trait]
    impl Transport for DelayedTransport {
        async fn call(
            &self,
            endpoint: &Endpoint,
            _request: &RunRequest,
            _deadline: Duration,
        ) -> RpcResult<RunResponse> {
            if endpoint.as_str() == "down:1" {
                return Err(RpcError::Unavailable("connection refused".to_string()));
            }
            tokio::time::sleep(self.delay).await;
            Ok(RunResponse {
                found: true,
                ..Default::default()
            })
        }
    }

    #[derive(Default)]
    struct CollectingRecorder {
        results: Mutex<Vec<DispatchResult>>,
        progress: Mutex<Vec<StatsSnapshot>>,
        summaries: Mutex<Vec<RunSummary>>,
    }

    impl CollectingRecorder {
        fn request_ids(&self) -> Vec<u64> {
            let mut ids: Vec<u64> = self
                .results
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.request_id)
                .collect();
            ids.sort();
            ids
        }
    }

    #[async_trait]
    impl Recorder for CollectingRecorder {
        async fn on_result(&self, result: &DispatchResult) {
            self.results.lock().unwrap().push(result.clone());
        }
        async fn on_progress(&self, snapshot: &StatsSnapshot) {
            self.progress.lock().unwrap().push(*snapshot);
        }
        async fn on_run_complete(&self, summary: &RunSummary) {
            self.summaries.lock().unwrap().push(summary.clone());
        }
    }

    fn pipeline(
        addrs: &[&str],
        delay: Duration,
        recorder: Arc<CollectingRecorder>,
    ) -> Pipeline<DelayedTransport> {
        let dispatcher = FailoverDispatcher::new(
            ReplicaSet::from_addresses(addrs).unwrap(),
            DelayedTransport { delay },
            Duration::from_secs(3),
        );
        Pipeline::new(dispatcher, recorder)
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_event_recorded_exactly_once() {
        let recorder = Arc::new(CollectingRecorder::default());
        let p = pipeline(&["down:1", "up:1"], Duration::from_millis(5), recorder.clone());
        let mut generator = RequestGenerator::new(10.0, Duration::from_secs(2));

        let summary = p.run(&mut generator, &CancellationToken::new()).await;

        assert_eq!(summary.snapshot.issued, 20);
        assert_eq!(summary.snapshot.succeeded, 20);
        assert_eq!(recorder.request_ids(), (0..20).collect::<Vec<_>>());
        assert!(
            recorder
                .results
                .lock()
                .unwrap()
                .iter()
                .all(|r| r.status == DispatchStatus::Success)
        );
        assert_eq!(recorder.summaries.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_synchronous_dispatch_lowers_achieved_rate() {
        let recorder = Arc::new(CollectingRecorder::default());
        let p = pipeline(&["up:1"], Duration::from_millis(250), recorder.clone());
        let mut generator = RequestGenerator::new(10.0, Duration::from_secs(1));

        let summary = p.run(&mut generator, &CancellationToken::new()).await;

        // One dispatch per 250ms instead of one per 100ms.
        assert_eq!(summary.snapshot.issued, 4);
        assert!(summary.rate_accuracy().unwrap() < 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_dispatch_keeps_target_rate() {
        let recorder = Arc::new(CollectingRecorder::default());
        let p = pipeline(&["up:1"], Duration::from_millis(250), recorder.clone())
            .with_max_in_flight(4);
        let mut generator = RequestGenerator::new(10.0, Duration::from_secs(1));

        let summary = p.run(&mut generator, &CancellationToken::new()).await;

        assert_eq!(summary.snapshot.issued, 10);
        assert_eq!(summary.snapshot.completed(), 10);
        assert_eq!(recorder.request_ids(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reported_every_k_results() {
        let recorder = Arc::new(CollectingRecorder::default());
        let p = pipeline(&["up:1"], Duration::from_millis(1), recorder.clone())
            .with_report_every(5);
        let mut generator = RequestGenerator::new(10.0, Duration::from_secs(2));

        p.run(&mut generator, &CancellationToken::new()).await;

        let progress = recorder.progress.lock().unwrap();
        assert_eq!(progress.len(), 4);
        assert_eq!(progress[0].completed(), 5);
    }

    #[tokio::test]
    async fn test_external_batches_feed_the_dispatcher() {
        let recorder = Arc::new(CollectingRecorder::default());
        let p = pipeline(&["down:1", "up:1"], Duration::ZERO, recorder.clone())
            .with_max_in_flight(3);

        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tokio::spawn(async move {
            for batch in 0..3u64 {
                let stamps: Vec<EventStamp> = (batch * 4..batch * 4 + 4)
                    .map(|id| RequestEvent::new(id).stamp())
                    .collect();
                tx.send(stamps).await.unwrap();
            }
        });

        let summary = p
            .run_batches(
                ReceiverStream::new(rx),
                RequestTemplate::new(Some(1), Some(2)),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(summary.snapshot.issued, 12);
        assert_eq!(summary.target_rate, None);
        assert_eq!(recorder.request_ids(), (0..12).collect::<Vec<_>>());

        let results = recorder.results.lock().unwrap();
        for result in results.iter() {
            let expected = if result.request_id % 2 == 0 { 2 } else { 1 };
            assert_eq!(result.attempt_number, expected);
        }
    }

    #[tokio::test]
    async fn test_cancelled_batches_stop_early() {
        let recorder = Arc::new(CollectingRecorder::default());
        let p = pipeline(&["up:1"], Duration::ZERO, recorder.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let batches = futures::stream::iter(vec![vec![RequestEvent::new(0).stamp()]]);
        let summary = p
            .run_batches(batches, RequestTemplate::default(), &cancel)
            .await;

        assert_eq!(summary.snapshot.issued, 0);
    }
}
