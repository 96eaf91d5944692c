//! Result recording and console output.
//!
//! Every terminal [`DispatchResult`] is handed to a [`Recorder`]. The
//! pipeline also reports periodic statistics and a final summary through
//! the same trait, so the CSV event log and the console are just two
//! recorders combined with [`MultiRecorder`].

pub mod csv;

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};

use crate::dispatch::DispatchResult;
use crate::stats::StatsSnapshot;

pub use csv::CsvRecorder;

/// Summary of a finished streaming run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Counters at the end of the run.
    pub snapshot: StatsSnapshot,
    /// Configured events per second; `None` for externally fed runs.
    pub target_rate: Option<f64>,
    /// Wall-clock run time.
    pub duration: Duration,
    /// Event log written during the run, if any.
    pub log_file: Option<PathBuf>,
}

impl RunSummary {
    /// Issued events per second over the whole run.
    pub fn actual_rate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.snapshot.issued as f64 / secs
        } else {
            0.0
        }
    }

    /// Achieved rate as a percentage of the target rate.
    pub fn rate_accuracy(&self) -> Option<f64> {
        self.target_rate
            .filter(|rate| *rate > 0.0)
            .map(|rate| self.actual_rate() / rate * 100.0)
    }
}

/// Receives events during a streaming run.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Called exactly once per dispatched event with its terminal result.
    async fn on_result(&self, result: &DispatchResult);

    /// Called periodically with running statistics.
    async fn on_progress(&self, snapshot: &StatsSnapshot);

    /// Called once when the run has finished.
    async fn on_run_complete(&self, summary: &RunSummary);
}

/// A recorder that does nothing (for testing or when output is not needed).
pub struct NullRecorder;

#[async_trait]
impl Recorder for NullRecorder {
    async fn on_result(&self, _result: &DispatchResult) {}
    async fn on_progress(&self, _snapshot: &StatsSnapshot) {}
    async fn on_run_complete(&self, _summary: &RunSummary) {}
}

/// A recorder that forwards to several recorders in order.
pub struct MultiRecorder {
    recorders: Vec<Box<dyn Recorder>>,
}

impl MultiRecorder {
    pub fn new() -> Self {
        Self {
            recorders: Vec::new(),
        }
    }

    pub fn with_recorder<R: Recorder + 'static>(mut self, recorder: R) -> Self {
        self.recorders.push(Box::new(recorder));
        self
    }
}

impl Default for MultiRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Recorder for MultiRecorder {
    async fn on_result(&self, result: &DispatchResult) {
        for recorder in &self.recorders {
            recorder.on_result(result).await;
        }
    }

    async fn on_progress(&self, snapshot: &StatsSnapshot) {
        for recorder in &self.recorders {
            recorder.on_progress(snapshot).await;
        }
    }

    async fn on_run_complete(&self, summary: &RunSummary) {
        for recorder in &self.recorders {
            recorder.on_run_complete(summary).await;
        }
    }
}

/// Recorder printing one line per result plus statistics to the terminal.
pub struct ConsoleRecorder {
    progress: Mutex<Option<ProgressBar>>,
}

impl ConsoleRecorder {
    /// Creates a console recorder.
    ///
    /// With `expected_events`, a progress bar sized to that count is shown
    /// and result lines are printed above it.
    pub fn new(expected_events: Option<u64>) -> Self {
        let progress = expected_events.map(|len| {
            let pb = ProgressBar::new(len);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb
        });

        Self {
            progress: Mutex::new(progress),
        }
    }

    fn print(&self, line: String) {
        if let Ok(guard) = self.progress.lock()
            && let Some(pb) = guard.as_ref()
        {
            pb.println(line);
            return;
        }
        println!("{}", line);
    }
}

#[async_trait]
impl Recorder for ConsoleRecorder {
    async fn on_result(&self, result: &DispatchResult) {
        if let Ok(guard) = self.progress.lock()
            && let Some(pb) = guard.as_ref()
        {
            pb.inc(1);
        }
        self.print(format_result_line(result));
    }

    async fn on_progress(&self, snapshot: &StatsSnapshot) {
        self.print(format_progress(snapshot));
    }

    async fn on_run_complete(&self, summary: &RunSummary) {
        if let Ok(mut guard) = self.progress.lock()
            && let Some(pb) = guard.take()
        {
            pb.finish_and_clear();
        }

        let snapshot = &summary.snapshot;

        println!();
        println!("Stream Results:");
        println!("  Total:       {}", snapshot.issued);
        println!(
            "  Succeeded:   {} ({:.1}%)",
            console::style(snapshot.succeeded).green(),
            snapshot.success_rate()
        );
        println!(
            "  Failed:      {} ({:.1}%)",
            console::style(snapshot.failed).red(),
            snapshot.failure_rate()
        );
        println!("  Duration:    {:.2}s", summary.duration.as_secs_f64());
        if let Some(rate) = summary.target_rate {
            println!("  Target rate: {} events/s", rate);
        }
        println!("  Actual rate: {:.2} events/s", summary.actual_rate());
        if let Some(accuracy) = summary.rate_accuracy() {
            println!("  Accuracy:    {:.1}%", accuracy);
        }

        if let Some(path) = &summary.log_file {
            println!();
            println!(
                "{}",
                console::style(format!("Event log written to {}", path.display())).dim()
            );
        }

        println!();
        if snapshot.failed == 0 {
            println!("{}", console::style("All events dispatched.").green().bold());
        } else {
            println!(
                "{}",
                console::style("Some events failed on every replica.")
                    .yellow()
                    .bold()
            );
        }
    }
}

/// Renders the console line for one terminal result.
pub fn format_result_line(result: &DispatchResult) -> String {
    let ts = result.processing_timestamp.format("%H:%M:%S%.3f");

    if !result.is_success() {
        let reason = result.error_message.as_deref().unwrap_or("no response");
        return format!(
            "[{}] {} Event #{} -> ALL REPLICAS FAILED ({})",
            ts,
            console::style("FAIL").red().bold(),
            result.request_id,
            reason
        );
    }

    let failures = result.failed_attempts();
    if failures == 0 {
        format!(
            "[{}] {} Event #{} -> {} (latency: {:.2}ms)",
            ts,
            console::style("OK  ").green(),
            result.request_id,
            result.target,
            result.latency_ms
        )
    } else {
        format!(
            "[{}] {} Event #{} -> {} (retry success after {} failure(s), latency: {:.2}ms)",
            ts,
            console::style("OK  ").yellow(),
            result.request_id,
            result.target,
            failures,
            result.latency_ms
        )
    }
}

fn format_progress(snapshot: &StatsSnapshot) -> String {
    format!(
        "Stream statistics after {:.1}s: processed {}, succeeded {} ({:.1}%), failed {}, rate {:.2} events/s",
        snapshot.elapsed.as_secs_f64(),
        snapshot.issued,
        snapshot.succeeded,
        snapshot.success_rate(),
        snapshot.failed,
        snapshot.throughput()
    )
}
