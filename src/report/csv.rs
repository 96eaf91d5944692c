//! CSV event log.
//!
//! One row per terminal dispatch result, in a fixed column order:
//!
//! ```text
//! request_id,event_timestamp,processing_timestamp,endpoint,attempt_number,status,latency_ms,total_latency_ms,found,visited_count,runtime_ms,error_message
//! 0,2026-10-16T09:12:03.120455Z,2026-10-16T09:12:03.120502Z,localhost:50051,1,SUCCESS,52.31,52.40,true,50000,45.00,
//! 1,2026-10-16T09:12:03.220455Z,2026-10-16T09:12:03.220511Z,ALL_REPLICAS,2,FAILED,0.00,6004.12,,,,DEADLINE_EXCEEDED: deadline exceeded after 3s
//! ```
//!
//! Rows are written under a single mutex and flushed before the call
//! returns, so concurrent dispatches never interleave mid-row and a row
//! is on disk once its result has been reported.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use tracing::warn;

use super::{Recorder, RunSummary};
use crate::dispatch::DispatchResult;
use crate::stats::StatsSnapshot;

/// Column header, in row order.
pub const HEADER: &str = "request_id,event_timestamp,processing_timestamp,endpoint,attempt_number,status,latency_ms,total_latency_ms,found,visited_count,runtime_ms,error_message";

/// Append-only CSV sink for terminal results.
///
/// No deduplication is done: recording the same request twice writes two
/// rows.
pub struct CsvRecorder {
    path: PathBuf,
    file: Mutex<File>,
}

impl CsvRecorder {
    /// Creates (or truncates) the log at `path` and writes the header.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut file = File::create(path)
            .with_context(|| format!("Failed to create event log {}", path.display()))?;
        writeln!(file, "{}", HEADER)
            .and_then(|_| file.flush())
            .with_context(|| format!("Failed to write event log header {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Recorder for CsvRecorder {
    async fn on_result(&self, result: &DispatchResult) {
        let row = format_row(result);
        let Ok(mut file) = self.file.lock() else {
            warn!("Event log lock poisoned, dropping row {}", result.request_id);
            return;
        };
        if let Err(e) = writeln!(file, "{}", row).and_then(|_| file.flush()) {
            warn!("Failed to write event log {}: {}", self.path.display(), e);
        }
    }

    async fn on_progress(&self, _snapshot: &StatsSnapshot) {}

    async fn on_run_complete(&self, _summary: &RunSummary) {}
}

/// Renders one result as a CSV row (without the trailing newline).
pub fn format_row(result: &DispatchResult) -> String {
    let (found, visited, runtime) = match &result.response {
        Some(response) => {
            let metrics = response.metrics();
            (
                metrics.found.to_string(),
                metrics.visited_count.to_string(),
                format!("{:.2}", metrics.runtime_ms),
            )
        }
        None => (String::new(), String::new(), String::new()),
    };

    let fields = [
        result.request_id.to_string(),
        result
            .event_timestamp
            .to_rfc3339_opts(SecondsFormat::Micros, true),
        result
            .processing_timestamp
            .to_rfc3339_opts(SecondsFormat::Micros, true),
        result.target.to_string(),
        result.attempt_number.to_string(),
        result.status.to_string(),
        format!("{:.2}", result.latency_ms),
        format!("{:.2}", result.total_latency_ms),
        found,
        visited,
        runtime,
        result.error_message.clone().unwrap_or_default(),
    ];

    fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",")
}

/// Quotes a field if it contains a delimiter, quote, or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
