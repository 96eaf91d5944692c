//! Append-only execution log kept by each replica.
//!
//! One line per request, flushed immediately:
//!
//! ```text
//! request_ts=2026-10-16T09:12:03.120455Z latency_ms=52.31 exit_code=0 found=true visited=1024
//! ```

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

/// Fields recorded for one execution.
#[derive(Debug, Clone)]
pub struct ExecutionEntry {
    pub request_ts: DateTime<Utc>,
    pub latency_ms: f64,
    pub exit_code: i32,
    pub found: bool,
    pub visited_count: u64,
}

impl ExecutionEntry {
    fn to_line(&self) -> String {
        format!(
            "request_ts={} latency_ms={:.2} exit_code={} found={} visited={}",
            self.request_ts.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.latency_ms,
            self.exit_code,
            self.found,
            self.visited_count
        )
    }
}

/// Mutex-guarded append-only log file.
pub struct ExecutionLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl ExecutionLog {
    /// Opens (or creates) the log at `path` in append mode.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open execution log {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry. Write failures are logged, never propagated.
    pub fn append(&self, entry: &ExecutionEntry) {
        let line = entry.to_line();
        let Ok(mut file) = self.file.lock() else {
            warn!("Execution log lock poisoned, dropping entry");
            return;
        };
        if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
            warn!("Failed to write execution log {}: {}", self.path.display(), e);
        }
    }
}
