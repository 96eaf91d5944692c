//! Configuration schema definitions for dfsfleet.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── DispatchConfig    - Replica set, per-call timeout, in-flight limit
//! ├── GeneratorConfig   - Request rate, run duration, request template
//! ├── ReportConfig      - Event log location and console reporting
//! └── ComputeConfig     - Replica-side executable, launcher, timeouts
//! ```
//!
//! # Example
//!
//! ```toml
//! [dispatch]
//! replicas = ["localhost:50051", "localhost:50052"]
//! per_call_timeout_secs = 3
//!
//! [generator]
//! requests_per_second = 10.0
//! duration_secs = 60
//! target_vertex = 42000
//! vertex_count = 50000
//!
//! [report]
//! log_file = "streaming_events.csv"
//!
//! [compute]
//! listen = "0.0.0.0:50051"
//! executable = "../MPI_DFS.exe"
//! distributed = true
//! parallel_processes = 4
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::dispatch::ReplicaSet;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Where requests are sent and how each call is bounded.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// How fast and for how long requests are generated.
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Where terminal results are recorded.
    #[serde(default)]
    pub report: ReportConfig,

    /// Replica-side execution settings.
    #[serde(default)]
    pub compute: ComputeConfig,
}

impl Config {
    /// Checks values that parse correctly but cannot be run.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.replicas.is_empty() {
            bail!("dispatch.replicas must list at least one endpoint");
        }
        ReplicaSet::from_addresses(&self.dispatch.replicas)
            .context("dispatch.replicas contains an invalid endpoint")?;
        if self.dispatch.per_call_timeout_secs == 0 {
            bail!("dispatch.per_call_timeout_secs must be positive");
        }
        if self.dispatch.max_in_flight == 0 {
            bail!("dispatch.max_in_flight must be at least 1");
        }
        if !(self.generator.requests_per_second.is_finite()
            && self.generator.requests_per_second > 0.0)
        {
            bail!(
                "generator.requests_per_second must be positive, got {}",
                self.generator.requests_per_second
            );
        }
        if self.compute.timeout_secs == 0 {
            bail!("compute.timeout_secs must be positive");
        }
        if self.compute.max_workers == 0 {
            bail!("compute.max_workers must be at least 1");
        }
        if self.compute.distributed && self.compute.parallel_processes == 0 {
            bail!("compute.parallel_processes must be at least 1 in distributed mode");
        }
        Ok(())
    }
}

/// Dispatcher settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `replicas` | `["localhost:50051", "localhost:50052"]` |
/// | `per_call_timeout_secs` | 3 |
/// | `max_in_flight` | 1 (dispatch synchronously) |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Ordered replica addresses (`host:port`). Fixed for the whole run.
    #[serde(default = "default_replicas")]
    pub replicas: Vec<String>,

    /// Deadline for each individual probe, in seconds.
    #[serde(default = "default_per_call_timeout")]
    pub per_call_timeout_secs: u64,

    /// Maximum number of dispatches running at once.
    ///
    /// With 1, each event is dispatched to completion before the next is
    /// generated, and the achieved rate drops when replicas are slow.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            per_call_timeout_secs: default_per_call_timeout(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

fn default_replicas() -> Vec<String> {
    vec!["localhost:50051".to_string(), "localhost:50052".to_string()]
}

fn default_per_call_timeout() -> u64 {
    3
}

fn default_max_in_flight() -> usize {
    1
}

/// Request generator settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneratorConfig {
    /// Target event rate. Default: 10.0
    #[serde(default = "default_rate")]
    pub requests_per_second: f64,

    /// Run length in seconds. Default: 60
    #[serde(default = "default_duration")]
    pub duration_secs: u64,

    /// Floor applied to `duration_secs`; shorter runs are extended to it.
    #[serde(default)]
    pub min_duration_secs: Option<u64>,

    /// Target vertex sent with every request. Default: 42000
    #[serde(default = "default_target_vertex")]
    pub target_vertex: Option<u64>,

    /// Graph size sent with every request. Default: 50000
    #[serde(default = "default_vertex_count")]
    pub vertex_count: Option<u64>,

    /// Ask replicas to use their distributed launcher. Default: true
    #[serde(default = "default_true")]
    pub use_distributed_hint: bool,
}

impl GeneratorConfig {
    /// Run length after applying the minimum-duration floor.
    pub fn effective_duration_secs(&self) -> u64 {
        match self.min_duration_secs {
            Some(floor) => self.duration_secs.max(floor),
            None => self.duration_secs,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate(),
            duration_secs: default_duration(),
            min_duration_secs: None,
            target_vertex: default_target_vertex(),
            vertex_count: default_vertex_count(),
            use_distributed_hint: true,
        }
    }
}

fn default_rate() -> f64 {
    10.0
}

fn default_duration() -> u64 {
    60
}

fn default_target_vertex() -> Option<u64> {
    Some(42000)
}

fn default_vertex_count() -> Option<u64> {
    Some(50000)
}

fn default_true() -> bool {
    true
}

/// Result recording settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// CSV file receiving one row per terminal result.
    ///
    /// Default: `streaming_events.csv`
    #[serde(default = "default_event_log")]
    pub log_file: PathBuf,

    /// Print running statistics every this many results.
    ///
    /// Default: two seconds' worth of events at the configured rate.
    #[serde(default)]
    pub report_every: Option<u64>,

    /// Show a progress bar on the console. Default: true
    #[serde(default = "default_true")]
    pub progress: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            log_file: default_event_log(),
            report_every: None,
            progress: true,
        }
    }
}

fn default_event_log() -> PathBuf {
    PathBuf::from("streaming_events.csv")
}

/// Replica-side settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `listen` | `0.0.0.0:50051` |
/// | `executable` | `../MPI_DFS.exe` |
/// | `distributed` | false |
/// | `launcher` | `mpirun` |
/// | `parallel_processes` | 4 |
/// | `timeout_secs` | 120 |
/// | `max_workers` | 10 |
/// | `log_file` | `server.log` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComputeConfig {
    /// Address the replica listens on.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Search executable, optionally followed by arguments (shell-word split,
    /// `~` expanded).
    #[serde(default = "default_executable")]
    pub executable: String,

    /// Wrap the executable in the parallel launcher.
    #[serde(default)]
    pub distributed: bool,

    /// Parallel-process launcher program.
    #[serde(default = "default_launcher")]
    pub launcher: String,

    /// Worker processes requested from the launcher.
    #[serde(default = "default_parallel_processes")]
    pub parallel_processes: u32,

    /// Hard wall-clock limit per execution, in seconds.
    #[serde(default = "default_compute_timeout")]
    pub timeout_secs: u64,

    /// Maximum concurrent executions on this replica.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Execution log; `None` disables it.
    #[serde(default = "default_server_log")]
    pub log_file: Option<PathBuf>,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            executable: default_executable(),
            distributed: false,
            launcher: default_launcher(),
            parallel_processes: default_parallel_processes(),
            timeout_secs: default_compute_timeout(),
            max_workers: default_max_workers(),
            log_file: default_server_log(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:50051".to_string()
}

fn default_executable() -> String {
    "../MPI_DFS.exe".to_string()
}

fn default_launcher() -> String {
    "mpirun".to_string()
}

fn default_parallel_processes() -> u32 {
    4
}

fn default_compute_timeout() -> u64 {
    120
}

fn default_max_workers() -> usize {
    10
}

fn default_server_log() -> Option<PathBuf> {
    Some(PathBuf::from("server.log"))
}
