//! Child-process implementation of [`ComputeService`].
//!
//! Each request becomes one invocation of the configured search executable:
//!
//! - **Direct**: `<executable> [args...]`
//! - **Distributed**: `<launcher> -np <parallel_processes> <executable> [args...]`,
//!   used only when the replica is configured for it *and* the request
//!   carries `use_distributed_hint`
//!
//! The graph size and target vertex travel through the environment
//! (`NUM_VERTICES`, `TARGET_VERTEX`), each only when the request sets it.
//!
//! # Failure Handling
//!
//! | Situation | stdout | stderr | exit code | metrics |
//! |-----------|--------|--------|-----------|---------|
//! | Normal exit (any code) | captured | captured | process code | parsed from stdout |
//! | Hard timeout | partial | `TimeoutExpired` | -1 | zero / false |
//! | Launch failure | empty | error description | -1 | zero / false |
//!
//! A response is returned in every case.
//!
//! # Example Configuration
//!
//! ```toml
//! [compute]
//! executable = "~/dfs/MPI_DFS.exe --quiet"
//! distributed = true
//! launcher = "mpirun"
//! parallel_processes = 4
//! timeout_secs = 120
//! ```

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::exec_log::{ExecutionEntry, ExecutionLog};
use super::{Command, ComputeService, ExecResult, TARGET_VERTEX_ENV, VERTEX_COUNT_ENV};
use crate::config::ComputeConfig;
use crate::metrics::{SearchMetrics, parse_metrics};
use crate::transport::{RunRequest, RunResponse, SENTINEL_EXIT_CODE, TIMEOUT_MARKER};

/// Runs the search executable as a local child process per request.
///
/// Holds only configuration and the optional log handle; every call is
/// independent of every other.
pub struct ProcessAdapter {
    config: ComputeConfig,
    log: Option<ExecutionLog>,
}

impl ProcessAdapter {
    /// Creates an adapter without an execution log.
    pub fn new(config: ComputeConfig) -> Self {
        Self { config, log: None }
    }

    /// Attaches an execution log receiving one line per request.
    pub fn with_log(mut self, log: ExecutionLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Builds the invocation for `request` without running it.
    pub fn build_command(&self, request: &RunRequest) -> Command {
        let executable = shellexpand::tilde(&self.config.executable).to_string();
        let parts = shell_words::split(&executable).unwrap_or_else(|_| vec![executable.clone()]);

        let mut cmd = if self.config.distributed && request.use_distributed_hint {
            Command::new(self.config.launcher.as_str())
                .arg("-np")
                .arg(self.config.parallel_processes.to_string())
                .args(parts)
        } else {
            let mut parts = parts.into_iter();
            let program = parts.next().unwrap_or(executable);
            Command::new(program).args(parts)
        };

        if request.vertex_count != 0 {
            cmd = cmd.env(VERTEX_COUNT_ENV, request.vertex_count.to_string());
        }
        if request.target_vertex != 0 {
            cmd = cmd.env(TARGET_VERTEX_ENV, request.target_vertex.to_string());
        }

        cmd.timeout(self.config.timeout_secs)
    }
}

#[async_trait]
impl ComputeService for ProcessAdapter {
    async fn run(&self, request: RunRequest) -> RunResponse {
        let request_ts = Utc::now();
        let cmd = self.build_command(&request);

        debug!("Executing: {}", cmd.to_shell_string());

        let result = execute(&cmd).await;

        let metrics = if result.timed_out {
            SearchMetrics::default()
        } else {
            parse_metrics(&result.stdout)
        };

        let latency_ms = result.duration.as_secs_f64() * 1000.0;

        if result.timed_out {
            warn!(
                "Execution exceeded {}s and was killed",
                self.config.timeout_secs
            );
        } else if !result.success() {
            warn!("Execution finished with exit code {}", result.exit_code);
        }

        info!(
            latency_ms = format!("{:.2}", latency_ms),
            exit_code = result.exit_code,
            found = metrics.found,
            visited = metrics.visited_count,
            "Request served"
        );

        if let Some(log) = &self.log {
            log.append(&ExecutionEntry {
                request_ts,
                latency_ms,
                exit_code: result.exit_code,
                found: metrics.found,
                visited_count: metrics.visited_count,
            });
        }

        RunResponse {
            found: metrics.found,
            visited_count: metrics.visited_count,
            runtime_ms: metrics.runtime_ms,
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
        }
    }
}

/// Runs `cmd` to completion or until its timeout, never failing.
///
/// On timeout the child is killed and whatever stdout it produced so far
/// is returned alongside the timeout marker.
pub async fn execute(cmd: &Command) -> ExecResult {
    let start = Instant::now();

    let mut process = tokio::process::Command::new(&cmd.program);
    process.args(&cmd.args);
    for (key, value) in &cmd.env {
        process.env(key, value);
    }
    process.stdin(Stdio::null());
    process.stdout(Stdio::piped());
    process.stderr(Stdio::piped());
    process.kill_on_drop(true);

    let mut child = match process.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ExecResult {
                exit_code: SENTINEL_EXIT_CODE,
                stdout: String::new(),
                stderr: format!("Failed to launch {}: {}", cmd.program, e),
                duration: start.elapsed(),
                timed_out: false,
            };
        }
    };

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    // The buffers outlive the future, so a timeout keeps the partial output.
    let finished = {
        let run = async {
            let read_stdout = async {
                if let Some(pipe) = stdout_pipe.as_mut() {
                    let _ = pipe.read_to_end(&mut stdout).await;
                }
            };
            let read_stderr = async {
                if let Some(pipe) = stderr_pipe.as_mut() {
                    let _ = pipe.read_to_end(&mut stderr).await;
                }
            };
            tokio::join!(read_stdout, read_stderr);
            child.wait().await
        };

        match cmd.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), run)
                .await
                .ok(),
            None => Some(run.await),
        }
    };

    let stdout = String::from_utf8_lossy(&stdout).to_string();

    match finished {
        Some(Ok(status)) => ExecResult {
            exit_code: status.code().unwrap_or(SENTINEL_EXIT_CODE),
            stdout,
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            duration: start.elapsed(),
            timed_out: false,
        },
        Some(Err(e)) => ExecResult {
            exit_code: SENTINEL_EXIT_CODE,
            stdout,
            stderr: format!("Failed to wait for {}: {}", cmd.program, e),
            duration: start.elapsed(),
            timed_out: false,
        },
        None => {
            if let Err(e) = child.start_kill() {
                debug!("Failed to kill timed-out process: {}", e);
            }
            let _ = child.wait().await;

            ExecResult {
                exit_code: SENTINEL_EXIT_CODE,
                stdout,
                stderr: TIMEOUT_MARKER.to_string(),
                duration: start.elapsed(),
                timed_out: true,
            }
        }
    }
}
