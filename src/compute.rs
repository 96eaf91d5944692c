//! Compute-side execution of graph-search requests.
//!
//! A replica answers each [`RunRequest`] by running the external search
//! executable once, with a hard wall-clock timeout, and parsing its output.
//! Nothing is shared between calls: no process pool, no cached graph.
//!
//! # Architecture
//!
//! ```text
//!  RunRequest ──► ComputeService::run()
//!                       │
//!                       │ build_command()
//!                       ▼
//!                    Command ──► [launcher -np N] executable   (NUM_VERTICES, TARGET_VERTEX)
//!                                        │
//!                                        │ stdout / stderr / exit code
//!                                        ▼
//!                                    ExecResult ──► parse_metrics() ──► RunResponse
//! ```
//!
//! # Key Components
//!
//! - [`ComputeService`]: The seam the RPC server calls into
//! - [`ProcessAdapter`]: Runs the executable as a child process
//! - [`Command`]: Description of one process invocation
//! - [`ExecutionLog`]: Append-only per-call log on the replica

pub mod adapter;
pub mod exec_log;

use std::time::Duration;

use async_trait::async_trait;

use crate::transport::{RunRequest, RunResponse};

pub use adapter::ProcessAdapter;
pub use exec_log::ExecutionLog;

/// Environment variable carrying the graph size to the executable.
pub const VERTEX_COUNT_ENV: &str = "NUM_VERTICES";

/// Environment variable carrying the target vertex to the executable.
pub const TARGET_VERTEX_ENV: &str = "TARGET_VERTEX";

/// Service answering run requests on a replica.
///
/// Implementations never fail: every problem with the computation is
/// reported inside the returned [`RunResponse`].
#[async_trait]
pub trait ComputeService: Send + Sync {
    /// Executes one request and returns its response.
    async fn run(&self, request: RunRequest) -> RunResponse;
}

/// A process invocation.
///
/// Built with a fluent API:
///
/// ```
/// use dfsfleet::compute::Command;
///
/// let cmd = Command::new("mpirun")
///     .arg("-np")
///     .arg("4")
///     .arg("./MPI_DFS.exe")
///     .env("NUM_VERTICES", "50000")
///     .timeout(120);
///
/// assert_eq!(cmd.program, "mpirun");
/// assert_eq!(cmd.args.len(), 3);
/// assert_eq!(cmd.to_shell_string(), "mpirun -np 4 ./MPI_DFS.exe");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The program/executable to run.
    pub program: String,

    /// Arguments to pass to the program.
    pub args: Vec<String>,

    /// Environment variables added on top of the replica's own environment.
    pub env: Vec<(String, String)>,

    /// Hard wall-clock limit in seconds.
    pub timeout_secs: Option<u64>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout_secs: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Looks up an environment variable set on this command.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Renders the command as a shell-escaped string, for logging.
    pub fn to_shell_string(&self) -> String {
        let mut parts = vec![shell_escape(&self.program)];
        for arg in &self.args {
            parts.push(shell_escape(arg));
        }
        parts.join(" ")
    }
}

/// Outcome of one process execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit code, or [`SENTINEL_EXIT_CODE`](crate::transport::SENTINEL_EXIT_CODE)
    /// when the process timed out, was killed by a signal, or never started.
    pub exit_code: i32,

    /// Captured standard output (partial if the process timed out).
    pub stdout: String,

    /// Captured standard error, the timeout marker, or the launch failure.
    pub stderr: String,

    /// Wall-clock time from launch to completion.
    pub duration: Duration,

    /// Whether the hard timeout cut the process short.
    pub timed_out: bool,
}

impl ExecResult {
    /// Returns `true` if the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Escape a string for use in a shell command.
fn shell_escape(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.' || c == '/')
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_string_quotes_when_needed() {
        let cmd = Command::new("/opt/dfs/run search").arg("--graph=big one");
        assert_eq!(
            cmd.to_shell_string(),
            "'/opt/dfs/run search' '--graph=big one'"
        );
    }

    #[test]
    fn test_env_value_lookup() {
        let cmd = Command::new("dfs").env("TARGET_VERTEX", "12");
        assert_eq!(cmd.env_value("TARGET_VERTEX"), Some("12"));
        assert_eq!(cmd.env_value("NUM_VERTICES"), None);
    }
}
