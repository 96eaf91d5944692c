//! Remote-procedure interface between the dispatcher and compute replicas.
//!
//! The interface has a single unary operation: the dispatcher sends a
//! [`RunRequest`] and the replica answers with a [`RunResponse`]. Failures
//! to obtain a response at all surface through [`RpcError`], a separate
//! channel from the response fields.
//!
//! # Wire Format
//!
//! Each message is one length-delimited frame (4-byte big-endian length
//! prefix) holding a JSON document:
//!
//! ```text
//! [4-byte length] {"target_vertex":42000,"vertex_count":50000,"use_distributed_hint":true}
//! [4-byte length] {"found":true,"visited_count":1024,"runtime_ms":45.0,"stdout":"...","stderr":"","exit_code":0}
//! ```
//!
//! # Error Taxonomy
//!
//! | Condition | Type | Dispatcher reaction |
//! |-----------|------|---------------------|
//! | Connection refused / reset / unreachable | [`RpcError::Unavailable`] | fail over |
//! | Per-call deadline passed | [`RpcError::DeadlineExceeded`] | fail over |
//! | Undecodable frame | [`RpcError::Protocol`] | fail over |
//! | Executable failed, timed out, or could not launch | [`RemoteApplicationError`] inside a response | counted as success |

pub mod server;
pub mod tcp;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dispatch::Endpoint;
use crate::metrics::SearchMetrics;

pub use server::ComputeServer;
pub use tcp::TcpTransport;

/// Largest frame accepted in either direction.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Stderr marker reported when the executable exceeded its hard timeout.
pub const TIMEOUT_MARKER: &str = "TimeoutExpired";

/// Exit code reported when the executable timed out or could not be launched.
pub const SENTINEL_EXIT_CODE: i32 = -1;

/// A request to run one graph search on a replica.
///
/// Zero in `target_vertex` or `vertex_count` means "unspecified"; the
/// replica then leaves the executable's own default in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub target_vertex: u64,
    #[serde(default)]
    pub vertex_count: u64,
    #[serde(default)]
    pub use_distributed_hint: bool,
}

/// A replica's answer to a [`RunRequest`].
///
/// A response is produced for every request the replica receives, even
/// when the underlying computation failed; see [`remote_error`](Self::remote_error).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    pub found: bool,
    pub visited_count: u64,
    pub runtime_ms: f64,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub exit_code: i32,
}

impl RunResponse {
    /// Returns the parsed metrics carried by this response.
    pub fn metrics(&self) -> SearchMetrics {
        SearchMetrics {
            runtime_ms: self.runtime_ms,
            visited_count: self.visited_count,
            found: self.found,
        }
    }

    /// Classifies a computation failure reported inside this response.
    ///
    /// Returns `None` when the executable exited cleanly.
    pub fn remote_error(&self) -> Option<RemoteApplicationError> {
        if self.exit_code == 0 {
            return None;
        }
        if self.exit_code == SENTINEL_EXIT_CODE {
            if self.stderr == TIMEOUT_MARKER {
                return Some(RemoteApplicationError::Timeout);
            }
            return Some(RemoteApplicationError::LaunchFailed(self.stderr.clone()));
        }
        Some(RemoteApplicationError::NonZeroExit(self.exit_code))
    }
}

/// Transport-level failure of a single call.
///
/// Any of these means the replica did not deliver a response, so the
/// dispatcher moves on to the next replica.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    /// The replica could not be reached or dropped the connection.
    #[error("replica unavailable: {0}")]
    Unavailable(String),

    /// No response arrived before the per-call deadline.
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// The replica answered with something that is not a valid response.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RpcError {
    /// Stable classification string used in logs and result records.
    pub fn code(&self) -> &'static str {
        match self {
            RpcError::Unavailable(_) => "UNAVAILABLE",
            RpcError::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
            RpcError::Protocol(_) => "PROTOCOL",
        }
    }
}

/// Result type for remote calls.
pub type RpcResult<T> = Result<T, RpcError>;

/// A computation failure reported inside a successful response.
///
/// These never trigger failover: the replica executed the call and
/// answered, so the dispatch counts as a success.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteApplicationError {
    #[error("executable exited with code {0}")]
    NonZeroExit(i32),

    #[error("executable exceeded its hard timeout")]
    Timeout,

    #[error("executable could not be launched: {0}")]
    LaunchFailed(String),
}

/// Client side of the remote-procedure interface.
///
/// Implementations must bound every call by `deadline` and report any
/// failure to obtain a response as an [`RpcError`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` to `endpoint` and waits for its response.
    async fn call(
        &self,
        endpoint: &Endpoint,
        request: &RunRequest,
        deadline: Duration,
    ) -> RpcResult<RunResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(exit_code: i32, stderr: &str) -> RunResponse {
        RunResponse {
            exit_code,
            stderr: stderr.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_exit_has_no_remote_error() {
        assert_eq!(response(0, "warning: slow").remote_error(), None);
    }

    #[test]
    fn test_remote_error_classification() {
        assert_eq!(
            response(3, "").remote_error(),
            Some(RemoteApplicationError::NonZeroExit(3))
        );
        assert_eq!(
            response(SENTINEL_EXIT_CODE, TIMEOUT_MARKER).remote_error(),
            Some(RemoteApplicationError::Timeout)
        );
        assert_eq!(
            response(SENTINEL_EXIT_CODE, "No such file or directory").remote_error(),
            Some(RemoteApplicationError::LaunchFailed(
                "No such file or directory".to_string()
            ))
        );
    }

    #[test]
    fn test_request_fields_default_when_absent() {
        let request: RunRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request, RunRequest::default());
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(RpcError::Unavailable("refused".into()).code(), "UNAVAILABLE");
        assert_eq!(
            RpcError::DeadlineExceeded(Duration::from_secs(3)).code(),
            "DEADLINE_EXCEEDED"
        );
        assert_eq!(RpcError::Protocol("bad json".into()).code(), "PROTOCOL");
    }
}
