//! Parsing of graph-search process output into structured metrics.
//!
//! The external search executable reports its results as free-form text on
//! stdout. Two output dialects are in circulation:
//!
//! | Fact | Serial / threaded dialect | Distributed dialect |
//! |------|---------------------------|---------------------|
//! | runtime | `Execution time: 8.727 milliseconds (ms)` | `time taken: 45 ms` |
//! | visited | `Total vertices visited: 50000` | `vertices visited: 1024` |
//! | found | `found target: ...` | `found target: ...` |
//!
//! Recognition is driven by [`LINE_RULES`], an ordered table of
//! `(prefix, extractor)` pairs. Every line is checked against every rule;
//! the first value successfully extracted for a fact wins and later lines
//! for the same fact are ignored. Malformed values are skipped silently,
//! so parsing never fails.
//!
//! # Example
//!
//! ```
//! use dfsfleet::metrics::parse_metrics;
//!
//! let metrics = parse_metrics("Execution time: 8.727 milliseconds (ms)\nTotal vertices visited: 50000\n");
//! assert_eq!(metrics.runtime_ms, 8.727);
//! assert_eq!(metrics.visited_count, 50000);
//! assert!(!metrics.found);
//! ```

use serde::{Deserialize, Serialize};

/// Metrics extracted from one execution of the search executable.
///
/// Defaults to zero/false for every fact that could not be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchMetrics {
    /// Search runtime reported by the executable, in milliseconds.
    pub runtime_ms: f64,
    /// Number of vertices visited during the search.
    pub visited_count: u64,
    /// Whether the executable reported finding the target vertex.
    pub found: bool,
}

/// Partially-parsed metrics; `None` means "not seen yet".
#[derive(Debug, Default)]
struct PartialMetrics {
    runtime_ms: Option<f64>,
    visited_count: Option<u64>,
    found: Option<bool>,
}

impl PartialMetrics {
    fn finish(self) -> SearchMetrics {
        SearchMetrics {
            runtime_ms: self.runtime_ms.unwrap_or(0.0),
            visited_count: self.visited_count.unwrap_or(0),
            found: self.found.unwrap_or(false),
        }
    }
}

/// Extracts one fact from the text following a recognized prefix.
///
/// Returns `false` when the remainder could not be parsed, leaving the
/// partial metrics untouched.
type Extractor = fn(&str, &mut PartialMetrics) -> bool;

/// Ordered table of recognized line prefixes and their extractors.
///
/// Adding a new output dialect means adding rows here.
const LINE_RULES: &[(&str, Extractor)] = &[
    ("Execution time:", extract_runtime),
    ("time taken:", extract_runtime),
    ("Total vertices visited:", extract_visited),
    ("vertices visited:", extract_visited),
    ("found target:", extract_found),
];

fn extract_runtime(rest: &str, partial: &mut PartialMetrics) -> bool {
    if partial.runtime_ms.is_some() {
        return false;
    }
    match rest.split_whitespace().next().map(str::parse::<f64>) {
        Some(Ok(value)) => {
            partial.runtime_ms = Some(value);
            true
        }
        _ => false,
    }
}

fn extract_visited(rest: &str, partial: &mut PartialMetrics) -> bool {
    if partial.visited_count.is_some() {
        return false;
    }
    match rest.trim().parse::<u64>() {
        Ok(value) => {
            partial.visited_count = Some(value);
            true
        }
        Err(_) => false,
    }
}

fn extract_found(_rest: &str, partial: &mut PartialMetrics) -> bool {
    partial.found = Some(true);
    true
}

/// Parses the stdout of the search executable into [`SearchMetrics`].
///
/// Pure and infallible: identical input always yields identical output,
/// and unrecognized or malformed lines are ignored.
pub fn parse_metrics(stdout: &str) -> SearchMetrics {
    let mut partial = PartialMetrics::default();

    for line in stdout.lines() {
        let line = line.trim();
        for (prefix, extract) in LINE_RULES {
            if let Some(rest) = line.strip_prefix(prefix) {
                extract(rest, &mut partial);
            }
        }
    }

    partial.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_dialect() {
        let out = "Graph loaded\nExecution time: 8.727 milliseconds (ms)\nTotal vertices visited: 50000\n";
        let metrics = parse_metrics(out);

        assert_eq!(metrics.runtime_ms, 8.727);
        assert_eq!(metrics.visited_count, 50000);
        assert!(!metrics.found);
    }

    #[test]
    fn test_distributed_dialect() {
        let out = "rank 0 starting\ntime taken: 45 ms\nvertices visited: 1024\nfound target: 42000\n";
        let metrics = parse_metrics(out);

        assert_eq!(metrics.runtime_ms, 45.0);
        assert_eq!(metrics.visited_count, 1024);
        assert!(metrics.found);
    }

    #[test]
    fn test_found_line_alone() {
        let metrics = parse_metrics("found target:");
        assert!(metrics.found);
        assert_eq!(metrics.visited_count, 0);
    }

    #[test]
    fn test_empty_output_defaults() {
        assert_eq!(parse_metrics(""), SearchMetrics::default());
        assert_eq!(
            parse_metrics("nothing useful here\n"),
            SearchMetrics {
                runtime_ms: 0.0,
                visited_count: 0,
                found: false
            }
        );
    }

    #[test]
    fn test_first_value_wins() {
        let out = "time taken: 10 ms\nExecution time: 99.5 milliseconds (ms)\nvertices visited: 7\nvertices visited: 8\n";
        let metrics = parse_metrics(out);

        assert_eq!(metrics.runtime_ms, 10.0);
        assert_eq!(metrics.visited_count, 7);
    }

    #[test]
    fn test_malformed_line_does_not_block_later_value() {
        let out = "Execution time: fast\nvertices visited: lots\ntime taken: 12.5 ms\nTotal vertices visited: 300\n";
        let metrics = parse_metrics(out);

        assert_eq!(metrics.runtime_ms, 12.5);
        assert_eq!(metrics.visited_count, 300);
    }

    #[test]
    fn test_indented_lines_are_recognized() {
        let metrics = parse_metrics("   Total vertices visited: 12   \n\ttime taken: 3 ms");
        assert_eq!(metrics.visited_count, 12);
        assert_eq!(metrics.runtime_ms, 3.0);
    }

    #[test]
    fn test_idempotent() {
        let out = "time taken: 45 ms\nvertices visited: 1024\nfound target: 1\n";
        assert_eq!(parse_metrics(out), parse_metrics(out));
    }
}
