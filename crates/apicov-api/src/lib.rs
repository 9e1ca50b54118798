//! API types for apicov reports
//!
//! This crate contains only the JSON type definitions shared between the
//! engine (which produces them) and anything that consumes the final report
//! or the per-worker error files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Server error statistics for one endpoint.
///
/// Merging is a per-field additive monoid: counts and the status-code
/// histogram are summed, the message is the most recent one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerErrorRecord {
    /// Number of 5xx responses observed
    pub count: u64,
    /// Histogram of status codes, keyed by the decimal code ("500", "503", ...)
    #[serde(default)]
    pub status_codes: BTreeMap<String, u64>,
    /// Message of the most recent error, truncated to [`Self::MAX_MESSAGE_LEN`] chars
    #[serde(default)]
    pub last_error_message: Option<String>,
    /// Epoch milliseconds of the most recent error
    #[serde(default)]
    pub last_error_at: u64,
}

impl ServerErrorRecord {
    /// Upper bound on the stored message length, in chars.
    pub const MAX_MESSAGE_LEN: usize = 500;

    /// Record one occurrence of `status` at `at_ms`.
    ///
    /// When no message is given, `HTTP <status>` is stored instead.
    pub fn record(&mut self, status: u16, message: Option<&str>, at_ms: u64) {
        self.count += 1;
        *self.status_codes.entry(status.to_string()).or_default() += 1;

        let message = match message {
            Some(m) if !m.trim().is_empty() => truncate_message(m),
            _ => format!("HTTP {status}"),
        };
        let candidate = (at_ms, Some(message));
        if candidate >= (self.last_error_at, self.last_error_message.clone()) {
            self.last_error_at = candidate.0;
            self.last_error_message = candidate.1;
        }
    }

    /// Fold `other` into `self`.
    ///
    /// The surviving message is the one with the greatest `(last_error_at,
    /// last_error_message)` pair, so `a.merge(b)` and `b.merge(a)` agree.
    pub fn merge(&mut self, other: &ServerErrorRecord) {
        self.count += other.count;
        for (code, n) in &other.status_codes {
            *self.status_codes.entry(code.clone()).or_default() += n;
        }
        let theirs = (other.last_error_at, &other.last_error_message);
        let ours = (self.last_error_at, &self.last_error_message);
        if theirs > ours {
            self.last_error_at = other.last_error_at;
            self.last_error_message = other.last_error_message.clone();
        }
    }
}

fn truncate_message(message: &str) -> String {
    message
        .chars()
        .take(ServerErrorRecord::MAX_MESSAGE_LEN)
        .collect()
}

/// Final coverage report, built once at the end of a run.
///
/// Field order matches the on-disk JSON layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageReport {
    pub summary: Summary,
    /// Per-method breakdown over the seven standard HTTP methods
    pub method_coverage: BTreeMap<String, MethodCoverage>,
    pub server_error_stats: ServerErrorStats,
    pub endpoints: Endpoints,
    /// Observed endpoints with no declared counterpart
    pub extra_endpoints: Vec<String>,
    /// Merged error records, keyed by endpoint
    pub server_errors: BTreeMap<String, ServerErrorRecord>,
    /// ISO-8601 time the report was built
    pub timestamp: String,
}

impl CoverageReport {
    /// Coverage percentage (0.0 - 100.0)
    pub fn coverage_percent(&self) -> f64 {
        self.summary.coverage_percentage
    }

    /// Whether coverage meets `threshold` percent.
    pub fn is_passing(&self, threshold: f64) -> bool {
        self.coverage_percent() >= threshold
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_endpoints: usize,
    pub tested_endpoints: usize,
    pub untested_endpoints: usize,
    /// tested / total * 100, rounded to two decimals; 0 when nothing is declared
    pub coverage_percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodCoverage {
    pub total: usize,
    pub tested: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerErrorStats {
    pub total_server_errors: u64,
    pub status_code_counts: BTreeMap<String, u64>,
    pub errors_by_endpoint: Vec<EndpointErrors>,
}

/// One row of [`ServerErrorStats::errors_by_endpoint`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointErrors {
    pub endpoint: String,
    pub count: u64,
    pub status_codes: BTreeMap<String, u64>,
    #[serde(default)]
    pub last_error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Endpoints {
    pub tested: Vec<String>,
    pub untested: Vec<String>,
}
