//! Coverage report computation

use crate::aggregate::Aggregate;
use crate::endpoint::{EndpointKey, HTTP_METHODS};
use crate::openapi::SpecIndex;
use crate::store::{write_json_atomic, ErrorMap};
use apicov_api::{
    CoverageReport, EndpointErrors, Endpoints, MethodCoverage, ServerErrorStats, Summary,
};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

/// Builds the terminal [`CoverageReport`] from an [`Aggregate`].
#[derive(Debug, Clone)]
pub struct ReportBuilder<'a> {
    spec: &'a SpecIndex,
    timestamp: Option<String>,
}

impl<'a> ReportBuilder<'a> {
    pub fn new(spec: &'a SpecIndex) -> Self {
        Self {
            spec,
            timestamp: None,
        }
    }

    /// Use a fixed timestamp instead of the current time.
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn build(&self, aggregate: &Aggregate) -> CoverageReport {
        let (covered, extra) = self.partition(&aggregate.hits);

        // Declared keys in declaration order
        let mut tested_list = Vec::new();
        let mut untested_list = Vec::new();
        for key in self.spec.keys() {
            if covered.contains(key) {
                tested_list.push(key.to_string());
            } else {
                untested_list.push(key.to_string());
            }
        }

        let total = self.spec.len();
        let summary = Summary {
            total_endpoints: total,
            tested_endpoints: tested_list.len(),
            untested_endpoints: untested_list.len(),
            coverage_percentage: percentage(tested_list.len(), total),
        };

        // Per-method breakdown
        let mut method_coverage = BTreeMap::new();
        for method in HTTP_METHODS {
            let total = self.spec.keys_for_method(method).count();
            let tested = self
                .spec
                .keys_for_method(method)
                .filter(|k| covered.contains(*k))
                .count();
            method_coverage.insert(
                method.to_string(),
                MethodCoverage {
                    total,
                    tested,
                    percentage: percentage(tested, total),
                },
            );
        }

        let mut extra_endpoints: Vec<String> = extra.iter().map(|k| k.to_string()).collect();
        extra_endpoints.sort();

        CoverageReport {
            summary,
            method_coverage,
            server_error_stats: error_stats(&aggregate.errors),
            endpoints: Endpoints {
                tested: tested_list,
                untested: untested_list,
            },
            extra_endpoints,
            server_errors: aggregate.errors.clone(),
            timestamp: self.timestamp.clone().unwrap_or_else(now_timestamp),
        }
    }

    /// Split hits into the declared keys they cover and the ones with no
    /// declared counterpart.
    fn partition<'h>(
        &self,
        hits: &'h [EndpointKey],
    ) -> (HashSet<&'a EndpointKey>, Vec<&'h EndpointKey>) {
        let mut covered = HashSet::new();
        let mut extra = Vec::new();
        for hit in hits {
            // Exact declared key
            if let Some(declared) = self.spec.keys().iter().find(|k| *k == hit) {
                covered.insert(declared);
                continue;
            }
            // Otherwise the matching declared key with the most literal segments
            let mut best: Option<&'a EndpointKey> = None;
            for declared in self.spec.keys() {
                if !declared.matches(hit) {
                    continue;
                }
                match best {
                    Some(b) if b.literal_segments() >= declared.literal_segments() => {}
                    _ => best = Some(declared),
                }
            }
            match best {
                Some(declared) => {
                    covered.insert(declared);
                }
                None => extra.push(hit),
            }
        }
        (covered, extra)
    }
}

fn error_stats(errors: &ErrorMap) -> ServerErrorStats {
    let mut total_server_errors = 0;
    let mut status_code_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut errors_by_endpoint = Vec::with_capacity(errors.len());
    for (endpoint, record) in errors {
        total_server_errors += record.count;
        for (code, n) in &record.status_codes {
            *status_code_counts.entry(code.clone()).or_default() += n;
        }
        errors_by_endpoint.push(EndpointErrors {
            endpoint: endpoint.clone(),
            count: record.count,
            status_codes: record.status_codes.clone(),
            last_error_message: record.last_error_message.clone(),
        });
    }
    errors_by_endpoint.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.endpoint.cmp(&b.endpoint)));

    ServerErrorStats {
        total_server_errors,
        status_code_counts,
        errors_by_endpoint,
    }
}

/// `part / total * 100`, rounded to two decimals; 0 when `total` is 0.
pub fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = part as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Current time as RFC 3339.
pub fn now_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::UNIX_EPOCH.to_string())
}

/// Write `report` atomically to `path`, creating parent directories.
pub fn write_report(report: &CoverageReport, path: &Path) -> crate::Result<()> {
    write_json_atomic(path, report)?;
    info!(
        "Wrote coverage report to {} ({:.2}%)",
        path.display(),
        report.coverage_percent()
    );
    Ok(())
}
