//! Instrumentation port fed by the surrounding HTTP test harness
//!
//! The harness owns the port and calls it for every request it issues and for
//! every response or transport error it gets back. [`Recorder`] is the engine
//! side: it turns observations into normalized hits and server errors.

use crate::aggregate::{collect_snapshots, Aggregator, LiteralPattern};
use crate::endpoint::{normalize_slashes, EndpointKey};
use crate::error::{CoverageError, Result};
use crate::learn::PatternLearner;
use crate::normalize::{PathNormalizer, Strategy};
use crate::openapi::SpecIndex;
use crate::pattern::CustomPattern;
use crate::report::{write_report, ReportBuilder};
use crate::store::{WorkerSnapshot, WorkerStore};
use crate::tracker::HitTracker;
use apicov_api::CoverageReport;
use serde::Deserialize;
use std::io::BufRead;
use std::path::Path;
use tracing::{debug, warn};
use url::Url;

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestObservation {
    pub method: String,
    /// Absolute URL, or a path relative to `base_url`
    pub url: String,
    pub base_url: Option<String>,
}

impl RequestObservation {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn path(&self) -> String {
        extract_path(&self.url, self.base_url.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseObservation {
    pub request: RequestObservation,
    pub status: u16,
}

/// A failed call. `status` is set when the failure carried a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorObservation {
    pub request: RequestObservation,
    pub status: Option<u16>,
    pub message: String,
}

pub trait InstrumentationPort {
    fn on_request(&mut self, request: &RequestObservation);
    fn on_response(&mut self, response: &ResponseObservation);
    fn on_error(&mut self, error: &ErrorObservation);
}

/// Path component of `url`, without query or fragment, slash-normalized.
///
/// Relative URLs are joined onto the path of `base` when one is given.
pub fn extract_path(url: &str, base: Option<&str>) -> String {
    if let Ok(parsed) = Url::parse(url) {
        if parsed.has_host() {
            return normalize_slashes(parsed.path());
        }
    }

    let relative = url
        .split(|c: char| c == '?' || c == '#')
        .next()
        .unwrap_or_default();
    let base_path = base
        .and_then(|b| Url::parse(b).ok())
        .map(|b| b.path().to_string())
        .unwrap_or_default();
    normalize_slashes(&format!("{base_path}/{relative}"))
}

#[derive(Debug, Clone)]
pub struct RecorderOptions {
    pub custom_patterns: Vec<CustomPattern>,
    pub learn_patterns: bool,
    pub literal_patterns: Vec<LiteralPattern>,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            custom_patterns: Vec::new(),
            learn_patterns: true,
            literal_patterns: Vec::new(),
        }
    }
}

/// Engine-side [`InstrumentationPort`]: normalizes, learns, tracks.
#[derive(Debug)]
pub struct Recorder {
    spec: SpecIndex,
    normalizer: PathNormalizer,
    learner: Option<PatternLearner>,
    tracker: HitTracker,
    literal_patterns: Vec<LiteralPattern>,
}

impl Recorder {
    pub fn new(spec: SpecIndex, options: RecorderOptions) -> Self {
        let normalizer = PathNormalizer::new(&spec, &options.custom_patterns);
        let protected: Vec<EndpointKey> = spec
            .keys()
            .iter()
            .filter(|k| !k.is_templated())
            .cloned()
            .collect();
        Self {
            normalizer,
            learner: options.learn_patterns.then(PatternLearner::new),
            tracker: HitTracker::new(protected),
            literal_patterns: options.literal_patterns,
            spec,
        }
    }

    /// Persist this worker's hits and errors through `store`.
    pub fn with_store(mut self, store: WorkerStore) -> Self {
        self.tracker = self.tracker.with_store(store);
        self
    }

    pub fn spec(&self) -> &SpecIndex {
        &self.spec
    }

    pub fn tracker(&self) -> &HitTracker {
        &self.tracker
    }

    pub fn normalizer(&self) -> &PathNormalizer {
        &self.normalizer
    }

    /// Canonical key for an observed request.
    pub fn endpoint_key(&mut self, request: &RequestObservation) -> EndpointKey {
        let path = self.spec.strip_base_path(&request.path());
        let mut resolution = self.normalizer.resolve(&request.method, &path);

        if resolution.strategy == Strategy::Unmatched {
            if let Some(learner) = self.learner.as_mut() {
                let learned = learner.observe(&resolution.path, self.normalizer.patterns());
                if !learned.is_empty() {
                    self.normalizer.add_patterns(learned);
                    resolution = self.normalizer.resolve(&request.method, &path);
                }
            }
        }

        debug!(
            "{} {} resolved to {} ({:?})",
            request.method, path, resolution.path, resolution.strategy
        );
        EndpointKey::new(&request.method, &resolution.path)
    }

    fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            worker_id: self
                .tracker
                .store()
                .map(|s| s.worker_id().to_string())
                .unwrap_or_default(),
            hits: self.tracker.hits(),
            errors: self.tracker.errors().clone(),
        }
    }

    /// Aggregate this worker's in-memory state with every worker file in the
    /// shared directory.
    pub fn report(&self) -> CoverageReport {
        let snapshots = match self.tracker.store() {
            Some(store) => collect_snapshots(store.dir(), Some(self.snapshot())),
            None => vec![self.snapshot()],
        };
        let aggregate = Aggregator::new(&self.spec)
            .with_literal_patterns(&self.literal_patterns)
            .aggregate(&snapshots);
        ReportBuilder::new(&self.spec).build(&aggregate)
    }

    /// Build the final report and write it to `output`. A failed write is
    /// logged; the report is returned either way.
    pub fn finish(&mut self, output: &Path) -> CoverageReport {
        self.tracker.flush();
        let report = self.report();
        if let Err(e) = write_report(&report, output) {
            warn!("Failed to write coverage report: {}", e);
        }
        report
    }
}

impl InstrumentationPort for Recorder {
    fn on_request(&mut self, request: &RequestObservation) {
        let key = self.endpoint_key(request);
        self.tracker.record_hit(key);
    }

    fn on_response(&mut self, response: &ResponseObservation) {
        let key = self.endpoint_key(&response.request);
        if response.status >= 500 {
            self.tracker.record_server_error(&key, response.status, None);
        }
        self.tracker.record_hit(key);
    }

    fn on_error(&mut self, error: &ErrorObservation) {
        let key = self.endpoint_key(&error.request);
        match error.status {
            Some(status) if status >= 500 => {
                self.tracker
                    .record_server_error(&key, status, Some(&error.message));
            }
            _ => debug!("{} failed without a server error: {}", key, error.message),
        }
        self.tracker.record_hit(key);
    }
}

/// One line of an observations file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObservationLine {
    method: String,
    url: String,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    error: Option<String>,
}

/// Counts from a [`replay`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub observations: usize,
    pub skipped: usize,
}

/// Feed a newline-delimited JSON file of observations through `port`.
///
/// Blank lines are ignored; malformed lines are logged and counted as skipped.
pub fn replay(port: &mut impl InstrumentationPort, path: &Path) -> Result<ReplayStats> {
    let file = std::fs::File::open(path).map_err(|e| CoverageError::io(path, e))?;
    let mut stats = ReplayStats::default();

    for (lineno, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| CoverageError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let obs: ObservationLine = match serde_json::from_str(&line) {
            Ok(obs) => obs,
            Err(e) => {
                warn!("{}:{}: skipping observation: {}", path.display(), lineno + 1, e);
                stats.skipped += 1;
                continue;
            }
        };

        let request = RequestObservation {
            method: obs.method,
            url: obs.url,
            base_url: obs.base_url,
        };
        port.on_request(&request);
        match (obs.error, obs.status) {
            (Some(message), status) => port.on_error(&ErrorObservation {
                request,
                status,
                message,
            }),
            (None, Some(status)) => port.on_response(&ResponseObservation { request, status }),
            (None, None) => {}
        }
        stats.observations += 1;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"{
        "servers": [{"url": "https://api.example.com/v1"}],
        "paths": {
            "/users": {"get": {}, "post": {}},
            "/users/{id}": {"get": {}, "put": {}, "delete": {}}
        }
    }"#;

    fn recorder() -> Recorder {
        Recorder::new(SpecIndex::parse(SPEC).unwrap(), RecorderOptions::default())
    }

    #[test]
    fn paths_are_extracted_from_urls() {
        assert_eq!(extract_path("https://h.example/users/1?x=1#top", None), "/users/1");
        assert_eq!(extract_path("/users//1/", None), "/users/1");
        assert_eq!(extract_path("users/1?x=1", Some("http://h.example/api/")), "/api/users/1");
        assert_eq!(extract_path("/users", Some("http://h.example")), "/users");
        assert_eq!(extract_path("", None), "/");
    }

    #[test]
    fn base_path_is_stripped_before_normalizing() {
        let mut rec = recorder();
        rec.on_request(&RequestObservation::new("GET", "https://api.example.com/v1/users/42"));
        assert_eq!(rec.tracker().hits(), vec!["GET /users/{id}"]);
    }

    #[test]
    fn server_errors_are_recorded_under_the_normalized_key() {
        let mut rec = recorder();
        let request = RequestObservation::new("GET", "/users/7");
        rec.on_request(&request);
        rec.on_response(&ResponseObservation {
            request: request.clone(),
            status: 503,
        });
        rec.on_response(&ResponseObservation {
            request: request.clone(),
            status: 404,
        });
        rec.on_error(&ErrorObservation {
            request: request.clone(),
            status: None,
            message: "connection reset".into(),
        });
        rec.on_error(&ErrorObservation {
            request,
            status: Some(500),
            message: "boom".into(),
        });

        let record = &rec.tracker().errors()["GET /users/{id}"];
        assert_eq!(record.count, 2);
        assert_eq!(record.status_codes["503"], 1);
        assert_eq!(record.status_codes["500"], 1);
        assert_eq!(rec.tracker().hits(), vec!["GET /users/{id}"]);
    }

    #[test]
    fn unmatched_paths_feed_the_learner() {
        let mut rec = recorder();
        rec.on_request(&RequestObservation::new("GET", "/widgets/1"));
        rec.on_request(&RequestObservation::new("GET", "/widgets/2"));
        rec.on_request(&RequestObservation::new("GET", "/widgets/3"));

        // The first hit predates the learned pattern but is absorbed by it.
        assert_eq!(rec.tracker().hits(), vec!["GET /widgets/{widget_id}"]);
    }

    #[test]
    fn learned_mixed_case_resource_absorbs_its_paths() {
        let mut rec = recorder();
        for id in 1..=3 {
            rec.on_request(&RequestObservation::new("GET", format!("/Users/{id}")));
        }
        assert_eq!(rec.tracker().hits(), vec!["GET /Users/{user_id}"]);
    }

    #[test]
    fn learning_can_be_disabled() {
        let options = RecorderOptions {
            learn_patterns: false,
            ..RecorderOptions::default()
        };
        let mut rec = Recorder::new(SpecIndex::parse(SPEC).unwrap(), options);
        rec.on_request(&RequestObservation::new("GET", "/widgets/1"));
        rec.on_request(&RequestObservation::new("GET", "/widgets/2"));
        assert_eq!(rec.tracker().hits(), vec!["GET /widgets/1", "GET /widgets/2"]);
    }

    #[test]
    fn replay_reads_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obs.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"method":"GET","url":"/users"}"#,
                "\n\n",
                r#"{"method":"GET","url":"users/1","baseUrl":"http://h/","status":503}"#,
                "\n",
                "not json\n",
                r#"{"method":"POST","url":"/users","error":"socket hang up","status":500}"#,
                "\n",
            ),
        )
        .unwrap();

        let mut rec = recorder();
        let stats = replay(&mut rec, &path).unwrap();
        assert_eq!(stats, ReplayStats { observations: 3, skipped: 1 });
        assert_eq!(rec.tracker().hits(), vec!["GET /users", "GET /users/{id}", "POST /users"]);
        assert_eq!(rec.tracker().errors().len(), 2);
        assert_eq!(
            rec.tracker().errors()["POST /users"].last_error_message.as_deref(),
            Some("socket hang up")
        );
    }

    #[test]
    fn finish_writes_the_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = recorder().with_store(WorkerStore::new(dir.path().join("hits"), "w1"));
        rec.on_request(&RequestObservation::new("GET", "/users"));

        let output = dir.path().join("out").join("report.json");
        let report = rec.finish(&output);
        assert_eq!(report.summary.tested_endpoints, 1);
        assert!(output.exists());
        assert!(dir.path().join("hits").join("hits-w1.json").exists());
    }
}
