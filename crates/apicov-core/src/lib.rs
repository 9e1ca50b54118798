//! apicov-core - Core library for OpenAPI endpoint coverage
//!
//! This crate provides the building blocks for:
//! - Indexing the `(method, path)` operations an OpenAPI/Swagger document declares
//! - Resolving observed request paths to the declared templates they exercise
//! - Tracking hits and 5xx responses per test worker, persisted after every change
//! - Aggregating every worker's snapshot into one [`CoverageReport`]
//!
//! # Features
//!
//! - `parallel` - Read worker snapshots in parallel during aggregation (brings in `rayon`)
//!
//! # Normalizing Paths
//!
//! Observed paths are resolved against the declared ones first, then against
//! the pattern chain (custom, spec-derived, learned):
//!
//! ```
//! use apicov_core::{PathNormalizer, SpecIndex};
//!
//! let spec = SpecIndex::parse(r#"{"paths": {"/users/{id}": {"get": {}}}}"#).unwrap();
//! let normalizer = PathNormalizer::new(&spec, &[]);
//!
//! assert_eq!(normalizer.normalize("GET", "/users/42"), "/users/{id}");
//! assert_eq!(normalizer.normalize("GET", "/health/"), "/health");
//! ```
//!
//! # Recording a Test Run
//!
//! A harness drives a [`Recorder`] through the [`InstrumentationPort`] trait and
//! asks it for the final report when the run ends:
//!
//! ```ignore
//! use apicov_core::{InstrumentationPort, Recorder, RecorderOptions, RequestObservation, SpecIndex, WorkerStore};
//!
//! let spec = SpecIndex::load("openapi.yaml")?;
//! let mut recorder = Recorder::new(spec, RecorderOptions::default())
//!     .with_store(WorkerStore::new("coverage/.apicov", "gw0"));
//!
//! recorder.on_request(&RequestObservation::new("GET", "http://localhost:8080/users/1"));
//!
//! let report = recorder.finish("coverage/api-coverage.json".as_ref());
//! println!("Coverage: {:.2}%", report.coverage_percent());
//! ```

mod aggregate;
mod dedup;
mod endpoint;
mod error;
mod learn;
mod normalize;
mod openapi;
mod pattern;
mod port;
mod report;
mod store;
mod tracker;

pub use apicov_api::{CoverageReport, ServerErrorRecord};
pub use aggregate::{
    collect_snapshots, load_literal_patterns, Aggregate, Aggregator, LiteralPattern,
};
pub use dedup::KeySet;
pub use endpoint::{
    is_placeholder, is_templated_path, normalize_slashes, path_shape, segments_match,
    EndpointKey, HTTP_METHODS,
};
pub use error::{CoverageError, Result};
pub use learn::{learn_patterns, signature, PatternLearner, SegmentShape};
pub use normalize::{PathNormalizer, Resolution, Strategy};
pub use openapi::{
    default_spec_candidates, OpenApiDocument, Operation, Parameter, PathItem, ResolvedParameter,
    SpecIndex,
};
pub use pattern::{
    compile_custom_patterns, compile_spec_patterns, parameter_matcher, CustomPattern,
    PathPattern, PatternOrigin, PatternSet, CUSTOM_PRIORITY, LEARNED_PRIORITY, SPEC_PRIORITY,
};
pub use port::{
    extract_path, replay, ErrorObservation, InstrumentationPort, Recorder, RecorderOptions,
    ReplayStats, RequestObservation, ResponseObservation,
};
pub use report::{now_timestamp, percentage, write_report, ReportBuilder};
pub use store::{
    clean, discover_workers, generate_worker_id, load_snapshots, sanitize_worker_id,
    write_json_atomic, ErrorMap, WorkerSnapshot, WorkerStore,
};
pub use tracker::HitTracker;
