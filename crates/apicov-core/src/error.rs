//! Error taxonomy for the coverage engine
//!
//! None of these abort a run. Callers log them and fall back to an empty
//! spec, a skipped pattern, or an absent file.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoverageError {
    /// The OpenAPI document is missing or unparseable
    #[error("failed to load API spec from {path}: {reason}")]
    SpecLoad { path: PathBuf, reason: String },

    /// One pattern failed to build
    #[error("failed to compile pattern for {template}: {source}")]
    PatternCompile {
        template: String,
        #[source]
        source: Box<regex::Error>,
    },

    /// A worker file or report could not be read or written
    #[error("I/O error on {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A worker file exists but does not contain the expected JSON
    #[error("corrupt file {path}: {source}")]
    CorruptFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A literal substitution produced a broken placeholder shape
    #[error("substitution of {path} produced malformed result {result}")]
    MalformedPatternResult { path: String, result: String },

    /// A string that is not `METHOD /path`
    #[error("invalid endpoint key {0:?}")]
    InvalidEndpointKey(String),
}

impl CoverageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = CoverageError> = std::result::Result<T, E>;
