//! Configuration schema for apicov
//!
//! Config lives at `.config/apicov/config.yaml` relative to the project root.
//! Every field is optional; relative paths are resolved against the project
//! root.

use apicov_core::{default_spec_candidates, generate_worker_id, CustomPattern};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file location relative to the project root
pub const DEFAULT_CONFIG_PATH: &str = ".config/apicov/config.yaml";

/// Report location when none is configured
pub const DEFAULT_OUTPUT: &str = "coverage/api-coverage.json";

/// Shared worker directory when none is configured
pub const DEFAULT_HITS_DIR: &str = "coverage/.apicov";

/// Worker identity override for processes that do not read the config
pub const WORKER_ID_ENV: &str = "APICOV_WORKER_ID";

/// Root configuration for apicov
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// OpenAPI/Swagger document; the well-known locations are tried when unset
    pub spec: Option<PathBuf>,

    /// Where the final JSON report is written
    pub output: Option<PathBuf>,

    /// Directory shared by all workers of a run
    pub hits_dir: Option<PathBuf>,

    pub worker_id: Option<String>,

    /// Operator patterns, tried before the spec-derived ones
    pub custom_patterns: Vec<CustomPattern>,

    /// JSON array of `{pattern, replace}` applied during aggregation
    pub pattern_file: Option<PathBuf>,

    /// Infer templates from unmatched traffic (default: true)
    pub learn_patterns: Option<bool>,

    /// Minimum coverage percentage for `--check` (default: 0)
    pub threshold: Option<f64>,
}

impl Config {
    /// Spec locations to try, in order.
    pub fn spec_candidates(&self, root: &Path) -> Vec<PathBuf> {
        match &self.spec {
            Some(spec) => vec![root.join(spec)],
            None => default_spec_candidates(root),
        }
    }

    pub fn output_path(&self, root: &Path) -> PathBuf {
        root.join(self.output.as_deref().unwrap_or(Path::new(DEFAULT_OUTPUT)))
    }

    pub fn hits_dir(&self, root: &Path) -> PathBuf {
        root.join(self.hits_dir.as_deref().unwrap_or(Path::new(DEFAULT_HITS_DIR)))
    }

    pub fn pattern_file(&self, root: &Path) -> Option<PathBuf> {
        self.pattern_file.as_ref().map(|p| root.join(p))
    }

    /// Configured worker id, else `APICOV_WORKER_ID`, else a fresh uuid.
    pub fn worker_id(&self) -> String {
        self.worker_id
            .clone()
            .or_else(|| std::env::var(WORKER_ID_ENV).ok())
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_worker_id)
    }

    pub fn learn_patterns(&self) -> bool {
        self.learn_patterns.unwrap_or(true)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold.unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_yaml() {
        let config: Config = serde_yaml::from_str(
            r#"
spec: docs/openapi.yaml
hitsDir: target/hits
learnPatterns: false
threshold: 75
customPatterns:
  - pattern: '^/legacy/\d+$'
    template: /legacy/{id}
"#,
        )
        .unwrap();

        let root = Path::new("/project");
        assert_eq!(config.spec_candidates(root), vec![PathBuf::from("/project/docs/openapi.yaml")]);
        assert_eq!(config.hits_dir(root), PathBuf::from("/project/target/hits"));
        assert_eq!(config.output_path(root), PathBuf::from("/project/coverage/api-coverage.json"));
        assert!(!config.learn_patterns());
        assert_eq!(config.threshold(), 75.0);
        assert_eq!(config.custom_patterns.len(), 1);
        assert_eq!(config.custom_patterns[0].priority, apicov_core::CUSTOM_PRIORITY);
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        let root = Path::new("/p");
        assert_eq!(config.spec_candidates(root).len(), 18);
        assert_eq!(config.spec_candidates(root)[0], PathBuf::from("/p/openapi.yaml"));
        assert!(config.learn_patterns());
        assert_eq!(config.threshold(), 0.0);
        assert!(config.pattern_file(root).is_none());
    }

    #[test]
    fn configured_worker_id_wins() {
        let config = Config {
            worker_id: Some("gw3".into()),
            ..Config::default()
        };
        assert_eq!(config.worker_id(), "gw3");
    }
}
