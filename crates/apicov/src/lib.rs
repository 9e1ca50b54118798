//! apicov library - Measure OpenAPI endpoint coverage of HTTP test suites
//!
//! This library exposes configuration loading and report rendering for the
//! `apicov` binary, for testing and embedding purposes.

pub mod config;
pub mod output;
pub mod suggestions;

use apicov_core::{load_literal_patterns, LiteralPattern, SpecIndex};
use config::Config;
use eyre::{Result, WrapErr};
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (default: `warn`)
pub const LOG_ENV: &str = "APICOV_LOG";

/// Files whose presence marks a project root
const ROOT_MARKERS: &[&str] = &["Cargo.toml", "package.json", ".git"];

/// Install a stderr tracing subscriber filtered by `APICOV_LOG`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// The nearest ancestor of the current directory that looks like a project
/// root, or the current directory itself.
pub fn find_project_root() -> Result<PathBuf> {
    let start = std::env::current_dir().wrap_err("Failed to get current directory")?;
    Ok(project_root_from(&start))
}

fn project_root_from(start: &Path) -> PathBuf {
    let mut current = start.to_path_buf();
    loop {
        if ROOT_MARKERS.iter().any(|m| current.join(m).exists()) {
            return current;
        }
        if !current.pop() {
            return start.to_path_buf();
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        eyre::bail!(
            "Config file not found at {}\n\n\
             Create a config file describing your API:\n\n\
             spec: openapi.yaml\n\
             output: coverage/api-coverage.json\n\
             hitsDir: coverage/.apicov\n\
             customPatterns:\n  \
               - pattern: '^/legacy/users/\\d+$'\n    \
                 template: /users/{{id}}\n\
             threshold: 80",
            path.display()
        );
    }

    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;

    // An empty file is a valid, empty config
    if content.trim().is_empty() {
        return Ok(Config::default());
    }

    let config: Config = serde_yaml::from_str(&content)
        .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Load config if it exists, otherwise return the default config.
/// An invalid file is reported and ignored.
pub fn load_config_or_default(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }

    match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            warn!("{:#}; using defaults", e);
            Config::default()
        }
    }
}

/// The configured spec, or the first well-known location that parses.
pub fn load_spec(config: &Config, root: &Path) -> SpecIndex {
    SpecIndex::load_first(&config.spec_candidates(root))
}

/// Literal patterns from the configured pattern file; a broken file is
/// reported and ignored.
pub fn literal_patterns(config: &Config, root: &Path) -> Vec<LiteralPattern> {
    let Some(path) = config.pattern_file(root) else {
        return Vec::new();
    };
    load_literal_patterns(&path).unwrap_or_else(|e| {
        warn!("Ignoring pattern file: {}", e);
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_root_is_nearest_marker() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("a").join("package.json"), "{}").unwrap();

        assert_eq!(project_root_from(&nested), dir.path().join("a"));
    }

    #[test]
    fn missing_config_explains_itself() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("config.yaml")).unwrap_err();
        let message = format!("{err}");
        assert!(message.contains("Config file not found"));
        assert!(message.contains("hitsDir"));
    }

    #[test]
    fn invalid_config_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "threshold: [not, a, number]").unwrap();
        assert!(load_config(&path).is_err());
        assert_eq!(load_config_or_default(&path), Config::default());
    }

    #[test]
    fn pattern_file_is_loaded_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("patterns.json"),
            r#"[{"pattern": "sku-[0-9]+", "replace": "sku"}]"#,
        )
        .unwrap();
        let config = Config {
            pattern_file: Some("patterns.json".into()),
            ..Config::default()
        };
        let patterns = literal_patterns(&config, dir.path());
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].replace, "sku");

        let missing = Config {
            pattern_file: Some("nope.json".into()),
            ..Config::default()
        };
        assert!(literal_patterns(&missing, dir.path()).is_empty());
    }
}
