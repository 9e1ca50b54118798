//! Resolution of observed paths to canonical endpoint templates
//!
//! Strategies are tried in order and the first success wins:
//!
//! 1. exact match against a declared path for the same method
//! 2. structural match against a declared path for the same method
//! 3. the pattern chain (custom, spec-derived, learned; by priority)
//! 4. the slash-normalized raw path
//!
//! Every step falls through to the next, so resolution never fails.

use crate::endpoint::{normalize_slashes, path_shape, segments_match, EndpointKey};
use crate::openapi::SpecIndex;
use crate::pattern::{
    compile_custom_patterns, compile_spec_patterns, CustomPattern, PathPattern, PatternOrigin,
    PatternSet,
};
use tracing::debug;

/// Which strategy produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Exact,
    Structural,
    Pattern(PatternOrigin),
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub path: String,
    pub strategy: Strategy,
}

#[derive(Debug, Clone, Default)]
pub struct PathNormalizer {
    /// Declared keys in document order
    declared: Vec<EndpointKey>,
    patterns: PatternSet,
}

impl PathNormalizer {
    /// Build a normalizer over `spec`, with operator patterns ahead of the
    /// spec-derived ones at equal priority.
    pub fn new(spec: &SpecIndex, custom: &[CustomPattern]) -> Self {
        let mut patterns = PatternSet::new();
        patterns.extend(compile_custom_patterns(custom));
        patterns.extend(compile_spec_patterns(spec));
        Self {
            declared: spec.keys().to_vec(),
            patterns,
        }
    }

    /// Append learned patterns; they keep arrival order among themselves.
    pub fn add_patterns(&mut self, patterns: impl IntoIterator<Item = PathPattern>) {
        self.patterns.extend(patterns);
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    /// Canonical path for an observed `(method, path)`.
    pub fn normalize(&self, method: &str, raw: &str) -> String {
        self.resolve(method, raw).path
    }

    pub fn resolve(&self, method: &str, raw: &str) -> Resolution {
        let method = method.trim().to_ascii_uppercase();
        let method = method.as_str();
        let path = normalize_slashes(raw);
        let declared = &self.declared;
        let same_method = move || declared.iter().filter(move |k| k.method() == method);

        if same_method().any(|k| k.path() == path) {
            return Resolution {
                path,
                strategy: Strategy::Exact,
            };
        }

        let structural = most_specific(same_method().filter(|k| segments_match(k.path(), &path)));
        if let Some(key) = structural {
            return Resolution {
                path: key.path().to_string(),
                strategy: Strategy::Structural,
            };
        }

        if let Some((pattern, candidate)) = self.patterns.resolve(&path) {
            let candidate = normalize_slashes(&candidate);
            let shape = path_shape(&candidate);
            // Declared spelling wins over the pattern's parameter names.
            let canonical = same_method()
                .find(|k| k.path() == candidate)
                .or_else(|| same_method().find(|k| path_shape(k.path()) == shape))
                .map(|k| k.path().to_string())
                .unwrap_or(candidate);
            debug!(
                "{} {} -> {} via {} pattern",
                method,
                path,
                canonical,
                pattern.origin().as_str()
            );
            return Resolution {
                path: canonical,
                strategy: Strategy::Pattern(pattern.origin()),
            };
        }

        Resolution {
            path,
            strategy: Strategy::Unmatched,
        }
    }
}

/// The candidate with the most literal segments; the first one on ties.
fn most_specific<'a>(candidates: impl Iterator<Item = &'a EndpointKey>) -> Option<&'a EndpointKey> {
    let mut best: Option<&EndpointKey> = None;
    for candidate in candidates {
        match best {
            Some(b) if b.literal_segments() >= candidate.literal_segments() => {}
            _ => best = Some(candidate),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::CUSTOM_PRIORITY;

    const USERS: &str = r#"{
        "paths": {
            "/users": {"get": {}, "post": {}},
            "/users/me": {"get": {}},
            "/users/{id}": {
                "get": {"parameters": [{"name": "id", "in": "path", "schema": {"type": "integer"}}]},
                "put": {},
                "delete": {}
            },
            "/{tenant}/users/{id}": {"get": {}},
            "/acme/users/{id}": {"get": {}},
            "/files/{fileId}": {"put": {}}
        }
    }"#;

    fn normalizer(custom: &[CustomPattern]) -> PathNormalizer {
        PathNormalizer::new(&SpecIndex::parse(USERS).unwrap(), custom)
    }

    #[test]
    fn concrete_paths_resolve_to_declared_templates() {
        let n = normalizer(&[]);
        assert_eq!(n.normalize("GET", "/users/42"), "/users/{id}");
        assert_eq!(n.normalize("delete", "/users/42/"), "/users/{id}");
        assert_eq!(n.normalize("GET", "/users"), "/users");
    }

    #[test]
    fn exact_literal_beats_template() {
        let n = normalizer(&[]);
        let r = n.resolve("GET", "/users/me");
        assert_eq!(r.path, "/users/me");
        assert_eq!(r.strategy, Strategy::Exact);
    }

    #[test]
    fn structural_prefers_more_literal_segments() {
        let n = normalizer(&[]);
        assert_eq!(n.normalize("GET", "/acme/users/9"), "/acme/users/{id}");
        assert_eq!(n.normalize("GET", "/globex/users/9"), "/{tenant}/users/{id}");
    }

    #[test]
    fn structural_match_requires_same_method() {
        let n = normalizer(&[]);
        // Only PUT declares /files/{fileId}; GET falls through to the
        // spec-derived pattern, which is method-agnostic.
        let r = n.resolve("GET", "/files/17");
        assert_eq!(r.path, "/files/{fileId}");
        assert_eq!(r.strategy, Strategy::Pattern(PatternOrigin::Spec));

        let r = n.resolve("PUT", "/files/17");
        assert_eq!(r.strategy, Strategy::Structural);
    }

    #[test]
    fn custom_pattern_beats_spec_pattern() {
        let custom = [CustomPattern {
            pattern: r"^/files/\d+$".into(),
            template: "/files/{numericFile}".into(),
            priority: CUSTOM_PRIORITY,
        }];
        let n = normalizer(&custom);
        let r = n.resolve("GET", "/files/17");
        assert_eq!(r.strategy, Strategy::Pattern(PatternOrigin::Custom));
        assert_eq!(r.path, "/files/{numericFile}");
    }

    #[test]
    fn pattern_candidates_take_declared_spelling() {
        let custom = [CustomPattern {
            pattern: r"^/legacy/users/\d+$".into(),
            template: "/users/{userId}".into(),
            priority: CUSTOM_PRIORITY,
        }];
        let spec = SpecIndex::parse(r#"{"paths": {"/users/{id}": {"post": {}}}}"#).unwrap();
        let n = PathNormalizer::new(&spec, &custom);
        assert_eq!(n.normalize("POST", "/legacy/users/5"), "/users/{id}");
    }

    #[test]
    fn unmatched_paths_come_back_normalized() {
        let n = normalizer(&[]);
        let r = n.resolve("GET", "health//live/");
        assert_eq!(r.path, "/health/live");
        assert_eq!(r.strategy, Strategy::Unmatched);
    }

    #[test]
    fn normalization_is_idempotent() {
        let n = normalizer(&[]);
        for (method, raw) in [
            ("GET", "/users/42"),
            ("GET", "/files/3"),
            ("GET", "/acme/users/1"),
            ("GET", "/nothing/here"),
        ] {
            let once = n.normalize(method, raw);
            assert_eq!(n.normalize(method, &once), once, "{method} {raw}");
        }
    }

    #[test]
    fn learned_patterns_rank_last() {
        let mut n = normalizer(&[]);
        let learned =
            PathPattern::from_template("/users/{user_id}", 30, PatternOrigin::Learned, |_| {
                "[0-9]+".into()
            })
            .unwrap();
        n.add_patterns([learned]);
        let origins: Vec<PatternOrigin> = n.patterns().iter().map(|p| p.origin()).collect();
        assert_eq!(origins.last(), Some(&PatternOrigin::Learned));
    }
}
