//! Path patterns and the spec-derived pattern compiler
//!
//! A [`PathPattern`] is a regex plus the template it rewrites a matching path
//! to. Patterns come from three places (operator config, the spec, and traffic
//! learning) but are tried the same way: in a [`PatternSet`] sorted by
//! priority, highest first, declaration order among equals.

use crate::endpoint::{is_placeholder, segments};
use crate::error::{CoverageError, Result};
use crate::openapi::{ResolvedParameter, SpecIndex};
use regex::{NoExpand, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const CUSTOM_PRIORITY: i32 = 100;
pub const SPEC_PRIORITY: i32 = 50;
pub const LEARNED_PRIORITY: i32 = 30;

pub(crate) const UUID_RE: &str =
    "[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}";
pub(crate) const OBJECT_ID_RE: &str = "[0-9a-fA-F]{24}";
pub(crate) const NUMBER_RE: &str = "[0-9]+";
pub(crate) const ANY_SEGMENT_RE: &str = "[^/]+";
const DATE_RE: &str = "[0-9]{4}-[0-9]{2}-[0-9]{2}";
const DATE_TIME_RE: &str =
    "[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}(?:\\.[0-9]+)?(?:Z|[+-][0-9]{2}:?[0-9]{2})?";

/// Where a pattern came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternOrigin {
    /// Declared by the operator in config
    Custom,
    /// Generated from a templated spec path
    Spec,
    /// Synthesized from observed traffic
    Learned,
}

impl PatternOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternOrigin::Custom => "custom",
            PatternOrigin::Spec => "spec",
            PatternOrigin::Learned => "learned",
        }
    }
}

/// Operator-declared pattern, as written in config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomPattern {
    /// Regular expression tested against the observed path
    pub pattern: String,
    /// Replacement; `$1` / `${name}` expand capture groups
    pub template: String,
    #[serde(default = "default_custom_priority")]
    pub priority: i32,
}

fn default_custom_priority() -> i32 {
    CUSTOM_PRIORITY
}

#[derive(Debug, Clone)]
pub struct PathPattern {
    regex: Regex,
    template: String,
    priority: i32,
    origin: PatternOrigin,
    expand_captures: bool,
    /// Segment count a path must have; `None` for operator patterns
    segment_count: Option<usize>,
}

impl PathPattern {
    /// Compile an operator-declared pattern.
    pub fn custom(custom: &CustomPattern) -> Result<Self> {
        let regex = Regex::new(&custom.pattern).map_err(|e| CoverageError::PatternCompile {
            template: custom.template.clone(),
            source: Box::new(e),
        })?;
        Ok(Self {
            regex,
            template: custom.template.clone(),
            priority: custom.priority,
            origin: PatternOrigin::Custom,
            expand_captures: true,
            segment_count: None,
        })
    }

    /// Compile a `{name}` template into an anchored matcher, asking
    /// `matcher_for` for the regex fragment of each parameter.
    ///
    /// A path is only accepted with the template's segment count, so a
    /// fragment like `.+` cannot swallow a `/`.
    pub fn from_template(
        template: &str,
        priority: i32,
        origin: PatternOrigin,
        matcher_for: impl Fn(&str) -> String,
    ) -> Result<Self> {
        Self::compile_template(template, priority, origin, matcher_for, false)
    }

    /// Like [`PathPattern::from_template`], with literal text matched
    /// case-insensitively.
    pub fn from_template_ignore_case(
        template: &str,
        priority: i32,
        origin: PatternOrigin,
        matcher_for: impl Fn(&str) -> String,
    ) -> Result<Self> {
        Self::compile_template(template, priority, origin, matcher_for, true)
    }

    fn compile_template(
        template: &str,
        priority: i32,
        origin: PatternOrigin,
        matcher_for: impl Fn(&str) -> String,
        ignore_case: bool,
    ) -> Result<Self> {
        let mut source = String::from("^");
        for segment in segments(template) {
            source.push('/');
            push_segment(&mut source, segment, &matcher_for);
        }
        if source.len() == 1 {
            source.push('/');
        }
        source.push('$');

        let regex = RegexBuilder::new(&source)
            .case_insensitive(ignore_case)
            .build()
            .map_err(|e| CoverageError::PatternCompile {
                template: template.to_string(),
                source: Box::new(e),
            })?;
        Ok(Self {
            regex,
            template: template.to_string(),
            priority,
            origin,
            expand_captures: false,
            segment_count: Some(segments(template).count()),
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn origin(&self) -> PatternOrigin {
        self.origin
    }

    pub fn as_regex(&self) -> &Regex {
        &self.regex
    }

    pub fn accepts(&self, path: &str) -> bool {
        let shape_fits = self
            .segment_count
            .map_or(true, |n| segments(path).count() == n);
        shape_fits && self.regex.is_match(path)
    }

    /// Rewrite `path` to this pattern's template, if it matches.
    pub fn apply(&self, path: &str) -> Option<String> {
        if !self.accepts(path) {
            return None;
        }
        let rewritten = if self.expand_captures {
            self.regex.replace(path, self.template.as_str())
        } else {
            self.regex.replace(path, NoExpand(&self.template))
        };
        Some(rewritten.into_owned())
    }
}

/// Regex source for one template segment; literal text is escaped and each
/// `{name}` becomes a non-capturing group.
fn push_segment(out: &mut String, segment: &str, matcher_for: &impl Fn(&str) -> String) {
    let mut rest = segment;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|c| open + c) else {
            break;
        };
        out.push_str(&regex::escape(&rest[..open]));
        out.push_str("(?:");
        out.push_str(&matcher_for(&rest[open + 1..close]));
        out.push(')');
        rest = &rest[close + 1..];
    }
    out.push_str(&regex::escape(rest));
}

/// Ordered strategy chain of patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<PathPattern>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert after every pattern of greater or equal priority.
    pub fn push(&mut self, pattern: PathPattern) {
        let at = self
            .patterns
            .iter()
            .position(|p| p.priority < pattern.priority)
            .unwrap_or(self.patterns.len());
        self.patterns.insert(at, pattern);
    }

    pub fn extend(&mut self, patterns: impl IntoIterator<Item = PathPattern>) {
        for p in patterns {
            self.push(p);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathPattern> {
        self.patterns.iter()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// First pattern (by priority) that accepts `path`, with its rewrite.
    pub fn resolve(&self, path: &str) -> Option<(&PathPattern, String)> {
        self.patterns
            .iter()
            .find_map(|p| p.apply(path).map(|rewritten| (p, rewritten)))
    }

    pub fn accepts(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.accepts(path))
    }

    pub fn has_template(&self, template: &str) -> bool {
        self.patterns.iter().any(|p| p.template == template)
    }
}

/// Regex fragment for a spec parameter, most specific evidence first.
pub fn parameter_matcher(name: &str, param: Option<&ResolvedParameter>) -> String {
    if let Some(param) = param {
        if let Some(pattern) = param.pattern.as_deref().filter(|p| !p.is_empty()) {
            let pattern = pattern.strip_prefix('^').unwrap_or(pattern);
            let pattern = pattern.strip_suffix('$').unwrap_or(pattern);
            return pattern.to_string();
        }
        if !param.enum_values.is_empty() {
            let alternatives: Vec<String> =
                param.enum_values.iter().map(|v| regex::escape(v)).collect();
            return alternatives.join("|");
        }
        if matches!(param.schema_type.as_deref(), Some("integer" | "number")) {
            return NUMBER_RE.to_string();
        }
        match param.format.as_deref() {
            Some("uuid") => return UUID_RE.to_string(),
            Some("date") => return DATE_RE.to_string(),
            Some("date-time") => return DATE_TIME_RE.to_string(),
            _ => {}
        }
    }
    if name.to_ascii_lowercase().contains("id") {
        return format!("{NUMBER_RE}|{UUID_RE}|{OBJECT_ID_RE}");
    }
    ANY_SEGMENT_RE.to_string()
}

/// Build one pattern per templated spec path. Paths whose pattern fails to
/// compile are logged and skipped.
pub fn compile_spec_patterns(spec: &SpecIndex) -> Vec<PathPattern> {
    let mut out = Vec::new();
    for path in spec.paths() {
        if !segments(path).any(is_placeholder) {
            continue;
        }
        let params = spec.resolved_parameters(path);
        let compiled = PathPattern::from_template(path, SPEC_PRIORITY, PatternOrigin::Spec, |name| {
            parameter_matcher(name, params.iter().find(|p| p.name == name))
        });
        match compiled {
            Ok(pattern) => {
                debug!("Compiled {} as {}", path, pattern.as_regex().as_str());
                out.push(pattern);
            }
            Err(e) => warn!("Skipping spec path: {}", e),
        }
    }
    out
}

/// Compile operator patterns, keeping declaration order. Invalid ones are
/// logged and skipped.
pub fn compile_custom_patterns(custom: &[CustomPattern]) -> Vec<PathPattern> {
    custom
        .iter()
        .filter_map(|c| match PathPattern::custom(c) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("Skipping custom pattern {:?}: {}", c.pattern, e);
                None
            }
        })
        .collect()
}
