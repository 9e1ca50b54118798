//! Endpoint keys and path-segment helpers
//!
//! An endpoint key is `METHOD /path`. Paths are compared segment by segment:
//! a placeholder segment (`{id}`, or any segment containing a `{name}`) matches
//! any value, literal segments must be equal.

use crate::error::{CoverageError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};

/// The seven standard methods reported in the per-method breakdown.
pub const HTTP_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Placeholder token used when comparing path shapes.
pub const SHAPE_PLACEHOLDER: &str = "{}";

/// One documented or observed operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointKey {
    method: String,
    path: String,
}

impl EndpointKey {
    /// Build a key, uppercasing the method and normalizing slashes.
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.trim().to_ascii_uppercase(),
            path: normalize_slashes(path),
        }
    }

    /// Parse `METHOD /path`.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || CoverageError::InvalidEndpointKey(s.to_string());
        let (method, path) = s.trim().split_once(' ').ok_or_else(invalid)?;
        let path = path.trim();
        if method.is_empty()
            || !method.chars().all(|c| c.is_ascii_alphabetic())
            || !path.starts_with('/')
        {
            return Err(invalid());
        }
        Ok(Self::new(method, path))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the path has at least one placeholder segment.
    pub fn is_templated(&self) -> bool {
        is_templated_path(&self.path)
    }

    /// Whether `self`, read as a template, structurally matches `other`:
    /// same method, same segment count, literal segments equal.
    pub fn matches(&self, other: &EndpointKey) -> bool {
        self.method == other.method && segments_match(&self.path, &other.path)
    }

    /// Method plus path with every placeholder replaced by [`SHAPE_PLACEHOLDER`].
    pub fn shape(&self) -> String {
        format!("{} {}", self.method, path_shape(&self.path))
    }

    /// Number of literal (non-placeholder) segments.
    pub fn literal_segments(&self) -> usize {
        segments(&self.path).filter(|s| !is_placeholder(s)).count()
    }
}

impl Display for EndpointKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

impl std::str::FromStr for EndpointKey {
    type Err = CoverageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for EndpointKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EndpointKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// `/`-prefixed path with empty segments and the trailing slash removed.
pub fn normalize_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in segments(path) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Non-empty segments of a path.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// A segment containing a `{name}` placeholder.
pub fn is_placeholder(segment: &str) -> bool {
    match (segment.find('{'), segment.rfind('}')) {
        (Some(open), Some(close)) => open + 1 < close,
        _ => false,
    }
}

pub fn is_templated_path(path: &str) -> bool {
    segments(path).any(is_placeholder)
}

/// Structural match of a concrete (or templated) path against a template.
pub fn segments_match(template: &str, path: &str) -> bool {
    let mut t = segments(template);
    let mut p = segments(path);
    loop {
        match (t.next(), p.next()) {
            (None, None) => return true,
            (Some(ts), Some(ps)) => {
                if !is_placeholder(ts) && ts != ps {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

/// Path with every placeholder segment replaced by [`SHAPE_PLACEHOLDER`].
pub fn path_shape(path: &str) -> String {
    let mut out = String::new();
    for segment in segments(path) {
        out.push('/');
        if is_placeholder(segment) {
            out.push_str(SHAPE_PLACEHOLDER);
        } else {
            out.push_str(segment);
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}
