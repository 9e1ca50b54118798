//! Pattern learning from unmatched traffic
//!
//! Concrete paths that nothing resolved are grouped by a structural
//! signature. Groups of two or more distinct paths that no existing pattern
//! covers become new templates, e.g. `/widgets/1` and `/widgets/2` yield
//! `/widgets/{widget_id}`.

use crate::endpoint::segments;
use crate::error::Result;
use crate::pattern::{
    PathPattern, PatternOrigin, PatternSet, ANY_SEGMENT_RE, LEARNED_PRIORITY, NUMBER_RE,
    OBJECT_ID_RE, UUID_RE,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Resource nouns folded to lowercase in signatures, so `/Users/1` and
/// `/users/2` land in the same group.
const COMMON_RESOURCES: &[&str] = &[
    "accounts", "api", "articles", "categories", "comments", "customers", "events", "files",
    "groups", "invoices", "items", "messages", "orders", "payments", "posts", "products",
    "projects", "sessions", "tags", "teams", "users",
];

/// Shape of one path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SegmentShape {
    Literal(String),
    Number,
    ObjectId,
    Uuid,
    Hash,
    Token,
}

impl SegmentShape {
    pub fn classify(segment: &str) -> Self {
        let len = segment.len();
        let all_hex = segment.chars().all(|c| c.is_ascii_hexdigit());
        if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
            SegmentShape::Number
        } else if len == 24 && all_hex {
            SegmentShape::ObjectId
        } else if is_uuid(segment) {
            SegmentShape::Uuid
        } else if (12..=40).contains(&len) && all_hex {
            SegmentShape::Hash
        } else if is_token(segment) {
            SegmentShape::Token
        } else {
            let lowered = segment.to_ascii_lowercase();
            if COMMON_RESOURCES.contains(&lowered.as_str()) {
                SegmentShape::Literal(lowered)
            } else {
                SegmentShape::Literal(segment.to_string())
            }
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, SegmentShape::Literal(_))
    }

    fn as_signature(&self) -> &str {
        match self {
            SegmentShape::Literal(s) => s,
            SegmentShape::Number => "{number}",
            SegmentShape::ObjectId => "{objectId}",
            SegmentShape::Uuid => "{uuid}",
            SegmentShape::Hash => "{hash}",
            SegmentShape::Token => "{token}",
        }
    }
}

fn is_uuid(s: &str) -> bool {
    let groups: Vec<&str> = s.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(g, n)| g.len() == n && g.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Long opaque identifiers: 16+ chars of `[A-Za-z0-9_-.]` mixing letters and digits.
fn is_token(s: &str) -> bool {
    s.len() >= 16
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && s.chars().any(|c| c.is_ascii_digit())
        && s.chars().any(|c| c.is_ascii_alphabetic())
}

/// Signature string of a path, e.g. `/users/{number}/posts`.
pub fn signature(path: &str) -> String {
    let mut out = String::new();
    for segment in segments(path) {
        out.push('/');
        out.push_str(SegmentShape::classify(segment).as_signature());
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Type a variable segment by the majority shape of its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    Numeric,
    Uuid,
    ObjectId,
    Generic,
}

impl ParamKind {
    fn of(value: &str) -> Self {
        match SegmentShape::classify(value) {
            SegmentShape::Number => ParamKind::Numeric,
            SegmentShape::Uuid => ParamKind::Uuid,
            SegmentShape::ObjectId => ParamKind::ObjectId,
            _ => ParamKind::Generic,
        }
    }

    fn majority<'a>(values: impl Iterator<Item = &'a str>) -> Self {
        let mut counts = [0usize; 4];
        for v in values {
            counts[ParamKind::of(v) as usize] += 1;
        }
        let kinds = [
            ParamKind::Numeric,
            ParamKind::Uuid,
            ParamKind::ObjectId,
            ParamKind::Generic,
        ];
        let mut best = ParamKind::Generic;
        let mut best_count = 0;
        for kind in kinds {
            if counts[kind as usize] > best_count {
                best = kind;
                best_count = counts[kind as usize];
            }
        }
        best
    }

    fn matcher(&self) -> &'static str {
        match self {
            ParamKind::Numeric => NUMBER_RE,
            ParamKind::Uuid => UUID_RE,
            ParamKind::ObjectId => OBJECT_ID_RE,
            ParamKind::Generic => ANY_SEGMENT_RE,
        }
    }
}

/// `users` -> `user_id`, `categories` -> `category_id`.
fn parameter_name(preceding: &str) -> Option<String> {
    if preceding.is_empty() || !preceding.chars().all(|c| c.is_ascii_alphabetic() || c == '_' || c == '-') {
        return None;
    }
    let lowered = preceding.to_ascii_lowercase().replace('-', "_");
    let singular = if let Some(stem) = lowered.strip_suffix("ies") {
        format!("{stem}y")
    } else if lowered.ends_with("sses") || lowered.ends_with("xes") {
        lowered[..lowered.len() - 2].to_string()
    } else if lowered.ends_with('s') && !lowered.ends_with("ss") {
        lowered[..lowered.len() - 1].to_string()
    } else {
        lowered
    };
    Some(format!("{singular}_id"))
}

/// Build the template and per-parameter matchers for one signature group.
fn synthesize(members: &[&str]) -> Option<(String, HashMap<String, &'static str>)> {
    let rows: Vec<Vec<&str>> = members.iter().map(|m| segments(m).collect()).collect();
    let width = rows.first()?.len();

    let mut template_segments: Vec<String> = Vec::with_capacity(width);
    let mut matchers: HashMap<String, &'static str> = HashMap::new();
    let mut param_count = 0;

    for idx in 0..width {
        let column: Vec<&str> = rows.iter().map(|r| r[idx]).collect();
        let shape = SegmentShape::classify(column[0]);
        let distinct: HashSet<&str> = column.iter().copied().collect();

        // Literal or constant column: keep the first member's spelling
        if shape.is_literal() || distinct.len() == 1 {
            template_segments.push(column[0].to_string());
            continue;
        }

        // Varying column becomes a named parameter
        param_count += 1;
        let preceding = idx
            .checked_sub(1)
            .and_then(|prev| template_segments.get(prev))
            .filter(|s| !s.starts_with('{'))
            .and_then(|s| parameter_name(s));
        let mut name = preceding.unwrap_or_else(|| format!("param{param_count}"));
        if matchers.contains_key(&name) {
            name = format!("{name}_{param_count}");
        }
        matchers.insert(
            name.clone(),
            ParamKind::majority(column.iter().copied()).matcher(),
        );
        template_segments.push(format!("{{{name}}}"));
    }

    if matchers.is_empty() {
        return None;
    }
    let template = format!("/{}", template_segments.join("/"));
    Some((template, matchers))
}

fn build_pattern(template: &str, matchers: &HashMap<String, &'static str>) -> Result<PathPattern> {
    PathPattern::from_template_ignore_case(
        template,
        LEARNED_PRIORITY,
        PatternOrigin::Learned,
        |name| {
            matchers
                .get(name)
                .copied()
                .unwrap_or(ANY_SEGMENT_RE)
                .to_string()
        },
    )
}

/// Learn templates from `paths`, skipping groups `known` already covers.
///
/// Best effort: a group whose pattern fails to build is skipped on its own.
pub fn learn_patterns(paths: &[String], known: &PatternSet) -> Vec<PathPattern> {
    // Group distinct paths by signature, keeping first-seen order
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&str>> = HashMap::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for path in paths {
        if !seen.insert(path.as_str()) {
            continue;
        }
        let sig = signature(path);
        let group = groups.entry(sig.clone()).or_default();
        if group.is_empty() {
            order.push(sig);
        }
        group.push(path.as_str());
    }

    // One template per uncovered group
    let mut learned = Vec::new();
    for sig in order {
        let members = &groups[&sig];
        if members.len() < 2 || members.iter().all(|m| known.accepts(m)) {
            continue;
        }
        let Some((template, matchers)) = synthesize(members) else {
            continue;
        };
        if known.has_template(&template) || learned.iter().any(|p: &PathPattern| p.template() == template) {
            continue;
        }
        match build_pattern(&template, &matchers) {
            Ok(pattern) => learned.push(pattern),
            Err(e) => debug!("Discarding learned group {}: {}", sig, e),
        }
    }
    learned
}

/// Incremental learner holding the history of unmatched paths.
#[derive(Debug, Default)]
pub struct PatternLearner {
    history: Vec<String>,
    seen: HashSet<String>,
    groups: HashMap<String, Vec<String>>,
}

impl PatternLearner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an unmatched path and return any patterns it completes.
    ///
    /// Only the new path's signature group can change, so only that group is
    /// re-examined.
    pub fn observe(&mut self, path: &str, known: &PatternSet) -> Vec<PathPattern> {
        if !self.seen.insert(path.to_string()) {
            return Vec::new();
        }
        self.history.push(path.to_string());

        let group = self.groups.entry(signature(path)).or_default();
        group.push(path.to_string());
        let learned = learn_patterns(group, known);
        for pattern in &learned {
            info!(
                "Learned pattern {} from {} observed paths",
                pattern.template(),
                group.len()
            );
        }
        learned
    }

    /// Unmatched paths seen so far, in arrival order.
    pub fn history(&self) -> &[String] {
        &self.history
    }
}
