//! Cross-worker reconciliation of hits and server errors
//!
//! The aggregator never writes into the hits directory. It reads every
//! worker's snapshot, re-applies the structural dedup rule over their union
//! and merges error records by the same structural grouping.

use crate::dedup::KeySet;
use crate::endpoint::{is_placeholder, segments, EndpointKey, SHAPE_PLACEHOLDER};
use crate::error::{CoverageError, Result};
use crate::learn::SegmentShape;
use crate::openapi::SpecIndex;
use crate::store::{load_snapshots, ErrorMap, WorkerSnapshot};
use apicov_api::ServerErrorRecord;
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

/// One entry of an external pattern file: every match of `pattern` in a path
/// is replaced by the `{replace}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiteralPattern {
    pub pattern: String,
    pub replace: String,
}

/// Read an external pattern file (a JSON array of `{pattern, replace}`).
pub fn load_literal_patterns(path: &Path) -> Result<Vec<LiteralPattern>> {
    let content = std::fs::read_to_string(path).map_err(|e| CoverageError::io(path, e))?;
    serde_json::from_str(&content).map_err(|source| CoverageError::CorruptFile {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone)]
struct CompiledLiteral {
    regex: Regex,
    placeholder: String,
}

fn compile_literal(pattern: &LiteralPattern) -> Result<CompiledLiteral> {
    let regex = Regex::new(&pattern.pattern).map_err(|e| CoverageError::PatternCompile {
        template: pattern.replace.clone(),
        source: Box::new(e),
    })?;
    let name = pattern.replace.trim_matches(|c| c == '{' || c == '}');
    Ok(CompiledLiteral {
        regex,
        placeholder: format!("{{{name}}}"),
    })
}

/// Substitutions whose result has a broken placeholder shape.
fn check_placeholder_shape(path: &str, result: &str) -> Result<()> {
    if ["{{", "}}", "}{"].iter().any(|bad| result.contains(bad)) {
        return Err(CoverageError::MalformedPatternResult {
            path: path.to_string(),
            result: result.to_string(),
        });
    }
    Ok(())
}

/// Coarse grouping key: id-shaped segments and placeholders collapse to `{}`.
fn coarse_signature(key: &EndpointKey) -> String {
    let mut out = String::from(key.method());
    out.push(' ');
    for segment in segments(key.path()) {
        out.push('/');
        let id_like = is_placeholder(segment)
            || matches!(
                SegmentShape::classify(segment),
                SegmentShape::Number | SegmentShape::ObjectId | SegmentShape::Uuid | SegmentShape::Hash
            );
        out.push_str(if id_like { SHAPE_PLACEHOLDER } else { segment });
    }
    out
}

/// Union of hits and merged errors across workers.
#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    pub hits: Vec<EndpointKey>,
    pub errors: ErrorMap,
}

/// Snapshots of every worker in `dir`, with `current` (this worker's in-memory
/// state) standing in for whatever it has on disk. Sorted by worker id so the
/// result does not depend on which worker aggregates.
pub fn collect_snapshots(dir: &Path, current: Option<WorkerSnapshot>) -> Vec<WorkerSnapshot> {
    let exclude = current.as_ref().map(|c| c.worker_id.clone());
    let mut snapshots = load_snapshots(dir, exclude.as_deref());
    snapshots.extend(current);
    snapshots.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
    snapshots
}

#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    protected: HashSet<EndpointKey>,
    literals: Vec<CompiledLiteral>,
}

impl Aggregator {
    /// Declared concrete keys of `spec` are never absorbed by a template.
    pub fn new(spec: &SpecIndex) -> Self {
        Self {
            protected: spec
                .keys()
                .iter()
                .filter(|k| !k.is_templated())
                .cloned()
                .collect(),
            literals: Vec::new(),
        }
    }

    /// Apply an external pattern file's substitutions; entries that fail to
    /// compile are logged and skipped.
    pub fn with_literal_patterns(mut self, patterns: &[LiteralPattern]) -> Self {
        for pattern in patterns {
            match compile_literal(pattern) {
                Ok(compiled) => self.literals.push(compiled),
                Err(e) => warn!("Skipping literal pattern {:?}: {}", pattern.pattern, e),
            }
        }
        self
    }

    pub fn aggregate(&self, snapshots: &[WorkerSnapshot]) -> Aggregate {
        let hits = self.reconcile(snapshots.iter().flat_map(|s| s.hits.iter().map(String::as_str)));
        let errors = self.merge_errors_onto(snapshots.iter().map(|s| &s.errors), &hits);
        debug!(
            "Aggregated {} workers into {} hits and {} error groups",
            snapshots.len(),
            hits.len(),
            errors.len()
        );
        Aggregate { hits, errors }
    }

    /// Apply literal substitutions to the path of `key`, one pattern at a time.
    /// A substitution with a malformed result is dropped and the path it was
    /// applied to is kept.
    pub fn apply_literal_patterns(&self, key: &EndpointKey) -> EndpointKey {
        if self.literals.is_empty() {
            return key.clone();
        }
        let mut path = key.path().to_string();
        for literal in &self.literals {
            let replaced = literal
                .regex
                .replace_all(&path, NoExpand(&literal.placeholder))
                .into_owned();
            if replaced == path {
                continue;
            }
            match check_placeholder_shape(&path, &replaced) {
                Ok(()) => path = replaced,
                Err(e) => warn!("{}", e),
            }
        }
        EndpointKey::new(key.method(), &path)
    }

    /// Deduplicate raw hit strings from every worker.
    ///
    /// First collapses id-shaped variants within each coarse group, then
    /// applies literal substitutions and runs the full structural dedup over
    /// the survivors.
    pub fn reconcile<'a>(&self, hits: impl IntoIterator<Item = &'a str>) -> Vec<EndpointKey> {
        // Dedup within coarse signature groups
        let mut group_index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<KeySet> = Vec::new();
        for raw in hits {
            let key = match EndpointKey::parse(raw) {
                Ok(key) => key,
                Err(e) => {
                    warn!("Ignoring hit: {}", e);
                    continue;
                }
            };
            let slot = *group_index
                .entry(coarse_signature(&key))
                .or_insert_with(|| {
                    groups.push(self.key_set());
                    groups.len() - 1
                });
            groups[slot].insert(key);
        }

        // Full dedup over the survivors, after literal substitution
        let mut result = self.key_set();
        for key in groups.into_iter().flat_map(KeySet::into_keys) {
            result.insert(self.apply_literal_patterns(&key));
        }
        result.into_keys()
    }

    /// Merge error maps from every worker, grouping structurally matching keys.
    /// A templated key wins as the group representative.
    pub fn merge_errors<'a>(&self, maps: impl IntoIterator<Item = &'a ErrorMap>) -> ErrorMap {
        self.merge_errors_onto(maps, &[])
    }

    /// Like [`Aggregator::merge_errors`], but a concrete error key that a
    /// templated key in `hits` matches is filed under that template.
    pub fn merge_errors_onto<'a>(
        &self,
        maps: impl IntoIterator<Item = &'a ErrorMap>,
        hits: &[EndpointKey],
    ) -> ErrorMap {
        let mut groups: Vec<(EndpointKey, ServerErrorRecord)> = Vec::new();
        for (raw, record) in maps.into_iter().flatten() {
            let key = match EndpointKey::parse(raw) {
                Ok(key) => self.apply_literal_patterns(&key),
                Err(e) => {
                    warn!("Ignoring server errors: {}", e);
                    continue;
                }
            };
            let key = self.anchor(key, hits);
            self.merge_into(&mut groups, key, record);
        }
        groups
            .into_iter()
            .map(|(key, record)| (key.to_string(), record))
            .collect()
    }

    fn merge_into(
        &self,
        groups: &mut Vec<(EndpointKey, ServerErrorRecord)>,
        key: EndpointKey,
        record: &ServerErrorRecord,
    ) {
        let joins = |existing: &EndpointKey| {
            existing == &key
                || (existing.is_templated()
                    && if key.is_templated() {
                        existing.shape() == key.shape()
                    } else {
                        !self.protected.contains(&key) && existing.matches(&key)
                    })
        };
        // Join an existing group
        if let Some((_, merged)) = groups.iter_mut().find(|(existing, _)| joins(existing)) {
            merged.merge(record);
            return;
        }

        // New group; a template absorbs the concrete groups it matches
        let mut merged = record.clone();
        if key.is_templated() {
            groups.retain(|(existing, absorbed)| {
                let absorb = !existing.is_templated()
                    && !self.protected.contains(existing)
                    && key.matches(existing);
                if absorb {
                    merged.merge(absorbed);
                }
                !absorb
            });
        }
        groups.push((key, merged));
    }

    fn anchor(&self, key: EndpointKey, hits: &[EndpointKey]) -> EndpointKey {
        if key.is_templated() || self.protected.contains(&key) {
            return key;
        }
        hits.iter()
            .find(|hit| hit.is_templated() && hit.matches(&key))
            .cloned()
            .unwrap_or(key)
    }

    fn key_set(&self) -> KeySet {
        KeySet::with_protected(self.protected.iter().cloned())
    }
}
