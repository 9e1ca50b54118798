//! Per-worker hit set and server error map
//!
//! The tracker applies the structural dedup rule on every insertion and, when
//! it has a [`WorkerStore`], rewrites the whole snapshot after each change so
//! a crashed worker loses nothing it already observed.

use crate::dedup::KeySet;
use crate::endpoint::EndpointKey;
use crate::store::{ErrorMap, WorkerStore};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct HitTracker {
    keys: KeySet,
    errors: ErrorMap,
    store: Option<WorkerStore>,
    hits_dirty: bool,
    errors_dirty: bool,
}

impl HitTracker {
    /// An in-memory tracker. `protected` are declared concrete keys that a
    /// template must never absorb.
    pub fn new(protected: impl IntoIterator<Item = EndpointKey>) -> Self {
        Self {
            keys: KeySet::with_protected(protected),
            ..Self::default()
        }
    }

    /// Persist every change through `store`.
    pub fn with_store(mut self, store: WorkerStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn store(&self) -> Option<&WorkerStore> {
        self.store.as_ref()
    }

    /// Record one hit, returning whether the hit set changed.
    pub fn record_hit(&mut self, key: EndpointKey) -> bool {
        let label = key.to_string();
        let changed = self.keys.insert(key);
        if changed {
            debug!("New hit {}", label);
            self.hits_dirty = true;
        }
        self.flush();
        changed
    }

    /// Record one 5xx occurrence for `key`.
    pub fn record_server_error(&mut self, key: &EndpointKey, status: u16, message: Option<&str>) {
        self.errors
            .entry(key.to_string())
            .or_default()
            .record(status, message, now_millis());
        self.errors_dirty = true;
        self.flush();
    }

    /// Deduplicated hits in insertion order.
    pub fn hits(&self) -> Vec<String> {
        self.keys.keys().iter().map(|k| k.to_string()).collect()
    }

    pub fn keys(&self) -> &[EndpointKey] {
        self.keys.keys()
    }

    pub fn errors(&self) -> &ErrorMap {
        &self.errors
    }

    /// Write whatever changed since the last successful write.
    ///
    /// A failed write keeps the dirty flag so the next observation retries.
    pub fn flush(&mut self) {
        let Some(store) = &self.store else {
            return;
        };
        if self.hits_dirty {
            match store.write_hits(&self.hits()) {
                Ok(()) => self.hits_dirty = false,
                Err(e) => warn!("Failed to persist hits: {}", e),
            }
        }
        if self.errors_dirty {
            match store.write_errors(&self.errors) {
                Ok(()) => self.errors_dirty = false,
                Err(e) => warn!("Failed to persist server errors: {}", e),
            }
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
