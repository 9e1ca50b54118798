//! Structural reconciliation of templated and concrete endpoint keys
//!
//! Invariant: the set never holds a templated key together with a concrete
//! key it structurally matches, nor two templated keys of the same shape.
//! Concrete keys that are themselves declared in the spec are protected and
//! never absorbed (`GET /users/me` survives next to `GET /users/{id}`).

use crate::endpoint::EndpointKey;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: Vec<EndpointKey>,
    protected: HashSet<EndpointKey>,
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set whose `protected` keys are never discarded by a template.
    pub fn with_protected(protected: impl IntoIterator<Item = EndpointKey>) -> Self {
        Self {
            keys: Vec::new(),
            protected: protected.into_iter().collect(),
        }
    }

    /// Insert one key, returning whether the set changed.
    pub fn insert(&mut self, key: EndpointKey) -> bool {
        if self.keys.contains(&key) {
            return false;
        }

        if key.is_templated() {
            let shape = key.shape();
            if self
                .keys
                .iter()
                .any(|k| k.is_templated() && k.shape() == shape)
            {
                return false;
            }
            let protected = &self.protected;
            self.keys
                .retain(|k| k.is_templated() || protected.contains(k) || !key.matches(k));
            self.keys.push(key);
            return true;
        }

        if !self.protected.contains(&key)
            && self.keys.iter().any(|k| k.is_templated() && k.matches(&key))
        {
            return false;
        }
        self.keys.push(key);
        true
    }

    pub fn extend(&mut self, keys: impl IntoIterator<Item = EndpointKey>) {
        for key in keys {
            self.insert(key);
        }
    }

    pub fn contains(&self, key: &EndpointKey) -> bool {
        self.keys.contains(key)
    }

    /// Keys in insertion order (minus the ones a template absorbed).
    pub fn keys(&self) -> &[EndpointKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn into_keys(self) -> Vec<EndpointKey> {
        self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> EndpointKey {
        EndpointKey::parse(s).unwrap()
    }

    fn strings(set: &KeySet) -> Vec<String> {
        set.keys().iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn template_then_concrete() {
        let mut set = KeySet::new();
        assert!(set.insert(key("GET /users/{id}")));
        assert!(!set.insert(key("GET /users/42")));
        assert_eq!(strings(&set), vec!["GET /users/{id}"]);
    }

    #[test]
    fn concrete_then_template() {
        let mut set = KeySet::new();
        assert!(set.insert(key("GET /users/42")));
        assert!(set.insert(key("GET /users/7")));
        assert!(set.insert(key("GET /users/{id}")));
        assert_eq!(strings(&set), vec!["GET /users/{id}"]);
    }

    #[test]
    fn other_methods_are_untouched() {
        let mut set = KeySet::new();
        set.insert(key("DELETE /users/42"));
        set.insert(key("GET /users/{id}"));
        assert_eq!(strings(&set), vec!["DELETE /users/42", "GET /users/{id}"]);
    }

    #[test]
    fn same_shape_templates_collapse() {
        let mut set = KeySet::new();
        set.insert(key("GET /users/{id}"));
        assert!(!set.insert(key("GET /users/{user_id}")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn protected_concrete_keys_survive() {
        let mut set = KeySet::with_protected([key("GET /users/me")]);
        set.insert(key("GET /users/me"));
        set.insert(key("GET /users/{id}"));
        assert!(!set.insert(key("GET /users/me")));
        assert_eq!(strings(&set), vec!["GET /users/me", "GET /users/{id}"]);

        let mut reversed = KeySet::with_protected([key("GET /users/me")]);
        reversed.insert(key("GET /users/{id}"));
        assert!(reversed.insert(key("GET /users/me")));
        assert_eq!(reversed.len(), 2);
    }
}
