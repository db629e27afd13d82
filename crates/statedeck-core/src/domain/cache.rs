//! Last-published payload cache.
//!
//! Live state is usually sampled on a timer, but most samples are identical to
//! the previous one.  The cache remembers the last JSON value published for
//! each payload kind so the publisher can skip broadcasts that would tell
//! subscribers nothing new.
//!
//! Clearing the cache forces the next publish of every kind to go out.  That
//! is what a freshly connected subscriber needs: it has seen nothing yet.
//!
//! The cache is a plain owned value.  Whoever composes the application owns
//! it and hands out references; there is no global instance.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

/// Map from payload kind to the last value sent for it.
#[derive(Debug, Default)]
pub struct PayloadCache {
    last_sent: HashMap<String, Value>,
}

impl PayloadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when `value` differs from what was last recorded for
    /// `kind` (or nothing was recorded).
    pub fn is_new(&self, kind: &str, value: &Value) -> bool {
        self.last_sent.get(kind) != Some(value)
    }

    /// Records `value` for `kind` if it is new.
    ///
    /// Returns `true` when the value was recorded, i.e. when it should be
    /// published.
    pub fn update(&mut self, kind: &str, value: Value) -> bool {
        if !self.is_new(kind, &value) {
            return false;
        }
        self.last_sent.insert(kind.to_string(), value);
        true
    }

    /// The last value recorded for `kind`.
    pub fn get(&self, kind: &str) -> Option<&Value> {
        self.last_sent.get(kind)
    }

    /// Forgets every recorded value.
    pub fn clear(&mut self) {
        if !self.last_sent.is_empty() {
            debug!("clearing {} cached payload kind(s)", self.last_sent.len());
        }
        self.last_sent.clear();
    }

    pub fn len(&self) -> usize {
        self.last_sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_sent.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_value_is_new() {
        let cache = PayloadCache::new();
        assert!(cache.is_new("SKILLS", &json!({"attack": 1})));
    }

    #[test]
    fn test_update_records_and_suppresses_repeat() {
        // Arrange
        let mut cache = PayloadCache::new();
        let value = json!({"type": "PVP", "skullIcon": null});

        // Act
        let first = cache.update("PVP", value.clone());
        let second = cache.update("PVP", value.clone());

        // Assert
        assert!(first, "first publish must go out");
        assert!(!second, "identical repeat must be suppressed");
        assert_eq!(cache.get("PVP"), Some(&value));
    }

    #[test]
    fn test_changed_value_is_recorded() {
        let mut cache = PayloadCache::new();
        cache.update("FPS", json!({"fps": 50}));

        assert!(cache.update("FPS", json!({"fps": 49})));
        assert_eq!(cache.get("FPS"), Some(&json!({"fps": 49})));
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut cache = PayloadCache::new();
        cache.update("A", json!(1));

        assert!(cache.update("B", json!(1)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_clear_makes_everything_new_again() {
        let mut cache = PayloadCache::new();
        cache.update("A", json!(1));

        cache.clear();

        assert!(cache.is_empty());
        assert!(cache.update("A", json!(1)));
    }
}
