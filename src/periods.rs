//! Non-owning cache of retired periods.
//!
//! A live manifest eventually stops declaring old periods, but the track
//! layer may still hold segments from them and ask historical questions.
//! This cache keeps a weak back-reference per period id: it answers as
//! long as someone else still owns the period, and never keeps one alive
//! on its own. Populated on removal, consulted only as a fallback.

use dashmap::DashMap;
use std::sync::{Arc, Weak};

/// Identity-keyed weak lookup for values evicted from the live manifest.
#[derive(Debug)]
pub struct RetiredPeriodCache<T> {
    entries: DashMap<String, Weak<T>>,
}

impl<T> RetiredPeriodCache<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Remember a value under its period id without taking ownership.
    pub fn insert(&self, id: impl Into<String>, value: &Arc<T>) {
        self.entries.insert(id.into(), Arc::downgrade(value));
    }

    /// Look a retired value up. Returns `None` once every strong owner is
    /// gone; the dead entry is dropped on the way out.
    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        match self.entries.get(id) {
            Some(entry) => match entry.upgrade() {
                Some(value) => Some(value),
                None => {
                    drop(entry);
                    self.entries.remove(id);
                    None
                }
            },
            None => None,
        }
    }

    /// Drop entries whose value has been deallocated. Returns how many
    /// live entries remain.
    pub fn prune(&self) -> usize {
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for RetiredPeriodCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_while_a_strong_owner_exists() {
        let cache = RetiredPeriodCache::new();
        let period = Arc::new("p1-state".to_string());
        cache.insert("p1", &period);

        assert_eq!(cache.get("p1").as_deref(), Some(&"p1-state".to_string()));
    }

    #[test]
    fn does_not_keep_the_value_alive() {
        let cache = RetiredPeriodCache::new();
        let period = Arc::new("p1-state".to_string());
        cache.insert("p1", &period);
        drop(period);

        assert!(cache.get("p1").is_none());
        // The dead entry was removed by the failed lookup.
        assert!(cache.is_empty());
    }

    #[test]
    fn unknown_id_misses() {
        let cache: RetiredPeriodCache<String> = RetiredPeriodCache::new();
        assert!(cache.get("p404").is_none());
    }

    #[test]
    fn prune_sweeps_dead_entries() {
        let cache = RetiredPeriodCache::new();
        let kept = Arc::new(1);
        cache.insert("kept", &kept);
        {
            let dropped = Arc::new(2);
            cache.insert("dropped", &dropped);
        }

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.prune(), 1);
        assert!(cache.get("kept").is_some());
    }
}
