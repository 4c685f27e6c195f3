//! Process-wide object caches
//!
//! Entries remember when they were last touched. Nothing is evicted on its
//! own: callers sweep with [`SweepCache::evict_older_than`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::objects::ObjectId;

use super::Persisted;

/// ID-keyed cache with last-access sweeping
pub struct SweepCache<V> {
    entries: HashMap<ObjectId, (V, Instant)>,
}

impl<V: Clone> SweepCache<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Fetch an entry, refreshing its access time
    pub fn get(&mut self, id: ObjectId) -> Option<V> {
        self.entries.get_mut(&id).map(|(value, touched)| {
            *touched = Instant::now();
            value.clone()
        })
    }

    pub fn insert(&mut self, id: ObjectId, value: V) {
        self.entries.insert(id, (value, Instant::now()));
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<V> {
        self.entries.remove(&id).map(|(value, _)| value)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Drop every entry not touched within `max_age`; returns how many
    pub fn evict_older_than(&mut self, max_age: Duration) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, (_, touched)| now.duration_since(*touched) < max_age);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<V: Clone> Default for SweepCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// A restored object as kept in the object cache: its shape (type name)
/// and its state
#[derive(Clone)]
pub struct CachedObject {
    pub shape: &'static str,
    pub value: Arc<dyn Persisted>,
}

impl CachedObject {
    pub fn new(value: Arc<dyn Persisted>) -> Self {
        Self {
            shape: value.shape(),
            value,
        }
    }

    /// Take ownership of a transaction's live value
    pub fn from_box(value: Box<dyn Persisted>) -> Self {
        Self::new(Arc::from(value))
    }
}

impl fmt::Debug for CachedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedObject")
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}
