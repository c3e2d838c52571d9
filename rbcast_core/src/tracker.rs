//! Broadcast instance tracker.
//!
//! Per-node map from an instance key to that node's private bookkeeping.
//! State is created lazily on the first message seen (or on initiation) and
//! kept for the whole run.

use std::collections::HashMap;
use std::hash::Hash;

/// One node's view of one broadcast instance.
#[derive(Debug, Clone, Default)]
pub struct InstanceState<S> {
    /// Monotonic: false -> true, never back
    delivered: bool,

    /// Protocol-specific bookkeeping
    pub state: S,
}

impl<S> InstanceState<S> {
    pub fn is_delivered(&self) -> bool {
        self.delivered
    }
}

/// Map of instance key -> [`InstanceState`].
#[derive(Debug, Clone)]
pub struct InstanceTracker<K, S> {
    instances: HashMap<K, InstanceState<S>>,
}

impl<K, S> InstanceTracker<K, S>
where
    K: Eq + Hash,
    S: Default,
{
    pub fn new() -> Self {
        Self {
            instances: HashMap::new(),
        }
    }

    /// Returns the state for `key`, creating it on first use.
    pub fn get_or_create(&mut self, key: K) -> &mut InstanceState<S> {
        self.instances.entry(key).or_default()
    }

    pub fn get(&self, key: &K) -> Option<&InstanceState<S>> {
        self.instances.get(key)
    }

    pub fn is_delivered(&self, key: &K) -> bool {
        self.instances.get(key).map_or(false, |i| i.delivered)
    }

    /// Marks `key` delivered. Returns true only on the first transition,
    /// which is when the application must be notified.
    pub fn mark_delivered(&mut self, key: K) -> bool {
        let instance = self.get_or_create(key);
        !std::mem::replace(&mut instance.delivered, true)
    }

    /// Number of tracked instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl<K, S> Default for InstanceTracker<K, S>
where
    K: Eq + Hash,
    S: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_delivered_is_idempotent() {
        let mut tracker: InstanceTracker<u64, ()> = InstanceTracker::new();

        assert!(!tracker.is_delivered(&7));
        assert!(tracker.mark_delivered(7));
        assert!(!tracker.mark_delivered(7));
        assert!(tracker.is_delivered(&7));
    }

    #[test]
    fn test_get_or_create_is_lazy() {
        let mut tracker: InstanceTracker<u64, Vec<u32>> = InstanceTracker::new();
        assert!(tracker.is_empty());

        tracker.get_or_create(1).state.push(5);
        tracker.get_or_create(1).state.push(6);

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get(&1).unwrap().state, vec![5, 6]);
        assert!(!tracker.get(&1).unwrap().is_delivered());
    }
}
