//! Idempotent acceptance of request-id bearing messages.

use std::collections::HashMap;
use std::hash::Hash;

/// Highest accepted request id per source key.
///
/// A request is accepted only if its id is strictly greater than the last one
/// accepted for the same key, so retransmissions and reordered duplicates are
/// no-ops.
#[derive(Debug, Clone)]
pub struct RequestLedger<K> {
    last: HashMap<K, u32>,
}

impl<K> Default for RequestLedger<K> {
    fn default() -> Self {
        Self {
            last: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> RequestLedger<K> {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `request_id` for `key` if it is new; returns whether it was.
    pub fn accept(&mut self, key: K, request_id: u32) -> bool {
        match self.last.get_mut(&key) {
            Some(last) if request_id <= *last => false,
            Some(last) => {
                *last = request_id;
                true
            }
            None => {
                self.last.insert(key, request_id);
                true
            }
        }
    }

    /// Last accepted id for `key`.
    pub fn last_accepted(&self, key: &K) -> Option<u32> {
        self.last.get(key).copied()
    }

    /// Drop every key matching `predicate` (e.g. all keys of a departed player).
    pub fn forget_where(&mut self, mut predicate: impl FnMut(&K) -> bool) {
        self.last.retain(|key, _| !predicate(key));
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.last.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.last.clear();
    }
}
