use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

/// Generation captured when an asynchronous operation started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket<K> {
    key: K,
    generation: u64,
}

impl<K> Ticket<K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Monotonic counter per logical key. A suspended operation compares its
/// ticket against the current generation before committing a result.
#[derive(Debug)]
pub struct Generations<K> {
    counters: Mutex<HashMap<K, u64>>,
}

impl<K: Eq + Hash + Clone> Generations<K> {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn issue(&self, key: &K) -> Ticket<K> {
        Ticket {
            key: key.clone(),
            generation: self.bump(key),
        }
    }

    /// Voids every outstanding ticket for `key`.
    pub fn invalidate(&self, key: &K) -> u64 {
        self.bump(key)
    }

    pub fn is_current(&self, ticket: &Ticket<K>) -> bool {
        self.current(&ticket.key) == ticket.generation
    }

    pub fn current(&self, key: &K) -> u64 {
        self.counters.lock().get(key).copied().unwrap_or(0)
    }

    fn bump(&self, key: &K) -> u64 {
        let mut counters = self.counters.lock();
        let counter = counters.entry(key.clone()).or_insert(0);
        *counter += 1;
        *counter
    }
}

impl<K: Eq + Hash + Clone> Default for Generations<K> {
    fn default() -> Self {
        Self::new()
    }
}
