use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;

use tracing::debug;

use crate::generation::Generations;

/// Latest-wins guard for overlapping loads under the same key.
pub struct StaleResultGuard<K> {
    generations: Generations<K>,
}

impl<K: Eq + Hash + Clone + Debug> StaleResultGuard<K> {
    pub fn new() -> Self {
        Self {
            generations: Generations::new(),
        }
    }

    /// Runs `task`, returning `None` if a newer run or an invalidation for
    /// `key` happened before it resolved.
    pub async fn run<F, Fut, T>(&self, key: K, task: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let ticket = self.generations.issue(&key);
        let value = task().await;
        if self.generations.is_current(&ticket) {
            Some(value)
        } else {
            debug!(
                key = ?ticket.key(),
                generation = ticket.generation(),
                "discarding stale result"
            );
            None
        }
    }

    pub fn invalidate(&self, key: &K) {
        self.generations.invalidate(key);
    }

    pub fn generation(&self, key: &K) -> u64 {
        self.generations.current(key)
    }
}

impl<K: Eq + Hash + Clone + Debug> Default for StaleResultGuard<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_result_is_discarded_when_newer_run_exists() {
        let guard = Arc::new(StaleResultGuard::new());
        let slow = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                guard
                    .run("order", || async {
                        sleep(Duration::from_millis(200)).await;
                        "order-1"
                    })
                    .await
            })
        };
        sleep(Duration::from_millis(10)).await;
        let fast = guard
            .run("order", || async {
                sleep(Duration::from_millis(20)).await;
                "order-2"
            })
            .await;

        assert_eq!(fast, Some("order-2"));
        assert_eq!(slow.await.unwrap(), None);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let guard = StaleResultGuard::new();
        guard.invalidate(&"pickup");
        assert_eq!(guard.run("delivery", || async { 1 }).await, Some(1));
        assert_eq!(guard.generation(&"pickup"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_voids_in_flight_result() {
        let guard = Arc::new(StaleResultGuard::new());
        let in_flight = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                guard
                    .run("order", || async {
                        sleep(Duration::from_millis(50)).await;
                        42
                    })
                    .await
            })
        };
        sleep(Duration::from_millis(5)).await;
        guard.invalidate(&"order");
        assert_eq!(in_flight.await.unwrap(), None);
    }
}
