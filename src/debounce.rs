use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::trace;

use crate::generation::Generations;

/// Collapses a burst of calls into a single execution of the most recent one.
///
/// Each call cancels the pending timer of the previous call and waits out the
/// delay itself. A superseded call resolves to `None` without running its task.
pub struct DebouncedExecutor {
    delay_ms: AtomicU64,
    generations: Generations<()>,
    pending: Mutex<Option<oneshot::Sender<()>>>,
}

impl DebouncedExecutor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay_ms: AtomicU64::new(duration_ms(delay)),
            generations: Generations::new(),
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::SeqCst))
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(duration_ms(delay), Ordering::SeqCst);
    }

    pub async fn run<F, Fut, T>(&self, task: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        // Ticket order and pending-slot order must agree.
        let ticket = {
            let mut pending = self.pending.lock();
            let ticket = self.generations.issue(&());
            if let Some(previous) = pending.replace(cancel_tx) {
                let _ = previous.send(());
            }
            ticket
        };

        tokio::select! {
            () = sleep(self.delay()) => {}
            _ = cancel_rx => {
                trace!(generation = ticket.generation(), "debounced call superseded before firing");
                return None;
            }
        }

        if !self.generations.is_current(&ticket) {
            trace!(generation = ticket.generation(), "debounced call superseded at fire time");
            return None;
        }
        Some(task().await)
    }

    /// Drops the pending call, if any, without scheduling a new one.
    pub fn cancel(&self) {
        let mut pending = self.pending.lock();
        self.generations.invalidate(&());
        if let Some(pending) = pending.take() {
            let _ = pending.send(());
        }
    }
}

fn duration_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
