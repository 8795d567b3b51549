use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

pub const DEFAULT_CONCURRENCY: usize = 2;

#[derive(Debug)]
struct QueueState {
    limit: usize,
    active: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl QueueState {
    fn admit(&mut self) {
        while self.active < self.limit {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            // A closed receiver belongs to a caller that gave up waiting.
            if waiter.send(()).is_ok() {
                self.active += 1;
            }
        }
    }

    fn release(&mut self) {
        self.active = self.active.saturating_sub(1);
        self.admit();
    }
}

/// FIFO task runner with at most `concurrency` tasks in flight.
#[derive(Debug, Clone)]
pub struct ConcurrencyQueue {
    state: Arc<Mutex<QueueState>>,
}

impl ConcurrencyQueue {
    pub fn new(concurrency: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                limit: concurrency.max(1),
                active: 0,
                waiters: VecDeque::new(),
            })),
        }
    }

    pub fn set_concurrency(&self, concurrency: usize) {
        let mut state = self.state.lock();
        state.limit = concurrency.max(1);
        state.admit();
    }

    pub fn concurrency(&self) -> usize {
        self.state.lock().limit
    }

    /// Queued plus running tasks.
    pub fn size(&self) -> usize {
        let state = self.state.lock();
        state.active + state.waiters.len()
    }

    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    pub async fn enqueue<F, Fut, T>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _slot = self.acquire().await;
        task().await
    }

    async fn acquire(&self) -> Slot {
        let receiver = {
            let mut state = self.state.lock();
            if state.active < state.limit && state.waiters.is_empty() {
                state.active += 1;
                return Slot {
                    state: Arc::clone(&self.state),
                };
            }
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            state.admit();
            trace!(queued = state.waiters.len(), active = state.active, "task queued");
            receiver
        };

        Waiter {
            receiver,
            state: Arc::clone(&self.state),
            admitted: false,
        }
        .admitted()
        .await
    }
}

impl Default for ConcurrencyQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

/// Running slot; releasing it admits the next waiter, even on panic.
struct Slot {
    state: Arc<Mutex<QueueState>>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.state.lock().release();
    }
}

struct Waiter {
    receiver: oneshot::Receiver<()>,
    state: Arc<Mutex<QueueState>>,
    admitted: bool,
}

impl Waiter {
    async fn admitted(mut self) -> Slot {
        // Senders live in the shared state we hold an Arc to, so the channel
        // only resolves through `admit`.
        let _ = (&mut self.receiver).await;
        self.admitted = true;
        Slot {
            state: Arc::clone(&self.state),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if self.admitted {
            return;
        }
        self.receiver.close();
        if self.receiver.try_recv().is_ok() {
            // Admitted between the last poll and cancellation.
            self.state.lock().release();
        }
    }
}
