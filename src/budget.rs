use std::future::Future;
use std::time::Duration;

use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};

/// Result of a budgeted call. A timeout is a partial success carrying the
/// fallback, never an error.
#[derive(Debug)]
pub enum Outcome<T> {
    Ok(T),
    TimedOut(T),
    Failed(AppError),
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    /// The produced or substituted value; `None` only for failures.
    pub fn value(self) -> Option<T> {
        match self {
            Outcome::Ok(value) | Outcome::TimedOut(value) => Some(value),
            Outcome::Failed(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct Budgeted<T> {
    pub outcome: Outcome<T>,
    pub elapsed: Duration,
}

impl<T> Budgeted<T> {
    pub fn timed_out(&self) -> bool {
        matches!(self.outcome, Outcome::TimedOut(_))
    }

    pub fn failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    /// Produced or substituted value; failures yield `fallback`.
    pub fn into_value(self, fallback: T) -> T {
        self.outcome.value().unwrap_or(fallback)
    }
}

/// Races the task against `budget`. On timeout the fallback is returned and
/// the task is left running detached; it is not cancelled.
pub async fn run_with_timeout<F, Fut, T>(task_factory: F, budget: Duration, fallback: T) -> Budgeted<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = AppResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let started = Instant::now();
    let handle = tokio::spawn(task_factory());
    let outcome = match timeout(budget, handle).await {
        Ok(Ok(Ok(value))) => Outcome::Ok(value),
        Ok(Ok(Err(err))) => Outcome::Failed(err),
        Ok(Err(join_err)) => Outcome::Failed(AppError::provider(
            None,
            format!("budgeted task aborted: {join_err}"),
        )),
        Err(_) => {
            warn!(
                budget_ms = budget.as_millis() as u64,
                "latency budget exceeded; substituting fallback"
            );
            Outcome::TimedOut(fallback)
        }
    };
    let elapsed = started.elapsed();
    debug!(elapsed_ms = elapsed.as_millis() as u64, "budgeted call settled");
    Budgeted { outcome, elapsed }
}
