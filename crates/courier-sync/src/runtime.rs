//! # Runtime Services
//!
//! Detached task execution and injectable sleeping.
//!
//! ## Background Tasks
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  caller ──► spawn("reconcile", fut) ──► JoinSet                        │
//! │     │                                     │                             │
//! │     └── returns immediately               ├── Ok(())      → debug      │
//! │                                           ├── Err(e)      → error!     │
//! │                                           └── panic       → error!     │
//! │                                                                         │
//! │  drain() waits for everything, including tasks spawned while draining  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Outcomes are never returned to the spawner; a background task reports
//! only through the rows it writes and the log.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::error::CourierResult;

// =============================================================================
// Sleeper
// =============================================================================

/// Clock-independent sleeping, so delays can be skipped in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

// =============================================================================
// Background Tasks
// =============================================================================

/// Fire-and-forget task executor with its own error boundary.
///
/// Cloning shares the same task set. Dropping the last clone aborts
/// whatever is still running.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` detached. Errors are logged under `name`, never propagated.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = CourierResult<()>> + Send + 'static,
    {
        let mut tasks = self.lock();

        // Reap finished tasks so the set does not grow without bound.
        while let Some(result) = tasks.try_join_next() {
            log_join(result);
        }

        tasks.spawn(async move {
            match task.await {
                Ok(()) => debug!(task = name, "Background task finished"),
                Err(e) => error!(task = name, error = %e, "Background task failed"),
            }
        });
    }

    /// Number of tasks not yet reaped.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Waits for every outstanding task, including ones spawned meanwhile.
    pub async fn drain(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                return;
            }
            while let Some(result) = batch.join_next().await {
                log_join(result);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "Background task panicked");
        } else {
            debug!(error = %e, "Background task cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CourierError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_drain_waits_for_all_tasks() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let done = done.clone();
            tasks.spawn("count", async move {
                tokio::task::yield_now().await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_failures_and_panics_stay_contained() {
        let tasks = BackgroundTasks::new();
        tasks.spawn("fails", async { Err(CourierError::Internal("boom".into())) });
        let explode = true;
        tasks.spawn("panics", async move {
            if explode {
                panic!("background panic");
            }
            Ok(())
        });

        tasks.drain().await;
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_drain_covers_nested_spawns() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));

        let inner_tasks = tasks.clone();
        let inner_done = done.clone();
        tasks.spawn("outer", async move {
            inner_tasks.spawn("inner", async move {
                inner_done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
