//! Bounded tenant pool: semaphore-gated fan-out joined by a barrier.
//!
//! At most `max_concurrent` tenant tasks run at once. Cancellation stops new
//! submissions only; tasks already started always run to completion.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Results of one pool run.
#[derive(Debug)]
pub struct PoolOutcome<R> {
    pub completed: Vec<R>,
    /// Items never started because the run was canceled.
    pub not_started: usize,
    /// Tasks that panicked.
    pub panicked: usize,
}

#[derive(Debug, Clone)]
pub struct TenantPool {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TenantPool {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run `task` for every item, then wait for all started tasks.
    pub async fn run_all<T, F, Fut, R>(
        &self,
        items: Vec<T>,
        cancel: &CancellationToken,
        task: F,
    ) -> PoolOutcome<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let total = items.len();
        let mut started = 0;
        let mut running = JoinSet::new();

        for item in items {
            if cancel.is_cancelled() {
                break;
            }
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let fut = task(item);
            running.spawn(async move {
                let result = fut.await;
                drop(permit);
                result
            });
            started += 1;
        }

        let not_started = total - started;
        if not_started > 0 {
            tracing::warn!(not_started, "run canceled, remaining tenants not started");
        }

        let mut completed = Vec::with_capacity(started);
        let mut panicked = 0;
        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(result) => completed.push(result),
                Err(e) => {
                    tracing::error!(error = %e, "tenant task panicked");
                    panicked += 1;
                }
            }
        }

        PoolOutcome {
            completed,
            not_started,
            panicked,
        }
    }
}
