//! Bookkeeping persistence with fixed-delay retry.
//!
//! One write per tenant per run. A write that exhausts its attempts is
//! reported to the caller, which logs it and moves on.

use std::sync::Arc;
use std::time::Duration;

use tiernotify_core::traits::BookkeepingStore;
use tiernotify_core::types::{Bookkeeping, TenantId};
use tiernotify_core::{Result, TierNotifyError};

use crate::deadline::bounded;

/// Retry policy for bookkeeping writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

pub struct StatePersister {
    store: Arc<dyn BookkeepingStore>,
    policy: RetryPolicy,
    io_timeout: Duration,
}

impl StatePersister {
    pub fn new(store: Arc<dyn BookkeepingStore>, policy: RetryPolicy, io_timeout: Duration) -> Self {
        Self {
            store,
            policy,
            io_timeout,
        }
    }

    /// Write the tenant's full record. No-op in dry-run mode.
    pub async fn persist(&self, tenant: &TenantId, record: &Bookkeeping, dry_run: bool) -> Result<()> {
        if dry_run {
            tracing::info!(
                tenant = %tenant,
                dry_run = true,
                record = ?record,
                "skipping bookkeeping write"
            );
            return Ok(());
        }

        let mut last_error = TierNotifyError::store("no write attempted");
        for attempt in 1..=self.policy.attempts.max(1) {
            match bounded("bookkeeping write", self.io_timeout, self.store.set(tenant, record)).await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(tenant = %tenant, attempt, "bookkeeping written after retry");
                    }
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        tenant = %tenant,
                        attempt,
                        max_attempts = self.policy.attempts,
                        error = %e,
                        "bookkeeping write failed"
                    );
                    last_error = e;
                }
            }
            if attempt < self.policy.attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }
        Err(last_error)
    }
}
