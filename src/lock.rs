//! Store-backed mutex for digest records.
//!
//! The flag lives in the record itself (`busy`), so exclusion holds across
//! every process sharing the database. Acquisition is one conditional upsert;
//! a busy record is retried after a random 100-200ms pause, up to 100 times.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tracing::{debug, error, warn};

use crate::config;
use crate::db::{self, Pool};
use crate::error::{DigestError, DigestResult};

/// Conditional atomic upsert primitive the lock is built on.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Take the flag for `id`, creating the record if needed. `Ok(false)`
    /// means another holder has it; nothing was written in that case.
    async fn try_acquire(&self, id: &str) -> DigestResult<bool>;

    /// Clear the flag. `Ok(false)` means no record matched `id`.
    async fn release(&self, id: &str) -> DigestResult<bool>;
}

#[async_trait]
impl LockStore for Pool {
    async fn try_acquire(&self, id: &str) -> DigestResult<bool> {
        db::try_acquire_digest(self, id, Utc::now()).await
    }

    async fn release(&self, id: &str) -> DigestResult<bool> {
        db::release_digest(self, id).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPolicy {
    pub max_attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        LockPolicy::from(&config::Lock::default())
    }
}

impl From<&config::Lock> for LockPolicy {
    fn from(cfg: &config::Lock) -> Self {
        let (backoff_min, backoff_max) = cfg.backoff_range();
        Self {
            max_attempts: cfg.max_attempts,
            backoff_min,
            backoff_max,
        }
    }
}

impl LockPolicy {
    /// Uniform in `[backoff_min, backoff_max)`.
    fn backoff_delay(&self) -> Duration {
        if self.backoff_max <= self.backoff_min {
            return self.backoff_min;
        }
        let min = self.backoff_min.as_millis() as u64;
        let max = self.backoff_max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..max))
    }
}

#[derive(Debug, Clone)]
pub struct ExclusiveUpdateLock<S> {
    store: S,
    policy: LockPolicy,
}

impl<S: LockStore> ExclusiveUpdateLock<S> {
    pub fn new(store: S, policy: LockPolicy) -> Self {
        Self { store, policy }
    }

    /// Run `work` while holding the flag for `id`.
    ///
    /// The flag is always released once `work` has run, and a `work` error is
    /// only returned after that. A failed release wins over the `work` result.
    pub async fn with_lock<T, F, Fut>(&self, id: &str, work: F) -> DigestResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DigestResult<T>>,
    {
        self.acquire(id).await?;

        let outcome = work().await;

        match self.store.release(id).await {
            Ok(true) => outcome,
            Ok(false) => {
                if let Err(err) = &outcome {
                    error!(digest_id = id, ?err, "work failed and mutex could not be unlocked");
                }
                Err(DigestError::UnlockFailure { id: id.to_string() })
            }
            Err(release_err) => {
                error!(digest_id = id, ?release_err, work_failed = outcome.is_err(), "mutex release failed");
                Err(DigestError::UnlockFailure { id: id.to_string() })
            }
        }
    }

    async fn acquire(&self, id: &str) -> DigestResult<()> {
        let mut attempt: u32 = 1;
        loop {
            if self.store.try_acquire(id).await? {
                if attempt > 1 {
                    debug!(digest_id = id, attempt, "mutex acquired after backoff");
                }
                return Ok(());
            }
            if attempt >= self.policy.max_attempts {
                warn!(digest_id = id, attempts = attempt, "mutex lock request expired");
                return Err(DigestError::LockTimeout {
                    id: id.to_string(),
                    attempts: attempt,
                });
            }
            let delay = self.policy.backoff_delay();
            debug!(digest_id = id, attempt, delay_ms = delay.as_millis() as u64, "mutex busy; backing off");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
