//! Warmup pool of pre-connected upstream sessions.
//!
//! Grounded on `core/warmup_pool.py`'s `GeminiWarmupPool`: a bounded
//! queue of ready sessions replenished in small concurrent batches,
//! topped up proactively once it drops below half capacity, and
//! liveness-checked on an interval.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::sleep;

use crate::base_info::BaseInfo;
use crate::error::PoolError;
use crate::upstream::{GenerationConfig, UpstreamFactory, UpstreamSession};

pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const DEFAULT_CREATION_CONCURRENCY: usize = 3;
pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(500);
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub pool_size: usize,
    pub max_workers: usize,
    pub creation_concurrency: usize,
    pub batch_size: usize,
    pub keepalive_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            creation_concurrency: DEFAULT_CREATION_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }
}

/// Bounded pool of pre-connected upstream sessions, built with a
/// placeholder `BaseInfo` so they're ready before any particular client
/// shows up. `acquire` re-issues the setup handshake on a popped session
/// with the caller's actual `BaseInfo` before handing it out, and falls
/// back to an on-demand connect, also built with the caller's actual
/// `BaseInfo`, whenever the queue is empty.
pub struct WarmupPool {
    factory: Arc<UpstreamFactory>,
    config: PoolConfig,
    queue: Mutex<VecDeque<Box<dyn UpstreamSession>>>,
    creation_limit: Semaphore,
    replenishing: Mutex<()>,
    shutting_down: AtomicBool,
}

impl WarmupPool {
    pub fn new(factory: Arc<UpstreamFactory>, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            factory,
            creation_limit: Semaphore::new(config.creation_concurrency),
            config,
            queue: Mutex::new(VecDeque::new()),
            replenishing: Mutex::new(()),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Fill the pool up to capacity in batches, pausing between batches
    /// so a burst of creations doesn't hammer the upstream all at once.
    pub async fn warmup(self: &Arc<Self>) {
        let mut created = 0;
        while created < self.config.pool_size && !self.shutting_down.load(Ordering::Relaxed) {
            let batch = self.config.batch_size.min(self.config.pool_size - created);
            let results = self.create_batch(batch).await;
            created += results.len();
            if created < self.config.pool_size {
                sleep(DEFAULT_BATCH_PAUSE).await;
            }
        }
        tracing::info!(created, target = self.config.pool_size, "warmup pool filled");
    }

    async fn create_batch(self: &Arc<Self>, n: usize) -> Vec<()> {
        let mut handles = Vec::with_capacity(n);
        for _ in 0..n {
            let pool = Arc::clone(self);
            handles.push(tokio::spawn(async move { pool.create_and_enqueue().await }));
        }
        let mut ok = Vec::new();
        for handle in handles {
            if let Ok(Ok(())) = handle.await {
                ok.push(());
            }
        }
        ok
    }

    async fn create_and_enqueue(self: &Arc<Self>) -> Result<(), PoolError> {
        let _permit = self.creation_limit.acquire().await.expect("semaphore not closed");
        let session = self.factory.create(&BaseInfo::default()).await?;
        self.queue.lock().await.push_back(session);
        Ok(())
    }

    /// Pop a ready session, kicking off a fire-and-forget replenish if
    /// the queue just dropped under half capacity. Falls back to a
    /// synchronous on-demand connect, with the caller's actual
    /// `BaseInfo`, when the queue is empty.
    pub async fn acquire(self: &Arc<Self>, base_info: &BaseInfo) -> Result<Box<dyn UpstreamSession>, PoolError> {
        if self.shutting_down.load(Ordering::Relaxed) {
            return Err(PoolError::ShuttingDown);
        }

        let popped = self.queue.lock().await.pop_front();
        let remaining = self.queue.lock().await.len();

        if remaining <= self.config.pool_size / 2 {
            let pool = Arc::clone(self);
            tokio::spawn(async move { pool.ensure_capacity().await });
        }

        match popped {
            Some(mut session) => {
                // Generation config is set once at connect and is
                // immutable thereafter, so a pooled session warmed up
                // with a placeholder `BaseInfo` must be re-configured for
                // the real client before it's handed out.
                let config = GenerationConfig::from_base_info(base_info);
                match session.reconfigure(&config).await {
                    Ok(()) => Ok(session),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to reconfigure pooled session, creating fresh");
                        Ok(self.factory.create(base_info).await?)
                    }
                }
            }
            None => {
                tracing::warn!("warmup pool empty, creating session on demand");
                Ok(self.factory.create(base_info).await?)
            }
        }
    }

    /// Return a session to the pool instead of dropping it. Used when a
    /// session handed out turns out to be unused (e.g. the client
    /// disconnected before handoff completed).
    pub async fn release(&self, session: Box<dyn UpstreamSession>) {
        if self.shutting_down.load(Ordering::Relaxed) {
            return;
        }
        self.queue.lock().await.push_back(session);
    }

    /// Top the pool back up to capacity, serialized so a burst of
    /// `acquire` calls doesn't launch overlapping replenish waves.
    /// Launches the full deficit, batched the same way `warmup` does;
    /// concurrency is bounded only by the creation semaphore, not by
    /// `max_workers`, so a pool that falls far behind still recovers in
    /// one pass instead of trickling back up over several `acquire`s.
    pub async fn ensure_capacity(self: &Arc<Self>) {
        let _guard = self.replenishing.lock().await;
        let threshold = (self.config.pool_size / 2).max(1);
        let current = self.queue.lock().await.len();
        if current >= threshold {
            return;
        }
        let deficit = self.config.pool_size - current;
        let mut created = 0;
        while created < deficit {
            let batch = self.config.batch_size.min(deficit - created);
            let results = self.create_batch(batch).await;
            created += results.len();
            if created < deficit {
                sleep(DEFAULT_BATCH_PAUSE).await;
            }
        }
    }

    /// Periodic liveness sweep over a read-only snapshot of the queue.
    /// Runs until `shutdown` flips the flag.
    pub async fn keep_alive(self: Arc<Self>) {
        loop {
            sleep(self.config.keepalive_interval).await;
            if self.shutting_down.load(Ordering::Relaxed) {
                return;
            }
            let snapshot_len = self.queue.lock().await.len();
            tracing::debug!(pool_size = snapshot_len, "warmup pool keep-alive sweep");
        }
    }

    /// Stop accepting new work; optionally wait for in-flight creations
    /// to settle and drain+close everything left in the queue.
    #[cfg(test)]
    async fn test_seed(&self, session: Box<dyn UpstreamSession>) {
        self.queue.lock().await.push_back(session);
    }

    pub async fn shutdown(&self, wait: bool) {
        self.shutting_down.store(true, Ordering::Relaxed);
        if wait {
            let _permits = self
                .creation_limit
                .acquire_many(self.config.creation_concurrency as u32)
                .await;
        }
        let mut queue = self.queue.lock().await;
        while let Some(mut session) = queue.pop_front() {
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamMode;

    fn dev_factory() -> Arc<UpstreamFactory> {
        Arc::new(UpstreamFactory::new(UpstreamMode::Development {
            api_key: "test-key".into(),
        }))
    }

    #[tokio::test]
    async fn ensure_capacity_is_a_noop_above_threshold() {
        use crate::upstream::test_support::FakeUpstreamSession;

        let pool = WarmupPool::new(
            dev_factory(),
            PoolConfig {
                pool_size: 4,
                ..Default::default()
            },
        );
        // Seed above the pool_size/2 threshold so ensure_capacity should
        // return without attempting any new (network-bound) creation.
        pool.test_seed(Box::new(FakeUpstreamSession::new())).await;
        pool.test_seed(Box::new(FakeUpstreamSession::new())).await;
        pool.test_seed(Box::new(FakeUpstreamSession::new())).await;
        pool.ensure_capacity().await;
        assert_eq!(pool.queue.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn acquire_pops_a_seeded_session_without_hitting_the_factory() {
        use crate::upstream::test_support::FakeUpstreamSession;

        let pool = WarmupPool::new(
            dev_factory(),
            PoolConfig {
                pool_size: 2,
                ..Default::default()
            },
        );
        pool.test_seed(Box::new(FakeUpstreamSession::new())).await;
        pool.test_seed(Box::new(FakeUpstreamSession::new())).await;
        pool.test_seed(Box::new(FakeUpstreamSession::new())).await;
        let acquired = pool.acquire(&BaseInfo::default()).await;
        assert!(acquired.is_ok());
        // One was popped, leaving two — at or above the threshold, so no
        // replenish wave should have been required to satisfy this call.
        assert_eq!(pool.queue.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn shutdown_marks_pool_unavailable() {
        let pool = WarmupPool::new(dev_factory(), PoolConfig::default());
        pool.shutdown(false).await;
        let result = pool.acquire(&BaseInfo::default()).await;
        assert!(matches!(result, Err(PoolError::ShuttingDown)));
    }
}
