//! Container pool: a bounded, mutex-guarded set of pre-warmed executors
//! (§4.4).
//!
//! An acquired executor is owned by its caller for the duration of the
//! checkout — Rust has no notion of a value living in two places, so unlike
//! a pool that merely *hands out references*, "the in-use set" here is
//! represented as a count rather than a live collection of executors. The
//! pool still enforces the rest of the contract: FIFO available queue,
//! overflow-on-demand, and `stop()` reaping everything it still holds.

use std::collections::VecDeque;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::executor::{ExecutorError, SandboxExecutor, SandboxSettings};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool has not been started")]
    PoolStopped,
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

struct PoolState {
    available: VecDeque<SandboxExecutor>,
    in_use_count: usize,
    started: bool,
}

pub struct ExecutorPool {
    size: usize,
    settings: SandboxSettings,
    state: Mutex<PoolState>,
}

impl ExecutorPool {
    #[must_use]
    pub fn new(size: usize, settings: SandboxSettings) -> Self {
        Self {
            size,
            settings,
            state: Mutex::new(PoolState {
                available: VecDeque::new(),
                in_use_count: 0,
                started: false,
            }),
        }
    }

    /// Pre-warm exactly `size` executors. Idempotent: a second call is a
    /// no-op if the pool is already started.
    pub async fn start(&self) -> Result<(), PoolError> {
        let mut state = self.state.lock().await;
        if state.started {
            return Ok(());
        }
        for _ in 0..self.size {
            let mut executor = SandboxExecutor::new(self.settings.clone());
            executor.start().await?;
            state.available.push_back(executor);
        }
        state.started = true;
        Ok(())
    }

    /// Hand out one executor, preferring an idle one from the pool; if none
    /// is available, a fresh one is created and started on demand (overflow
    /// is permitted to preserve liveness rather than blocking).
    pub async fn acquire(&self) -> Result<SandboxExecutor, PoolError> {
        let mut state = self.state.lock().await;
        if !state.started {
            return Err(PoolError::PoolStopped);
        }
        let executor = match state.available.pop_front() {
            Some(executor) => executor,
            None => {
                let mut executor = SandboxExecutor::new(self.settings.clone());
                executor.start().await?;
                executor
            }
        };
        state.in_use_count += 1;
        tracing::debug!(in_use = state.in_use_count, "acquired executor from pool");
        Ok(executor)
    }

    /// Return a checked-out executor to the tail of the available queue.
    /// The caller is responsible for having called `reset_namespace()`
    /// before releasing.
    pub async fn release(&self, executor: SandboxExecutor) {
        let mut state = self.state.lock().await;
        state.in_use_count = state.in_use_count.saturating_sub(1);
        state.available.push_back(executor);
        tracing::debug!(available = state.available.len(), "released executor to pool");
    }

    /// Drop a broken executor without returning it to the pool. Stopping it
    /// is the caller's responsibility before calling this.
    pub async fn discard(&self, executor: SandboxExecutor) {
        drop(executor);
        let mut state = self.state.lock().await;
        state.in_use_count = state.in_use_count.saturating_sub(1);
        tracing::debug!(in_use = state.in_use_count, "discarded broken executor");
    }

    /// Stop every executor still held by the pool and reset to the
    /// unstarted state. Safe to call without `start()`. Executors currently
    /// checked out are the caller's responsibility to stop.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        while let Some(mut executor) = state.available.pop_front() {
            executor.stop().await;
        }
        state.in_use_count = 0;
        state.started = false;
    }

    pub async fn available_count(&self) -> usize {
        self.state.lock().await.available.len()
    }

    pub async fn in_use_count(&self) -> usize {
        self.state.lock().await.in_use_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> SandboxSettings {
        // `true` always exists and exits 0 immediately; good enough to
        // exercise pool bookkeeping without a real sandbox runner.
        SandboxSettings::new("true")
    }

    #[tokio::test]
    async fn acquire_before_start_is_pool_stopped() {
        let pool = ExecutorPool::new(1, test_settings());
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::PoolStopped));
    }

    #[tokio::test]
    async fn start_prewarms_exactly_size_executors() {
        let pool = ExecutorPool::new(2, test_settings());
        pool.start().await.unwrap();
        assert_eq!(pool.available_count().await, 2);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let pool = ExecutorPool::new(2, test_settings());
        pool.start().await.unwrap();
        pool.start().await.unwrap();
        assert_eq!(pool.available_count().await, 2);
    }

    #[tokio::test]
    async fn acquire_drains_available_then_overflows() {
        let pool = ExecutorPool::new(1, test_settings());
        pool.start().await.unwrap();
        let first = pool.acquire().await.unwrap();
        assert_eq!(pool.available_count().await, 0);
        assert_eq!(pool.in_use_count().await, 1);
        // Pool is empty now; acquiring again must still succeed by creating
        // a fresh executor rather than blocking.
        let second = pool.acquire().await.unwrap();
        assert_eq!(pool.in_use_count().await, 2);
        drop(first);
        drop(second);
    }

    #[tokio::test]
    async fn release_returns_executor_to_available_tail() {
        let pool = ExecutorPool::new(1, test_settings());
        pool.start().await.unwrap();
        let executor = pool.acquire().await.unwrap();
        assert_eq!(pool.available_count().await, 0);
        pool.release(executor).await;
        assert_eq!(pool.available_count().await, 1);
        assert_eq!(pool.in_use_count().await, 0);
    }

    #[tokio::test]
    async fn discard_drops_without_returning_to_available() {
        let pool = ExecutorPool::new(1, test_settings());
        pool.start().await.unwrap();
        let executor = pool.acquire().await.unwrap();
        pool.discard(executor).await;
        assert_eq!(pool.available_count().await, 0);
        assert_eq!(pool.in_use_count().await, 0);
    }

    #[tokio::test]
    async fn stop_clears_available_and_resets_started_flag() {
        let pool = ExecutorPool::new(2, test_settings());
        pool.start().await.unwrap();
        pool.stop().await;
        assert_eq!(pool.available_count().await, 0);
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::PoolStopped));
    }

    #[tokio::test]
    async fn stop_without_start_is_safe() {
        let pool = ExecutorPool::new(1, test_settings());
        pool.stop().await;
    }
}
