//! Coordination service contract: per-(destination, table) locking and
//! monotonic schema version counters.
//!
//! The lock is the only mechanism preventing concurrent schema mutation of
//! one table; the version counter is the fencing token that lets a writer
//! detect that its cached schema went stale while it waited for the lock.
//! Implementations may be in-process (single node) or distributed (shared
//! KV with leases); callers are blind to which.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("can't acquire lock for {destination_id}/{table_name}: {message}")]
    Lock {
        destination_id: String,
        table_name: String,
        message: String,
    },
    #[error("version counter failure for {destination_id}/{table_name}: {message}")]
    Version {
        destination_id: String,
        table_name: String,
        message: String,
    },
}

/// Exclusive hold on one (destination, table). Released on drop.
pub struct LockHandle {
    _guard: Box<dyn Any + Send>,
}

impl LockHandle {
    pub fn new(guard: impl Any + Send) -> LockHandle {
        LockHandle {
            _guard: Box::new(guard),
        }
    }
}

/// Distributed lock + version counter over (destination, table) pairs.
///
/// Contract: `lock` blocks until the pair is exclusively held or fails with
/// a distinguishable error. `increment_version` returns strictly increasing
/// integers; concurrent callers get distinct values, and the highest value
/// returned so far is what `get_version` reports next.
#[async_trait]
pub trait MonitorKeeper: Send + Sync {
    async fn lock(
        &self,
        destination_id: &str,
        table_name: &str,
    ) -> Result<LockHandle, CoordinationError>;

    async fn get_version(
        &self,
        destination_id: &str,
        table_name: &str,
    ) -> Result<i64, CoordinationError>;

    async fn increment_version(
        &self,
        destination_id: &str,
        table_name: &str,
    ) -> Result<i64, CoordinationError>;
}

/// Single-node [`MonitorKeeper`]: a mutex per (destination, table) plus
/// in-memory version counters.
#[derive(Default)]
pub struct InProcessMonitor {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    versions: Mutex<HashMap<String, i64>>,
}

impl InProcessMonitor {
    pub fn new() -> InProcessMonitor {
        InProcessMonitor::default()
    }

    fn key(destination_id: &str, table_name: &str) -> String {
        format!("{destination_id}_{table_name}")
    }
}

#[async_trait]
impl MonitorKeeper for InProcessMonitor {
    async fn lock(
        &self,
        destination_id: &str,
        table_name: &str,
    ) -> Result<LockHandle, CoordinationError> {
        let entry = {
            let mut locks = self.locks.lock();
            locks
                .entry(Self::key(destination_id, table_name))
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        let guard = entry.lock_owned().await;
        Ok(LockHandle::new(guard))
    }

    async fn get_version(
        &self,
        destination_id: &str,
        table_name: &str,
    ) -> Result<i64, CoordinationError> {
        let versions = self.versions.lock();
        Ok(versions
            .get(&Self::key(destination_id, table_name))
            .copied()
            .unwrap_or(0))
    }

    async fn increment_version(
        &self,
        destination_id: &str,
        table_name: &str,
    ) -> Result<i64, CoordinationError> {
        let mut versions = self.versions.lock();
        let version = versions
            .entry(Self::key(destination_id, table_name))
            .or_insert(0);
        *version += 1;
        Ok(*version)
    }
}
