//! Per-group mutual exclusion for settlement writes.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Hands out one async lock per group id.
///
/// Held from the "already split" guard read until the transfer rows are
/// written, so two computations for the same group cannot both pass the
/// guard.
#[derive(Debug, Default)]
pub(crate) struct GroupLocks {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl GroupLocks {
    pub(crate) async fn acquire(&self, group_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop locks nobody is holding or waiting on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(group_id).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_group_is_serialized() {
        let locks = GroupLocks::default();
        let guard = locks.acquire(1).await;

        let second = tokio::time::timeout(Duration::from_millis(20), locks.acquire(1)).await;
        assert!(second.is_err());

        drop(guard);
        let third = tokio::time::timeout(Duration::from_millis(20), locks.acquire(1)).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn different_groups_do_not_block() {
        let locks = GroupLocks::default();
        let _one = locks.acquire(1).await;
        let two = tokio::time::timeout(Duration::from_millis(20), locks.acquire(2)).await;
        assert!(two.is_ok());
    }
}
