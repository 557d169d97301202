//! Advisory per-issue locking so two actions against the same issue
//! never run concurrently within one executor instance (e.g. a
//! `close_issue` and a `label_issue` planned in the same cycle).

use dashmap::DashSet;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct IssueLocks {
    held: Arc<DashSet<Uuid>>,
}

/// RAII guard releasing the lock on drop.
pub struct IssueLockGuard {
    held: Arc<DashSet<Uuid>>,
    issue_id: Uuid,
}

impl Drop for IssueLockGuard {
    fn drop(&mut self) {
        self.held.remove(&self.issue_id);
    }
}

impl IssueLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to acquire the lock for `issue_id`. Returns `None` if
    /// another action against the same issue is already in flight.
    pub fn try_acquire(&self, issue_id: Uuid) -> Option<IssueLockGuard> {
        if self.held.insert(issue_id) {
            Some(IssueLockGuard { held: self.held.clone(), issue_id })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_on_same_issue_fails_while_held() {
        let locks = IssueLocks::new();
        let id = Uuid::new_v4();
        let guard = locks.try_acquire(id);
        assert!(guard.is_some());
        assert!(locks.try_acquire(id).is_none());
    }

    #[test]
    fn lock_releases_on_drop() {
        let locks = IssueLocks::new();
        let id = Uuid::new_v4();
        {
            let _guard = locks.try_acquire(id).unwrap();
        }
        assert!(locks.try_acquire(id).is_some());
    }

    #[test]
    fn distinct_issues_do_not_contend() {
        let locks = IssueLocks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let _guard_a = locks.try_acquire(a).unwrap();
        assert!(locks.try_acquire(b).is_some());
    }
}
