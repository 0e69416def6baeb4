//! Allocation guard tying a pool entry to the lifetime of an operation.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{PoolResource, ResourcePool};

/// A provisional allocation that is released on drop unless committed.
///
/// Created by [`ResourcePool::lease`]. While the lease is alive the value is
/// held by the provisional owner. [`Lease::commit`] hands the value to its
/// permanent owner; any other way of ending the lease, including an early
/// return or a cancelled future, frees the value again.
#[derive(Debug)]
#[must_use = "dropping a lease immediately releases the allocated value"]
pub struct Lease<R: PoolResource> {
    pool: Arc<ResourcePool<R>>,
    value: R,
    owner: String,
    armed: bool,
}

impl<R: PoolResource> Lease<R> {
    pub(crate) fn new(pool: Arc<ResourcePool<R>>, value: R, owner: String) -> Self {
        Self {
            pool,
            value,
            owner,
            armed: true,
        }
    }

    /// The allocated value.
    pub fn value(&self) -> R {
        self.value
    }

    /// The provisional owner key.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Re-key the allocation to `new_owner` and keep it.
    ///
    /// Returns `None` if the value was released while leased. The pool is
    /// left untouched in that case; the value may already belong to someone
    /// else.
    pub fn commit(mut self, new_owner: &str) -> Option<R> {
        self.armed = false;

        match self.pool.rekey(&self.owner, new_owner) {
            Some(value) => {
                if value != self.value {
                    warn!(
                        kind = R::KIND,
                        leased = %self.value,
                        committed = %value,
                        owner = %self.owner,
                        "Committed a different value than the one leased"
                    );
                }
                Some(value)
            }
            None => {
                warn!(
                    kind = R::KIND,
                    value = %self.value,
                    owner = %self.owner,
                    new_owner,
                    "Leased value was released before commit"
                );
                None
            }
        }
    }

    /// Release the value now.
    pub fn release(self) {
        drop(self);
    }
}

impl<R: PoolResource> Drop for Lease<R> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        if self.pool.release_owned(self.value, &self.owner) {
            debug!(
                kind = R::KIND,
                value = %self.value,
                owner = %self.owner,
                "Lease dropped, value returned to pool"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PortPool;

    fn pool() -> Arc<PortPool> {
        Arc::new(ResourcePool::new(10, 12).unwrap())
    }

    #[test]
    fn test_drop_releases() {
        let pool = pool();
        {
            let lease = pool.lease("lobby-1").unwrap();
            assert_eq!(lease.value(), 10);
            assert_eq!(pool.owner_of(10).as_deref(), Some("lobby-1"));
        }
        assert!(pool.is_empty());
    }

    #[test]
    fn test_explicit_release() {
        let pool = pool();
        let lease = pool.lease("lobby-1").unwrap();
        lease.release();
        assert_eq!(pool.find_by_owner("lobby-1"), None);
    }

    #[test]
    fn test_commit_rekeys_and_keeps() {
        let pool = pool();
        let lease = pool.lease("lobby-1").unwrap();
        let value = lease.commit("c0ffee");

        assert_eq!(value, Some(10));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.find_by_owner("lobby-1"), None);
        assert_eq!(pool.find_by_owner("c0ffee"), Some(10));
    }

    #[test]
    fn test_drop_does_not_release_foreign_owner() {
        let pool = pool();
        let lease = pool.lease("lobby-1").unwrap();

        // A reconciliation pass claims the value for a running container.
        pool.reserve(10, "container-9");
        drop(lease);

        assert_eq!(pool.owner_of(10).as_deref(), Some("container-9"));
    }

    #[test]
    fn test_commit_after_external_release_is_noop() {
        let pool = pool();
        let lease = pool.lease("lobby-1").unwrap();
        pool.release(10);

        assert_eq!(lease.commit("c0ffee"), None);
        assert_eq!(pool.owner_of(10), None);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_commit_does_not_take_reallocated_value() {
        let pool = pool();
        let lease = pool.lease("lobby-1").unwrap();
        pool.release(10);
        assert_eq!(pool.allocate("lobby-2").unwrap(), 10);

        assert_eq!(lease.commit("c0ffee"), None);
        assert_eq!(pool.owner_of(10).as_deref(), Some("lobby-2"));
        assert_eq!(pool.find_by_owner("c0ffee"), None);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_lease_exhausted() {
        let pool = pool();
        let _a = pool.lease("a").unwrap();
        let _b = pool.lease("b").unwrap();
        let _c = pool.lease("c").unwrap();

        assert!(pool.lease("d").unwrap_err().is_exhausted());
    }
}
