//! Bounded resource pool with owner tracking.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::{Lease, PoolError, PoolResource};

/// A bounded, inclusive range of resources and the owner of each allocated one.
///
/// All operations take the pool's single lock for the duration of one scan or
/// mutation. The lock is never held across an await point or an external call.
#[derive(Debug)]
pub struct ResourcePool<R: PoolResource> {
    start: R,
    end: R,
    allocated: Mutex<HashMap<R, String>>,
}

/// Point-in-time usage of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats<R> {
    /// First value of the range.
    pub start: R,

    /// Last value of the range (inclusive).
    pub end: R,

    /// Number of values in the range.
    pub capacity: u64,

    /// Number of values currently allocated.
    pub allocated: u64,
}

impl<R> PoolStats<R> {
    /// Number of values still free.
    pub fn available(&self) -> u64 {
        self.capacity.saturating_sub(self.allocated)
    }
}

impl<R: PoolResource> ResourcePool<R> {
    /// Create an empty pool over `[start, end]`.
    pub fn new(start: R, end: R) -> Result<Self, PoolError> {
        if start > end {
            return Err(PoolError::InvalidRange {
                kind: R::KIND,
                start: start.to_string(),
                end: end.to_string(),
            });
        }

        Ok(Self {
            start,
            end,
            allocated: Mutex::new(HashMap::new()),
        })
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<R, String>> {
        // Every mutation is a single map operation, so a poisoned map is still consistent.
        self.allocated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// First value of the range.
    pub fn start(&self) -> R {
        self.start
    }

    /// Last value of the range (inclusive).
    pub fn end(&self) -> R {
        self.end
    }

    /// Check if a value lies within the pool's range.
    pub fn contains(&self, value: R) -> bool {
        self.start <= value && value <= self.end
    }

    /// Number of values in the range.
    pub fn capacity(&self) -> u64 {
        self.end.ordinal() - self.start.ordinal() + 1
    }

    /// Number of values currently allocated.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Returns true if nothing is allocated.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Number of values still free.
    pub fn available(&self) -> u64 {
        self.stats().available()
    }

    /// Allocate the lowest free value in the range to `owner`.
    pub fn allocate(&self, owner: &str) -> Result<R, PoolError> {
        let mut allocated = self.entries();

        let mut candidate = Some(self.start);
        while let Some(value) = candidate {
            if value > self.end {
                break;
            }

            if let Entry::Vacant(slot) = allocated.entry(value) {
                slot.insert(owner.to_string());
                debug!(kind = R::KIND, %value, owner, "Allocated resource");
                return Ok(value);
            }

            candidate = value.successor();
        }

        Err(PoolError::Exhausted {
            kind: R::KIND,
            start: self.start.to_string(),
            end: self.end.to_string(),
        })
    }

    /// Allocate the lowest free value and wrap it in a [`Lease`].
    ///
    /// The lease releases the value when dropped unless it is committed.
    pub fn lease(self: &Arc<Self>, owner: &str) -> Result<Lease<R>, PoolError> {
        let value = self.allocate(owner)?;
        Ok(Lease::new(Arc::clone(self), value, owner.to_string()))
    }

    /// Free a value. Releasing a free value is a no-op.
    ///
    /// Returns true if an entry was removed.
    pub fn release(&self, value: R) -> bool {
        let removed = self.entries().remove(&value);
        if let Some(owner) = &removed {
            debug!(kind = R::KIND, %value, owner = %owner, "Released resource");
        }
        removed.is_some()
    }

    /// Free a value only if it is still held by `owner`.
    pub fn release_owned(&self, value: R, owner: &str) -> bool {
        let mut allocated = self.entries();
        match allocated.get(&value) {
            Some(current) if current == owner => {
                allocated.remove(&value);
                debug!(kind = R::KIND, %value, owner, "Released resource");
                true
            }
            _ => false,
        }
    }

    /// Free the value held by `owner`, if any.
    pub fn release_by_owner(&self, owner: &str) -> Option<R> {
        let mut allocated = self.entries();
        let value = allocated
            .iter()
            .find_map(|(value, current)| (current == owner).then_some(*value))?;
        allocated.remove(&value);
        debug!(kind = R::KIND, %value, owner, "Released resource by owner");
        Some(value)
    }

    /// Record `value` as held by `owner`, overwriting any existing owner.
    ///
    /// Values outside the range are ignored and return false.
    pub fn reserve(&self, value: R, owner: &str) -> bool {
        if !self.contains(value) {
            return false;
        }

        let previous = self.entries().insert(value, owner.to_string());
        match previous {
            Some(previous) if previous != owner => {
                warn!(
                    kind = R::KIND,
                    %value,
                    previous_owner = %previous,
                    owner,
                    "Reserved resource already held by another owner"
                );
            }
            _ => debug!(kind = R::KIND, %value, owner, "Reserved resource"),
        }
        true
    }

    /// Move the value held by `old_owner` to `new_owner`.
    ///
    /// Returns the value, or `None` (and changes nothing) if `old_owner` holds nothing.
    pub fn rekey(&self, old_owner: &str, new_owner: &str) -> Option<R> {
        let mut allocated = self.entries();
        let (value, owner) = allocated
            .iter_mut()
            .find(|(_, current)| current.as_str() == old_owner)?;
        *owner = new_owner.to_string();
        debug!(kind = R::KIND, value = %value, old_owner, new_owner, "Re-keyed resource");
        Some(*value)
    }

    /// Owner of a value, if allocated.
    pub fn owner_of(&self, value: R) -> Option<String> {
        self.entries().get(&value).cloned()
    }

    /// Value held by `owner`, if any.
    pub fn find_by_owner(&self, owner: &str) -> Option<R> {
        self.entries()
            .iter()
            .find_map(|(value, current)| (current == owner).then_some(*value))
    }

    /// Ordered copy of every allocation.
    pub fn snapshot(&self) -> BTreeMap<R, String> {
        self.entries()
            .iter()
            .map(|(value, owner)| (*value, owner.clone()))
            .collect()
    }

    /// Current usage.
    pub fn stats(&self) -> PoolStats<R> {
        PoolStats {
            start: self.start,
            end: self.end,
            capacity: self.capacity(),
            allocated: self.entries().len() as u64,
        }
    }
}
