//! Resource pools for game-server network identities.
//!
//! This library provides:
//! - [`ResourcePool`]: a bounded, inclusive range of values with owner tracking
//! - [`PoolResource`]: the ordered resource types a pool can hand out
//!   (IPv4 addresses for overlay networks, host ports for host networking)
//! - [`Lease`]: an allocation guard that releases its value unless committed
//!
//! # Invariants
//!
//! - Every allocated value lies within `[start, end]`
//! - A value has at most one owner at a time
//! - Allocation always returns the lowest free value
//! - Release operations are idempotent and never fail
//!
//! A pool knows nothing about templates or networking modes; callers decide
//! which pool to draw from.

use std::fmt;
use std::hash::Hash;
use std::net::Ipv4Addr;

use thiserror::Error;

mod lease;
mod pool;

pub use lease::Lease;
pub use pool::{PoolStats, ResourcePool};

/// Pool of overlay-network IPv4 addresses.
pub type IpPool = ResourcePool<Ipv4Addr>;

/// Pool of host ports.
pub type PortPool = ResourcePool<u16>;

/// Resource pool errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Every value in the range is allocated.
    #[error("no {kind} available in range {start}-{end}")]
    Exhausted {
        kind: &'static str,
        start: String,
        end: String,
    },

    /// The configured range is empty.
    #[error("invalid {kind} range: start {start} is after end {end}")]
    InvalidRange {
        kind: &'static str,
        start: String,
        end: String,
    },
}

impl PoolError {
    /// Returns true if this error indicates the pool ran out of values.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PoolError::Exhausted { .. })
    }
}

// ============================================================================
// Resource Types
// ============================================================================

/// A value that can be handed out by a [`ResourcePool`].
///
/// Values are totally ordered; `successor` walks the range in ascending order.
pub trait PoolResource:
    Copy + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Human-readable name used in errors and logs.
    const KIND: &'static str;

    /// The next value in ascending order, or `None` at the top of the domain.
    fn successor(self) -> Option<Self>;

    /// Position of the value in its domain, used for range arithmetic.
    fn ordinal(self) -> u64;
}

impl PoolResource for Ipv4Addr {
    const KIND: &'static str = "IP address";

    fn successor(self) -> Option<Self> {
        u32::from(self).checked_add(1).map(Ipv4Addr::from)
    }

    fn ordinal(self) -> u64 {
        u64::from(u32::from(self))
    }
}

impl PoolResource for u16 {
    const KIND: &'static str = "port";

    fn successor(self) -> Option<Self> {
        self.checked_add(1)
    }

    fn ordinal(self) -> u64 {
        u64::from(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_successor_carries_octets() {
        let addr: Ipv4Addr = "10.99.0.255".parse().unwrap();
        assert_eq!(addr.successor(), Some("10.99.1.0".parse().unwrap()));
        assert_eq!(Ipv4Addr::BROADCAST.successor(), None);
    }

    #[test]
    fn test_port_successor_stops_at_max() {
        assert_eq!(5520u16.successor(), Some(5521));
        assert_eq!(u16::MAX.successor(), None);
    }

    #[test]
    fn test_exhausted_message() {
        let err = PoolError::Exhausted {
            kind: u16::KIND,
            start: "5521".to_string(),
            end: "5599".to_string(),
        };
        assert!(err.is_exhausted());
        assert_eq!(err.to_string(), "no port available in range 5521-5599");
    }
}
