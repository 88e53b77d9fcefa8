//! IP address pool (C1).
//!
//! Hands out unique IPv4 addresses from a configured CIDR to VMs and
//! reclaims them on release. No persistence across restarts: stale leases
//! left by a crashed runner are cleaned up by the process reaper, not by
//! this pool.

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use cidr::Ipv4Cidr;
use thiserror::Error;
use tracing::{debug, warn};

use crate::vm_instance::VmId;

/// Errors from IP pool operations.
#[derive(Debug, Error)]
pub enum IpPoolError {
    #[error("IP pool exhausted: no free addresses in {cidr}")]
    Exhausted { cidr: String },

    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),
}

/// A held IP allocation.
#[derive(Debug, Clone)]
pub struct IpLease {
    pub ip: Ipv4Addr,
    pub owner: VmId,
    pub acquired_at: DateTime<Utc>,
}

struct IpPoolState {
    free: BTreeSet<Ipv4Addr>,
    leases: HashMap<Ipv4Addr, IpLease>,
}

/// Allocates and reclaims guest IPv4 addresses from a fixed CIDR range.
pub struct IpPool {
    cidr: Ipv4Cidr,
    state: Mutex<IpPoolState>,
}

impl IpPool {
    /// Build a pool seeded from `cidr`, minus the network/bridge address and
    /// the broadcast address.
    pub fn new(cidr: Ipv4Cidr, bridge_ip: Ipv4Addr) -> Self {
        let mut free = BTreeSet::new();
        let network = u32::from(cidr.first_address());
        let broadcast = u32::from(broadcast_of(cidr));

        // Exclude the network address and the broadcast address; the caller's
        // bridge address is excluded separately since it need not be either.
        for raw in (network + 1)..broadcast {
            let ip = Ipv4Addr::from(raw);
            if ip == bridge_ip {
                continue;
            }
            free.insert(ip);
        }

        debug!(cidr = %cidr, free = free.len(), "IP pool seeded");

        Self {
            cidr,
            state: Mutex::new(IpPoolState {
                free,
                leases: HashMap::new(),
            }),
        }
    }

    pub fn from_str_cidr(cidr: &str, bridge_ip: Ipv4Addr) -> Result<Self, IpPoolError> {
        let cidr: Ipv4Cidr = cidr
            .parse()
            .map_err(|_| IpPoolError::InvalidCidr(cidr.to_string()))?;
        Ok(Self::new(cidr, bridge_ip))
    }

    /// Allocate the smallest free address for `owner`.
    pub fn allocate(&self, owner: VmId) -> Result<Ipv4Addr, IpPoolError> {
        let mut state = self.state.lock().expect("ip pool lock poisoned");
        let ip = state
            .free
            .iter()
            .next()
            .copied()
            .ok_or_else(|| IpPoolError::Exhausted {
                cidr: self.cidr.to_string(),
            })?;
        state.free.remove(&ip);
        state.leases.insert(
            ip,
            IpLease {
                ip,
                owner: owner.clone(),
                acquired_at: Utc::now(),
            },
        );
        debug!(%ip, vm_id = %owner, "IP allocated");
        Ok(ip)
    }

    /// Release `ip` back to the free set. Idempotent: releasing an address
    /// that was never allocated is a no-op warning, not an error.
    pub fn release(&self, ip: Ipv4Addr) {
        let mut state = self.state.lock().expect("ip pool lock poisoned");
        match state.leases.remove(&ip) {
            Some(lease) => {
                state.free.insert(ip);
                debug!(%ip, vm_id = %lease.owner, "IP released");
            }
            None => {
                warn!(%ip, "release() called for an IP with no active lease");
            }
        }
    }

    pub fn lease_of(&self, ip: Ipv4Addr) -> Option<IpLease> {
        self.state
            .lock()
            .expect("ip pool lock poisoned")
            .leases
            .get(&ip)
            .cloned()
    }

    pub fn free_count(&self) -> usize {
        self.state.lock().expect("ip pool lock poisoned").free.len()
    }

    pub fn leased_count(&self) -> usize {
        self.state
            .lock()
            .expect("ip pool lock poisoned")
            .leases
            .len()
    }
}

fn broadcast_of(cidr: Ipv4Cidr) -> Ipv4Addr {
    let mask = u32::MAX.checked_shr(cidr.network_length() as u32).unwrap_or(u32::MAX);
    let base = u32::from(cidr.first_address());
    Ipv4Addr::from(base | mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> IpPool {
        IpPool::from_str_cidr("10.0.0.0/24", Ipv4Addr::new(10, 0, 0, 1)).unwrap()
    }

    #[test]
    fn allocate_returns_smallest_free_address() {
        let pool = pool();
        let ip = pool.allocate(VmId::from_hex("deadbeef")).unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn bridge_and_broadcast_are_excluded() {
        let pool = pool();
        assert!(!pool
            .state
            .lock()
            .unwrap()
            .free
            .contains(&Ipv4Addr::new(10, 0, 0, 1)));
        assert!(!pool
            .state
            .lock()
            .unwrap()
            .free
            .contains(&Ipv4Addr::new(10, 0, 0, 255)));
    }

    #[test]
    fn release_returns_ip_to_free_set() {
        let pool = pool();
        let before = pool.free_count();
        let ip = pool.allocate(VmId::from_hex("deadbeef")).unwrap();
        assert_eq!(pool.free_count(), before - 1);
        pool.release(ip);
        assert_eq!(pool.free_count(), before);
    }

    #[test]
    fn release_of_unknown_ip_is_a_no_op() {
        let pool = pool();
        let before = pool.free_count();
        pool.release(Ipv4Addr::new(10, 0, 0, 200));
        assert_eq!(pool.free_count(), before);
    }

    #[test]
    fn allocate_fails_with_exhausted_when_empty() {
        let pool = IpPool::from_str_cidr("10.0.0.0/30", Ipv4Addr::new(10, 0, 0, 1)).unwrap();
        // /30 has usable hosts .1 (bridge) and .2; .0 is network, .3 is broadcast.
        let ip = pool.allocate(VmId::from_hex("00000001")).unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 2));
        let err = pool.allocate(VmId::from_hex("00000002")).unwrap_err();
        assert!(matches!(err, IpPoolError::Exhausted { .. }));
    }

    #[test]
    fn no_two_live_leases_share_an_ip() {
        let pool = pool();
        let mut seen = std::collections::HashSet::new();
        for i in 0..20u32 {
            let ip = pool
                .allocate(VmId::from_hex(&format!("{i:08x}")))
                .unwrap();
            assert!(seen.insert(ip), "duplicate IP handed out: {ip}");
        }
    }
}
