//! TAP device pool (C2).
//!
//! Pre-creates TAP devices slaved to a host bridge, hands them to VMs along
//! with a freshly chosen MAC and IP, and takes them back on release. The
//! free queue, the replenishing flag, and the next-index counter are all
//! guarded by one lock; the actual `ip` invocations that create or delete a
//! device run outside that lock so a slow host command never blocks other
//! acquires.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ip_pool::{IpPool, IpPoolError};
use crate::network::host_ops::{derive_mac, runner_tap_prefix, HostCommands, HostOpError};
use crate::vm_instance::VmId;

#[derive(Debug, Error)]
pub enum TapPoolError {
    #[error("ip pool: {0}")]
    Ip(#[from] IpPoolError),

    #[error("host networking operation failed: {0}")]
    Host(#[from] HostOpError),

    #[error("TAP pool used before init()")]
    NotInitialized,
}

/// Returned by [`TapPool::acquire`]; consumed by VM Instance and returned
/// verbatim to [`TapPool::release`].
#[derive(Debug, Clone)]
pub struct VmNetworkConfig {
    pub tap_device: String,
    pub guest_mac: String,
    pub guest_ip: Ipv4Addr,
    pub gateway_ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

#[derive(Debug, Clone)]
pub struct TapPoolConfig {
    /// Used to derive a stable 8-hex-char prefix via MD5.
    pub runner_name: String,
    /// Target pool depth.
    pub size: usize,
    /// Refill when available < threshold.
    pub replenish_threshold: usize,
    pub bridge_name: String,
    pub bridge_ip: Ipv4Addr,
    pub bridge_netmask: Ipv4Addr,
}

struct PoolState {
    free: VecDeque<String>,
    next_index: u32,
    initialized: bool,
}

pub struct TapPool {
    config: TapPoolConfig,
    prefix: String,
    host: Arc<dyn HostCommands>,
    ip_pool: Arc<IpPool>,
    state: Mutex<PoolState>,
    replenishing: AtomicBool,
}

impl TapPool {
    pub fn new(config: TapPoolConfig, host: Arc<dyn HostCommands>, ip_pool: Arc<IpPool>) -> Self {
        let prefix = runner_tap_prefix(&config.runner_name);
        Self {
            config,
            prefix,
            host,
            ip_pool,
            state: Mutex::new(PoolState {
                free: VecDeque::new(),
                next_index: 0,
                initialized: false,
            }),
            replenishing: AtomicBool::new(false),
        }
    }

    /// Scan for orphan TAPs from a crashed prior run, delete them, then
    /// create `size` fresh TAPs and push them onto the free queue.
    pub async fn init(self: &Arc<Self>) -> Result<(), TapPoolError> {
        self.reap_orphans()?;

        let mut created = Vec::new();
        {
            let mut state = self.state.lock().expect("tap pool lock poisoned");
            state.free.clear();
            state.next_index = 0;
            state.initialized = true;
        }

        for _ in 0..self.config.size {
            let name = self.create_one().await?;
            created.push(name);
        }

        {
            let mut state = self.state.lock().expect("tap pool lock poisoned");
            state.free.extend(created);
        }

        info!(size = self.config.size, prefix = %self.prefix, "TAP pool initialized");
        Ok(())
    }

    fn reap_orphans(&self) -> Result<(), TapPoolError> {
        let ifaces = self.host.list_interfaces()?;
        for name in ifaces {
            if name.starts_with(&self.tap_name_prefix()) {
                warn!(tap = %name, "reaping stale TAP from a prior run");
                if let Err(e) = self.host.tap_delete(&name) {
                    warn!(tap = %name, error = %e, "failed to delete stale TAP");
                }
            }
        }
        Ok(())
    }

    fn tap_name_prefix(&self) -> String {
        format!("vm0{}", self.prefix)
    }

    async fn create_one(&self) -> Result<String, TapPoolError> {
        let index = {
            let mut state = self.state.lock().expect("tap pool lock poisoned");
            let idx = state.next_index;
            state.next_index += 1;
            idx
        };
        let name = format!("{}{index:03}", self.tap_name_prefix());
        self.create_device(&name)?;
        Ok(name)
    }

    fn create_device(&self, name: &str) -> Result<(), TapPoolError> {
        self.host.tap_create(name)?;
        self.host.tap_set_master(name, &self.config.bridge_name)?;
        self.host.tap_set_up(name)?;
        Ok(())
    }

    /// Pop a TAP from the queue (creating one on-demand if empty), assign it
    /// an IP and a deterministic MAC, and flush any stale ARP entry for the
    /// chosen IP. Any failure after the TAP is obtained returns it to the
    /// queue (if pooled) or deletes it (if on-demand), and releases the IP.
    pub async fn acquire(self: &Arc<Self>, vm_id: VmId) -> Result<VmNetworkConfig, TapPoolError> {
        if !self.is_initialized() {
            return Err(TapPoolError::NotInitialized);
        }

        let (tap, from_pool) = match self.pop_free() {
            Some(tap) => (tap, true),
            None => (self.create_one().await?, false),
        };

        match self.finish_acquire(&tap, vm_id.clone()).await {
            Ok(net) => {
                self.maybe_replenish();
                Ok(net)
            }
            Err(e) => {
                if from_pool {
                    self.push_free(tap);
                } else {
                    let _ = self.host.tap_delete(&tap);
                }
                Err(e)
            }
        }
    }

    async fn finish_acquire(&self, tap: &str, vm_id: VmId) -> Result<VmNetworkConfig, TapPoolError> {
        let ip = self.ip_pool.allocate(vm_id.clone())?;
        let mac = derive_mac(vm_id.as_str());

        if let Err(e) = self.host.tap_set_mac(tap, &mac) {
            self.ip_pool.release(ip);
            return Err(e.into());
        }

        self.host.arp_flush(ip, &self.config.bridge_name);

        Ok(VmNetworkConfig {
            tap_device: tap.to_string(),
            guest_mac: mac,
            guest_ip: ip,
            gateway_ip: self.config.bridge_ip,
            netmask: self.config.bridge_netmask,
        })
    }

    /// Release `tap_device`/`guest_ip` back to the pool. Tolerates a
    /// double-release by logging and returning; the caller is buggy to do
    /// that but it must never be fatal.
    pub fn release(self: &Arc<Self>, tap_device: &str, guest_ip: Ipv4Addr) {
        self.ip_pool.release(guest_ip);
        self.host.arp_flush(guest_ip, &self.config.bridge_name);

        if tap_device.starts_with(&self.tap_name_prefix()) && self.is_initialized() {
            self.push_free(tap_device.to_string());
            debug!(tap = tap_device, "TAP returned to pool");
        } else {
            if let Err(e) = self.host.tap_delete(tap_device) {
                warn!(tap = tap_device, error = %e, "failed to delete released TAP");
            }
            debug!(tap = tap_device, "TAP deleted (not pool-owned or pool shut down)");
        }
    }

    /// Mark the pool uninitialized and fire-and-forget delete every queued
    /// TAP. Survivors are reaped by the next `init()` via the prefix scan.
    pub fn shutdown(self: &Arc<Self>) {
        let drained: Vec<String> = {
            let mut state = self.state.lock().expect("tap pool lock poisoned");
            state.initialized = false;
            state.free.drain(..).collect()
        };
        let host = self.host.clone();
        tokio::spawn(async move {
            for tap in drained {
                let _ = host.tap_delete(&tap);
            }
        });
    }

    fn pop_free(&self) -> Option<String> {
        self.state
            .lock()
            .expect("tap pool lock poisoned")
            .free
            .pop_front()
    }

    fn push_free(&self, tap: String) {
        self.state
            .lock()
            .expect("tap pool lock poisoned")
            .free
            .push_back(tap);
    }

    fn is_initialized(&self) -> bool {
        self.state.lock().expect("tap pool lock poisoned").initialized
    }

    pub fn depth(&self) -> usize {
        self.state.lock().expect("tap pool lock poisoned").free.len()
    }

    /// If depth dropped below threshold and no replenishment is already in
    /// flight, spawn a single background task to top the pool back up to
    /// `size`. At most one replenisher runs at a time (single-flight).
    fn maybe_replenish(self: &Arc<Self>) {
        if self.depth() >= self.config.replenish_threshold {
            return;
        }
        if self
            .replenishing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let pool = self.clone();
        tokio::spawn(async move {
            let deficit = pool.config.size.saturating_sub(pool.depth());
            let mut created = Vec::with_capacity(deficit);
            for _ in 0..deficit {
                match pool.create_one().await {
                    Ok(name) => created.push(name),
                    Err(e) => {
                        warn!(error = %e, "TAP replenishment failed, will retry on next acquire");
                        break;
                    }
                }
            }
            {
                let mut state = pool.state.lock().expect("tap pool lock poisoned");
                state.free.extend(created);
            }
            pool.replenishing.store(false, Ordering::SeqCst);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::host_ops::NoopHostCommands;

    fn make_pool(size: usize, threshold: usize) -> Arc<TapPool> {
        let ip_pool = Arc::new(IpPool::from_str_cidr("10.0.0.0/24", Ipv4Addr::new(10, 0, 0, 1)).unwrap());
        let config = TapPoolConfig {
            runner_name: "test-runner".to_string(),
            size,
            replenish_threshold: threshold,
            bridge_name: "fcbr0".to_string(),
            bridge_ip: Ipv4Addr::new(10, 0, 0, 1),
            bridge_netmask: Ipv4Addr::new(255, 255, 255, 0),
        };
        Arc::new(TapPool::new(config, Arc::new(NoopHostCommands::default()), ip_pool))
    }

    #[tokio::test]
    async fn init_creates_exactly_size_taps() {
        let pool = make_pool(2, 1);
        pool.init().await.unwrap();
        assert_eq!(pool.depth(), 2);
    }

    #[tokio::test]
    async fn init_reaps_stale_taps_first() {
        let ip_pool = Arc::new(IpPool::from_str_cidr("10.0.0.0/24", Ipv4Addr::new(10, 0, 0, 1)).unwrap());
        let host = Arc::new(NoopHostCommands::default());
        let config = TapPoolConfig {
            runner_name: "test-runner".to_string(),
            size: 3,
            replenish_threshold: 1,
            bridge_name: "fcbr0".to_string(),
            bridge_ip: Ipv4Addr::new(10, 0, 0, 1),
            bridge_netmask: Ipv4Addr::new(255, 255, 255, 0),
        };
        let prefix = runner_tap_prefix("test-runner");
        host.tap_create(&format!("vm0{prefix}042")).unwrap();

        let pool = Arc::new(TapPool::new(config, host.clone(), ip_pool));
        pool.init().await.unwrap();

        assert!(!host.tap_exists(&format!("vm0{prefix}042")));
        assert_eq!(pool.depth(), 3);
    }

    #[tokio::test]
    async fn acquire_assigns_distinct_mac_and_ip() {
        let pool = make_pool(2, 1);
        pool.init().await.unwrap();

        let a = pool.acquire(VmId::from_hex("deadbeef")).await.unwrap();
        let b = pool.acquire(VmId::from_hex("cafebabe")).await.unwrap();

        assert_ne!(a.tap_device, b.tap_device);
        assert_ne!(a.guest_mac, b.guest_mac);
        assert_ne!(a.guest_ip, b.guest_ip);
        assert_eq!(a.guest_mac, derive_mac("deadbeef"));
    }

    #[tokio::test]
    async fn acquire_on_empty_pool_creates_on_demand() {
        let pool = make_pool(0, 0);
        pool.init().await.unwrap();
        assert_eq!(pool.depth(), 0);

        let net = pool.acquire(VmId::from_hex("deadbeef")).await.unwrap();
        assert!(net.tap_device.starts_with("vm0"));
    }

    #[tokio::test]
    async fn release_returns_pool_owned_tap_to_queue() {
        let pool = make_pool(1, 1);
        pool.init().await.unwrap();

        let net = pool.acquire(VmId::from_hex("deadbeef")).await.unwrap();
        // depth is 0 right after acquire but replenishment will restore it;
        // release should still hand the exact same device back to the queue.
        pool.release(&net.tap_device, net.guest_ip);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(pool.depth() >= 1);
    }

    #[tokio::test]
    async fn replenishment_restores_depth_after_drain() {
        let pool = make_pool(2, 1);
        pool.init().await.unwrap();

        let _ = pool.acquire(VmId::from_hex("deadbeef")).await.unwrap();
        // depth dropped to 1, at threshold, no replenish fired yet
        let _ = pool.acquire(VmId::from_hex("cafebabe")).await.unwrap();
        // depth dropped to 0 < threshold(1): replenish should fire

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(pool.depth(), 2);
    }

    #[tokio::test]
    async fn acquire_before_init_fails() {
        let pool = make_pool(1, 1);
        let err = pool.acquire(VmId::from_hex("deadbeef")).await.unwrap_err();
        assert!(matches!(err, TapPoolError::NotInitialized));
    }
}
