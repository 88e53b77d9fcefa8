//! Process-wide runner configuration, loaded once at startup from
//! environment variables. Every field has a default so a bare `cargo run`
//! with no environment still boots against sensible local paths.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Hashed to derive this runner's stable TAP name prefix.
    pub runner_name: String,
    pub data_dir: PathBuf,

    pub firecracker_binary: PathBuf,
    pub kernel_path: PathBuf,
    pub rootfs_path: PathBuf,

    pub bridge_name: String,
    pub bridge_ip: Ipv4Addr,
    pub bridge_netmask: Ipv4Addr,
    pub cidr: String,

    pub tap_pool_size: usize,
    pub tap_pool_replenish_threshold: usize,
    pub overlay_pool_size: usize,
    pub overlay_pool_replenish_threshold: usize,
    pub overlay_bytes_size: u64,

    pub readiness_timeout: Duration,
    pub job_timeout: Duration,
    pub shutdown_grace_period: Duration,

    pub log_level: String,
}

impl RunnerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let runner_name = std::env::var("RUNNER_NAME").unwrap_or_else(|_| "sandbox-runner".to_string());

        let data_dir = std::env::var("RUNNER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/lib/sandbox-runner"));

        let firecracker_binary = std::env::var("RUNNER_FIRECRACKER_BINARY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/usr/bin/firecracker"));
        let kernel_path = std::env::var("RUNNER_KERNEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("vmlinux"));
        let rootfs_path = std::env::var("RUNNER_ROOTFS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("rootfs.squashfs"));

        let bridge_name = std::env::var("RUNNER_BRIDGE_NAME").unwrap_or_else(|_| "fcbr0".to_string());
        let bridge_ip = parse_env_or("RUNNER_BRIDGE_IP", Ipv4Addr::new(10, 0, 0, 1));
        let bridge_netmask = parse_env_or("RUNNER_BRIDGE_NETMASK", Ipv4Addr::new(255, 255, 255, 0));
        let cidr = std::env::var("RUNNER_CIDR").unwrap_or_else(|_| "10.0.0.0/24".to_string());

        let tap_pool_size = parse_env_or("RUNNER_TAP_POOL_SIZE", 4usize);
        let tap_pool_replenish_threshold = parse_env_or("RUNNER_TAP_POOL_REPLENISH_THRESHOLD", 2usize);
        let overlay_pool_size = parse_env_or("RUNNER_OVERLAY_POOL_SIZE", 4usize);
        let overlay_pool_replenish_threshold = parse_env_or("RUNNER_OVERLAY_POOL_REPLENISH_THRESHOLD", 2usize);
        let overlay_bytes_size = parse_env_or("RUNNER_OVERLAY_BYTES_SIZE", 512u64 * 1024 * 1024);

        let readiness_timeout = Duration::from_millis(parse_env_or("RUNNER_READINESS_TIMEOUT_MS", 5_000u64));
        let job_timeout = Duration::from_secs(parse_env_or("RUNNER_JOB_TIMEOUT_SECS", 300u64));
        let shutdown_grace_period = Duration::from_secs(parse_env_or("RUNNER_SHUTDOWN_GRACE_SECS", 5u64));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            runner_name,
            data_dir,
            firecracker_binary,
            kernel_path,
            rootfs_path,
            bridge_name,
            bridge_ip,
            bridge_netmask,
            cidr,
            tap_pool_size,
            tap_pool_replenish_threshold,
            overlay_pool_size,
            overlay_pool_replenish_threshold,
            overlay_bytes_size,
            readiness_timeout,
            job_timeout,
            shutdown_grace_period,
            log_level,
        })
    }

    pub fn pool_dir(&self) -> PathBuf {
        self.data_dir.join("pool")
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}
