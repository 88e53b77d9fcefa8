//! sandbox-runner: boots untrusted agent workloads in short-lived
//! Firecracker microVMs and tears them down cleanly on exit.
//!
//! ## Architecture
//!
//! Five pieces cooperate to take one job from "nothing" to "a running
//! guest" and back:
//!
//! ```text
//! RunnerSupervisor
//! ├── IP Pool         (ip_pool)           — guest IPv4 leases
//! ├── TAP Pool        (network::tap_pool) — host network interfaces
//! ├── Overlay Pool     (overlay_pool)      — per-VM writable disks
//! ├── Firecracker API  (firecracker)       — hypervisor control plane
//! └── VM Instance      (vm_instance)       — the lifecycle state machine
//! ```
//!
//! `process_discovery` reconstructs live hypervisor/runner/mitmproxy
//! processes from `/proc` for maintenance commands and startup reaping.

pub mod config;
pub mod firecracker;
pub mod ip_pool;
pub mod network;
pub mod overlay_pool;
pub mod process_discovery;
pub mod supervisor;
pub mod vm_instance;

pub use config::RunnerConfig;
pub use supervisor::{RunnerSupervisor, SupervisorConfig, SupervisorError};
pub use vm_instance::{VmId, VmInstance, VmInstanceError, VmInstanceInputs, VmState};
