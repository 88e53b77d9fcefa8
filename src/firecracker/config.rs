//! Firecracker VM configuration wire structures.
//!
//! These map directly to the hypervisor's REST API configuration objects.
//!
//! Reference: https://github.com/firecracker-microvm/firecracker/blob/main/src/api_server/swagger/firecracker.yaml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `/machine-config` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub vcpu_count: u8,
    pub mem_size_mib: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smt: Option<bool>,
}

impl MachineConfig {
    pub fn new(vcpu_count: u8, mem_size_mib: u32) -> Self {
        Self {
            vcpu_count,
            mem_size_mib,
            smt: Some(false),
        }
    }
}

/// `/boot-source` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootSource {
    pub kernel_image_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_args: Option<String>,
}

impl BootSource {
    pub fn new(kernel_image_path: PathBuf, boot_args: String) -> Self {
        Self {
            kernel_image_path,
            boot_args: Some(boot_args),
        }
    }
}

/// Assemble the bit-exact boot argument string: a fixed prefix concatenated
/// with a network suffix of the shape
/// `ip={guest_ip}::{gateway_ip}:{netmask}::eth0:off`.
pub fn boot_args(guest_ip: std::net::Ipv4Addr, gateway_ip: std::net::Ipv4Addr, netmask: std::net::Ipv4Addr) -> String {
    format!(
        "console=ttyS0 reboot=k panic=1 pci=off nomodules random.trust_cpu=on \
         quiet loglevel=0 nokaslr audit=0 numa=off mitigations=off noresume \
         init=/sbin/vm-init ip={guest_ip}::{gateway_ip}:{netmask}::eth0:off"
    )
}

/// `/drives/{id}` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    pub drive_id: String,
    pub path_on_host: PathBuf,
    pub is_root_device: bool,
    pub is_read_only: bool,
}

impl DriveConfig {
    /// The shared read-only squashfs root.
    pub fn root_disk(path: PathBuf) -> Self {
        Self {
            drive_id: "rootfs".to_string(),
            path_on_host: path,
            is_root_device: true,
            is_read_only: true,
        }
    }

    /// The per-VM read-write overlay.
    pub fn overlay_disk(path: PathBuf) -> Self {
        Self {
            drive_id: "overlay".to_string(),
            path_on_host: path,
            is_root_device: false,
            is_read_only: false,
        }
    }
}

/// `/network-interfaces/{id}` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub iface_id: String,
    pub host_dev_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_mac: Option<String>,
}

impl NetworkInterface {
    pub fn new(iface_id: &str, host_dev_name: &str, guest_mac: &str) -> Self {
        Self {
            iface_id: iface_id.to_string(),
            host_dev_name: host_dev_name.to_string(),
            guest_mac: Some(guest_mac.to_string()),
        }
    }
}

/// `/vsock` body. Guest CID is always 3 per spec. `vsock_id` is fixed too —
/// this runner only ever attaches one vsock device per VM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VsockConfig {
    pub vsock_id: String,
    pub guest_cid: u32,
    pub uds_path: PathBuf,
}

pub const GUEST_CID: u32 = 3;
pub const VSOCK_ID: &str = "vsock0";

impl VsockConfig {
    pub fn new(uds_path: PathBuf) -> Self {
        Self {
            vsock_id: VSOCK_ID.to_string(),
            guest_cid: GUEST_CID,
            uds_path,
        }
    }
}

/// `/actions` body.
#[derive(Debug, Clone, Serialize)]
pub struct Action {
    pub action_type: ActionType,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum ActionType {
    InstanceStart,
    SendCtrlAltDel,
    FlushMetrics,
}

impl Action {
    pub fn new(action_type: ActionType) -> Self {
        Self { action_type }
    }
}
