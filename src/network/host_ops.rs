//! Privileged host networking operations used by the TAP pool.
//!
//! All `ip` invocations that mutate kernel state are funneled through this
//! module's [`HostCommands`] trait so the TAP pool (the only component
//! allowed to touch the bridge, the kernel interface list, and the ARP
//! table) can be exercised in tests without root or a real network stack.

use std::net::Ipv4Addr;
use std::process::Command;

use md5::{Digest, Md5};
use thiserror::Error;
use tracing::debug;

/// Errors from privileged host networking operations.
#[derive(Debug, Error)]
pub enum HostOpError {
    #[error("failed to execute `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },
}

/// Privileged networking primitives the TAP pool needs from the host.
///
/// The real implementation shells out to `ip(8)`. Tests substitute a
/// recording no-op implementation so pool logic can be exercised without a
/// kernel network stack or elevated privilege.
pub trait HostCommands: Send + Sync {
    fn tap_create(&self, tap: &str) -> Result<(), HostOpError>;
    fn tap_set_master(&self, tap: &str, bridge: &str) -> Result<(), HostOpError>;
    fn tap_set_up(&self, tap: &str) -> Result<(), HostOpError>;
    fn tap_set_mac(&self, tap: &str, mac: &str) -> Result<(), HostOpError>;
    fn tap_delete(&self, tap: &str) -> Result<(), HostOpError>;
    fn tap_exists(&self, tap: &str) -> bool;
    /// List the names of every TAP-capable interface currently on the host.
    fn list_interfaces(&self) -> Result<Vec<String>, HostOpError>;
    /// Flush a stale ARP/neighbor entry for `ip` on `bridge`. Failure is
    /// never fatal to the caller (the entry may simply not exist).
    fn arp_flush(&self, ip: Ipv4Addr, bridge: &str);
}

/// Real `ip(8)`-backed implementation of [`HostCommands`].
pub struct IpRouteCommands;

impl IpRouteCommands {
    fn run(&self, args: &[&str]) -> Result<(), HostOpError> {
        let command = format!("ip {}", args.join(" "));
        let output = Command::new("ip")
            .args(args)
            .output()
            .map_err(|source| HostOpError::Spawn {
                command: command.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(HostOpError::Failed {
                command,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl HostCommands for IpRouteCommands {
    fn tap_create(&self, tap: &str) -> Result<(), HostOpError> {
        self.run(&["tuntap", "add", tap, "mode", "tap"])
    }

    fn tap_set_master(&self, tap: &str, bridge: &str) -> Result<(), HostOpError> {
        self.run(&["link", "set", tap, "master", bridge])
    }

    fn tap_set_up(&self, tap: &str) -> Result<(), HostOpError> {
        self.run(&["link", "set", tap, "up"])
    }

    fn tap_set_mac(&self, tap: &str, mac: &str) -> Result<(), HostOpError> {
        self.run(&["link", "set", "dev", tap, "address", mac])
    }

    fn tap_delete(&self, tap: &str) -> Result<(), HostOpError> {
        self.run(&["link", "delete", tap])
    }

    fn tap_exists(&self, tap: &str) -> bool {
        std::path::Path::new(&format!("/sys/class/net/{tap}")).exists()
    }

    fn list_interfaces(&self) -> Result<Vec<String>, HostOpError> {
        let mut names = Vec::new();
        let entries = std::fs::read_dir("/sys/class/net").map_err(|source| HostOpError::Spawn {
            command: "readdir /sys/class/net".to_string(),
            source,
        })?;
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn arp_flush(&self, ip: Ipv4Addr, bridge: &str) {
        if let Err(e) = self.run(&["neigh", "del", &ip.to_string(), "dev", bridge]) {
            debug!(%ip, bridge, error = %e, "arp flush failed (entry likely absent)");
        }
    }
}

/// Recording no-op [`HostCommands`] for pool unit tests: every TAP the pool
/// believes it created is tracked in-memory so assertions about pool state
/// don't require a real kernel network stack.
#[derive(Default)]
pub struct NoopHostCommands {
    created: std::sync::Mutex<std::collections::HashSet<String>>,
}

impl HostCommands for NoopHostCommands {
    fn tap_create(&self, tap: &str) -> Result<(), HostOpError> {
        self.created.lock().unwrap().insert(tap.to_string());
        Ok(())
    }
    fn tap_set_master(&self, _tap: &str, _bridge: &str) -> Result<(), HostOpError> {
        Ok(())
    }
    fn tap_set_up(&self, _tap: &str) -> Result<(), HostOpError> {
        Ok(())
    }
    fn tap_set_mac(&self, _tap: &str, _mac: &str) -> Result<(), HostOpError> {
        Ok(())
    }
    fn tap_delete(&self, tap: &str) -> Result<(), HostOpError> {
        self.created.lock().unwrap().remove(tap);
        Ok(())
    }
    fn tap_exists(&self, tap: &str) -> bool {
        self.created.lock().unwrap().contains(tap)
    }
    fn list_interfaces(&self) -> Result<Vec<String>, HostOpError> {
        Ok(self.created.lock().unwrap().iter().cloned().collect())
    }
    fn arp_flush(&self, _ip: Ipv4Addr, _bridge: &str) {}
}

/// Derive a stable, locally-administered, unicast MAC address from a VmId.
///
/// Deterministic by construction: the same VmId always yields the same MAC,
/// which lets the boot argument string embed the expected MAC without a
/// round trip through the TAP pool.
pub fn derive_mac(vm_id: &str) -> String {
    let digest = Md5::digest(vm_id.as_bytes());
    // Locally administered (bit 1 set), unicast (bit 0 clear).
    let first = (digest[0] & 0xFC) | 0x02;
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        first, digest[1], digest[2], digest[3], digest[4], digest[5]
    )
}

/// Derive the stable 8-hex-char TAP name prefix for a runner, per §4.2:
/// an MD5 hash of the runner name keeps the prefix stable across restarts
/// (unlike a random per-run value) so a cold start can still recognize and
/// reap its own stale TAPs.
pub fn runner_tap_prefix(runner_name: &str) -> String {
    let digest = Md5::digest(runner_name.as_bytes());
    hex::encode(&digest[..4])
}
