//! The Firecracker API client (C4): a length-framed HTTP/1.1-over-AF_UNIX
//! transport plus the wire structures for the hypervisor's configuration
//! endpoints.

pub mod api;
pub mod config;

pub use api::{ApiError, FirecrackerClient};
pub use config::{
    boot_args, Action, ActionType, BootSource, DriveConfig, MachineConfig, NetworkInterface, VsockConfig, GUEST_CID,
};
