//! Host networking: the TAP device pool (C2) and the privileged `ip(8)`
//! operations it is the sole owner of.

pub mod host_ops;
pub mod tap_pool;

pub use host_ops::{derive_mac, HostCommands, HostOpError, IpRouteCommands};
pub use tap_pool::{TapPool, TapPoolConfig, TapPoolError, VmNetworkConfig};
