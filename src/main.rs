//! sandbox-runner binary entrypoint.
//!
//! Wires together the IP/TAP/overlay pools, brings the TAP pool up against
//! the host bridge, and starts the Runner Supervisor. Job acceptance itself
//! (how a VM's workload is chosen and driven) lives upstream of this crate;
//! this binary's job ends at "ready to accept `run_job` calls" and "drained
//! cleanly on shutdown signal".

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sandbox_runner::config::RunnerConfig;
use sandbox_runner::ip_pool::IpPool;
use sandbox_runner::network::tap_pool::{TapPool, TapPoolConfig};
use sandbox_runner::network::IpRouteCommands;
use sandbox_runner::overlay_pool::{MkfsExt4Creator, OverlayPool, OverlayPoolConfig};
use sandbox_runner::process_discovery;
use sandbox_runner::supervisor::{RunnerSupervisor, SupervisorConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = RunnerConfig::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(runner = %config.runner_name, data_dir = %config.data_dir.display(), "starting sandbox runner");

    match process_discovery::reap_orphan_hypervisors() {
        Ok(reaped) if !reaped.is_empty() => {
            warn!(count = reaped.len(), vm_ids = ?reaped, "reaped orphaned hypervisor processes from a prior run");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "failed to scan for orphaned hypervisor processes, continuing startup"),
    }

    let ip_pool = Arc::new(IpPool::from_str_cidr(&config.cidr, config.bridge_ip)?);

    let tap_pool = Arc::new(TapPool::new(
        TapPoolConfig {
            runner_name: config.runner_name.clone(),
            size: config.tap_pool_size,
            replenish_threshold: config.tap_pool_replenish_threshold,
            bridge_name: config.bridge_name.clone(),
            bridge_ip: config.bridge_ip,
            bridge_netmask: config.bridge_netmask,
        },
        Arc::new(IpRouteCommands),
        ip_pool,
    ));
    tap_pool.init().await?;

    let overlay_pool = Arc::new(OverlayPool::new(
        OverlayPoolConfig {
            pool_dir: config.pool_dir(),
            size: config.overlay_pool_size,
            replenish_threshold: config.overlay_pool_replenish_threshold,
            overlay_bytes_size: config.overlay_bytes_size,
        },
        Arc::new(MkfsExt4Creator),
    ));
    overlay_pool.init().await?;

    let supervisor = Arc::new(RunnerSupervisor::new(
        tap_pool.clone(),
        overlay_pool.clone(),
        SupervisorConfig {
            job_timeout: config.job_timeout,
            shutdown_grace_period: config.shutdown_grace_period,
            readiness_timeout: config.readiness_timeout,
        },
    ));

    info!(
        tap_pool_depth = tap_pool.depth(),
        overlay_pool_depth = overlay_pool.depth(),
        "sandbox runner ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining in-flight jobs");

    supervisor.shutdown().await;
    tap_pool.shutdown();
    overlay_pool.shutdown();

    Ok(())
}
