//! Runner Supervisor (C7) — glue.
//!
//! Accepts a job, derives a VmId, constructs a VM Instance, starts it, waits
//! for it to exit under a per-job timeout, and stops it. Tracks every
//! in-flight instance behind one lock, grounded in the teacher's
//! `InstanceManager` (`RwLock<HashMap<...>>`) and `NodeSupervisor::shutdown`
//! drain-then-force-stop sequence, adapted down to a plain async-method API
//! since this crate has no actor mailbox.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::network::tap_pool::TapPool;
use crate::overlay_pool::OverlayPool;
use crate::vm_instance::{VmId, VmInstance, VmInstanceError, VmInstanceInputs, VmState};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Bounds both `start()` and the wait for the guest to exit.
    pub job_timeout: Duration,
    /// How long `shutdown()` waits for graceful stops before force-killing.
    pub shutdown_grace_period: Duration,
    /// Forwarded to each `VmInstance::with_readiness_timeout`.
    pub readiness_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("vm instance error: {0}")]
    VmInstance(#[from] VmInstanceError),

    #[error("job exceeded its {0:?} timeout")]
    JobTimeout(Duration),
}

#[derive(Debug)]
pub struct JobOutcome {
    pub vm_id: VmId,
    pub exit_code: i32,
}

/// Coordinates in-flight VM Instances. One process runs one supervisor.
pub struct RunnerSupervisor {
    tap_pool: Arc<TapPool>,
    overlay_pool: Arc<OverlayPool>,
    config: SupervisorConfig,
    instances: RwLock<HashMap<VmId, Arc<VmInstance>>>,
}

impl RunnerSupervisor {
    pub fn new(tap_pool: Arc<TapPool>, overlay_pool: Arc<OverlayPool>, config: SupervisorConfig) -> Self {
        Self {
            tap_pool,
            overlay_pool,
            config,
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub async fn job_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Run one job end to end: start the VM, wait for it to exit (or time
    /// out), stop it, and untrack it regardless of outcome.
    pub async fn run_job(&self, inputs: VmInstanceInputs) -> Result<JobOutcome, SupervisorError> {
        let vm_id = inputs.vm_id.clone();
        let vm = Arc::new(
            VmInstance::new(inputs, self.tap_pool.clone(), self.overlay_pool.clone())
                .with_readiness_timeout(self.config.readiness_timeout),
        );

        self.instances.write().await.insert(vm_id.clone(), vm.clone());
        let outcome = self.drive_job(&vm).await;
        self.instances.write().await.remove(&vm_id);

        outcome.map(|exit_code| JobOutcome { vm_id, exit_code })
    }

    async fn drive_job(&self, vm: &Arc<VmInstance>) -> Result<i32, SupervisorError> {
        match tokio::time::timeout(self.config.job_timeout, vm.start()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                let _ = vm.kill().await;
                return Err(SupervisorError::JobTimeout(self.config.job_timeout));
            }
        }

        match vm.wait_for_exit(self.config.job_timeout).await {
            Ok(code) => {
                let _ = vm.stop().await;
                Ok(code)
            }
            Err(_) => {
                warn!(vm_id = %vm.vm_id, "job exceeded timeout, force-killing");
                let _ = vm.kill().await;
                Err(SupervisorError::JobTimeout(self.config.job_timeout))
            }
        }
    }

    /// Stop every tracked instance (best-effort graceful), wait out the
    /// grace period, then force-kill whatever is still not `stopped`.
    pub async fn shutdown(&self) {
        let instances: Vec<Arc<VmInstance>> = self.instances.read().await.values().cloned().collect();
        info!(count = instances.len(), "shutting down runner supervisor");

        for vm in &instances {
            if let Err(e) = vm.stop().await {
                warn!(vm_id = %vm.vm_id, error = %e, "graceful stop failed, will force-kill after grace period");
            }
        }

        tokio::time::sleep(self.config.shutdown_grace_period).await;

        for vm in &instances {
            if vm.state().await != VmState::Stopped {
                let _ = vm.kill().await;
            }
        }

        self.instances.write().await.clear();
        info!("runner supervisor shutdown complete");
    }
}
