//! VM Instance (C5): the per-VM lifecycle state machine.
//!
//! Owns exactly one hypervisor process end to end: acquires its TAP and
//! overlay from their pools, spawns and configures the hypervisor, and tears
//! everything back down on any exit path, including failures and `kill()`.
//! Grounded in the teacher's `firecracker/runtime.rs` spawn-then-configure
//! flow and log pipeline, adapted to this crate's pool-based resource model.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::firecracker::api::{ApiError, FirecrackerClient};
use crate::firecracker::config::{boot_args, BootSource, DriveConfig, MachineConfig, NetworkInterface, VsockConfig};
use crate::network::tap_pool::{TapPool, TapPoolError, VmNetworkConfig};
use crate::overlay_pool::{OverlayPool, OverlayPoolError};

/// Opaque 8-hex-char identifier for one VM's lifetime. Embedded in the
/// hypervisor's socket path so Process Discovery can recover it from argv.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmId(String);

impl VmId {
    /// Generate a fresh id from a random UUID's leading 8 hex characters.
    pub fn new_random() -> Self {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        Self(simple[..8].to_string())
    }

    pub fn from_hex(hex: &str) -> Self {
        Self(hex.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Created,
    Configuring,
    Running,
    Stopping,
    Stopped,
    Error,
}

#[derive(Debug, Error)]
pub enum VmInstanceError {
    #[error("illegal transition: {0} from state {1:?}")]
    Invariant(&'static str, VmState),

    #[error("overlay pool: {0}")]
    Overlay(#[from] OverlayPoolError),

    #[error("tap pool: {0}")]
    Tap(#[from] TapPoolError),

    #[error("firecracker API: {0}")]
    Api(#[from] ApiError),

    #[error("waitForExit timed out")]
    WaitTimeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Construction inputs for one VM, per §4.5.
#[derive(Debug, Clone)]
pub struct VmInstanceInputs {
    pub vm_id: VmId,
    pub vcpus: u8,
    pub memory_mb: u32,
    pub kernel_path: PathBuf,
    pub rootfs_path: PathBuf,
    pub firecracker_binary: PathBuf,
    pub work_dir: Option<PathBuf>,
}

fn resolve_work_dir(inputs: &VmInstanceInputs) -> PathBuf {
    inputs
        .work_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("workspaces").join(format!("vm0-{}", inputs.vm_id)))
}

struct HeldResources {
    child: Child,
    network: VmNetworkConfig,
    overlay_path: PathBuf,
    work_dir: PathBuf,
    socket_path: PathBuf,
    log_tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    state: VmState,
    held: Option<HeldResources>,
}

/// Removes `work_dir` on drop unless [`disarm`](Self::disarm) has run.
///
/// `do_start` builds up these guards one per acquired resource so that if its
/// future is dropped mid-flight (e.g. the supervisor's `tokio::time::timeout`
/// firing around `start()`), ordinary Rust drop-on-cancellation releases
/// everything acquired so far — no separate rollback path to keep in sync.
struct WorkDirGuard(Option<PathBuf>);

impl WorkDirGuard {
    fn new(path: PathBuf) -> Self {
        Self(Some(path))
    }

    fn path(&self) -> &Path {
        self.0.as_deref().expect("work dir guard used after disarm")
    }

    fn disarm(mut self) -> PathBuf {
        self.0.take().expect("work dir guard already disarmed")
    }
}

impl Drop for WorkDirGuard {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let _ = std::fs::remove_dir_all(&path);
        }
    }
}

/// Releases the overlay back to its pool on drop unless disarmed.
struct OverlayGuard {
    pool: Arc<OverlayPool>,
    path: Option<PathBuf>,
}

impl OverlayGuard {
    fn new(pool: Arc<OverlayPool>, path: PathBuf) -> Self {
        Self { pool, path: Some(path) }
    }

    fn path(&self) -> &Path {
        self.path.as_deref().expect("overlay guard used after disarm")
    }

    fn disarm(mut self) -> PathBuf {
        self.path.take().expect("overlay guard already disarmed")
    }
}

impl Drop for OverlayGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            self.pool.release(&path);
        }
    }
}

/// Releases the TAP and its IP lease back to the pool on drop unless disarmed.
struct NetworkGuard {
    pool: Arc<TapPool>,
    network: Option<VmNetworkConfig>,
}

impl NetworkGuard {
    fn new(pool: Arc<TapPool>, network: VmNetworkConfig) -> Self {
        Self { pool, network: Some(network) }
    }

    fn network(&self) -> &VmNetworkConfig {
        self.network.as_ref().expect("network guard used after disarm")
    }

    fn disarm(mut self) -> VmNetworkConfig {
        self.network.take().expect("network guard already disarmed")
    }
}

impl Drop for NetworkGuard {
    fn drop(&mut self) {
        if let Some(network) = self.network.take() {
            self.pool.release(&network.tap_device, network.guest_ip);
        }
    }
}

/// Aborts the spawned log reader/shipper tasks on drop unless disarmed.
/// `JoinHandle::abort` is synchronous, so this runs fine from a plain `Drop`.
struct LogTasksGuard(Option<Vec<JoinHandle<()>>>);

impl LogTasksGuard {
    fn new(tasks: Vec<JoinHandle<()>>) -> Self {
        Self(Some(tasks))
    }

    fn disarm(mut self) -> Vec<JoinHandle<()>> {
        self.0.take().expect("log tasks guard already disarmed")
    }
}

impl Drop for LogTasksGuard {
    fn drop(&mut self) {
        if let Some(tasks) = self.0.take() {
            for task in tasks {
                task.abort();
            }
        }
    }
}

/// One VM's lifecycle: `created -> configuring -> running -> stopping -> stopped`,
/// with `error` reachable from any non-terminal state via cleanup.
pub struct VmInstance {
    pub vm_id: VmId,
    inputs: VmInstanceInputs,
    tap_pool: Arc<TapPool>,
    overlay_pool: Arc<OverlayPool>,
    readiness_timeout: Duration,
    inner: Mutex<Inner>,
}

const MAX_LOG_LINE_BYTES: usize = 4096;
const LOG_BATCH_MAX_LINES: usize = 50;
const LOG_FLUSH_INTERVAL: Duration = Duration::from_millis(250);

impl VmInstance {
    pub fn new(inputs: VmInstanceInputs, tap_pool: Arc<TapPool>, overlay_pool: Arc<OverlayPool>) -> Self {
        Self {
            vm_id: inputs.vm_id.clone(),
            inputs,
            tap_pool,
            overlay_pool,
            readiness_timeout: Duration::from_secs(10),
            inner: Mutex::new(Inner {
                state: VmState::Created,
                held: None,
            }),
        }
    }

    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    pub async fn state(&self) -> VmState {
        self.inner.lock().await.state
    }

    /// Create workDir, acquire overlay then network, spawn the hypervisor,
    /// wait for API readiness, fan out configuration in parallel, and start
    /// the instance. Any failure transitions to `error` after fully
    /// releasing whatever was partially acquired.
    #[tracing::instrument(skip(self), fields(vm_id = %self.vm_id))]
    pub async fn start(&self) -> Result<(), VmInstanceError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != VmState::Created {
                return Err(VmInstanceError::Invariant("start", inner.state));
            }
            inner.state = VmState::Configuring;
        }

        match self.do_start().await {
            Ok(held) => {
                let mut inner = self.inner.lock().await;
                inner.held = Some(held);
                inner.state = VmState::Running;
                info!("vm reached running state");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "vm start failed");
                let mut inner = self.inner.lock().await;
                inner.state = VmState::Error;
                Err(e)
            }
        }
    }

    /// Acquires each resource behind a guard before moving on to the next, so
    /// a future dropped at any `?`/`.await` point — not just an explicit
    /// `Err` return — still releases everything acquired up to that point.
    async fn do_start(&self) -> Result<HeldResources, VmInstanceError> {
        let work_dir = resolve_work_dir(&self.inputs);
        std::fs::create_dir_all(&work_dir)?;
        let work_dir_guard = WorkDirGuard::new(work_dir);
        let socket_path = work_dir_guard.path().join("firecracker.sock");
        let vsock_path = work_dir_guard.path().join("vsock.sock");
        let _ = std::fs::remove_file(&socket_path);

        let overlay_path = self.overlay_pool.acquire().await?;
        let overlay_guard = OverlayGuard::new(self.overlay_pool.clone(), overlay_path);
        debug!(overlay = %overlay_guard.path().display(), "overlay acquired");

        let network = self.tap_pool.acquire(self.vm_id.clone()).await?;
        let network_guard = NetworkGuard::new(self.tap_pool.clone(), network);
        debug!(tap = %network_guard.network().tap_device, ip = %network_guard.network().guest_ip, "network acquired");

        let mut child = self.spawn_hypervisor(work_dir_guard.path(), &socket_path).await?;
        let log_tasks_guard = LogTasksGuard::new(self.spawn_log_pipeline(&mut child));
        let client = FirecrackerClient::new(&socket_path);

        client.wait_ready(self.readiness_timeout).await?;

        {
            let mut inner = self.inner.lock().await;
            inner.state = VmState::Configuring;
        }

        self.configure(&client, network_guard.network(), overlay_guard.path(), &vsock_path)
            .await?;

        client.start_instance().await?;

        Ok(HeldResources {
            child,
            network: network_guard.disarm(),
            overlay_path: overlay_guard.disarm(),
            work_dir: work_dir_guard.disarm(),
            socket_path,
            log_tasks: log_tasks_guard.disarm(),
        })
    }

    async fn configure(
        &self,
        client: &FirecrackerClient,
        network: &VmNetworkConfig,
        overlay_path: &Path,
        vsock_path: &Path,
    ) -> Result<(), VmInstanceError> {
        let machine_config = MachineConfig::new(self.inputs.vcpus, self.inputs.memory_mb);
        let args = boot_args(network.guest_ip, network.gateway_ip, network.netmask);
        let boot_source = BootSource::new(self.inputs.kernel_path.clone(), args);
        let root_drive = DriveConfig::root_disk(self.inputs.rootfs_path.clone());
        let overlay_drive = DriveConfig::overlay_disk(overlay_path.to_path_buf());
        let iface = NetworkInterface::new("eth0", &network.tap_device, &network.guest_mac);
        let vsock = VsockConfig::new(vsock_path.to_path_buf());

        tokio::try_join!(
            client.put_machine_config(&machine_config),
            client.put_boot_source(&boot_source),
            client.put_drive(&root_drive),
            client.put_drive(&overlay_drive),
            client.put_network_interface(&iface),
            client.put_vsock(&vsock),
        )?;
        Ok(())
    }

    async fn spawn_hypervisor(&self, work_dir: &Path, socket_path: &Path) -> Result<Child, VmInstanceError> {
        tokio::process::Command::new(&self.inputs.firecracker_binary)
            .arg("--api-sock")
            .arg(socket_path)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(VmInstanceError::Io)
    }

    fn spawn_log_pipeline(&self, child: &mut Child) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(stdout) = child.stdout.take() {
            tasks.push(tokio::spawn(run_log_reader(stdout, "stdout", tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            tasks.push(tokio::spawn(run_log_reader(stderr, "stderr", tx.clone())));
        }
        drop(tx);

        tasks.push(tokio::spawn(run_log_shipper(self.vm_id.clone(), rx)));
        tasks
    }

    /// Valid only from `running`. Best-effort `SendCtrlAltDel`, then cleanup
    /// regardless of whether it succeeded.
    #[tracing::instrument(skip(self), fields(vm_id = %self.vm_id))]
    pub async fn stop(&self) -> Result<(), VmInstanceError> {
        let mut inner = self.inner.lock().await;
        if inner.state != VmState::Running {
            return Err(VmInstanceError::Invariant("stop", inner.state));
        }
        inner.state = VmState::Stopping;

        if let Some(held) = inner.held.as_ref() {
            let client = FirecrackerClient::new(&held.socket_path);
            if let Err(e) = client.send_ctrl_alt_del().await {
                warn!(error = %e, "SendCtrlAltDel failed, continuing to cleanup");
            }
        }

        self.cleanup_locked(&mut inner).await;
        Ok(())
    }

    /// Valid from any state. Skips the graceful signal.
    #[tracing::instrument(skip(self), fields(vm_id = %self.vm_id))]
    pub async fn kill(&self) -> Result<(), VmInstanceError> {
        let mut inner = self.inner.lock().await;
        self.cleanup_locked(&mut inner).await;
        Ok(())
    }

    /// Idempotent: a second call with nothing held just re-affirms `stopped`.
    async fn cleanup_locked(&self, inner: &mut Inner) {
        if let Some(mut held) = inner.held.take() {
            if let Err(e) = held.child.start_kill() {
                if e.kind() != std::io::ErrorKind::InvalidInput {
                    warn!(error = %e, "failed to signal hypervisor process");
                }
            }
            let _ = held.child.wait().await;

            for task in held.log_tasks.drain(..) {
                task.abort();
            }

            self.tap_pool.release(&held.network.tap_device, held.network.guest_ip);
            self.overlay_pool.release(&held.overlay_path);

            if let Err(e) = std::fs::remove_dir_all(&held.work_dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = %e, work_dir = %held.work_dir.display(), "failed to remove work dir");
                }
            }
        }
        inner.state = VmState::Stopped;
    }

    /// Resolves to the child's exit code; 0 immediately if nothing is held.
    pub async fn wait_for_exit(&self, timeout: Duration) -> Result<i32, VmInstanceError> {
        let mut inner = self.inner.lock().await;
        let Some(held) = inner.held.as_mut() else {
            return Ok(0);
        };
        match tokio::time::timeout(timeout, held.child.wait()).await {
            Ok(Ok(status)) => Ok(status.code().unwrap_or(-1)),
            Ok(Err(e)) => Err(VmInstanceError::Io(e)),
            Err(_) => Err(VmInstanceError::WaitTimeout),
        }
    }
}

async fn run_log_reader<R>(stream: R, stream_name: &'static str, tx: mpsc::UnboundedSender<(&'static str, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send((stream_name, normalize_log_line(line))).is_err() {
                    break;
                }
            }
            _ => break,
        }
    }
}

fn normalize_log_line(line: String) -> String {
    if line.len() <= MAX_LOG_LINE_BYTES {
        return line;
    }
    let mut truncated = line;
    truncated.truncate(MAX_LOG_LINE_BYTES);
    truncated.push_str("...");
    truncated
}

/// Batches log lines from both streams and flushes on a size or time bound
/// so a noisy VM cannot starve the runner's own logging.
async fn run_log_shipper(vm_id: VmId, mut rx: mpsc::UnboundedReceiver<(&'static str, String)>) {
    let mut batch = Vec::with_capacity(LOG_BATCH_MAX_LINES);
    let mut ticker = tokio::time::interval(LOG_FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            entry = rx.recv() => {
                match entry {
                    Some(entry) => {
                        batch.push(entry);
                        if batch.len() >= LOG_BATCH_MAX_LINES {
                            flush_log_batch(&vm_id, &mut batch);
                        }
                    }
                    None => {
                        flush_log_batch(&vm_id, &mut batch);
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                flush_log_batch(&vm_id, &mut batch);
            }
        }
    }
}

fn flush_log_batch(vm_id: &VmId, batch: &mut Vec<(&'static str, String)>) {
    for (stream, line) in batch.drain(..) {
        info!(vm_id = %vm_id, stream, "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip_pool::IpPool;
    use crate::network::host_ops::NoopHostCommands;
    use crate::network::tap_pool::TapPoolConfig;
    use crate::overlay_pool::{OverlayCreator, OverlayPoolConfig, OverlayPoolError as OpErr};
    use std::net::Ipv4Addr;

    struct FakeOverlayCreator;
    impl OverlayCreator for FakeOverlayCreator {
        fn create(&self, path: &Path, _bytes_size: u64) -> Result<(), OpErr> {
            std::fs::write(path, b"")?;
            Ok(())
        }
    }

    async fn pools(dir: &Path) -> (Arc<TapPool>, Arc<OverlayPool>) {
        let ip_pool = Arc::new(IpPool::from_str_cidr("10.0.0.0/24", Ipv4Addr::new(10, 0, 0, 1)).unwrap());
        let tap_config = TapPoolConfig {
            runner_name: "test-runner".to_string(),
            size: 1,
            replenish_threshold: 1,
            bridge_name: "fcbr0".to_string(),
            bridge_ip: Ipv4Addr::new(10, 0, 0, 1),
            bridge_netmask: Ipv4Addr::new(255, 255, 255, 0),
        };
        let tap_pool = Arc::new(TapPool::new(tap_config, Arc::new(NoopHostCommands::default()), ip_pool));
        tap_pool.init().await.unwrap();

        let overlay_config = OverlayPoolConfig {
            pool_dir: dir.to_path_buf(),
            size: 1,
            replenish_threshold: 1,
            overlay_bytes_size: 1024,
        };
        let overlay_pool = Arc::new(OverlayPool::new(overlay_config, Arc::new(FakeOverlayCreator)));
        overlay_pool.init().await.unwrap();

        (tap_pool, overlay_pool)
    }

    fn inputs(vm_id: &str, work_dir: &Path, firecracker_binary: &str) -> VmInstanceInputs {
        VmInstanceInputs {
            vm_id: VmId::from_hex(vm_id),
            vcpus: 1,
            memory_mb: 128,
            kernel_path: "/nonexistent/vmlinux".into(),
            rootfs_path: "/nonexistent/rootfs.squashfs".into(),
            firecracker_binary: firecracker_binary.into(),
            work_dir: Some(work_dir.to_path_buf()),
        }
    }

    #[tokio::test]
    async fn start_fails_and_rolls_back_when_binary_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (tap_pool, overlay_pool) = pools(dir.path()).await;
        let work_dir = dir.path().join("vm0-deadbeef");

        let vm = VmInstance::new(
            inputs("deadbeef", &work_dir, "/nonexistent/firecracker-binary"),
            tap_pool.clone(),
            overlay_pool.clone(),
        );

        let err = vm.start().await.unwrap_err();
        assert!(matches!(err, VmInstanceError::Io(_)));
        assert_eq!(vm.state().await, VmState::Error);
        assert!(!work_dir.exists(), "workDir must be removed on rollback");
        assert_eq!(tap_pool.depth(), 1, "TAP must be returned to the pool");
        assert_eq!(overlay_pool.depth(), 1, "overlay must be returned to the pool");
    }

    #[tokio::test]
    async fn start_times_out_waiting_for_readiness_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let (tap_pool, overlay_pool) = pools(dir.path()).await;
        let work_dir = dir.path().join("vm0-cafebabe");

        // `sleep` spawns successfully but never creates an api socket.
        let vm = VmInstance::new(inputs("cafebabe", &work_dir, "/bin/sleep"), tap_pool.clone(), overlay_pool.clone())
            .with_readiness_timeout(Duration::from_millis(50));

        // argv becomes `sleep --api-sock <path>`, which `sleep` rejects immediately,
        // so this also exercises the spawn-succeeds-but-process-exits-early path.
        let err = vm.start().await.unwrap_err();
        assert!(matches!(err, VmInstanceError::Api(ApiError::ReadinessTimeout(_)) | VmInstanceError::Io(_)));
        assert_eq!(vm.state().await, VmState::Error);
        assert!(!work_dir.exists());
        assert_eq!(tap_pool.depth(), 1);
        assert_eq!(overlay_pool.depth(), 1);
    }

    #[tokio::test]
    async fn stop_before_running_is_an_invariant_error() {
        let dir = tempfile::tempdir().unwrap();
        let (tap_pool, overlay_pool) = pools(dir.path()).await;
        let work_dir = dir.path().join("vm0-abad1dea");

        let vm = VmInstance::new(inputs("abad1dea", &work_dir, "/bin/true"), tap_pool, overlay_pool);
        let err = vm.stop().await.unwrap_err();
        assert!(matches!(err, VmInstanceError::Invariant("stop", VmState::Created)));
    }

    #[tokio::test]
    async fn kill_with_nothing_held_reaches_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let (tap_pool, overlay_pool) = pools(dir.path()).await;
        let work_dir = dir.path().join("vm0-0ff1ce");

        let vm = VmInstance::new(inputs("0ff1ce", &work_dir, "/bin/true"), tap_pool, overlay_pool);
        vm.kill().await.unwrap();
        assert_eq!(vm.state().await, VmState::Stopped);
    }

    #[tokio::test]
    async fn wait_for_exit_with_no_child_resolves_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (tap_pool, overlay_pool) = pools(dir.path()).await;
        let work_dir = dir.path().join("vm0-f00d");

        let vm = VmInstance::new(inputs("f00d", &work_dir, "/bin/true"), tap_pool, overlay_pool);
        let code = vm.wait_for_exit(Duration::from_millis(10)).await.unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn vm_id_from_hex_round_trips_as_str() {
        let id = VmId::from_hex("deadbeef");
        assert_eq!(id.as_str(), "deadbeef");
        assert_eq!(id.to_string(), "deadbeef");
    }

    #[test]
    fn new_random_vm_ids_are_8_hex_chars_and_distinct() {
        let a = VmId::new_random();
        let b = VmId::new_random();
        assert_eq!(a.as_str().len(), 8);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn normalize_log_line_truncates_oversized_lines() {
        let long = "x".repeat(MAX_LOG_LINE_BYTES + 100);
        let normalized = normalize_log_line(long);
        assert!(normalized.ends_with("..."));
        assert_eq!(normalized.len(), MAX_LOG_LINE_BYTES + 3);
    }

    #[test]
    fn normalize_log_line_leaves_short_lines_untouched() {
        assert_eq!(normalize_log_line("hello".to_string()), "hello");
    }

    #[test]
    fn resolve_work_dir_defaults_to_vm0_prefixed_tmp_path() {
        let inputs = VmInstanceInputs {
            vm_id: VmId::from_hex("deadbeef"),
            vcpus: 1,
            memory_mb: 128,
            kernel_path: "/vmlinux".into(),
            rootfs_path: "/rootfs.squashfs".into(),
            firecracker_binary: "/usr/bin/firecracker".into(),
            work_dir: None,
        };
        let dir = resolve_work_dir(&inputs);
        assert!(dir.to_string_lossy().contains("vm0-deadbeef"));
    }
}
