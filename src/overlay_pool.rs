//! Overlay file pool (C3).
//!
//! Pre-creates sparse ext4 files used as per-VM writable layers over a
//! shared read-only root filesystem. Overlays are single-use: the pool
//! deletes one on release and replenishes in the background rather than
//! returning it to the queue, because reusing a dirty write layer would
//! require zeroing or snapshot-rewind semantics this pool does not supply.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum OverlayPoolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("overlay creation failed: {0}")]
    CreateFailed(String),

    #[error("overlay pool used before init()")]
    NotInitialized,
}

/// Creates a single overlay file at `path`, sized `bytes_size`. The real
/// implementation truncates a sparse file and runs `mkfs.ext4` on it; tests
/// substitute a fast fake that just creates an empty file.
pub trait OverlayCreator: Send + Sync {
    fn create(&self, path: &Path, bytes_size: u64) -> Result<(), OverlayPoolError>;
}

/// Sparse-file-plus-`mkfs.ext4` implementation of [`OverlayCreator`].
pub struct MkfsExt4Creator;

impl OverlayCreator for MkfsExt4Creator {
    fn create(&self, path: &Path, bytes_size: u64) -> Result<(), OverlayPoolError> {
        let file = std::fs::File::create(path)?;
        file.set_len(bytes_size)?;
        drop(file);

        let status = std::process::Command::new("mkfs.ext4")
            .args(["-F", "-q"])
            .arg(path)
            .status()
            .map_err(|e| OverlayPoolError::CreateFailed(format!("mkfs.ext4 spawn: {e}")))?;

        if !status.success() {
            return Err(OverlayPoolError::CreateFailed(
                "mkfs.ext4 exited non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct OverlayPoolConfig {
    pub pool_dir: PathBuf,
    pub size: usize,
    pub replenish_threshold: usize,
    pub overlay_bytes_size: u64,
}

struct PoolState {
    free: VecDeque<PathBuf>,
    initialized: bool,
}

pub struct OverlayPool {
    config: OverlayPoolConfig,
    creator: Arc<dyn OverlayCreator>,
    state: Mutex<PoolState>,
    replenishing: AtomicBool,
}

impl OverlayPool {
    pub fn new(config: OverlayPoolConfig, creator: Arc<dyn OverlayCreator>) -> Self {
        Self {
            config,
            creator,
            state: Mutex::new(PoolState {
                free: VecDeque::new(),
                initialized: false,
            }),
            replenishing: AtomicBool::new(false),
        }
    }

    /// Create the pool directory, delete stale `overlay-*.ext4` files from a
    /// prior run, and create `size` fresh files.
    pub async fn init(self: &Arc<Self>) -> Result<(), OverlayPoolError> {
        std::fs::create_dir_all(&self.config.pool_dir)?;
        self.reap_stale_files()?;

        {
            let mut state = self.state.lock().expect("overlay pool lock poisoned");
            state.free.clear();
            state.initialized = true;
        }

        let mut created = Vec::new();
        for _ in 0..self.config.size {
            created.push(self.create_one().await?);
        }

        {
            let mut state = self.state.lock().expect("overlay pool lock poisoned");
            state.free.extend(created);
        }

        info!(size = self.config.size, dir = %self.config.pool_dir.display(), "overlay pool initialized");
        Ok(())
    }

    fn reap_stale_files(&self) -> Result<(), OverlayPoolError> {
        for entry in std::fs::read_dir(&self.config.pool_dir)?.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("overlay-") && name.ends_with(".ext4") {
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    warn!(path = %entry.path().display(), error = %e, "failed to reap stale overlay file");
                }
            }
        }
        Ok(())
    }

    async fn create_one(&self) -> Result<PathBuf, OverlayPoolError> {
        let path = self
            .config
            .pool_dir
            .join(format!("overlay-{}.ext4", uuid::Uuid::new_v4()));
        let creator = self.creator.clone();
        let bytes_size = self.config.overlay_bytes_size;
        let create_path = path.clone();
        tokio::task::spawn_blocking(move || creator.create(&create_path, bytes_size))
            .await
            .map_err(|e| OverlayPoolError::CreateFailed(format!("join error: {e}")))??;
        Ok(path)
    }

    /// Pop a path from the queue, creating one on-demand if empty. Triggers
    /// background replenishment when depth falls below threshold.
    pub async fn acquire(self: &Arc<Self>) -> Result<PathBuf, OverlayPoolError> {
        if !self.is_initialized() {
            return Err(OverlayPoolError::NotInitialized);
        }

        let path = match self.pop_free() {
            Some(path) => path,
            None => self.create_one().await?,
        };

        self.maybe_replenish();
        Ok(path)
    }

    /// Delete the overlay file. Single-use: content is dirty after one VM
    /// run and must never be handed to another VM.
    pub fn release(&self, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "overlay released and deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "overlay already gone on release");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to delete overlay on release"),
        }
    }

    pub fn shutdown(self: &Arc<Self>) {
        let drained: Vec<PathBuf> = {
            let mut state = self.state.lock().expect("overlay pool lock poisoned");
            state.initialized = false;
            state.free.drain(..).collect()
        };
        for path in drained {
            self.release(&path);
        }
    }

    fn pop_free(&self) -> Option<PathBuf> {
        self.state
            .lock()
            .expect("overlay pool lock poisoned")
            .free
            .pop_front()
    }

    pub fn depth(&self) -> usize {
        self.state
            .lock()
            .expect("overlay pool lock poisoned")
            .free
            .len()
    }

    fn is_initialized(&self) -> bool {
        self.state
            .lock()
            .expect("overlay pool lock poisoned")
            .initialized
    }

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
                    Ok(path) => created.push(path),
                    Err(e) => {
                        warn!(error = %e, "overlay replenishment failed, will retry on next acquire");
                        break;
                    }
                }
            }
            {
                let mut state = pool.state.lock().expect("overlay pool lock poisoned");
                state.free.extend(created);
            }
            pool.replenishing.store(false, Ordering::SeqCst);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeCreator;
    impl OverlayCreator for FakeCreator {
        fn create(&self, path: &Path, _bytes_size: u64) -> Result<(), OverlayPoolError> {
            std::fs::write(path, b"")?;
            Ok(())
        }
    }

    fn make_pool(dir: &Path, size: usize, threshold: usize) -> Arc<OverlayPool> {
        let config = OverlayPoolConfig {
            pool_dir: dir.to_path_buf(),
            size,
            replenish_threshold: threshold,
            overlay_bytes_size: 1024,
        };
        Arc::new(OverlayPool::new(config, Arc::new(FakeCreator)))
    }

    #[tokio::test]
    async fn init_creates_exactly_size_files() {
        let dir = tempfile::tempdir().unwrap();
        let pool = make_pool(dir.path(), 2, 1);
        pool.init().await.unwrap();
        assert_eq!(pool.depth(), 2);

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn init_reaps_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("overlay-stale.ext4"), b"junk").unwrap();

        let pool = make_pool(dir.path(), 1, 1);
        pool.init().await.unwrap();

        assert!(!dir.path().join("overlay-stale.ext4").exists());
        assert_eq!(pool.depth(), 1);
    }

    #[tokio::test]
    async fn acquire_then_release_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let pool = make_pool(dir.path(), 1, 1);
        pool.init().await.unwrap();

        let path = pool.acquire().await.unwrap();
        assert!(path.exists());
        pool.release(&path);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn acquire_on_empty_pool_creates_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let pool = make_pool(dir.path(), 0, 0);
        pool.init().await.unwrap();
        assert_eq!(pool.depth(), 0);

        let path = pool.acquire().await.unwrap();
        assert!(path.exists());
        assert!(path.to_string_lossy().contains("overlay-"));
    }

    #[tokio::test]
    async fn replenishment_restores_depth() {
        let dir = tempfile::tempdir().unwrap();
        let pool = make_pool(dir.path(), 2, 1);
        pool.init().await.unwrap();

        let _ = pool.acquire().await.unwrap();
        let _ = pool.acquire().await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(pool.depth(), 2);
    }

    #[tokio::test]
    async fn release_of_unknown_path_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let pool = make_pool(dir.path(), 1, 1);
        pool.init().await.unwrap();
        pool.release(&dir.path().join("overlay-nonexistent.ext4"));
    }
}
