use crate::config::PipelineConfig;
use crate::error::{JudgeError, JudgeResult};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Bounded allocator for disposable sandbox sessions.
///
/// Isolated environments are the scarce shared resource of the pipeline: the
/// semaphore caps how many are live at once so a burst of submissions queues
/// instead of degrading every in-flight sandbox's resource guarantee.
pub struct SandboxPool {
    permits: Arc<Semaphore>,
    capacity: usize,
    acquire_timeout: std::time::Duration,
}

impl SandboxPool {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_sandboxes)),
            capacity: config.max_concurrent_sandboxes,
            acquire_timeout: config.acquire_timeout,
        }
    }

    /// Acquire a fresh session, waiting at most the request-level acquire
    /// timeout for a permit. Saturation past that is SandboxUnavailable.
    pub async fn acquire(&self) -> JudgeResult<SandboxSession> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| {
            warn!(capacity = self.capacity, "sandbox pool saturated");
            JudgeError::SandboxUnavailable("no sandbox slot available".to_string())
        })?
        .map_err(|e| JudgeError::SandboxUnavailable(format!("pool closed: {e}")))?;

        SandboxSession::create(permit)
    }

    /// Number of sessions that could be allocated right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// One disposable isolated execution environment.
///
/// Owns its private workdir and its pool permit; both are released on drop,
/// so teardown happens on every exit path of the owning invocation. No
/// session ever outlives its submission.
#[derive(Debug)]
pub struct SandboxSession {
    id: String,
    workdir: TempDir,
    started: Instant,
    _permit: OwnedSemaphorePermit,
}

impl SandboxSession {
    fn create(permit: OwnedSemaphorePermit) -> JudgeResult<Self> {
        let workdir = TempDir::new().map_err(|e| {
            JudgeError::SandboxUnavailable(format!("failed to create sandbox workdir: {e}"))
        })?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        debug!(session_id = %id, path = %workdir.path().display(), "sandbox session created");
        Ok(Self {
            id,
            workdir,
            started: Instant::now(),
            _permit: permit,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Private filesystem view mounted into the isolated environment.
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Materialize the student's source file inside the workdir. Hidden
    /// expected outputs are never written here.
    pub async fn write_source(&self, filename: &str, code: &str) -> JudgeResult<()> {
        let path = self.workdir.path().join(filename);
        tokio::fs::write(&path, code)
            .await
            .map_err(|e| JudgeError::Internal(format!("failed to write source: {e}")))
    }
}
