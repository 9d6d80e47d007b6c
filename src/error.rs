use thiserror::Error;

/// Failure taxonomy for the submission pipeline.
///
/// `Timeout` and `ResourceLimit` are not orchestrator faults: they are
/// surfaced to the student as diagnostic categories. Everything else is
/// recovered into a well-formed response before it reaches the client.
#[derive(Debug, Error)]
pub enum JudgeError {
    /// Malformed or oversize submission, rejected before any resource
    /// allocation. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The isolation runtime could not allocate an environment. Retried
    /// once with backoff, then surfaced as a generic infrastructure
    /// failure distinct from any student-code diagnostic.
    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    /// Wall-clock limit breached inside the sandbox.
    #[error("execution timed out after {0}ms")]
    Timeout(u64),

    /// Memory/CPU kill by the isolation runtime.
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    /// Retrieval or text-generation collaborator unresponsive. Degrades to
    /// templated content, never blocks the verdict.
    #[error("external service timed out: {0}")]
    ExternalServiceTimeout(String),

    /// Internal inconsistency, caught and downgraded, never shown raw.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for pipeline operations
pub type JudgeResult<T> = Result<T, JudgeError>;

impl JudgeError {
    /// Whether the pipeline may retry the failed operation once.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JudgeError::SandboxUnavailable(_))
    }
}
