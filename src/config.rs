use std::time::Duration;

/// Per-session resource limits enforced on student code.
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Hard wall-clock timeout for each process run inside the sandbox.
    pub wall_clock: Duration,
    /// Memory ceiling handed to the isolation runtime, in MB.
    pub memory_mb: u64,
    /// CPU-share ceiling handed to the isolation runtime, in cores.
    pub cpu_share: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            wall_clock: Duration::from_secs(5),
            memory_mb: 256,
            cpu_share: 0.5,
        }
    }
}

impl LimitsConfig {
    /// Limits for one problem, falling back to defaults for zero fields.
    pub fn for_problem(time_limit_ms: u64, memory_limit_mb: u64, cpu_share: f64) -> Self {
        let defaults = Self::default();
        Self {
            wall_clock: if time_limit_ms == 0 {
                defaults.wall_clock
            } else {
                Duration::from_millis(time_limit_ms)
            },
            memory_mb: if memory_limit_mb == 0 {
                defaults.memory_mb
            } else {
                memory_limit_mb
            },
            cpu_share: if cpu_share <= 0.0 {
                defaults.cpu_share
            } else {
                cpu_share
            },
        }
    }
}

/// How sandboxed commands are launched.
///
/// `Container` wraps every command in an isolation-runtime invocation with
/// the session workdir mounted read-write and the network disabled. `Host`
/// runs directly on the host and is only suitable for trusted tests.
#[derive(Debug, Clone)]
pub enum IsolationMode {
    Container { image: String },
    Host,
}

/// Pipeline-wide configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum source size accepted before any resource allocation.
    pub max_source_bytes: usize,
    /// Cap on concurrently live sandbox environments.
    pub max_concurrent_sandboxes: usize,
    /// How long a submission may wait for a sandbox permit before the
    /// request fails as SandboxUnavailable. Distinct from the execution
    /// wall-clock timeout.
    pub acquire_timeout: Duration,
    /// Timeout applied to each compile step.
    pub compile_timeout: Duration,
    /// Bounded timeout for the retrieval and text-generation collaborators.
    pub external_call_timeout: Duration,
    pub isolation: IsolationMode,
    pub limits: LimitsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: 256 * 1024, // 256 KB
            max_concurrent_sandboxes: 4,
            acquire_timeout: Duration::from_secs(10),
            compile_timeout: Duration::from_secs(10),
            external_call_timeout: Duration::from_secs(8),
            isolation: IsolationMode::Container {
                image: "lab-ta-runner".to_string(),
            },
            limits: LimitsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_limits_fall_back_to_defaults() {
        let limits = LimitsConfig::for_problem(0, 0, 0.0);
        assert_eq!(limits.wall_clock, Duration::from_secs(5));
        assert_eq!(limits.memory_mb, 256);
        assert!((limits.cpu_share - 0.5).abs() < f64::EPSILON);

        let limits = LimitsConfig::for_problem(1000, 64, 1.0);
        assert_eq!(limits.wall_clock, Duration::from_millis(1000));
        assert_eq!(limits.memory_mb, 64);
    }
}
