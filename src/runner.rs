use crate::config::{IsolationMode, LimitsConfig, PipelineConfig};
use crate::error::{JudgeError, JudgeResult};
use crate::sandbox::{SandboxPool, SandboxSession};
use crate::types::{ExecutionOutcome, Language, ProblemSpec, Submission};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

/// Compile/run strategy for one language. Paths are relative to the session
/// workdir, which is the working directory both on the host and inside the
/// isolation runtime.
struct Strategy {
    compile: Option<&'static [&'static str]>,
    run: &'static [&'static str],
}

fn strategy_for(language: Language) -> Strategy {
    match language {
        Language::Python => Strategy {
            compile: None,
            run: &["python3", "main.py"],
        },
        Language::C => Strategy {
            compile: Some(&["gcc", "main.c", "-o", "main.out"]),
            run: &["./main.out"],
        },
        Language::Cpp => Strategy {
            compile: Some(&["g++", "main.cpp", "-o", "main.out"]),
            run: &["./main.out"],
        },
        Language::Java => Strategy {
            compile: Some(&["javac", "Main.java"]),
            run: &["java", "-cp", ".", "Main"],
        },
    }
}

/// Raw result of one process run inside a session
struct RawRun {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    wall_ms: u64,
    timed_out: bool,
    resource_killed: bool,
}

/// Executes submissions inside disposable sandbox sessions.
///
/// Allocates exactly one session per call and releases it on every exit
/// path; nothing outlives the call except the returned outcome.
pub struct SandboxRunner {
    pool: SandboxPool,
    config: PipelineConfig,
}

impl SandboxRunner {
    pub fn new(config: PipelineConfig) -> Self {
        let pool = SandboxPool::new(&config);
        Self { pool, config }
    }

    /// Sessions that could be allocated right now. Exposed for teardown
    /// verification.
    pub fn available_sessions(&self) -> usize {
        self.pool.available()
    }

    /// Run one submission against the problem's hidden cases.
    pub async fn execute(
        &self,
        submission: &Submission,
        spec: &ProblemSpec,
    ) -> JudgeResult<ExecutionOutcome> {
        // Validation happens before any sandbox resource is committed.
        if submission.source_code.trim().is_empty() {
            return Err(JudgeError::Validation("empty source".to_string()));
        }
        if submission.source_code.len() > self.config.max_source_bytes {
            return Err(JudgeError::Validation(format!(
                "source exceeds {} bytes",
                self.config.max_source_bytes
            )));
        }

        let limits = LimitsConfig::for_problem(spec.time_limit_ms, spec.memory_limit_mb, spec.cpu_share);
        let strategy = strategy_for(submission.language);

        let session = self.pool.acquire().await?;
        info!(
            session_id = %session.id(),
            problem_id = %submission.problem_id,
            language = submission.language.as_str(),
            "sandbox session allocated"
        );

        session
            .write_source(submission.language.source_filename(), &submission.source_code)
            .await?;

        let outcome = self.run_in_session(&session, &strategy, spec, &limits).await;
        debug!(session_id = %session.id(), elapsed_ms = session.elapsed_ms(), "sandbox session closing");
        // Session drops here: workdir removed, permit returned, on every path.
        outcome
    }

    async fn run_in_session(
        &self,
        session: &SandboxSession,
        strategy: &Strategy,
        spec: &ProblemSpec,
        limits: &LimitsConfig,
    ) -> JudgeResult<ExecutionOutcome> {
        let tests_total = spec.hidden_cases.len();
        let mut wall_time_ms = 0u64;

        if let Some(compile_argv) = strategy.compile {
            let compile = self
                .spawn_limited(session, limits, compile_argv, "", self.config.compile_timeout)
                .await?;
            if compile.timed_out || compile.exit_code != Some(0) {
                warn!(session_id = %session.id(), "compile step failed");
                return Ok(ExecutionOutcome {
                    exit_code: compile.exit_code,
                    stdout: compile.stdout,
                    stderr: compile.stderr,
                    wall_time_ms,
                    timed_out: false,
                    resource_killed: false,
                    compile_failed: true,
                    tests_passed: 0,
                    tests_total,
                    failing_test: None,
                    failing_expected: None,
                });
            }
        }

        let mut tests_passed = 0usize;
        let mut last_exit = Some(0);
        let mut last_stdout = String::new();
        let mut last_stderr = String::new();

        for (index, case) in spec.hidden_cases.iter().enumerate() {
            let run = self
                .spawn_limited(session, limits, strategy.run, &case.input, limits.wall_clock)
                .await?;
            wall_time_ms += run.wall_ms;

            if run.timed_out {
                return Ok(ExecutionOutcome {
                    exit_code: None,
                    stdout: run.stdout,
                    stderr: run.stderr,
                    wall_time_ms,
                    timed_out: true,
                    resource_killed: false,
                    compile_failed: false,
                    tests_passed,
                    tests_total,
                    failing_test: Some(index),
                    failing_expected: None,
                });
            }
            if run.resource_killed {
                return Ok(ExecutionOutcome {
                    exit_code: run.exit_code,
                    stdout: run.stdout,
                    stderr: run.stderr,
                    wall_time_ms,
                    timed_out: false,
                    resource_killed: true,
                    compile_failed: false,
                    tests_passed,
                    tests_total,
                    failing_test: Some(index),
                    failing_expected: None,
                });
            }
            if run.exit_code != Some(0) {
                return Ok(ExecutionOutcome {
                    exit_code: run.exit_code,
                    stdout: run.stdout,
                    stderr: run.stderr,
                    wall_time_ms,
                    timed_out: false,
                    resource_killed: false,
                    compile_failed: false,
                    tests_passed,
                    tests_total,
                    failing_test: Some(index),
                    failing_expected: None,
                });
            }

            let actual = normalize_output(&run.stdout);
            let expected = normalize_output(&case.expected_output);
            if actual != expected {
                return Ok(ExecutionOutcome {
                    exit_code: Some(0),
                    stdout: run.stdout,
                    stderr: run.stderr,
                    wall_time_ms,
                    timed_out: false,
                    resource_killed: false,
                    compile_failed: false,
                    tests_passed,
                    tests_total,
                    failing_test: Some(index),
                    failing_expected: Some(case.expected_output.clone()),
                });
            }

            tests_passed += 1;
            last_exit = run.exit_code;
            last_stdout = run.stdout;
            last_stderr = run.stderr;
        }

        Ok(ExecutionOutcome {
            exit_code: last_exit,
            stdout: last_stdout,
            stderr: last_stderr,
            wall_time_ms,
            timed_out: false,
            resource_killed: false,
            compile_failed: false,
            tests_passed,
            tests_total,
            failing_test: None,
            failing_expected: None,
        })
    }

    /// Spawn one command under the session's isolation boundary, feed it
    /// stdin, and enforce the wall-clock limit. The process is killed and
    /// fully reaped on timeout so nothing leaks past the session.
    async fn spawn_limited(
        &self,
        session: &SandboxSession,
        limits: &LimitsConfig,
        argv: &[&str],
        input: &str,
        timeout: Duration,
    ) -> JudgeResult<RawRun> {
        let mut cmd = self.build_command(session, limits, argv);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| JudgeError::SandboxUnavailable(format!("failed to spawn: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(input.as_bytes()).await;
            // Dropping stdin closes the pipe so programs reading to EOF finish.
        }

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stdout_pipe.take() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr_pipe.take() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let wait_result = tokio::time::timeout(timeout, child.wait()).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match wait_result {
            Ok(Ok(status)) => {
                let (stdout_buf, stderr_buf) = futures::join!(stdout_task, stderr_task);
                let stdout_buf = stdout_buf.unwrap_or_default();
                let stderr_buf = stderr_buf.unwrap_or_default();
                let exit_code = status.code();
                let resource_killed = is_resource_kill(&status);
                Ok(RawRun {
                    exit_code,
                    stdout: String::from_utf8_lossy(&stdout_buf).to_string(),
                    stderr: String::from_utf8_lossy(&stderr_buf).to_string(),
                    wall_ms: elapsed_ms,
                    timed_out: false,
                    resource_killed,
                })
            }
            Ok(Err(e)) => Err(JudgeError::Internal(format!("process wait failed: {e}"))),
            Err(_) => {
                // Wall clock breached: kill, reap, drain. Never silently succeed.
                let _ = child.kill().await;
                let _ = child.wait().await;
                let (stdout_buf, stderr_buf) = futures::join!(stdout_task, stderr_task);
                let stdout_buf = stdout_buf.unwrap_or_default();
                let stderr_buf = stderr_buf.unwrap_or_default();
                Ok(RawRun {
                    exit_code: None,
                    stdout: String::from_utf8_lossy(&stdout_buf).to_string(),
                    stderr: String::from_utf8_lossy(&stderr_buf).to_string(),
                    wall_ms: elapsed_ms,
                    timed_out: true,
                    resource_killed: false,
                })
            }
        }
    }

    fn build_command(
        &self,
        session: &SandboxSession,
        limits: &LimitsConfig,
        argv: &[&str],
    ) -> TokioCommand {
        match &self.config.isolation {
            IsolationMode::Container { image } => {
                let mut cmd = TokioCommand::new("docker");
                cmd.arg("run")
                    .arg("--rm")
                    .arg("-i")
                    .arg("--network")
                    .arg("none")
                    .arg("--memory")
                    .arg(format!("{}m", limits.memory_mb))
                    .arg("--cpus")
                    .arg(format!("{}", limits.cpu_share))
                    .arg("-v")
                    .arg(format!("{}:/box", session.workdir().display()))
                    .arg("-w")
                    .arg("/box")
                    .arg(image)
                    .args(argv);
                cmd
            }
            IsolationMode::Host => {
                let mut cmd = TokioCommand::new(argv[0]);
                cmd.args(&argv[1..]).current_dir(session.workdir());
                cmd
            }
        }
    }

    /// Verify the toolchain the configured isolation mode needs is present.
    pub fn check_environment(config: &PipelineConfig) -> anyhow::Result<()> {
        use anyhow::Context;
        match &config.isolation {
            IsolationMode::Container { .. } => {
                which::which("docker").context("docker not found in PATH")?;
            }
            IsolationMode::Host => {
                which::which("gcc").context("gcc not found in PATH")?;
                which::which("g++").context("g++ not found in PATH")?;
                which::which("python3").context("python3 not found in PATH")?;
            }
        }
        Ok(())
    }
}

/// Exact match after trailing-whitespace normalization: CRLF folded, each
/// line stripped of trailing whitespace, trailing blank lines dropped.
pub fn normalize_output(output: &str) -> String {
    output
        .replace("\r\n", "\n")
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string()
}

#[cfg(unix)]
fn is_resource_kill(status: &std::process::ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    // 137/139 are the shifted SIGKILL/SIGSEGV codes the isolation runtime
    // reports; a raw signal means the kernel killed the process directly.
    matches!(status.code(), Some(137) | Some(139))
        || matches!(status.signal(), Some(9) | Some(11))
}

#[cfg(not(unix))]
fn is_resource_kill(status: &std::process::ExitStatus) -> bool {
    matches!(status.code(), Some(137) | Some(139))
}
