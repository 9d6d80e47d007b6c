use serde::{Deserialize, Serialize};

/// Supported submission languages.
///
/// Closed set: every variant has exactly one compile/run strategy in the
/// runner, so adding a language is a compile-time-checked extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    C,
    #[serde(alias = "c++")]
    Cpp,
    Java,
}

impl Language {
    /// Filename the harness materializes inside the sandbox workdir.
    pub fn source_filename(&self) -> &'static str {
        match self {
            Language::Python => "main.py",
            Language::C => "main.c",
            Language::Cpp => "main.cpp",
            Language::Java => "Main.java",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
        }
    }
}

/// A single hidden or sample test case for a problem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

/// Difficulty levels for problems
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// Read-only problem specification supplied by the external problem store.
///
/// One spec may back many concurrent submissions, so it is shared immutably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemSpec {
    pub id: String,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    /// Cases shown to the student in the problem statement.
    pub sample_cases: Vec<TestCase>,
    /// Cases the submission is judged against. Never exposed to the client
    /// or to the sandboxed process beyond their inputs.
    pub hidden_cases: Vec<TestCase>,
    pub time_limit_ms: u64,
    pub memory_limit_mb: u64,
    pub cpu_share: f64,
}

/// One run request, owned exclusively by the pipeline invocation processing
/// it and discarded once the response is produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub student_id: String,
    pub problem_id: String,
    pub language: Language,
    pub source_code: String,
    /// The attempt this submission will count as if it does not pass.
    pub attempt_number: u32,
}

/// Raw result of running a submission inside one sandbox session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Exit status of the last process that ran; `None` when it was killed
    /// before reporting one.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub wall_time_ms: u64,
    pub timed_out: bool,
    /// Killed by the isolation runtime for breaching a memory/CPU limit,
    /// distinguishable from a plain non-zero exit.
    pub resource_killed: bool,
    pub compile_failed: bool,
    pub tests_passed: usize,
    pub tests_total: usize,
    /// Index of the first hidden case that failed, if any.
    pub failing_test: Option<usize>,
    /// Expected output of the failing case, retained for diff targeting.
    /// Never written inside the sandbox.
    pub failing_expected: Option<String>,
}

impl ExecutionOutcome {
    /// True iff every hidden case matched and the run was clean.
    pub fn is_pass(&self) -> bool {
        self.exit_code == Some(0)
            && self.tests_passed == self.tests_total
            && !self.timed_out
            && !self.resource_killed
            && !self.compile_failed
    }
}

/// Language-independent shape of an execution outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeKind {
    CompileError,
    Timeout,
    Crash,
    WrongOutput,
    Pass,
}

/// Outcome with language-specific stack-trace formatting stripped away
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub kind: OutcomeKind,
    pub raw_message: String,
    pub failing_test_index: Option<usize>,
}

/// Coarse classification of why a submission failed (or passed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Syntax,
    Runtime,
    Logic,
    Pass,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Syntax => "Syntax",
            Category::Runtime => "Runtime",
            Category::Logic => "Logic",
            Category::Pass => "Pass",
        }
    }
}

/// Result of running the weighted rule table over a normalized outcome.
///
/// Pure function of the outcome and the table: identical inputs always
/// produce an identical record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub category: Category,
    pub priority_score: u32,
    pub matched_rule_id: String,
    /// 1-based source line a rule extracted from the raw message, if any.
    pub offending_line_hint: Option<u32>,
}

/// Persisted per-(student, problem) escalation state.
///
/// The only entity whose lifetime spans submissions. Mutated under a
/// per-key single-writer discipline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttemptState {
    pub attempt_count: u32,
    /// Category of every non-Pass attempt since the last reset.
    pub history: Vec<Category>,
}

/// Amount of assistance released for one attempt.
///
/// Ordered: escalation is monotonic across consecutive non-Pass attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DisclosureTier {
    VerdictOnly,
    Hint,
    HintWithCitation,
    HintWithPatch,
}

/// Request to judge a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub user_id: String,
    pub problem_id: String,
    pub language: Language,
    pub code: String,
}

/// Overall submit verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    Failure,
}

/// Response from the pipeline.
///
/// Always well-formed: even total sandbox failure produces a `Failure`
/// response with a generic hint, never a bare transport error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: Status,
    /// Execution trace lines, rendered by the client with error-pattern
    /// based color coding.
    pub agent_logs: Vec<String>,
    pub system_messages: Vec<String>,
    pub hint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
    /// Single-hunk line-range diff, present only at patch tier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}
