use crate::agent::{
    GeneratedHint, HintPrompt, HintRetriever, KnowledgeEntry, ProblemSource, TemplateGenerator,
    TextGenerator,
};
use crate::classifier::Classifier;
use crate::config::PipelineConfig;
use crate::error::JudgeError;
use crate::normalizer::normalize;
use crate::patch::PatchSynthesizer;
use crate::policy::{AttemptStore, EscalationPolicy};
use crate::runner::SandboxRunner;
use crate::types::{
    Category, DiagnosticRecord, DisclosureTier, ExecutionOutcome, NormalizedResult, OutcomeKind,
    ProblemSpec, Status, Submission, SubmitRequest, SubmitResponse,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// End-to-end submission orchestration.
///
/// Each call to `submit` is one independent unit of concurrent execution;
/// the only state shared between calls is the attempt store, mutated under
/// its per-key discipline. The response is always well-formed: every
/// internal failure is recovered into a `Failure` verdict with a usable
/// hint.
pub struct Pipeline {
    runner: SandboxRunner,
    classifier: Classifier,
    policy: EscalationPolicy,
    synthesizer: PatchSynthesizer,
    problems: Arc<dyn ProblemSource>,
    retriever: Arc<dyn HintRetriever>,
    generator: Arc<dyn TextGenerator>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        problems: Arc<dyn ProblemSource>,
        retriever: Arc<dyn HintRetriever>,
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn AttemptStore>,
    ) -> Self {
        Self {
            runner: SandboxRunner::new(config),
            classifier: Classifier::default(),
            policy: EscalationPolicy::new(store),
            synthesizer: PatchSynthesizer,
            problems,
            retriever,
            generator,
        }
    }

    pub fn classifier_mut(&mut self) -> &mut Classifier {
        &mut self.classifier
    }

    /// Sandbox sessions currently allocatable, for teardown checks.
    pub fn available_sessions(&self) -> usize {
        self.runner.available_sessions()
    }

    /// Judge one submission and produce the client response.
    pub async fn submit(&self, request: SubmitRequest) -> SubmitResponse {
        let mut logs = Vec::new();
        logs.push(format!(
            "Phase 1: initializing sandbox for {}...",
            request.language.as_str()
        ));

        let spec = match self.problems.fetch(&request.problem_id).await {
            Ok(Some(spec)) => spec,
            Ok(None) => {
                return failure_response(
                    logs,
                    format!("Problem '{}' was not found.", request.problem_id),
                );
            }
            Err(e) => {
                error!(error = %e, "problem store lookup failed");
                return failure_response(logs, "The problem store is unavailable.".to_string());
            }
        };

        let attempt_number = self
            .policy
            .upcoming_attempt(&request.user_id, &request.problem_id)
            .await
            .unwrap_or(1);
        let submission = Submission {
            student_id: request.user_id.clone(),
            problem_id: request.problem_id.clone(),
            language: request.language,
            source_code: request.code.clone(),
            attempt_number,
        };

        logs.push(format!(
            "Phase 2: loading {} hidden test cases...",
            spec.hidden_cases.len()
        ));

        let outcome = match self.execute_with_retry(&submission, &spec).await {
            Ok(outcome) => outcome,
            Err(JudgeError::Validation(reason)) => {
                // Rejected before any resource allocation; not an attempt.
                logs.push(format!("Submission rejected: {reason}"));
                return failure_response(
                    logs,
                    "Your submission was rejected before running. Check its size and language."
                        .to_string(),
                );
            }
            Err(e) => {
                error!(error = %e, "sandbox execution failed");
                logs.push("Sandbox infrastructure failure.".to_string());
                return failure_response(
                    logs,
                    "The judge could not run your code. Please try again shortly.".to_string(),
                );
            }
        };

        append_outcome_logs(&mut logs, &outcome);

        let normalized = normalize(&outcome);
        let diagnostic = self.classifier.classify(&normalized, request.language);
        info!(
            category = diagnostic.category.as_str(),
            rule = %diagnostic.matched_rule_id,
            tests = format!("{}/{}", outcome.tests_passed, outcome.tests_total),
            "submission classified"
        );

        let (state, tier) = match self
            .policy
            .record(&request.user_id, &request.problem_id, diagnostic.category)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                // Attempt state is required for disclosure decisions; fail
                // closed to the stingiest tier rather than over-disclose.
                warn!(error = %e, "attempt store update failed");
                (Default::default(), DisclosureTier::Hint)
            }
        };

        let mut system_messages = Vec::new();
        if diagnostic.category == Category::Pass {
            system_messages.push("Great job! You passed all hidden tests.".to_string());
            return SubmitResponse {
                status: Status::Success,
                agent_logs: logs,
                system_messages,
                hint: "Congratulations! You are ready for the next challenge.".to_string(),
                citation: None,
                patch: None,
            };
        }
        system_messages.push(format!(
            "Attempt #{}: {} error detected.",
            state.attempt_count,
            diagnostic.category.as_str()
        ));

        let evidence = build_evidence(&diagnostic, &normalized);
        let knowledge = self
            .retrieve_knowledge(diagnostic.category, &request.problem_id)
            .await;

        let prompt = HintPrompt {
            language: request.language,
            source_code: request.code.clone(),
            category: diagnostic.category,
            attempt: state.attempt_count,
            tier,
            evidence,
            knowledge: knowledge.clone(),
        };
        let generated = self.generate_hint(&prompt).await;

        let mut effective_tier = tier;
        let mut patch = None;
        if tier == DisclosureTier::HintWithPatch {
            match self.try_patch(&request.code, &diagnostic, &outcome, &generated) {
                Some(rendered) => {
                    system_messages
                        .push("Source patch unlocked: a suggested fix is attached.".to_string());
                    patch = Some(rendered);
                }
                None => {
                    // Malformed or missing patch is downgraded, never sent raw.
                    effective_tier = DisclosureTier::HintWithCitation;
                }
            }
        }

        let citation = if effective_tier >= DisclosureTier::HintWithCitation {
            knowledge.and_then(|entry| entry.citation)
        } else {
            None
        };

        SubmitResponse {
            status: Status::Failure,
            agent_logs: logs,
            system_messages,
            hint: generated.hint,
            citation,
            patch,
        }
    }

    /// Execute, retrying once with backoff when the isolation runtime
    /// cannot allocate an environment.
    async fn execute_with_retry(
        &self,
        submission: &Submission,
        spec: &ProblemSpec,
    ) -> Result<ExecutionOutcome, JudgeError> {
        match self.runner.execute(submission, spec).await {
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "sandbox allocation failed, retrying once");
                tokio::time::sleep(Duration::from_millis(500)).await;
                self.runner.execute(submission, spec).await
            }
            other => other,
        }
    }

    async fn retrieve_knowledge(
        &self,
        category: Category,
        problem_id: &str,
    ) -> Option<KnowledgeEntry> {
        match self.retriever.lookup(category, problem_id).await {
            Ok(entry) => entry,
            Err(e) => {
                // Retrieval never blocks the verdict.
                warn!(error = %e, "knowledge retrieval failed");
                None
            }
        }
    }

    async fn generate_hint(&self, prompt: &HintPrompt) -> GeneratedHint {
        match self.generator.generate(prompt).await {
            Ok(generated) => generated,
            Err(e) => {
                warn!(error = %e, "text generation failed, using template fallback");
                TemplateGenerator
                    .generate(prompt)
                    .await
                    .unwrap_or(GeneratedHint {
                        hint: "Review the failing test and try again.".to_string(),
                        replacement_lines: None,
                    })
            }
        }
    }

    fn try_patch(
        &self,
        source: &str,
        diagnostic: &DiagnosticRecord,
        outcome: &ExecutionOutcome,
        generated: &GeneratedHint,
    ) -> Option<String> {
        let replacement = generated.replacement_lines.as_deref()?;
        let target = PatchSynthesizer::target_line(
            diagnostic,
            Some(outcome.stdout.as_str()),
            outcome.failing_expected.as_deref(),
            source,
        );
        match self.synthesizer.synthesize(source, target, replacement) {
            Ok(rendered) => Some(rendered),
            Err(e) => {
                warn!(error = %e, "patch synthesis failed, downgrading to citation tier");
                None
            }
        }
    }
}

fn failure_response(logs: Vec<String>, hint: String) -> SubmitResponse {
    SubmitResponse {
        status: Status::Failure,
        agent_logs: logs,
        system_messages: Vec::new(),
        hint,
        citation: None,
        patch: None,
    }
}

fn append_outcome_logs(logs: &mut Vec<String>, outcome: &ExecutionOutcome) {
    if outcome.compile_failed {
        logs.push("Phase 3: compilation failed.".to_string());
        return;
    }
    for index in 0..outcome.tests_passed {
        logs.push(format!("Phase 3: test case #{} passed.", index + 1));
    }
    if let Some(index) = outcome.failing_test {
        if outcome.timed_out {
            logs.push(format!(
                "Phase 3: test case #{} exceeded the time limit.",
                index + 1
            ));
        } else if outcome.resource_killed {
            logs.push(format!(
                "Phase 3: test case #{} was killed for breaching a resource limit.",
                index + 1
            ));
        } else if outcome.exit_code != Some(0) {
            logs.push(format!("Phase 3: test case #{} crashed.", index + 1));
        } else {
            logs.push(format!(
                "Phase 3: test case #{} produced the wrong output.",
                index + 1
            ));
        }
    }
    if outcome.failing_test.is_none() && !outcome.compile_failed {
        logs.push("Result: passed all hidden test cases.".to_string());
    }
}

/// Cleaned, student-facing evidence line. Raw internals never leak.
fn build_evidence(diagnostic: &DiagnosticRecord, normalized: &NormalizedResult) -> String {
    let first_line = normalized
        .raw_message
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("unknown error")
        .trim()
        .to_string();
    match (normalized.kind, diagnostic.offending_line_hint) {
        (OutcomeKind::WrongOutput, _) => normalized.raw_message.clone(),
        (_, Some(line)) => format!("Line {line}: {first_line}"),
        _ => first_line,
    }
}
