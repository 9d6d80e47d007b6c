use crate::error::{JudgeError, JudgeResult};
use crate::types::{Category, DisclosureTier, Language, ProblemSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Structured prompt handed to the text-generation collaborator.
#[derive(Debug, Clone)]
pub struct HintPrompt {
    pub language: Language,
    pub source_code: String,
    pub category: Category,
    pub attempt: u32,
    pub tier: DisclosureTier,
    /// Cleaned diagnostic evidence (never raw internals).
    pub evidence: String,
    /// Retrieved grounding, when the tier includes a citation.
    pub knowledge: Option<KnowledgeEntry>,
}

impl HintPrompt {
    /// Render the instruction text. The strategy escalates with the
    /// attempt: vague concept first, the exact spot second, the fix itself
    /// only at patch tier.
    pub fn render(&self) -> String {
        let (strategy, output_format) = match self.attempt {
            0 | 1 => (
                "Attempt #1. BE VAGUE. Hint at the concept only. \
                 Do NOT reveal the solution or line numbers.",
                "Return the hint as plain text (max 1 sentence).",
            ),
            2 => (
                "Attempt #2. BE SPECIFIC. Point out the exact line or variable \
                 causing the issue and explain why it is wrong, but do not write the fix.",
                "Return the hint as plain text (max 2 sentences).",
            ),
            _ => (
                "Attempt #3. BE DIRECT. The student is stuck. Briefly state the fix \
                 and provide the replacement source lines for the broken region only.",
                "Return a JSON object with keys 'hint' (1-2 sentences) and \
                 'replacement_lines' (array of source lines replacing the broken region).",
            ),
        };

        let knowledge = match &self.knowledge {
            Some(entry) => format!(
                "Concept: {}\nRecommended hint style: \"{}\"",
                entry.concept, entry.hint_template
            ),
            None => "Concept: unknown".to_string(),
        };

        format!(
            "You are a teaching assistant for a programming lab.\n\n\
             [CONTEXT]\nLanguage: {}\nCode:\n{}\n\n\
             [ERROR DATA]\nCategory: {}\nEvidence: {}\n\n\
             [KNOWLEDGE BASE]\n{}\n\n\
             [INSTRUCTION]\n{}\n\n\
             [OUTPUT FORMAT]\n{}",
            self.language.as_str(),
            self.source_code,
            self.category.as_str(),
            self.evidence,
            knowledge,
            strategy,
            output_format
        )
    }

    fn wants_replacement(&self) -> bool {
        self.tier == DisclosureTier::HintWithPatch
    }
}

/// What the generator hands back.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedHint {
    pub hint: String,
    /// Replacement source lines, present only when the prompt asked for a
    /// patch and the generator complied.
    #[serde(default)]
    pub replacement_lines: Option<Vec<String>>,
}

/// Opaque text-generation collaborator, called with a bounded timeout.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &HintPrompt) -> JudgeResult<GeneratedHint>;
}

/// Deterministic fallback used when the external generator times out or
/// errors: a templated hint from the retrieved knowledge, no patch.
pub struct TemplateGenerator;

#[async_trait]
impl TextGenerator for TemplateGenerator {
    async fn generate(&self, prompt: &HintPrompt) -> JudgeResult<GeneratedHint> {
        let hint = match &prompt.knowledge {
            Some(entry) => entry.hint_template.clone(),
            None => match prompt.category {
                Category::Syntax => {
                    "The code does not parse. Re-read the reported line for a missing \
                     delimiter or keyword."
                        .to_string()
                }
                Category::Runtime => {
                    "The program crashed while running. Check the values your code \
                     assumes are always valid."
                        .to_string()
                }
                Category::Logic => {
                    "The program runs but its output is wrong. Re-check the calculation \
                     against the sample cases."
                        .to_string()
                }
                Category::Pass => "All hidden tests passed.".to_string(),
            },
        };
        Ok(GeneratedHint {
            hint,
            replacement_lines: None,
        })
    }
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<ContentPart>,
}

#[derive(Serialize)]
struct ContentPart {
    parts: Vec<TextPart>,
}

#[derive(Serialize)]
struct TextPart {
    text: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: String,
}

/// HTTP client for the hosted text-generation service.
///
/// One retry with linear backoff on 429; every call is bounded by the
/// configured timeout so a slow service degrades the hint, never the
/// verdict.
pub struct HttpTextGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    call_timeout: Duration,
}

impl HttpTextGenerator {
    pub fn new(endpoint: String, api_key: String, call_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            call_timeout,
        }
    }

    async fn call_once(&self, prompt_text: &str) -> JudgeResult<reqwest::Response> {
        let body = GenerateContentRequest {
            contents: vec![ContentPart {
                parts: vec![TextPart {
                    text: prompt_text.to_string(),
                }],
            }],
        };
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        tokio::time::timeout(self.call_timeout, self.client.post(&url).json(&body).send())
            .await
            .map_err(|_| {
                JudgeError::ExternalServiceTimeout("text generation call timed out".to_string())
            })?
            .map_err(|e| JudgeError::ExternalServiceTimeout(format!("text generation failed: {e}")))
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &HintPrompt) -> JudgeResult<GeneratedHint> {
        let prompt_text = prompt.render();

        let mut response = self.call_once(&prompt_text).await?;
        if response.status().as_u16() == 429 {
            warn!("text generation rate limited, retrying once");
            tokio::time::sleep(Duration::from_secs(2)).await;
            response = self.call_once(&prompt_text).await?;
        }
        if !response.status().is_success() {
            return Err(JudgeError::ExternalServiceTimeout(format!(
                "text generation returned status {}",
                response.status()
            )));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            JudgeError::ExternalServiceTimeout(format!("unreadable generation response: {e}"))
        })?;
        let raw = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| {
                JudgeError::ExternalServiceTimeout("empty generation response".to_string())
            })?;

        Ok(interpret_generation(&raw, prompt.wants_replacement()))
    }
}

/// Extract the structured hint from the model's free-form reply. At patch
/// tier the reply should be a JSON object; anything else is treated as a
/// plain hint with no replacement.
pub fn interpret_generation(raw: &str, expect_json: bool) -> GeneratedHint {
    if expect_json {
        if let Some(json_slice) = extract_json_object(raw) {
            if let Ok(parsed) = serde_json::from_str::<GeneratedHint>(json_slice) {
                return parsed;
            }
        }
        debug!("patch-tier reply was not valid JSON, downgrading to plain hint");
    }
    GeneratedHint {
        hint: raw.trim().to_string(),
        replacement_lines: None,
    }
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// One retrieved knowledge-base entry grounding a hint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KnowledgeEntry {
    #[serde(default)]
    pub concept: String,
    #[serde(default)]
    pub hint_template: String,
    #[serde(default)]
    pub citation: Option<String>,
}

/// Opaque retrieval collaborator: category + problem keyed lookup of
/// grounded reference material.
#[async_trait]
pub trait HintRetriever: Send + Sync {
    async fn lookup(
        &self,
        category: Category,
        problem_id: &str,
    ) -> JudgeResult<Option<KnowledgeEntry>>;
}

/// Knowledge base merged from JSON dictionaries (error concepts and lab
/// manual citations), keyed by diagnostic category.
#[derive(Default)]
pub struct KnowledgeBase {
    entries: HashMap<String, KnowledgeEntry>,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in entries so hints stay grounded even with no dictionaries
    /// on disk.
    pub fn builtin() -> Self {
        let mut kb = Self::new();
        kb.entries.insert(
            "Syntax".to_string(),
            KnowledgeEntry {
                concept: "source code structure the compiler can parse".to_string(),
                hint_template: "Look closely at the reported line; something the parser \
                                expected is missing."
                    .to_string(),
                citation: Some("Lab Manual ch. 2: Language Syntax".to_string()),
            },
        );
        kb.entries.insert(
            "Runtime".to_string(),
            KnowledgeEntry {
                concept: "errors raised while the program is running".to_string(),
                hint_template: "Think about inputs that break an assumption your code makes."
                    .to_string(),
                citation: Some("Lab Manual ch. 5: Runtime Errors".to_string()),
            },
        );
        kb.entries.insert(
            "Logic".to_string(),
            KnowledgeEntry {
                concept: "a program that runs but computes the wrong answer".to_string(),
                hint_template: "Trace your algorithm by hand on the first sample case."
                    .to_string(),
                citation: Some("Lab Manual ch. 7: Debugging Logic".to_string()),
            },
        );
        kb
    }

    /// Merge one JSON dictionary file into the base. Later files override
    /// fields of earlier ones for the same key.
    pub fn merge_file(&mut self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let parsed: HashMap<String, KnowledgeEntry> =
            serde_json::from_str(&text).with_context(|| format!("bad JSON in {}", path.display()))?;
        for (key, incoming) in parsed {
            let entry = self.entries.entry(key).or_default();
            if !incoming.concept.is_empty() {
                entry.concept = incoming.concept;
            }
            if !incoming.hint_template.is_empty() {
                entry.hint_template = incoming.hint_template;
            }
            if incoming.citation.is_some() {
                entry.citation = incoming.citation;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl HintRetriever for KnowledgeBase {
    async fn lookup(
        &self,
        category: Category,
        _problem_id: &str,
    ) -> JudgeResult<Option<KnowledgeEntry>> {
        Ok(self.entries.get(category.as_str()).cloned())
    }
}

/// External problem store boundary: the core only consumes specs by id.
#[async_trait]
pub trait ProblemSource: Send + Sync {
    async fn fetch(&self, problem_id: &str) -> JudgeResult<Option<ProblemSpec>>;
}

/// In-memory problem source for the demo binary and tests.
#[derive(Default)]
pub struct StaticProblemSource {
    problems: HashMap<String, ProblemSpec>,
}

impl StaticProblemSource {
    pub fn new(problems: Vec<ProblemSpec>) -> Self {
        Self {
            problems: problems.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }
}

#[async_trait]
impl ProblemSource for StaticProblemSource {
    async fn fetch(&self, problem_id: &str) -> JudgeResult<Option<ProblemSpec>> {
        Ok(self.problems.get(problem_id).cloned())
    }
}
