use crate::types::{Category, DiagnosticRecord, Language, NormalizedResult, OutcomeKind};
use regex::Regex;
use tracing::debug;

/// What a rule matches against.
pub enum RuleMatcher {
    /// Direct match on the normalized outcome kind (Timeout, CompileError,
    /// Pass and friends).
    Kind(OutcomeKind),
    /// Regex over the raw message, optionally restricted to one language.
    /// A `line` named capture group supplies the offending-line hint.
    Pattern {
        language: Option<Language>,
        regex: Regex,
    },
}

/// One entry of the weighted diagnosis table.
pub struct Rule {
    pub id: &'static str,
    pub matcher: RuleMatcher,
    pub category: Category,
    pub priority: u32,
}

impl Rule {
    fn matches(&self, result: &NormalizedResult, language: Language) -> Option<Option<u32>> {
        match &self.matcher {
            RuleMatcher::Kind(kind) => (*kind == result.kind).then_some(None),
            RuleMatcher::Pattern { language: filter, regex } => {
                if let Some(required) = filter {
                    if *required != language {
                        return None;
                    }
                }
                let captures = regex.captures(&result.raw_message)?;
                let line = captures
                    .name("line")
                    .and_then(|m| m.as_str().parse::<u32>().ok());
                Some(line)
            }
        }
    }
}

/// Deterministic first-match classifier over an ordered rule table.
///
/// Rules are held sorted by descending priority so institution-specific
/// entries can outrank generic interpreter messages; the table is data, not
/// branching code. An unmatched result always resolves through the
/// outcome-kind fallback, so classification never fails.
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::with_rules(builtin_rules())
    }
}

impl Classifier {
    pub fn with_rules(mut rules: Vec<Rule>) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { rules }
    }

    /// Insert an additional (e.g. institution-specific) rule, keeping the
    /// priority ordering.
    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn classify(&self, result: &NormalizedResult, language: Language) -> DiagnosticRecord {
        for rule in &self.rules {
            if let Some(line) = rule.matches(result, language) {
                debug!(rule_id = rule.id, category = rule.category.as_str(), "rule matched");
                return DiagnosticRecord {
                    category: rule.category,
                    priority_score: rule.priority,
                    matched_rule_id: rule.id.to_string(),
                    offending_line_hint: line,
                };
            }
        }

        // Total fallback from the outcome kind alone.
        let category = match result.kind {
            OutcomeKind::CompileError => Category::Syntax,
            OutcomeKind::Timeout | OutcomeKind::Crash => Category::Runtime,
            OutcomeKind::WrongOutput => Category::Logic,
            OutcomeKind::Pass => Category::Pass,
        };
        DiagnosticRecord {
            category,
            priority_score: 0,
            matched_rule_id: format!("fallback-{:?}", result.kind).to_lowercase(),
            offending_line_hint: None,
        }
    }
}

/// Built-in table, recovered from the stock compiler/interpreter message
/// shapes: gcc/g++ `file:line:col: error:`, javac `file:line: error:`,
/// Python tracebacks, and the common kill signatures.
fn builtin_rules() -> Vec<Rule> {
    vec![
        Rule {
            id: "pass",
            matcher: RuleMatcher::Kind(OutcomeKind::Pass),
            category: Category::Pass,
            priority: 100,
        },
        Rule {
            id: "python-syntax",
            matcher: RuleMatcher::Pattern {
                language: Some(Language::Python),
                regex: Regex::new(
                    r#"(?s)File "[^"]+", line (?P<line>\d+).*(?:SyntaxError|IndentationError|TabError)"#,
                )
                .expect("static regex"),
            },
            category: Category::Syntax,
            priority: 95,
        },
        Rule {
            id: "gcc-compile-error",
            matcher: RuleMatcher::Pattern {
                language: None,
                regex: Regex::new(r"(?m)^[^:\n]+\.(?:c|cpp):(?P<line>\d+):\d+: (?:fatal )?error: ")
                    .expect("static regex"),
            },
            category: Category::Syntax,
            priority: 90,
        },
        Rule {
            id: "javac-compile-error",
            matcher: RuleMatcher::Pattern {
                language: Some(Language::Java),
                regex: Regex::new(r"(?m)^[^:\n]+\.java:(?P<line>\d+): error: ").expect("static regex"),
            },
            category: Category::Syntax,
            priority: 90,
        },
        Rule {
            id: "segfault",
            matcher: RuleMatcher::Pattern {
                language: None,
                regex: Regex::new(r"Segmentation [Ff]ault|SIGSEGV|Memory Access")
                    .expect("static regex"),
            },
            category: Category::Runtime,
            priority: 85,
        },
        Rule {
            id: "python-zero-division",
            matcher: RuleMatcher::Pattern {
                language: Some(Language::Python),
                regex: Regex::new(r#"File "[^"]+", line (?P<line>\d+)[\s\S]*ZeroDivisionError"#)
                    .expect("static regex"),
            },
            category: Category::Runtime,
            priority: 82,
        },
        Rule {
            id: "python-traceback",
            matcher: RuleMatcher::Pattern {
                language: Some(Language::Python),
                regex: Regex::new(r#"File "[^"]+", line (?P<line>\d+)[\s\S]*\w+Error:"#)
                    .expect("static regex"),
            },
            category: Category::Runtime,
            priority: 80,
        },
        Rule {
            id: "java-exception",
            matcher: RuleMatcher::Pattern {
                language: Some(Language::Java),
                regex: Regex::new(r"Exception in thread|\w+Exception(?::|\b)").expect("static regex"),
            },
            category: Category::Runtime,
            priority: 78,
        },
        Rule {
            id: "timeout",
            matcher: RuleMatcher::Kind(OutcomeKind::Timeout),
            category: Category::Runtime,
            priority: 60,
        },
        Rule {
            id: "compile-error-generic",
            matcher: RuleMatcher::Kind(OutcomeKind::CompileError),
            category: Category::Syntax,
            priority: 50,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(kind: OutcomeKind, message: &str) -> NormalizedResult {
        NormalizedResult {
            kind,
            raw_message: message.to_string(),
            failing_test_index: Some(0),
        }
    }

    #[test]
    fn missing_colon_in_python_if_is_syntax() {
        let classifier = Classifier::default();
        let message = concat!(
            "  File \"main.py\", line 2\n",
            "    if n > 0\n",
            "            ^\n",
            "SyntaxError: expected ':'\n"
        );
        let record = classifier.classify(
            &result(OutcomeKind::CompileError, message),
            Language::Python,
        );
        assert_eq!(record.category, Category::Syntax);
        assert_eq!(record.matched_rule_id, "python-syntax");
        assert_eq!(record.offending_line_hint, Some(2));
    }

    #[test]
    fn division_by_zero_is_runtime() {
        let classifier = Classifier::default();
        let message = concat!(
            "Traceback (most recent call last):\n",
            "  File \"main.py\", line 3, in <module>\n",
            "    print(1 // n)\n",
            "ZeroDivisionError: integer division or modulo by zero\n"
        );
        let record =
            classifier.classify(&result(OutcomeKind::Crash, message), Language::Python);
        assert_eq!(record.category, Category::Runtime);
        assert_eq!(record.matched_rule_id, "python-zero-division");
        assert_eq!(record.offending_line_hint, Some(3));
    }

    #[test]
    fn gcc_error_line_is_extracted() {
        let classifier = Classifier::default();
        let message = "main.c:7:5: error: expected ';' before 'return'\n";
        let record = classifier.classify(&result(OutcomeKind::CompileError, message), Language::C);
        assert_eq!(record.category, Category::Syntax);
        assert_eq!(record.matched_rule_id, "gcc-compile-error");
        assert_eq!(record.offending_line_hint, Some(7));
    }

    #[test]
    fn wrong_output_falls_back_to_logic() {
        let classifier = Classifier::default();
        let record = classifier.classify(
            &result(OutcomeKind::WrongOutput, "test #1 produced \"5\", expected \"6\""),
            Language::C,
        );
        assert_eq!(record.category, Category::Logic);
        assert_eq!(record.matched_rule_id, "fallback-wrongoutput");
        assert_eq!(record.priority_score, 0);
    }

    #[test]
    fn timeout_matches_kind_rule() {
        let classifier = Classifier::default();
        let record = classifier.classify(
            &result(OutcomeKind::Timeout, "execution exceeded the wall-clock limit"),
            Language::Java,
        );
        assert_eq!(record.category, Category::Runtime);
        assert_eq!(record.matched_rule_id, "timeout");
    }

    #[test]
    fn classification_is_pure_and_repeatable() {
        let classifier = Classifier::default();
        let input = result(OutcomeKind::Crash, "Segmentation fault (core dumped)");
        let first = classifier.classify(&input, Language::Cpp);
        let second = classifier.classify(&input, Language::Cpp);
        assert_eq!(first, second);
        assert_eq!(first.matched_rule_id, "segfault");
    }

    #[test]
    fn higher_priority_custom_rule_outranks_builtin() {
        let mut classifier = Classifier::default();
        classifier.add_rule(Rule {
            id: "course-off-by-one",
            matcher: RuleMatcher::Pattern {
                language: None,
                regex: Regex::new("expected \"6\"").unwrap(),
            },
            category: Category::Logic,
            priority: 99,
        });
        let record = classifier.classify(
            &result(OutcomeKind::WrongOutput, "test #1 produced \"5\", expected \"6\""),
            Language::Python,
        );
        assert_eq!(record.matched_rule_id, "course-off-by-one");
        assert_eq!(record.priority_score, 99);
    }

    #[test]
    fn language_filter_prevents_cross_language_match() {
        let classifier = Classifier::default();
        let message = "  File \"main.py\", line 2\nSyntaxError: invalid syntax";
        let record =
            classifier.classify(&result(OutcomeKind::CompileError, message), Language::Java);
        // Python-only rule must not fire for Java; kind fallback rule wins.
        assert_eq!(record.matched_rule_id, "compile-error-generic");
        assert_eq!(record.category, Category::Syntax);
    }
}
