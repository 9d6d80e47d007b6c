use crate::error::{JudgeError, JudgeResult};
use crate::types::DiagnosticRecord;
use tracing::warn;

/// A single contiguous line-range edit.
///
/// `start_line` is 1-based, matching the `@@ -<start>,<count> +<start>,<count> @@`
/// header a generic unified-diff applier expects: it locates
/// `start_line - 1`, deletes `original_line_count` lines and inserts the
/// replacement verbatim. Multi-hunk patches are unsupported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub start_line: usize,
    pub original_lines: Vec<String>,
    pub replacement_lines: Vec<String>,
}

impl Hunk {
    pub fn original_line_count(&self) -> usize {
        self.original_lines.len()
    }

    pub fn new_line_count(&self) -> usize {
        self.replacement_lines.len()
    }

    /// Render in the wire form: header, then `-` lines for the replaced
    /// region, then `+` lines for the replacement.
    pub fn render(&self) -> String {
        let mut out = format!(
            "@@ -{},{} +{},{} @@",
            self.start_line,
            self.original_line_count(),
            self.start_line,
            self.new_line_count()
        );
        for line in &self.original_lines {
            out.push('\n');
            out.push('-');
            out.push_str(line);
        }
        for line in &self.replacement_lines {
            out.push('\n');
            out.push('+');
            out.push_str(line);
        }
        out
    }

    /// Parse a rendered hunk. Content after a second `@@` header is
    /// rejected rather than silently dropped.
    pub fn parse(text: &str) -> Option<Hunk> {
        let mut lines = text.lines();
        let header = lines.next()?;
        let (start_line, old_count, new_start, new_count) = parse_header(header)?;
        if new_start != start_line {
            return None;
        }

        let mut original_lines = Vec::new();
        let mut replacement_lines = Vec::new();
        for line in lines {
            if line.starts_with("@@") {
                // Single-hunk only.
                return None;
            }
            match line.chars().next() {
                Some('-') => original_lines.push(line[1..].to_string()),
                Some('+') => replacement_lines.push(line[1..].to_string()),
                Some(' ') => {
                    // Context counts toward both sides.
                    original_lines.push(line[1..].to_string());
                    replacement_lines.push(line[1..].to_string());
                }
                _ => return None,
            }
        }

        if original_lines.len() != old_count || replacement_lines.len() != new_count {
            return None;
        }
        Some(Hunk {
            start_line,
            original_lines,
            replacement_lines,
        })
    }

    /// Well-formedness the client applier relies on: a positive 1-based
    /// start and header counts consistent with the body.
    pub fn is_valid_against(&self, source: &str) -> bool {
        if self.start_line == 0 {
            return false;
        }
        if self.original_lines.is_empty() && self.replacement_lines.is_empty() {
            return false;
        }
        let source_lines = source.lines().count();
        // The addressed region must exist in the source being patched.
        self.start_line + self.original_line_count() - 1 <= source_lines.max(1)
    }
}

fn parse_header(header: &str) -> Option<(usize, usize, usize, usize)> {
    let inner = header.strip_prefix("@@ -")?;
    let (old_part, rest) = inner.split_once(" +")?;
    let new_part = rest.strip_suffix(" @@")?;
    let (old_start, old_count) = old_part.split_once(',')?;
    let (new_start, new_count) = new_part.split_once(',')?;
    Some((
        old_start.parse().ok()?,
        old_count.parse().ok()?,
        new_start.parse().ok()?,
        new_count.parse().ok()?,
    ))
}

/// First line (1-based) where two outputs diverge.
pub fn divergence_line(actual: &str, expected: &str) -> usize {
    let actual_lines: Vec<&str> = actual.lines().collect();
    let expected_lines: Vec<&str> = expected.lines().collect();
    for (index, expected_line) in expected_lines.iter().enumerate() {
        match actual_lines.get(index) {
            Some(actual_line) if actual_line.trim_end() == expected_line.trim_end() => continue,
            _ => return index + 1,
        }
    }
    if actual_lines.len() > expected_lines.len() {
        expected_lines.len() + 1
    } else {
        1
    }
}

/// Builds and validates the single-hunk patch released at patch tier.
///
/// Owns only the line-addressing contract; the replacement text itself
/// comes from the text-generation collaborator.
pub struct PatchSynthesizer;

impl PatchSynthesizer {
    /// Target line for the edit: a rule-supplied offending line when
    /// present, otherwise the first point of divergence between actual and
    /// expected output, clamped into the source.
    pub fn target_line(
        diagnostic: &DiagnosticRecord,
        actual_output: Option<&str>,
        expected_output: Option<&str>,
        source: &str,
    ) -> usize {
        let source_lines = source.lines().count().max(1);
        let line = match diagnostic.offending_line_hint {
            Some(hint) if hint >= 1 => hint as usize,
            _ => match (actual_output, expected_output) {
                (Some(actual), Some(expected)) => divergence_line(actual, expected),
                _ => 1,
            },
        };
        line.min(source_lines)
    }

    /// Replace one source line with the generated replacement and render
    /// the hunk, re-parsing the rendered text as the final validation. A
    /// patch that fails validation is never released.
    pub fn synthesize(
        &self,
        source: &str,
        target_line: usize,
        replacement_lines: &[String],
    ) -> JudgeResult<String> {
        if replacement_lines.is_empty() {
            return Err(JudgeError::Internal(
                "generator returned no replacement lines".to_string(),
            ));
        }
        let source_lines: Vec<&str> = source.lines().collect();
        if target_line == 0 || target_line > source_lines.len() {
            return Err(JudgeError::Internal(format!(
                "patch target line {target_line} outside source"
            )));
        }

        let hunk = Hunk {
            start_line: target_line,
            original_lines: vec![source_lines[target_line - 1].to_string()],
            replacement_lines: replacement_lines.to_vec(),
        };

        let rendered = hunk.render();
        let reparsed = Hunk::parse(&rendered).ok_or_else(|| {
            warn!("synthesized patch failed to re-parse");
            JudgeError::Internal("synthesized patch is not well-formed".to_string())
        })?;
        if reparsed != hunk || !reparsed.is_valid_against(source) {
            return Err(JudgeError::Internal(
                "synthesized patch failed validation".to_string(),
            ));
        }
        Ok(rendered)
    }
}
