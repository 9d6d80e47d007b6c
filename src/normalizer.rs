use crate::types::{ExecutionOutcome, NormalizedResult, OutcomeKind};

/// Marker prepended when an outcome violates its own invariants and is
/// degraded instead of propagated as a fault.
pub const INTERNAL_ERROR_MARKER: &str = "[internal]";

/// Map a raw execution outcome into a uniform language-independent shape.
///
/// Pure: no side effects, total over its input. A malformed outcome (one
/// that breaks the tests_passed <= tests_total invariant) is treated as a
/// Crash carrying the internal-error marker rather than an unhandled fault.
pub fn normalize(outcome: &ExecutionOutcome) -> NormalizedResult {
    if outcome.tests_passed > outcome.tests_total {
        return NormalizedResult {
            kind: OutcomeKind::Crash,
            raw_message: format!(
                "{INTERNAL_ERROR_MARKER} inconsistent test counts: {}/{}",
                outcome.tests_passed, outcome.tests_total
            ),
            failing_test_index: None,
        };
    }

    if outcome.compile_failed {
        return NormalizedResult {
            kind: OutcomeKind::CompileError,
            raw_message: pick_message(outcome),
            failing_test_index: None,
        };
    }

    if outcome.timed_out {
        return NormalizedResult {
            kind: OutcomeKind::Timeout,
            raw_message: "execution exceeded the wall-clock limit".to_string(),
            failing_test_index: outcome.failing_test,
        };
    }

    if outcome.resource_killed {
        return NormalizedResult {
            kind: OutcomeKind::Crash,
            raw_message: if outcome.stderr.trim().is_empty() {
                "Segmentation Fault (Memory Access Error)".to_string()
            } else {
                outcome.stderr.clone()
            },
            failing_test_index: outcome.failing_test,
        };
    }

    if outcome.exit_code != Some(0) {
        return NormalizedResult {
            kind: OutcomeKind::Crash,
            raw_message: pick_message(outcome),
            failing_test_index: outcome.failing_test,
        };
    }

    if outcome.tests_passed < outcome.tests_total {
        return NormalizedResult {
            kind: OutcomeKind::WrongOutput,
            raw_message: match (&outcome.failing_expected, outcome.failing_test) {
                (Some(expected), Some(index)) => format!(
                    "test #{} produced {:?}, expected {:?}",
                    index + 1,
                    outcome.stdout.trim_end(),
                    expected.trim_end()
                ),
                _ => "output did not match the expected result".to_string(),
            },
            failing_test_index: outcome.failing_test,
        };
    }

    NormalizedResult {
        kind: OutcomeKind::Pass,
        raw_message: String::new(),
        failing_test_index: None,
    }
}

fn pick_message(outcome: &ExecutionOutcome) -> String {
    if !outcome.stderr.trim().is_empty() {
        outcome.stderr.clone()
    } else if !outcome.stdout.trim().is_empty() {
        outcome.stdout.clone()
    } else {
        format!("process exited with code {:?}", outcome.exit_code)
    }
}
