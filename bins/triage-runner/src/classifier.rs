/// Outcome Classifier - Exit Code and Output Heuristics
///
/// **Core Responsibility:**
/// Map a raw run outcome to exactly one category.
///
/// **Critical Properties:**
/// - Knows nothing about child processes
/// - Knows nothing about scheduling
/// - Pure function: (identifier, outcome, tables, markers) → category
///
/// **Decision Order (first match wins):**
/// 1. timeout     - the run was killed at the deadline
/// 2. abort       - fatal exit status, stderr mentions the abort marker
/// 3. crash       - fatal exit status, no abort marker
/// 4. musl issue  - other nonzero status, identifier is a known platform quirk
/// 5. failed      - other nonzero status
/// 6. skipped     - zero status, stdout carries the skip marker
/// 7. ok          - zero status
///
/// **Why Text Scanning:**
/// The runtime under test exits with the same status for a graceful
/// internal abort and for an unhandled memory fault. Only stderr tells
/// the two apart.
use triage_common::config::{
    HarnessConfig, DEFAULT_ABORT_MARKER, DEFAULT_FATAL_EXIT_STATUS, DEFAULT_SKIP_MARKER,
};
use triage_common::types::{Category, ClassificationTables, RunOutcome};

/// Exit status and textual markers the classifier looks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub fatal_exit_status: i32,
    /// Matched case-insensitively against stderr
    pub abort_marker: String,
    /// Matched literally against stdout
    pub skip_marker: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            fatal_exit_status: DEFAULT_FATAL_EXIT_STATUS,
            abort_marker: DEFAULT_ABORT_MARKER.to_ascii_lowercase(),
            skip_marker: DEFAULT_SKIP_MARKER.to_string(),
        }
    }
}

impl Markers {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            fatal_exit_status: config.fatal_exit_status,
            abort_marker: config.abort_marker.to_ascii_lowercase(),
            skip_marker: config.skip_marker.clone(),
        }
    }
}

/// Classify with the default markers
pub fn classify(identifier: &str, outcome: &RunOutcome, tables: &ClassificationTables) -> Category {
    classify_with(identifier, outcome, tables, &Markers::default())
}

/// Classify a single run outcome
///
/// Total over every `RunOutcome`: an outcome without an exit status is
/// treated as timed out, since it never finished.
pub fn classify_with(
    identifier: &str,
    outcome: &RunOutcome,
    tables: &ClassificationTables,
    markers: &Markers,
) -> Category {
    let status = match (outcome.timed_out, outcome.exit_status) {
        (true, _) | (false, None) => return Category::Timeout,
        (false, Some(status)) => status,
    };

    if status == markers.fatal_exit_status {
        if contains_ignore_ascii_case(&outcome.stderr, markers.abort_marker.as_bytes()) {
            Category::Abort
        } else {
            Category::Crash
        }
    } else if status != 0 {
        if tables.is_platform_quirk(identifier) {
            Category::MuslIssue
        } else {
            Category::Failed
        }
    } else if contains(&outcome.stdout, markers.skip_marker.as_bytes()) {
        Category::Skipped
    } else {
        Category::Ok
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|window| window == needle)
}

fn contains_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty()
        || haystack
            .windows(needle.len())
            .any(|window| window.eq_ignore_ascii_case(needle))
}
