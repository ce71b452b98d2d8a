use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

/// Name of one test case, e.g. `test_os`
pub type Identifier = String;

/// Classification bucket for a single run
///
/// Variant order is the order groups appear in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "skipped")]
    Skipped,
    #[serde(rename = "musl issue")]
    MuslIssue,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "timeout")]
    Timeout,
    #[serde(rename = "crash")]
    Crash,
    #[serde(rename = "abort")]
    Abort,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Ok,
        Category::Skipped,
        Category::MuslIssue,
        Category::Failed,
        Category::Timeout,
        Category::Crash,
        Category::Abort,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Ok => "ok",
            Category::Skipped => "skipped",
            Category::MuslIssue => "musl issue",
            Category::Failed => "failed",
            Category::Timeout => "timeout",
            Category::Crash => "crash",
            Category::Abort => "abort",
        }
    }

    /// `ok` and `skipped` are the only categories of a clean run
    pub fn is_success(&self) -> bool {
        matches!(self, Category::Ok | Category::Skipped)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw result of executing one identifier's command once
/// Produced by the runner, consumed by the classifier
///
/// `exit_status` is `None` exactly when `timed_out` is set. Use the
/// constructors to keep that pairing intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub identifier: Identifier,
    pub exit_status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
    pub timed_out: bool,
}

impl RunOutcome {
    /// Outcome of a child that exited on its own
    pub fn exited(
        identifier: impl Into<Identifier>,
        exit_status: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        elapsed: Duration,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            exit_status: Some(exit_status),
            stdout,
            stderr,
            elapsed,
            timed_out: false,
        }
    }

    /// Outcome of a child that was killed at the deadline
    /// Partial output is not kept.
    pub fn timed_out(identifier: impl Into<Identifier>, elapsed: Duration) -> Self {
        Self {
            identifier: identifier.into(),
            exit_status: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            elapsed,
            timed_out: true,
        }
    }
}

/// Static membership lists consulted during classification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationTables {
    /// Identifiers whose nonzero exit is downgraded to `musl issue`
    pub platform_quirks: HashSet<Identifier>,
    /// Identifiers expected to exceed the timeout
    pub known_timeouts: HashSet<Identifier>,
}

impl ClassificationTables {
    pub fn new<I, J>(platform_quirks: I, known_timeouts: J) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Identifier>,
        J: IntoIterator,
        J::Item: Into<Identifier>,
    {
        Self {
            platform_quirks: platform_quirks.into_iter().map(Into::into).collect(),
            known_timeouts: known_timeouts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_platform_quirk(&self, identifier: &str) -> bool {
        self.platform_quirks.contains(identifier)
    }

    pub fn is_known_timeout(&self, identifier: &str) -> bool {
        self.known_timeouts.contains(identifier)
    }
}

/// Category -> identifiers, in the order they were reported
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportIndex {
    groups: BTreeMap<Category, Vec<Identifier>>,
}

impl ReportIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, category: Category, identifier: impl Into<Identifier>) {
        self.groups.entry(category).or_default().push(identifier.into());
    }

    /// Identifiers of one category, sorted for rendering
    pub fn sorted(&self, category: Category) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .groups
            .get(&category)
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub fn count(&self, category: Category) -> usize {
        self.groups.get(&category).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// True when every recorded identifier is `ok` or `skipped`
    pub fn is_clean(&self) -> bool {
        self.groups
            .iter()
            .all(|(category, ids)| category.is_success() || ids.is_empty())
    }
}

impl FromIterator<(Category, Identifier)> for ReportIndex {
    fn from_iter<T: IntoIterator<Item = (Category, Identifier)>>(iter: T) -> Self {
        let mut index = ReportIndex::new();
        for (category, identifier) in iter {
            index.insert(category, identifier);
        }
        index
    }
}

/// A child process that could not be started at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchError {
    pub identifier: Identifier,
    pub message: String,
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.identifier, self.message)
    }
}

/// Everything a batch produced: one entry per identifier that ran, plus
/// the identifiers whose command never started
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub entries: BTreeMap<Identifier, (Category, RunOutcome)>,
    pub launch_errors: Vec<LaunchError>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn category_of(&self, identifier: &str) -> Option<Category> {
        self.entries.get(identifier).map(|(category, _)| *category)
    }

    /// Group entries by category for reporting
    pub fn index(&self) -> ReportIndex {
        self.entries
            .iter()
            .map(|(identifier, (category, _))| (*category, identifier.clone()))
            .collect()
    }
}
