use crate::types::{BatchResult, Category, Identifier, LaunchError, ReportIndex};
use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use uuid::Uuid;

// Results file semantics - shared by the runner (writer) and the CLI
// (reader) so the two never drift

/// One identifier's persisted result
/// Captured streams are base64 since they are arbitrary bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub identifier: Identifier,
    pub category: Category,
    pub exit_status: Option<i32>,
    pub timed_out: bool,
    pub elapsed_ms: u64,
    pub stdout_b64: String,
    pub stderr_b64: String,
}

impl StoredEntry {
    pub fn stdout(&self) -> Result<Vec<u8>> {
        general_purpose::STANDARD
            .decode(&self.stdout_b64)
            .with_context(|| format!("Invalid stdout encoding for {}", self.identifier))
    }

    pub fn stderr(&self) -> Result<Vec<u8>> {
        general_purpose::STANDARD
            .decode(&self.stderr_b64)
            .with_context(|| format!("Invalid stderr encoding for {}", self.identifier))
    }
}

/// A finished batch as written by `--results`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub jobs: usize,
    pub entries: Vec<StoredEntry>,
    pub launch_errors: Vec<LaunchError>,
}

impl StoredRun {
    pub fn from_batch(
        batch: &BatchResult,
        command: &[String],
        timeout_secs: u64,
        jobs: usize,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let entries = batch
            .entries
            .iter()
            .map(|(identifier, (category, outcome))| StoredEntry {
                identifier: identifier.clone(),
                category: *category,
                exit_status: outcome.exit_status,
                timed_out: outcome.timed_out,
                elapsed_ms: outcome.elapsed.as_millis() as u64,
                stdout_b64: general_purpose::STANDARD.encode(&outcome.stdout),
                stderr_b64: general_purpose::STANDARD.encode(&outcome.stderr),
            })
            .collect();

        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at,
            command: command.to_vec(),
            timeout_secs,
            jobs,
            entries,
            launch_errors: batch.launch_errors.clone(),
        }
    }

    pub fn index(&self) -> ReportIndex {
        self.entries
            .iter()
            .map(|entry| (entry.category, entry.identifier.clone()))
            .collect()
    }

    pub fn categories(&self) -> BTreeMap<&str, Category> {
        self.entries
            .iter()
            .map(|entry| (entry.identifier.as_str(), entry.category))
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize run results")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }
}

/// How one identifier's category differs between two runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryChange {
    pub identifier: Identifier,
    pub before: Option<Category>,
    pub after: Option<Category>,
}

/// Identifiers whose category changed, appeared or disappeared
/// Sorted by identifier
pub fn compare_runs(old: &StoredRun, new: &StoredRun) -> Vec<CategoryChange> {
    let before = old.categories();
    let after = new.categories();

    let mut identifiers: Vec<&str> = before.keys().chain(after.keys()).copied().collect();
    identifiers.sort_unstable();
    identifiers.dedup();

    identifiers
        .into_iter()
        .filter_map(|identifier| {
            let was = before.get(identifier).copied();
            let now = after.get(identifier).copied();
            (was != now).then(|| CategoryChange {
                identifier: identifier.to_string(),
                before: was,
                after: now,
            })
        })
        .collect()
}
