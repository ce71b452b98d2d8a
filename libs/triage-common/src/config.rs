// Harness configuration shared by the runner and the CLI
use crate::types::ClassificationTables;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/triage.json";

pub const DEFAULT_FATAL_EXIT_STATUS: i32 = 7;
pub const DEFAULT_ABORT_MARKER: &str = "abort";
pub const DEFAULT_SKIP_MARKER: &str = "test skipped";

/// What to do when a child process cannot be started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchFailurePolicy {
    /// Record the error for that identifier and keep going
    #[default]
    Record,
    /// Stop claiming new identifiers and fail the batch
    FailFast,
}

/// Contents of `config/triage.json`
///
/// Every field is optional in the file; missing fields take the defaults
/// below, which describe a CPython WebAssembly build run under node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Program plus fixed flags; the identifier is appended last
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Worker pool size, 0 means one per CPU
    pub jobs: usize,
    /// Exit status the runtime uses for a fatal fault
    pub fatal_exit_status: i32,
    /// Case-insensitive stderr marker separating abort from crash
    pub abort_marker: String,
    /// Stdout marker of a test that skipped itself
    pub skip_marker: String,
    pub test_dir: String,
    pub test_prefix: String,
    pub test_extension: String,
    pub platform_quirks: Vec<String>,
    pub known_timeouts: Vec<String>,
    /// Record `known_timeouts` as timeouts without running them
    pub bypass_known_timeouts: bool,
    pub launch_failure: LaunchFailurePolicy,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            command: [
                "node",
                "--experimental-wasm-threads",
                "--experimental-wasm-bulk-memory",
                "./python.js",
                "-m",
                "test",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            timeout_secs: 90,
            jobs: 1,
            fatal_exit_status: DEFAULT_FATAL_EXIT_STATUS,
            abort_marker: DEFAULT_ABORT_MARKER.to_string(),
            skip_marker: DEFAULT_SKIP_MARKER.to_string(),
            test_dir: "Lib/test".to_string(),
            test_prefix: "test_".to_string(),
            test_extension: "py".to_string(),
            // musl libc locale/stdio differences
            platform_quirks: [
                "test__locale",
                "test_c_locale_coercion",
                "test_cmd_line",
                "test_gdb",
                "test_locale",
                "test_os",
                "test_posix",
                "test_re",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            // socket + threading hangs
            known_timeouts: ["test_httpservers", "test_logging", "test_xmlrpc"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            bypass_known_timeouts: false,
            launch_failure: LaunchFailurePolicy::Record,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a JSON file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Harness config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: HarnessConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Ok(config)
    }

    /// Load from `path`, or from the default location when no path is given
    ///
    /// A missing default file is not an error, the built-in defaults apply.
    /// Returns whether a file was actually read.
    pub fn load_or_default(path: Option<&Path>) -> Result<(Self, bool)> {
        match path {
            Some(path) => Ok((Self::load(path)?, true)),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Ok((Self::load(default_path)?, true))
                } else {
                    Ok((Self::default(), false))
                }
            }
        }
    }

    /// Reject settings no run could succeed with
    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            bail!("command must name a program");
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be at least 1");
        }
        if self.fatal_exit_status == 0 {
            bail!("fatal_exit_status must be nonzero");
        }
        if self.abort_marker.is_empty() {
            bail!("abort_marker must not be empty");
        }
        if self.skip_marker.is_empty() {
            bail!("skip_marker must not be empty");
        }
        if self.test_prefix.is_empty() && self.test_extension.is_empty() {
            bail!("test_prefix and test_extension cannot both be empty");
        }
        Ok(())
    }

    pub fn tables(&self) -> ClassificationTables {
        ClassificationTables::new(
            self.platform_quirks.iter().cloned(),
            self.known_timeouts.iter().cloned(),
        )
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize harness config")
    }
}
