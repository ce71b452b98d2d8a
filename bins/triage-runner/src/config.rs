// Runtime settings for the runner: config file, then environment, then flags
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use triage_common::config::{HarnessConfig, LaunchFailurePolicy, DEFAULT_CONFIG_PATH};
use tracing::info;

pub const ENV_CONFIG: &str = "TRIAGE_CONFIG";
pub const ENV_JOBS: &str = "TRIAGE_JOBS";
pub const ENV_TIMEOUT_SECS: &str = "TRIAGE_TIMEOUT_SECS";
pub const ENV_TEST_DIR: &str = "TRIAGE_TEST_DIR";

/// Command-line overrides, highest precedence
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub jobs: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub test_dir: Option<String>,
    pub bypass_known_timeouts: bool,
    pub fail_fast: bool,
}

/// Load the config file and apply environment and CLI overrides
pub fn load_settings(config_path: Option<&Path>, overrides: &Overrides) -> Result<HarnessConfig> {
    let (mut config, from_file) = HarnessConfig::load_or_default(config_path)?;
    if from_file {
        let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        info!(path = %path.display(), "Loaded harness config");
    } else {
        info!("No config file found, using built-in defaults");
    }

    apply_env(&mut config, |key| std::env::var(key).ok())?;
    apply_overrides(&mut config, overrides);
    config.validate().context("Invalid harness configuration")?;

    Ok(config)
}

/// Apply `TRIAGE_*` variables; `lookup` is injectable for tests
pub fn apply_env<F>(config: &mut HarnessConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(jobs) = lookup(ENV_JOBS) {
        config.jobs = jobs.trim().parse().with_context(|| {
            format!("{} must be a non-negative integer, got {:?}", ENV_JOBS, jobs)
        })?;
    }
    if let Some(timeout) = lookup(ENV_TIMEOUT_SECS) {
        config.timeout_secs = timeout.trim().parse().with_context(|| {
            format!("{} must be a whole number of seconds, got {:?}", ENV_TIMEOUT_SECS, timeout)
        })?;
    }
    if let Some(dir) = lookup(ENV_TEST_DIR) {
        config.test_dir = dir;
    }
    Ok(())
}

pub fn apply_overrides(config: &mut HarnessConfig, overrides: &Overrides) {
    if let Some(jobs) = overrides.jobs {
        config.jobs = jobs;
    }
    if let Some(timeout) = overrides.timeout_secs {
        config.timeout_secs = timeout;
    }
    if let Some(dir) = &overrides.test_dir {
        config.test_dir = dir.clone();
    }
    if overrides.bypass_known_timeouts {
        config.bypass_known_timeouts = true;
    }
    if overrides.fail_fast {
        config.launch_failure = LaunchFailurePolicy::FailFast;
    }
}

/// `0` means one worker per available CPU
pub fn resolve_pool_size(jobs: usize) -> usize {
    if jobs > 0 {
        return jobs;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

pub fn timeout(config: &HarnessConfig) -> Duration {
    Duration::from_secs(config.timeout_secs)
}
