// Test case discovery
use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use triage_common::types::Identifier;
use tracing::debug;

/// Which directory entries count as test cases
#[derive(Debug, Clone)]
pub struct DiscoveryRules {
    /// Entry names must start with this, e.g. `test_`
    pub prefix: String,
    /// Files must carry this extension (without the dot); packages
    /// (directories) match on prefix alone
    pub extension: String,
}

impl DiscoveryRules {
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    fn identifier_for(&self, name: &str, is_dir: bool) -> Option<Identifier> {
        if !name.starts_with(&self.prefix) {
            return None;
        }
        if is_dir {
            return Some(name.to_string());
        }
        if self.extension.is_empty() {
            return Some(name.to_string());
        }
        let (stem, ext) = name.rsplit_once('.')?;
        (ext == self.extension && !stem.is_empty()).then(|| stem.to_string())
    }
}

/// Scan `dir` and return the sorted, de-duplicated identifiers
///
/// `test_foo.py` and a `test_foo/` package both map to `test_foo` and are
/// reported once.
pub fn discover(dir: &Path, rules: &DiscoveryRules) -> Result<Vec<Identifier>> {
    if !dir.is_dir() {
        bail!("Test directory not found: {}", dir.display());
    }

    let mut found = BTreeSet::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;

    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read entry in {}", dir.display()))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            debug!(entry = ?name, "Skipping non UTF-8 entry");
            continue;
        };
        let is_dir = entry
            .file_type()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?
            .is_dir();

        if let Some(identifier) = rules.identifier_for(name, is_dir) {
            found.insert(identifier);
        }
    }

    Ok(found.into_iter().collect())
}

/// Sort and de-duplicate identifiers given on the command line
pub fn from_explicit(identifiers: Vec<String>) -> Vec<Identifier> {
    identifiers
        .into_iter()
        .filter(|id| !id.trim().is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("triage-discovery-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_discovers_modules_and_packages() {
        let dir = scratch_dir();
        fs::write(dir.join("test_os.py"), "").unwrap();
        fs::write(dir.join("test_bool.py"), "").unwrap();
        fs::write(dir.join("test_data.txt"), "").unwrap();
        fs::write(dir.join("support.py"), "").unwrap();
        fs::create_dir(dir.join("test_asyncio")).unwrap();
        fs::create_dir(dir.join("leakers")).unwrap();

        let rules = DiscoveryRules::new("test_", "py");
        let found = discover(&dir, &rules).unwrap();
        assert_eq!(found, vec!["test_asyncio", "test_bool", "test_os"]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_module_and_package_with_same_name_reported_once() {
        let dir = scratch_dir();
        fs::write(dir.join("test_json.py"), "").unwrap();
        fs::create_dir(dir.join("test_json")).unwrap();

        let found = discover(&dir, &DiscoveryRules::new("test_", ".py")).unwrap();
        assert_eq!(found, vec!["test_json"]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_directory_is_not_an_error() {
        let dir = scratch_dir();
        let found = discover(&dir, &DiscoveryRules::new("test_", "py")).unwrap();
        assert!(found.is_empty());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = std::env::temp_dir().join(format!("triage-missing-{}", Uuid::new_v4()));
        assert!(discover(&dir, &DiscoveryRules::new("test_", "py")).is_err());
    }

    #[test]
    fn test_explicit_identifiers_sorted_unique() {
        let ids = from_explicit(vec![
            "test_re".to_string(),
            "test_os".to_string(),
            "test_re".to_string(),
            " ".to_string(),
        ]);
        assert_eq!(ids, vec!["test_os", "test_re"]);
    }
}
