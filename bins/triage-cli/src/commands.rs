// CLI commands for managing triage runs
use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use triage_common::config::{HarnessConfig, DEFAULT_CONFIG_PATH};
use triage_common::report;
use triage_common::store::{compare_runs, CategoryChange, StoredRun};
use triage_common::types::Category;

/// Initialize a project directory with the default harness config
pub async fn init_project(path: &str) -> Result<()> {
    println!("🚀 Initializing triage project at: {}", path);

    let project_path = Path::new(path);
    let config_path = project_path.join(DEFAULT_CONFIG_PATH);

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    if config_path.exists() {
        println!("  ⏭️  Kept existing: {}", DEFAULT_CONFIG_PATH);
    } else {
        let json_content = HarnessConfig::default().to_pretty_json()?;
        fs::write(&config_path, json_content)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("  ✅ Created: {}", DEFAULT_CONFIG_PATH);
    }

    println!("✅ Project initialized successfully!");
    println!("\n📋 Next steps:");
    println!("  1. Point \"command\" and \"test_dir\" in {} at your build", DEFAULT_CONFIG_PATH);
    println!("  2. Run: triage-runner --jobs 0 --results results.json");
    println!("  3. Inspect: triage-cli show results.json");

    Ok(())
}

/// Re-render the report of a stored run
pub async fn show_results(path: &str, identifier: Option<&str>) -> Result<()> {
    let run = StoredRun::load(Path::new(path))?;

    if let Some(identifier) = identifier {
        return show_entry(&run, identifier);
    }

    let duration = run.finished_at - run.started_at;
    println!("📋 Run {}", run.run_id);
    println!("  Started:  {}", run.started_at.to_rfc3339());
    println!("  Duration: {:.1}s", duration.num_milliseconds() as f64 / 1000.0);
    println!("  Command:  {}", run.command.join(" "));
    println!("  Timeout:  {}s, jobs: {}", run.timeout_secs, run.jobs);

    print!("{}", report::render_markdown(&run.index(), &run.launch_errors));

    Ok(())
}

/// Dump the captured streams of one identifier
fn show_entry(run: &StoredRun, identifier: &str) -> Result<()> {
    let Some(entry) = run.entries.iter().find(|e| e.identifier == identifier) else {
        if let Some(error) = run.launch_errors.iter().find(|e| e.identifier == identifier) {
            println!("{}: launch error", identifier);
            println!("{}", error.message);
            return Ok(());
        }
        bail!("'{}' is not part of run {}", identifier, run.run_id);
    };

    println!(
        "{}: {} (exit status: {}, {:.1}s)",
        entry.identifier,
        entry.category,
        entry
            .exit_status
            .map_or_else(|| "none".to_string(), |s| s.to_string()),
        entry.elapsed_ms as f64 / 1000.0
    );

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "\n── stdout ──")?;
    stdout.write_all(&entry.stdout()?)?;
    writeln!(stdout, "\n── stderr ──")?;
    stdout.write_all(&entry.stderr()?)?;
    writeln!(stdout)?;

    Ok(())
}

/// List identifiers whose category changed between two stored runs
pub async fn compare_results(old_path: &str, new_path: &str) -> Result<()> {
    let old = StoredRun::load(Path::new(old_path))?;
    let new = StoredRun::load(Path::new(new_path))?;

    let changes = compare_runs(&old, &new);
    if changes.is_empty() {
        println!("✅ No category changes between {} and {}", old.run_id, new.run_id);
        return Ok(());
    }

    println!("{:<32} {:<12} {:<12}", "Test", "Before", "After");
    println!("{}", "─".repeat(58));
    for line in format_changes(&changes) {
        println!("{}", line);
    }

    let regressions = changes.iter().filter(|c| is_regression(c)).count();
    println!("\n📊 {} change(s), {} regression(s)", changes.len(), regressions);

    Ok(())
}

fn label(category: Option<Category>) -> &'static str {
    category.map_or("-", |c| c.as_str())
}

/// A test that used to pass or skip and no longer does
fn is_regression(change: &CategoryChange) -> bool {
    matches!(
        (change.before, change.after),
        (Some(before), Some(after)) if before.is_success() && !after.is_success()
    )
}

fn format_changes(changes: &[CategoryChange]) -> Vec<String> {
    changes
        .iter()
        .map(|change| {
            let marker = if is_regression(change) { "  ⚠" } else { "" };
            format!(
                "{:<32} {:<12} {:<12}{}",
                change.identifier,
                label(change.before),
                label(change.after),
                marker
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(id: &str, before: Option<Category>, after: Option<Category>) -> CategoryChange {
        CategoryChange {
            identifier: id.to_string(),
            before,
            after,
        }
    }

    #[test]
    fn test_regression_detection() {
        assert!(is_regression(&change("t", Some(Category::Ok), Some(Category::Crash))));
        assert!(is_regression(&change("t", Some(Category::Skipped), Some(Category::Failed))));
        assert!(!is_regression(&change("t", Some(Category::Failed), Some(Category::Ok))));
        assert!(!is_regression(&change("t", Some(Category::Failed), Some(Category::Crash))));
        assert!(!is_regression(&change("t", None, Some(Category::Failed))));
    }

    #[test]
    fn test_format_changes_marks_regressions() {
        let lines = format_changes(&[
            change("test_os", Some(Category::Ok), Some(Category::MuslIssue)),
            change("test_new", None, Some(Category::Ok)),
        ]);
        assert!(lines[0].starts_with("test_os"));
        assert!(lines[0].contains("musl issue"));
        assert!(lines[0].ends_with('⚠'));
        assert!(lines[1].contains(" - "));
        assert!(!lines[1].contains('⚠'));
    }

    #[tokio::test]
    async fn test_init_writes_default_config_once() {
        let dir = std::env::temp_dir().join(format!("triage-init-{}", uuid::Uuid::new_v4()));
        let dir_str = dir.to_string_lossy().to_string();

        init_project(&dir_str).await.unwrap();
        let config_path = dir.join(DEFAULT_CONFIG_PATH);
        let loaded = HarnessConfig::load(&config_path).unwrap();
        assert_eq!(loaded, HarnessConfig::default());

        // A second init leaves edits alone
        fs::write(&config_path, r#"{"jobs": 12}"#).unwrap();
        init_project(&dir_str).await.unwrap();
        assert_eq!(HarnessConfig::load(&config_path).unwrap().jobs, 12);

        fs::remove_dir_all(&dir).unwrap();
    }
}
