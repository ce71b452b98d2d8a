/// Grouped Markdown report
///
/// One section per category in fixed order, each with a count header and
/// the sorted identifiers on a single line. Empty categories still get a
/// header so counts are always visible.
use crate::types::{Category, LaunchError, ReportIndex};
use std::fmt::Write;

const BANNER_WIDTH: usize = 40;

pub fn render_markdown(index: &ReportIndex, launch_errors: &[LaunchError]) -> String {
    let mut out = String::new();

    // Writing into a String cannot fail
    let _ = writeln!(out, "\n\n## {}", "*".repeat(BANNER_WIDTH));
    let _ = writeln!(out, "# **Results**");

    for category in Category::ALL {
        let ids = index.sorted(category);
        let _ = writeln!(out, "## **{} ({})**", category, ids.len());
        let _ = writeln!(out, "``");
        let _ = writeln!(out, "{}", ids.join(" "));
        let _ = writeln!(out, "``");
        let _ = writeln!(out);
    }

    if !launch_errors.is_empty() {
        let mut errors: Vec<&LaunchError> = launch_errors.iter().collect();
        errors.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        let _ = writeln!(out, "## **launch error ({})**", errors.len());
        let _ = writeln!(out, "``");
        for error in errors {
            let _ = writeln!(out, "{}", error);
        }
        let _ = writeln!(out, "``");
        let _ = writeln!(out);
    }

    out
}

/// One-line tally, e.g. `ok=3 skipped=1 failed=2`
pub fn summary_line(index: &ReportIndex) -> String {
    Category::ALL
        .iter()
        .filter(|category| index.count(**category) > 0)
        .map(|category| {
            format!("{}={}", category.as_str().replace(' ', "_"), index.count(*category))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> ReportIndex {
        vec![
            (Category::Ok, "test_int".to_string()),
            (Category::Ok, "test_bool".to_string()),
            (Category::MuslIssue, "test_os".to_string()),
            (Category::Crash, "test_uuid".to_string()),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_groups_in_fixed_order_with_counts() {
        let report = render_markdown(&sample_index(), &[]);

        let headers: Vec<&str> = report
            .lines()
            .filter(|l| l.starts_with("## **") && l.ends_with(")**"))
            .collect();
        assert_eq!(
            headers,
            vec![
                "## **ok (2)**",
                "## **skipped (0)**",
                "## **musl issue (1)**",
                "## **failed (0)**",
                "## **timeout (0)**",
                "## **crash (1)**",
                "## **abort (0)**",
            ]
        );
        assert!(report.contains("# **Results**"));
        assert!(report.contains(&format!("## {}", "*".repeat(BANNER_WIDTH))));
    }

    #[test]
    fn test_identifiers_sorted_within_group() {
        let report = render_markdown(&sample_index(), &[]);
        assert!(report.contains("``\ntest_bool test_int\n``"));
    }

    #[test]
    fn test_launch_errors_rendered_after_categories() {
        let errors = vec![LaunchError {
            identifier: "test_a".to_string(),
            message: "No such file or directory".to_string(),
        }];
        let report = render_markdown(&sample_index(), &errors);

        let abort_pos = report.find("## **abort").unwrap();
        let error_pos = report.find("## **launch error (1)**").unwrap();
        assert!(error_pos > abort_pos);
        assert!(report.contains("test_a: No such file or directory"));
    }

    #[test]
    fn test_summary_line_skips_empty_groups() {
        assert_eq!(summary_line(&sample_index()), "ok=2 musl_issue=1 crash=1");
        assert_eq!(summary_line(&ReportIndex::new()), "");
    }
}
