//! Keyword routing of free-text tasks to an executor category.

use conductor_types::agent::TaskCategory;

/// Checked in order; the first category with a matching keyword wins.
const ROUTES: &[(TaskCategory, &[&str])] = &[
    (TaskCategory::Email, &["email", "mail", "send message"]),
    (
        TaskCategory::Web,
        &["web", "browser", "search", "scrape", "website", "url", "http"],
    ),
    (
        TaskCategory::System,
        &["file", "folder", "directory", "screenshot", "system", "terminal", "process"],
    ),
];

/// Classify `task` by case-insensitive substring match.
pub fn classify_task(task: &str) -> TaskCategory {
    let lower = task.to_lowercase();
    ROUTES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(TaskCategory::General)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_category_has_a_keyword_hit() {
        assert_eq!(classify_task("Email the weekly report"), TaskCategory::Email);
        assert_eq!(classify_task("send message to ops"), TaskCategory::Email);
        assert_eq!(classify_task("scrape prices from the shop"), TaskCategory::Web);
        assert_eq!(classify_task("open https://example.com"), TaskCategory::Web);
        assert_eq!(classify_task("Take a SCREENSHOT"), TaskCategory::System);
        assert_eq!(classify_task("list the downloads folder"), TaskCategory::System);
        assert_eq!(classify_task("summarise the meeting"), TaskCategory::General);
        assert_eq!(classify_task(""), TaskCategory::General);
    }

    #[test]
    fn earlier_category_wins_on_overlap() {
        // "mail" and "file" both match; email is checked first.
        assert_eq!(classify_task("mail the log file"), TaskCategory::Email);
        // "search" (web) beats "directory" (system).
        assert_eq!(classify_task("search the directory listing"), TaskCategory::Web);
    }
}
