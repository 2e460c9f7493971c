use crate::bookmarks::BookmarkRecord;
use crate::state::PipelineState;
use crate::tree::CategoryTree;

/// Snapshot of where the pipeline stands, for `status`
pub struct StatusReport {
    state: Option<PipelineState>,
    parsed_count: Option<usize>,
    categorized_count: usize,
    top_level: Vec<(String, usize)>,
    category_paths: Vec<String>,
    uncategorized: Vec<(String, String)>,
}

impl StatusReport {
    pub fn new(
        state: Option<PipelineState>,
        parsed: Option<&[BookmarkRecord]>,
        categorized: Option<&[BookmarkRecord]>,
    ) -> Self {
        let categorized = categorized.unwrap_or_default();
        let tree = CategoryTree::build(categorized.iter().cloned()).unwrap_or_default();

        Self {
            state,
            parsed_count: parsed.map(<[BookmarkRecord]>::len),
            categorized_count: categorized.len(),
            top_level: tree.top_level_counts(),
            category_paths: tree.category_paths(),
            uncategorized: categorized
                .iter()
                .filter(|r| r.is_uncategorized())
                .map(|r| (r.title.clone(), r.url.clone()))
                .collect(),
        }
    }

    /// An unfinished run exists and `categorize` would continue it
    pub fn is_resumable(&self) -> bool {
        self.state.as_ref().is_some_and(PipelineState::is_resumable)
    }

    #[cfg(test)]
    pub fn uncategorized_count(&self) -> usize {
        self.uncategorized.len()
    }

    pub fn format(&self, detailed: bool) -> String {
        let mut output = String::new();

        output.push_str("\n📊 Bookmark Categorization Status\n");
        output.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");

        match &self.state {
            Some(state) => {
                output.push_str(&format!("🔖 Stage: {}\n", state.stage.name()));
                output.push_str(&format!(
                    "   Progress: {}/{} bookmarks\n",
                    state.processed_count, state.total_count
                ));
                if self.is_resumable() {
                    output.push_str("   ⏩ Unfinished run, `categorize` resumes it (`reset` starts over)\n");
                }
            }
            None => output.push_str("🔖 Stage: none (run `parse --file <bookmarks.html>`)\n"),
        }
        output.push('\n');

        if let Some(parsed) = self.parsed_count {
            output.push_str(&format!("📖 Parsed bookmarks: {}\n", parsed));
        }
        output.push_str(&format!("🏷️  Categorized bookmarks: {}\n", self.categorized_count));
        output.push('\n');

        if !self.top_level.is_empty() {
            output.push_str("📁 Categories:\n");
            for (name, count) in &self.top_level {
                output.push_str(&format!("  • {}: {}\n", name, count));
            }
            output.push('\n');
        }

        if detailed && !self.category_paths.is_empty() {
            output.push_str("🗂️  Category Paths:\n");
            for path in &self.category_paths {
                output.push_str(&format!("  • {}\n", path));
            }
            output.push('\n');
        }

        if !self.uncategorized.is_empty() {
            output.push_str(&format!("⚠️  Uncategorized: {}\n", self.uncategorized.len()));
            if detailed {
                for (title, url) in &self.uncategorized {
                    output.push_str(&format!("  • {}\n    {}\n", title, url));
                }
            }
            output.push('\n');
        }

        output.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmarks::UNCATEGORIZED;

    fn categorized() -> Vec<BookmarkRecord> {
        vec![
            BookmarkRecord::new("Rust", "https://rust-lang.org").with_category("编程/Rust"),
            BookmarkRecord::new("Go", "https://go.dev").with_category("编程/Go"),
            BookmarkRecord::new("Lost", "http://lost.example").uncategorized(),
        ]
    }

    #[test]
    fn test_empty_report() {
        let report = StatusReport::new(None, None, None);
        assert!(!report.is_resumable());
        let text = report.format(true);
        assert!(text.contains("Stage: none"));
        assert!(text.contains("Categorized bookmarks: 0"));
        assert!(!text.contains("Categories:"));
    }

    #[test]
    fn test_resumable_report() {
        let mut state = PipelineState::parsed(10);
        state.advance(3).unwrap();
        let records = categorized();
        let report = StatusReport::new(Some(state), Some(&records), Some(&records));

        assert!(report.is_resumable());
        assert_eq!(report.uncategorized_count(), 1);
        let text = report.format(false);
        assert!(text.contains("Stage: categorizing"));
        assert!(text.contains("Progress: 3/10"));
        assert!(text.contains("Unfinished run"));
        assert!(text.contains("编程: 2"));
        assert!(text.contains(&format!("{}: 1", UNCATEGORIZED)));
        assert!(!text.contains("http://lost.example"));
    }

    #[test]
    fn test_detailed_lists_paths_and_uncategorized() {
        let mut state = PipelineState::parsed(3);
        state.advance(3).unwrap();
        state.finish().unwrap();
        let records = categorized();
        let report = StatusReport::new(Some(state), None, Some(&records));

        assert!(!report.is_resumable());
        let text = report.format(true);
        assert!(text.contains("编程/Go"));
        assert!(text.contains("编程/Rust"));
        assert!(text.contains("http://lost.example"));
        assert!(!text.contains("Unfinished run"));
    }
}
