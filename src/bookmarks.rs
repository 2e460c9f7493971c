use serde::{Deserialize, Serialize};

/// Category assigned when a batch could not be classified
pub const UNCATEGORIZED: &str = "未整理";

/// URL schemes that never navigate anywhere and are dropped at parse time
const NON_NAVIGABLE_SCHEMES: &[&str] = &["javascript:", "place:"];

/// One link from an exported bookmark file.
///
/// `url` is unique within a parse run. `category` stays `None` until the
/// orchestrator assigns one, after which the record is never mutated again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkRecord {
    pub title: String,
    pub url: String,
    /// Slash-joined folder ancestry in the source file. Informational only.
    #[serde(default)]
    pub folder_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl BookmarkRecord {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            folder_path: String::new(),
            add_date: None,
            icon: None,
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn uncategorized(self) -> Self {
        self.with_category(UNCATEGORIZED)
    }

    /// Category value used downstream. Absent categories, and those with no
    /// non-empty path segment (`""`, `"/"`, `" / "`), read as the sentinel.
    pub fn effective_category(&self) -> &str {
        self.category
            .as_deref()
            .filter(|c| c.split('/').any(|segment| !segment.trim().is_empty()))
            .unwrap_or(UNCATEGORIZED)
    }

    pub fn is_uncategorized(&self) -> bool {
        self.effective_category() == UNCATEGORIZED
    }
}

/// Check whether a URL is worth keeping (not a bookmarklet or a Firefox smart folder)
pub fn is_navigable(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    !lower.is_empty() && !NON_NAVIGABLE_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
}

/// Projection of a record sent to the classification service.
/// Icons and add-dates are stripped, they only inflate the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationInput {
    pub title: String,
    pub url: String,
    pub folder_path: String,
}

impl From<&BookmarkRecord> for ClassificationInput {
    fn from(record: &BookmarkRecord) -> Self {
        Self {
            title: record.title.clone(),
            url: record.url.clone(),
            folder_path: record.folder_path.clone(),
        }
    }
}

/// Distinct categories in first-seen order, without the sentinel
pub fn known_categories(records: &[BookmarkRecord]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    records
        .iter()
        .map(BookmarkRecord::effective_category)
        .filter(|c| *c != UNCATEGORIZED)
        .filter(|c| seen.insert(*c))
        .map(str::to_string)
        .collect()
}
