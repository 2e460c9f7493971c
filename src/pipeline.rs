//! Parse → categorize → export, plus status, reset and retry
//!
//! Each step reads its input from the store and writes its output back, so
//! the steps can run in separate processes.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bookmarks::BookmarkRecord;
use crate::classifier::Classifier;
use crate::config::AppConfig;
use crate::error::ExportError;
use crate::orchestrator::{BatchOrchestrator, RetrySummary, RunOutcome};
use crate::parser;
use crate::report::StatusReport;
use crate::serializer;
use crate::state::PipelineState;
use crate::store::{FileStore, KeyValueStore, PipelineStore};
use crate::tree::CategoryTree;

pub const DEFAULT_EXPORT_FILE: &str = "categorized_bookmarks.html";

#[derive(Debug, PartialEq, Eq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub records: usize,
    pub top_level_categories: usize,
}

pub struct CategorizerEngine<S: KeyValueStore> {
    store: PipelineStore<S>,
}

impl CategorizerEngine<FileStore> {
    /// Engine over the state directory (`$HOME/.bookmark-categorizer` unless given)
    pub fn open(state_dir: Option<PathBuf>) -> Result<Self> {
        let dir = match state_dir {
            Some(dir) => dir,
            None => FileStore::default_dir().context("HOME is not set, pass --state-dir")?,
        };
        let store = FileStore::new(dir);
        info!("💾 State directory: {:?}", store.dir());
        Ok(Self::new(store))
    }
}

impl<S: KeyValueStore> CategorizerEngine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: PipelineStore::new(store),
        }
    }

    pub fn store(&self) -> &PipelineStore<S> {
        &self.store
    }

    /// Stored configuration with environment overrides applied
    pub fn config(&self) -> Result<AppConfig> {
        let config = self.store.load_config()?.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        config.validate()?;
        self.store.save_config(config)?;
        info!("✅ Configuration saved");
        Ok(())
    }

    pub fn reset_config(&self) -> Result<()> {
        self.store.clear_config()?;
        info!("✅ Configuration reset to defaults");
        Ok(())
    }

    /// Parse a bookmark export and start a new run over it
    pub fn parse_file(&self, path: &Path) -> Result<usize> {
        let records = parser::parse_file(path)?;
        self.start_run(&records)?;
        Ok(records.len())
    }

    /// Store a fresh snapshot; any earlier categorization no longer applies
    pub fn start_run(&self, records: &[BookmarkRecord]) -> Result<()> {
        self.store.save_parsed(records)?;
        self.store.clear_categorized()?;
        self.store.save_state(&PipelineState::parsed(records.len()))?;
        Ok(())
    }

    /// Categorize the parsed snapshot, resuming any unfinished run
    pub async fn categorize<C, F>(
        &self,
        classifier: &C,
        batch_size: usize,
        cancel: Option<Arc<AtomicBool>>,
        on_progress: F,
    ) -> Result<RunOutcome>
    where
        C: Classifier,
        F: FnMut(usize, usize),
    {
        let parsed = self
            .store
            .load_parsed()?
            .context("No parsed bookmarks, run `parse --file <bookmarks.html>` first")?;

        let mut orchestrator = BatchOrchestrator::new(classifier, &self.store, batch_size)?;
        if let Some(flag) = cancel {
            orchestrator = orchestrator.with_cancel_flag(flag);
        }
        orchestrator.run(&parsed, on_progress).await
    }

    /// Re-classify the records that ended up in the sentinel category
    pub async fn retry<C, F>(
        &self,
        classifier: &C,
        batch_size: usize,
        cancel: Option<Arc<AtomicBool>>,
        on_progress: F,
    ) -> Result<RetrySummary>
    where
        C: Classifier,
        F: FnMut(usize, usize),
    {
        let mut orchestrator = BatchOrchestrator::new(classifier, &self.store, batch_size)?;
        if let Some(flag) = cancel {
            orchestrator = orchestrator.with_cancel_flag(flag);
        }
        orchestrator.retry_uncategorized(on_progress).await
    }

    /// Write the categorized bookmarks as a Netscape bookmark file.
    ///
    /// On success the pipeline state is cleared unless `keep_state`; the
    /// snapshots stay so the export can be repeated.
    pub fn export(&self, output: &Path, keep_state: bool) -> Result<ExportSummary, ExportError> {
        let categorized = self.store.load_categorized()?.unwrap_or_default();
        if let Some(state) = self.store.load_state()? {
            if state.is_resumable() && state.processed_count < state.total_count {
                warn!(
                    "⚠️  Exporting a partial run: {}/{} bookmarks categorized",
                    state.processed_count, state.total_count
                );
            }
        }

        let tree = CategoryTree::build(categorized).ok_or(ExportError::NothingToExport)?;
        let records = tree.record_count();
        let html = serializer::render_now(&tree);

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ExportError::Write {
                path: output.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(output, html).map_err(|source| ExportError::Write {
            path: output.to_path_buf(),
            source,
        })?;

        if !keep_state {
            self.store.clear_state()?;
        }

        info!("✅ Exported {} bookmarks to {:?}", records, output);
        Ok(ExportSummary {
            path: output.to_path_buf(),
            records,
            top_level_categories: tree.children.len(),
        })
    }

    pub fn status(&self) -> Result<StatusReport> {
        let state = self.store.load_state()?;
        let parsed = self.store.load_parsed()?;
        let categorized = self.store.load_categorized()?;
        Ok(StatusReport::new(state, parsed.as_deref(), categorized.as_deref()))
    }

    /// Records currently filed under the sentinel category
    pub fn uncategorized(&self) -> Result<Vec<BookmarkRecord>> {
        Ok(self
            .store
            .load_categorized()?
            .unwrap_or_default()
            .into_iter()
            .filter(BookmarkRecord::is_uncategorized)
            .collect())
    }

    /// Start new: forget the run, keep the configuration
    pub fn reset(&self) -> Result<()> {
        self.store.start_new()?;
        info!("🗑️  Cleared pipeline state and bookmark snapshots");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::mock::MockClassifier;
    use crate::state::Stage;
    use crate::store::memory::MemoryStore;

    const SAMPLE: &str = r#"<!DOCTYPE NETSCAPE-Bookmark-file-1>
<TITLE>Bookmarks</TITLE>
<DL><p>
    <DT><H3>Dev</H3>
    <DL><p>
        <DT><A HREF="https://rust-lang.org" ADD_DATE="1700000000">Rust</A>
        <DT><A HREF="https://go.dev">Go</A>
    </DL><p>
    <DT><A HREF="https://news.ycombinator.com">HN</A>
</DL><p>
"#;

    fn engine() -> CategorizerEngine<MemoryStore> {
        CategorizerEngine::new(MemoryStore::default())
    }

    fn parse_sample(engine: &CategorizerEngine<MemoryStore>) {
        let records = parser::parse_bookmarks(SAMPLE).unwrap();
        engine.start_run(&records).unwrap();
    }

    #[tokio::test]
    async fn test_parse_categorize_export() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bookmarks.html");
        std::fs::write(&input, SAMPLE).unwrap();

        let engine = engine();
        assert_eq!(engine.parse_file(&input).unwrap(), 3);
        assert_eq!(engine.store().load_state().unwrap().unwrap().stage, Stage::Parsed);

        let classifier = MockClassifier::default();
        let outcome = engine.categorize(&classifier, 2, None, |_, _| {}).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(ref r) if r.len() == 3));

        let output = dir.path().join("out/categorized.html");
        let summary = engine.export(&output, false).unwrap();
        assert_eq!(summary.records, 3);
        assert_eq!(summary.top_level_categories, 1);

        let html = std::fs::read_to_string(&output).unwrap();
        assert!(html.starts_with("<!DOCTYPE NETSCAPE-Bookmark-file-1>"));
        assert!(html.contains("<H3 ADD_DATE="));
        assert!(html.contains(">Cat</H3>"));
        assert!(html.contains("HREF=\"https://rust-lang.org\" ADD_DATE=\"1700000000\""));

        assert!(engine.store().load_state().unwrap().is_none());
        assert!(engine.store().load_categorized().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_categorize_requires_parse() {
        let engine = engine();
        let classifier = MockClassifier::default();
        let err = engine.categorize(&classifier, 2, None, |_, _| {}).await.unwrap_err();
        assert!(err.to_string().contains("parse"));
    }

    #[test]
    fn test_export_without_categorized_fails() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine();
        parse_sample(&engine);
        assert!(matches!(
            engine.export(&dir.path().join("x.html"), false),
            Err(ExportError::NothingToExport)
        ));
        assert!(!dir.path().join("x.html").exists());
    }

    #[tokio::test]
    async fn test_export_keep_state() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine();
        parse_sample(&engine);
        engine
            .categorize(&MockClassifier::default(), 10, None, |_, _| {})
            .await
            .unwrap();

        engine.export(&dir.path().join("x.html"), true).unwrap();
        assert_eq!(engine.store().load_state().unwrap().unwrap().stage, Stage::Categorized);
    }

    #[tokio::test]
    async fn test_reparse_discards_previous_progress() {
        let engine = engine();
        parse_sample(&engine);
        engine
            .categorize(&MockClassifier::default(), 1, None, |_, _| {})
            .await
            .unwrap();

        parse_sample(&engine);
        assert!(engine.store().load_categorized().unwrap().is_none());
        let state = engine.store().load_state().unwrap().unwrap();
        assert_eq!(state, PipelineState::parsed(3));
    }

    #[tokio::test]
    async fn test_uncategorized_and_retry() {
        let engine = engine();
        parse_sample(&engine);
        engine
            .categorize(&MockClassifier::failing_on(&[1]), 2, None, |_, _| {})
            .await
            .unwrap();

        let pending = engine.uncategorized().unwrap();
        assert_eq!(pending.len(), 2);
        assert!(engine.status().unwrap().format(true).contains("Uncategorized: 2"));

        let summary = engine
            .retry(&MockClassifier::default(), 5, None, |_, _| {})
            .await
            .unwrap();
        assert_eq!(summary.recovered, 2);
        assert!(engine.uncategorized().unwrap().is_empty());
    }

    #[test]
    fn test_blank_path_category_is_listed_as_uncategorized() {
        let engine = engine();
        engine
            .store()
            .save_categorized(&[
                BookmarkRecord::new("A", "http://a").with_category("/"),
                BookmarkRecord::new("B", "http://b").with_category("Dev"),
            ])
            .unwrap();

        let pending = engine.uncategorized().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url, "http://a");

        let report = engine.status().unwrap();
        assert_eq!(report.uncategorized_count(), 1);
    }

    #[test]
    fn test_reset_keeps_config() {
        let engine = engine();
        let config = AppConfig {
            batch_size: 7,
            ..Default::default()
        };
        engine.save_config(&config).unwrap();
        parse_sample(&engine);

        engine.reset().unwrap();
        assert!(engine.store().load_parsed().unwrap().is_none());
        assert!(engine.store().load_state().unwrap().is_none());
        assert_eq!(engine.store().load_config().unwrap().batch_size, 7);
    }

    #[test]
    fn test_invalid_config_not_saved() {
        let engine = engine();
        let config = AppConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(engine.save_config(&config).is_err());
        assert_eq!(engine.store().load_config().unwrap(), AppConfig::default());
    }
}
