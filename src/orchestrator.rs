//! Batch orchestration of the classification service
//!
//! Batches run strictly one after another. After every batch, successful or
//! not, the categorized prefix and the pipeline state are persisted, so an
//! interrupted run picks up exactly where it stopped. A failing batch is
//! filed under the sentinel category instead of aborting the run.

use anyhow::{bail, ensure, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::bookmarks::{known_categories, BookmarkRecord, ClassificationInput};
use crate::classifier::{ClassifiedItem, Classifier};
use crate::state::PipelineState;
use crate::store::{KeyValueStore, PipelineStore};

/// Result of one classification call
#[derive(Debug)]
pub enum BatchOutcome {
    Categorized(Vec<BookmarkRecord>),
    Failed(String),
}

impl BatchOutcome {
    /// Categorized records for the batch; a failure files every record under the sentinel
    pub fn into_records(self, batch: &[BookmarkRecord]) -> Vec<BookmarkRecord> {
        match self {
            BatchOutcome::Categorized(records) => records,
            BatchOutcome::Failed(_) => batch.iter().cloned().map(BookmarkRecord::uncategorized).collect(),
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(Vec<BookmarkRecord>),
    /// Stopped at a batch boundary on request; progress up to here is persisted
    Interrupted { processed: usize, total: usize },
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RetrySummary {
    pub attempted: usize,
    pub recovered: usize,
    pub still_uncategorized: usize,
    pub interrupted: bool,
}

pub struct BatchOrchestrator<'a, C, S: KeyValueStore> {
    classifier: &'a C,
    store: &'a PipelineStore<S>,
    batch_size: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a, C: Classifier, S: KeyValueStore> BatchOrchestrator<'a, C, S> {
    pub fn new(classifier: &'a C, store: &'a PipelineStore<S>, batch_size: usize) -> Result<Self> {
        ensure!(batch_size >= 1, "batch size must be at least 1");
        Ok(Self {
            classifier,
            store,
            batch_size,
            cancel: None,
        })
    }

    /// Checked between batches; a call already in flight always completes
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Categorize `records`, resuming after whatever prefix is already persisted.
    ///
    /// `on_progress(processed, total)` is called once at start and after every batch.
    pub async fn run<F>(&self, records: &[BookmarkRecord], mut on_progress: F) -> Result<RunOutcome>
    where
        F: FnMut(usize, usize),
    {
        let total = records.len();
        let mut categorized = self.store.load_categorized()?.unwrap_or_default();
        let resume_point = categorized.len();

        ensure!(
            resume_point <= total,
            "persisted progress has {} records but only {} were parsed; run `reset` and parse again",
            resume_point,
            total
        );
        if let Some(pos) = categorized.iter().zip(records).position(|(done, parsed)| done.url != parsed.url) {
            bail!(
                "persisted progress does not match the parsed bookmarks (first mismatch at #{}); run `reset` and parse again",
                pos + 1
            );
        }

        let mut state = PipelineState::parsed(total);
        state.advance(resume_point)?;
        if resume_point > 0 {
            info!("⏩ Resuming: {}/{} bookmarks already categorized", resume_point, total);
        }
        on_progress(resume_point, total);

        let remaining = &records[resume_point..];
        let total_batches = remaining.len().div_ceil(self.batch_size);
        let mut failed_batches = 0;

        for (index, batch) in remaining.chunks(self.batch_size).enumerate() {
            if self.is_cancelled() {
                info!("🛑 Stopping at batch boundary: {}/{} categorized", categorized.len(), total);
                return Ok(RunOutcome::Interrupted {
                    processed: categorized.len(),
                    total,
                });
            }

            info!("📦 Batch {}/{} ({} bookmarks)", index + 1, total_batches, batch.len());
            let known = known_categories(&categorized);
            let outcome = self.classify_batch(batch, &known).await;
            if let BatchOutcome::Failed(reason) = &outcome {
                failed_batches += 1;
                warn!("⚠️  Batch {} failed, filing {} bookmarks as uncategorized: {}", index + 1, batch.len(), reason);
            }
            categorized.extend(outcome.into_records(batch));

            state.advance(categorized.len())?;
            self.store.save_progress(&categorized, &state)?;
            on_progress(categorized.len(), total);
        }

        state.finish()?;
        self.store.save_state(&state)?;

        if failed_batches > 0 {
            warn!("⚠️  {} of {} batches failed; use `uncategorized` / `retry` to revisit them", failed_batches, total_batches);
        }
        info!("✅ Categorized {} bookmarks", categorized.len());
        Ok(RunOutcome::Completed(categorized))
    }

    /// Re-submit only the sentinel-categorized records of a finished run.
    /// Successful answers replace the sentinel in place; failures leave it.
    pub async fn retry_uncategorized<F>(&self, mut on_progress: F) -> Result<RetrySummary>
    where
        F: FnMut(usize, usize),
    {
        let mut categorized = self.store.load_categorized()?.unwrap_or_default();
        let pending: Vec<usize> = categorized
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_uncategorized())
            .map(|(i, _)| i)
            .collect();

        let mut summary = RetrySummary {
            attempted: pending.len(),
            ..Default::default()
        };
        on_progress(0, pending.len());

        let mut done = 0;
        for chunk in pending.chunks(self.batch_size) {
            if self.is_cancelled() {
                summary.interrupted = true;
                break;
            }

            let batch: Vec<BookmarkRecord> = chunk.iter().map(|&i| categorized[i].clone()).collect();
            let known = known_categories(&categorized);
            match self.classify_batch(&batch, &known).await {
                BatchOutcome::Categorized(records) => {
                    for (&i, record) in chunk.iter().zip(records) {
                        if !record.is_uncategorized() {
                            summary.recovered += 1;
                        }
                        categorized[i] = record;
                    }
                }
                BatchOutcome::Failed(reason) => {
                    warn!("⚠️  Retry batch failed, {} bookmarks stay uncategorized: {}", batch.len(), reason);
                }
            }

            self.store.save_categorized(&categorized)?;
            done += chunk.len();
            on_progress(done, pending.len());
        }

        summary.still_uncategorized = categorized.iter().filter(|r| r.is_uncategorized()).count();
        info!(
            "🔁 Retry finished: {} recovered, {} still uncategorized",
            summary.recovered, summary.still_uncategorized
        );
        Ok(summary)
    }

    async fn classify_batch(&self, batch: &[BookmarkRecord], known: &[String]) -> BatchOutcome {
        let inputs: Vec<ClassificationInput> = batch.iter().map(ClassificationInput::from).collect();
        match self.classifier.classify(&inputs, known).await {
            Ok(items) => BatchOutcome::Categorized(assign_categories(batch, &items)),
            Err(e) => BatchOutcome::Failed(e.to_string()),
        }
    }
}

/// Match service answers back to the submitted records.
///
/// By URL first, then by position for answers whose URL is missing or
/// unrecognised. A record with no usable answer gets the sentinel.
pub fn assign_categories(batch: &[BookmarkRecord], items: &[ClassifiedItem]) -> Vec<BookmarkRecord> {
    let submitted: HashSet<&str> = batch.iter().map(|r| r.url.as_str()).collect();

    let mut by_url: HashMap<&str, &str> = HashMap::new();
    for item in items {
        if let (Some(url), Some(category)) = (item.url.as_deref(), item.category.as_deref()) {
            by_url.entry(url).or_insert(category);
        }
    }

    let mut unmatched = 0;
    let records: Vec<BookmarkRecord> = batch
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let category = by_url.get(record.url.as_str()).copied().or_else(|| {
                items
                    .get(i)
                    .filter(|item| item.url.as_deref().map_or(true, |u| !submitted.contains(u)))
                    .and_then(|item| item.category.as_deref())
            });
            match category {
                Some(category) => record.clone().with_category(category),
                None => {
                    unmatched += 1;
                    record.clone().uncategorized()
                }
            }
        })
        .collect();

    if unmatched > 0 {
        warn!("⚠️  {} of {} bookmarks got no category in the response", unmatched, batch.len());
    }
    records
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::bookmarks::UNCATEGORIZED;
    use crate::error::ClassificationBatchError;
    use std::sync::Mutex;

    /// Scripted classifier: categorizes by title, fails on chosen call numbers (1-based)
    #[derive(Default)]
    pub struct MockClassifier {
        pub fail_calls: HashSet<usize>,
        pub submitted: Mutex<Vec<Vec<String>>>,
        pub known_seen: Mutex<Vec<Vec<String>>>,
    }

    impl MockClassifier {
        pub fn failing_on(calls: &[usize]) -> Self {
            Self {
                fail_calls: calls.iter().copied().collect(),
                ..Default::default()
            }
        }

        pub fn submitted_urls(&self) -> Vec<String> {
            self.submitted.lock().unwrap().iter().flatten().cloned().collect()
        }

        pub fn calls(&self) -> usize {
            self.submitted.lock().unwrap().len()
        }

        pub fn category_for(title: &str) -> String {
            format!("Cat/{}", title)
        }
    }

    impl Classifier for MockClassifier {
        async fn classify(
            &self,
            batch: &[ClassificationInput],
            known_categories: &[String],
        ) -> Result<Vec<ClassifiedItem>, ClassificationBatchError> {
            let call = {
                let mut submitted = self.submitted.lock().unwrap();
                submitted.push(batch.iter().map(|b| b.url.clone()).collect());
                submitted.len()
            };
            self.known_seen.lock().unwrap().push(known_categories.to_vec());
            assert!(!known_categories.iter().any(|c| c == UNCATEGORIZED));

            if self.fail_calls.contains(&call) {
                return Err(ClassificationBatchError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(batch
                .iter()
                .rev()
                .map(|b| ClassifiedItem::new(b.url.clone(), Self::category_for(&b.title)))
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockClassifier;
    use super::*;
    use crate::bookmarks::UNCATEGORIZED;
    use crate::state::Stage;
    use crate::store::memory::MemoryStore;
    use crate::store::CATEGORIZED_KEY;

    fn records(n: usize) -> Vec<BookmarkRecord> {
        (0..n)
            .map(|i| {
                let mut r = BookmarkRecord::new(format!("T{}", i), format!("http://site{}.example", i));
                r.add_date = Some(format!("{}", 1_700_000_000 + i));
                r.icon = Some("data:image/png;base64,AA".to_string());
                r
            })
            .collect()
    }

    fn store() -> PipelineStore<MemoryStore> {
        PipelineStore::new(MemoryStore::default())
    }

    #[tokio::test]
    async fn test_full_run() {
        let store = store();
        let classifier = MockClassifier::default();
        let input = records(7);

        let orchestrator = BatchOrchestrator::new(&classifier, &store, 3).unwrap();
        let mut progress = Vec::new();
        let outcome = orchestrator.run(&input, |done, total| progress.push((done, total))).await.unwrap();

        let RunOutcome::Completed(output) = outcome else {
            panic!("run should complete");
        };
        assert_eq!(output.len(), 7);
        for (out, original) in output.iter().zip(&input) {
            assert_eq!(out.url, original.url);
            assert_eq!(out.category.as_deref(), Some(MockClassifier::category_for(&original.title).as_str()));
            assert_eq!(out.add_date, original.add_date);
            assert_eq!(out.icon, original.icon);
        }

        assert_eq!(classifier.calls(), 3);
        assert_eq!(store.inner().writes(CATEGORIZED_KEY), 3);
        assert_eq!(progress, vec![(0, 7), (3, 7), (6, 7), (7, 7)]);

        let state = store.load_state().unwrap().unwrap();
        assert_eq!(state.stage, Stage::Categorized);
        assert_eq!(state.processed_count, 7);
        assert_eq!(store.load_categorized().unwrap().unwrap(), output);
    }

    #[tokio::test]
    async fn test_failed_batch_is_sentinel_and_run_continues() {
        let store = store();
        let classifier = MockClassifier::failing_on(&[2]);
        let input = records(6);

        let orchestrator = BatchOrchestrator::new(&classifier, &store, 2).unwrap();
        let RunOutcome::Completed(output) = orchestrator.run(&input, |_, _| {}).await.unwrap() else {
            panic!("run should complete");
        };

        assert_eq!(classifier.calls(), 3);
        assert_eq!(output.len(), 6);
        let categories: Vec<&str> = output.iter().map(|r| r.effective_category()).collect();
        assert_eq!(categories[2], UNCATEGORIZED);
        assert_eq!(categories[3], UNCATEGORIZED);
        assert_eq!(categories[0], "Cat/T0");
        assert_eq!(categories[5], "Cat/T5");
        assert_eq!(store.load_state().unwrap().unwrap().processed_count, 6);
    }

    #[tokio::test]
    async fn test_resume_skips_persisted_prefix() {
        let store = store();
        let input = records(5);
        let done: Vec<BookmarkRecord> = input[..2].iter().cloned().map(|r| r.with_category("Old")).collect();
        store.save_categorized(&done).unwrap();

        let classifier = MockClassifier::default();
        let orchestrator = BatchOrchestrator::new(&classifier, &store, 2).unwrap();
        let mut first_progress = None;
        let RunOutcome::Completed(output) = orchestrator
            .run(&input, |done, _| {
                first_progress.get_or_insert(done);
            })
            .await
            .unwrap()
        else {
            panic!("run should complete");
        };

        assert_eq!(first_progress, Some(2));
        let submitted = classifier.submitted_urls();
        assert_eq!(submitted, input[2..].iter().map(|r| r.url.clone()).collect::<Vec<_>>());
        assert_eq!(output[..2], done[..]);
        assert_eq!(output[2].effective_category(), "Cat/T2");
    }

    #[tokio::test]
    async fn test_cancel_at_batch_boundary_then_resume() {
        let store = store();
        let input = records(6);
        let flag = Arc::new(AtomicBool::new(false));

        let classifier = MockClassifier::default();
        let orchestrator = BatchOrchestrator::new(&classifier, &store, 2)
            .unwrap()
            .with_cancel_flag(flag.clone());
        let outcome = orchestrator
            .run(&input, |done, _| {
                if done >= 2 {
                    flag.store(true, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Interrupted { processed: 2, total: 6 }));
        assert_eq!(classifier.calls(), 1);
        let state = store.load_state().unwrap().unwrap();
        assert_eq!(state.stage, Stage::Categorizing);
        assert_eq!(state.processed_count, 2);

        let classifier = MockClassifier::default();
        let orchestrator = BatchOrchestrator::new(&classifier, &store, 2).unwrap();
        let RunOutcome::Completed(output) = orchestrator.run(&input, |_, _| {}).await.unwrap() else {
            panic!("resumed run should complete");
        };
        assert_eq!(output.len(), 6);
        assert_eq!(classifier.submitted_urls().len(), 4);
    }

    #[tokio::test]
    async fn test_mismatched_progress_is_rejected() {
        let store = store();
        store
            .save_categorized(&[BookmarkRecord::new("x", "http://other").with_category("X")])
            .unwrap();
        let classifier = MockClassifier::default();
        let orchestrator = BatchOrchestrator::new(&classifier, &store, 2).unwrap();

        assert!(orchestrator.run(&records(3), |_, _| {}).await.is_err());
        assert_eq!(classifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_known_categories_grow_between_batches() {
        let store = store();
        let classifier = MockClassifier::failing_on(&[1]);
        let orchestrator = BatchOrchestrator::new(&classifier, &store, 1).unwrap();
        orchestrator.run(&records(3), |_, _| {}).await.unwrap();

        let known = classifier.known_seen.lock().unwrap().clone();
        assert_eq!(known[0], Vec::<String>::new());
        assert_eq!(known[1], Vec::<String>::new());
        assert_eq!(known[2], vec!["Cat/T1".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_input_completes_immediately() {
        let store = store();
        let classifier = MockClassifier::default();
        let orchestrator = BatchOrchestrator::new(&classifier, &store, 5).unwrap();
        let outcome = orchestrator.run(&[], |_, _| {}).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(ref v) if v.is_empty()));
        assert_eq!(store.load_state().unwrap().unwrap().stage, Stage::Categorized);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let store = store();
        let classifier = MockClassifier::default();
        assert!(BatchOrchestrator::new(&classifier, &store, 0).is_err());
    }

    #[tokio::test]
    async fn test_retry_replaces_only_sentinels() {
        let store = store();
        let input = records(4);
        let mut persisted: Vec<BookmarkRecord> = input.iter().cloned().map(|r| r.with_category("Keep")).collect();
        persisted[1] = input[1].clone().uncategorized();
        persisted[3] = input[3].clone().uncategorized();
        store.save_categorized(&persisted).unwrap();

        let classifier = MockClassifier::default();
        let orchestrator = BatchOrchestrator::new(&classifier, &store, 10).unwrap();
        let summary = orchestrator.retry_uncategorized(|_, _| {}).await.unwrap();

        assert_eq!(
            summary,
            RetrySummary {
                attempted: 2,
                recovered: 2,
                still_uncategorized: 0,
                interrupted: false,
            }
        );
        assert_eq!(classifier.submitted_urls(), vec![input[1].url.clone(), input[3].url.clone()]);

        let stored = store.load_categorized().unwrap().unwrap();
        let categories: Vec<&str> = stored.iter().map(|r| r.effective_category()).collect();
        assert_eq!(categories, vec!["Keep", "Cat/T1", "Keep", "Cat/T3"]);
    }

    #[tokio::test]
    async fn test_retry_resubmits_blank_path_categories() {
        let store = store();
        let input = records(2);
        let persisted = vec![input[0].clone().with_category(" / "), input[1].clone().with_category("Keep")];
        store.save_categorized(&persisted).unwrap();

        let classifier = MockClassifier::default();
        let orchestrator = BatchOrchestrator::new(&classifier, &store, 5).unwrap();
        let summary = orchestrator.retry_uncategorized(|_, _| {}).await.unwrap();

        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.recovered, 1);
        assert_eq!(classifier.submitted_urls(), vec![input[0].url.clone()]);
        assert_eq!(classifier.known_seen.lock().unwrap()[0], vec!["Keep".to_string()]);
    }

    #[tokio::test]
    async fn test_retry_failure_keeps_sentinel() {
        let store = store();
        let persisted: Vec<BookmarkRecord> = records(2).into_iter().map(BookmarkRecord::uncategorized).collect();
        store.save_categorized(&persisted).unwrap();

        let classifier = MockClassifier::failing_on(&[1]);
        let orchestrator = BatchOrchestrator::new(&classifier, &store, 1).unwrap();
        let summary = orchestrator.retry_uncategorized(|_, _| {}).await.unwrap();

        assert_eq!(summary.recovered, 1);
        assert_eq!(summary.still_uncategorized, 1);
        assert!(store.load_categorized().unwrap().unwrap()[0].is_uncategorized());
    }

    #[test]
    fn test_assign_categories_by_url_then_position() {
        let batch = vec![
            BookmarkRecord::new("A", "http://a"),
            BookmarkRecord::new("B", "http://b"),
            BookmarkRecord::new("C", "http://c"),
            BookmarkRecord::new("D", "http://d"),
        ];
        let items = vec![
            ClassifiedItem::new("http://b", "Y"),
            ClassifiedItem::new("http://a", "X"),
            ClassifiedItem {
                url: Some("http://c-modified".into()),
                category: Some("Z".into()),
            },
        ];

        let out = assign_categories(&batch, &items);
        let categories: Vec<&str> = out.iter().map(|r| r.effective_category()).collect();
        assert_eq!(categories, vec!["X", "Y", "Z", UNCATEGORIZED]);
    }
}
