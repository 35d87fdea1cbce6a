use crate::error::StoreError;
use crate::lifecycle::{IndexOutcome, LifecycleController};
use crate::models::{BatchReport, DocumentStatus, PDF_CONTENT_KIND};
use crate::parser::DocumentParser;
use crate::traits::{AnswerProvider, ChunkStore, DocumentStore, EmbeddingProvider};
use std::time::Duration;
use tracing::{info, warn};

/// Drives indexing over the pending backlog: non-deleted PDF documents in
/// `uploaded` or `failed` status, oldest first. One document failing never
/// aborts the batch.
pub struct BatchScheduler<D, C, P, E, A>
where
    D: DocumentStore,
    C: ChunkStore,
    P: DocumentParser,
    E: EmbeddingProvider,
    A: AnswerProvider,
{
    controller: LifecycleController<D, C, P, E, A>,
}

impl<D, C, P, E, A> BatchScheduler<D, C, P, E, A>
where
    D: DocumentStore,
    C: ChunkStore,
    P: DocumentParser,
    E: EmbeddingProvider,
    A: AnswerProvider,
{
    pub fn new(controller: LifecycleController<D, C, P, E, A>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &LifecycleController<D, C, P, E, A> {
        &self.controller
    }

    pub async fn run_batch(&self, limit: usize) -> Result<BatchReport, StoreError> {
        let pending = self
            .controller
            .documents()
            .pending_documents(PDF_CONTENT_KIND, limit)
            .await?;

        if pending.is_empty() {
            return Ok(BatchReport::default());
        }

        let mut report = BatchReport {
            attempted: pending.len(),
            ..BatchReport::default()
        };

        for document in &pending {
            // A missing payload file cannot be indexed no matter how often
            // it is retried; fail it without entering the pipeline.
            let path = self.controller.storage_path(document);
            if !path.exists() {
                warn!(
                    document_id = %document.id,
                    path = %path.display(),
                    "stored file is missing, marking document failed"
                );
                self.controller
                    .documents()
                    .update_status(&document.id, DocumentStatus::Failed)
                    .await?;
                report.failed += 1;
                continue;
            }

            match self.controller.start_indexing(&document.id).await {
                Ok(IndexOutcome::Indexed { chunk_count }) => {
                    info!(document_id = %document.id, chunk_count, "batch item indexed");
                    report.succeeded += 1;
                }
                Ok(IndexOutcome::AlreadyIndexed) => {
                    report.succeeded += 1;
                }
                Ok(IndexOutcome::Failed { reason }) => {
                    warn!(document_id = %document.id, %reason, "batch item failed");
                    report.failed += 1;
                }
                Err(error) => {
                    warn!(document_id = %document.id, %error, "batch item errored");
                    report.failed += 1;
                }
            }
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            "batch run finished"
        );
        Ok(report)
    }

    /// Runs batches on a fixed period until the task is cancelled. Store
    /// errors are logged and the next tick retries.
    pub async fn run_forever(&self, period: Duration, limit: usize) {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if let Err(error) = self.run_batch(limit).await {
                warn!(%error, "batch run failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{IndexError, ProviderError};
    use crate::models::{DocumentRecord, IndexingOptions};
    use crate::parser::TextBlock;
    use crate::providers::OpenAiCompleter;
    use crate::stores::MemoryStore;
    use crate::traits::EmbeddingProvider;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeParser {
        calls: Arc<AtomicUsize>,
    }

    impl DocumentParser for FakeParser {
        fn parse(&self, _path: &Path) -> Result<Vec<TextBlock>, IndexError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![TextBlock {
                index: 0,
                text: "Q: What is X?\nA: X is Y.".to_string(),
            }])
        }
    }

    #[derive(Clone)]
    struct FakeEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    fn document(id: &str, file_path: &str, age_minutes: i64) -> DocumentRecord {
        let created = Utc::now() - ChronoDuration::minutes(age_minutes);
        DocumentRecord {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            folder_id: None,
            original_filename: format!("{id}.pdf"),
            file_path: file_path.to_string(),
            content_type: PDF_CONTENT_KIND.to_string(),
            checksum: None,
            status: DocumentStatus::Uploaded,
            deleted_at: None,
            created_at: created,
            updated_at: created,
        }
    }

    fn scheduler_with(
        store: &MemoryStore,
        storage_root: &Path,
        calls: Arc<AtomicUsize>,
    ) -> BatchScheduler<MemoryStore, MemoryStore, FakeParser, FakeEmbedder, OpenAiCompleter> {
        let controller = LifecycleController::new(
            store.clone(),
            store.clone(),
            FakeParser { calls },
            FakeEmbedder,
            None,
            storage_root,
            IndexingOptions::default(),
        );
        BatchScheduler::new(controller)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_backlog_is_a_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MemoryStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = scheduler_with(&store, dir.path(), calls.clone());

        let report = scheduler.run_batch(10).await.expect("batch");
        assert_eq!(report.attempted, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_file_fails_without_invoking_the_parser() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MemoryStore::new();
        store
            .insert_document(&document("doc-1", "gone.pdf", 10))
            .await
            .expect("insert");

        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = scheduler_with(&store, dir.path(), calls.clone());

        let report = scheduler.run_batch(10).await.expect("batch");
        assert_eq!(report.attempted, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let status = scheduler
            .controller()
            .get_status("doc-1")
            .await
            .expect("status");
        assert_eq!(status, DocumentStatus::Failed);
        assert!(!store.has_chunks("doc-1").await.expect("has"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mixed_batch_counts_successes_and_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("ok.pdf"), b"%PDF").expect("fixture");

        let store = MemoryStore::new();
        store
            .insert_document(&document("doc-ok", "ok.pdf", 60))
            .await
            .expect("insert");
        store
            .insert_document(&document("doc-gone", "gone.pdf", 5))
            .await
            .expect("insert");

        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = scheduler_with(&store, dir.path(), calls.clone());

        let report = scheduler.run_batch(10).await.expect("batch");
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert!(store.has_chunks("doc-ok").await.expect("has"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn batch_limit_caps_the_backlog() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.pdf"), b"%PDF").expect("fixture");
        std::fs::write(dir.path().join("b.pdf"), b"%PDF").expect("fixture");

        let store = MemoryStore::new();
        store
            .insert_document(&document("doc-old", "a.pdf", 60))
            .await
            .expect("insert");
        store
            .insert_document(&document("doc-new", "b.pdf", 5))
            .await
            .expect("insert");

        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = scheduler_with(&store, dir.path(), calls.clone());

        let report = scheduler.run_batch(1).await.expect("batch");
        assert_eq!(report.attempted, 1);

        // Oldest document goes first.
        assert!(store.has_chunks("doc-old").await.expect("has"));
        assert!(!store.has_chunks("doc-new").await.expect("has"));
    }
}
