use crate::error::{IndexError, StoreError};
use crate::extraction::{self, ChunkSource};
use crate::models::{ChunkRecord, DocumentRecord, DocumentStatus, IndexingOptions};
use crate::parser::DocumentParser;
use crate::traits::{AnswerProvider, ChunkStore, DocumentStore, EmbeddingProvider};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Result of one indexing attempt. Pipeline failures are folded into
/// `Failed` after the status transition; only store failures on the status
/// writes themselves surface as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Chunks already existed; the attempt was a no-op.
    AlreadyIndexed,
    Indexed { chunk_count: usize },
    Failed { reason: String },
}

/// Owns the per-document status state machine and coordinates parsing,
/// extraction, embedding, and storage. All provider handles are injected at
/// construction.
pub struct LifecycleController<D, C, P, E, A>
where
    D: DocumentStore,
    C: ChunkStore,
    P: DocumentParser,
    E: EmbeddingProvider,
    A: AnswerProvider,
{
    documents: D,
    chunks: C,
    parser: P,
    embedder: E,
    assistant: Option<A>,
    storage_root: PathBuf,
    options: IndexingOptions,
}

impl<D, C, P, E, A> LifecycleController<D, C, P, E, A>
where
    D: DocumentStore,
    C: ChunkStore,
    P: DocumentParser,
    E: EmbeddingProvider,
    A: AnswerProvider,
{
    pub fn new(
        documents: D,
        chunks: C,
        parser: P,
        embedder: E,
        assistant: Option<A>,
        storage_root: impl Into<PathBuf>,
        options: IndexingOptions,
    ) -> Self {
        Self {
            documents,
            chunks,
            parser,
            embedder,
            assistant,
            storage_root: storage_root.into(),
            options,
        }
    }

    pub fn storage_path(&self, document: &DocumentRecord) -> PathBuf {
        self.storage_root.join(&document.file_path)
    }

    /// One indexing attempt. Idempotent: if any chunk already exists for the
    /// document, the attempt short-circuits to success without parsing or
    /// embedding anything (guards against duplicate embedding cost on
    /// retriggered runs).
    pub async fn start_indexing(&self, document_id: &str) -> Result<IndexOutcome, StoreError> {
        let document = self
            .documents
            .fetch_document(document_id)
            .await?
            .ok_or_else(|| StoreError::DocumentNotFound(document_id.to_string()))?;

        if !document.is_indexable() {
            warn!(
                document_id,
                content_type = %document.content_type,
                "document has an unsupported content kind"
            );
            self.documents
                .update_status(document_id, DocumentStatus::Failed)
                .await?;
            return Ok(IndexOutcome::Failed {
                reason: IndexError::UnsupportedContentKind(document.content_type.clone())
                    .to_string(),
            });
        }

        if self.chunks.has_chunks(document_id).await? {
            info!(document_id, "chunks already exist, skipping extraction");
            if document.status != DocumentStatus::Completed {
                self.documents
                    .update_status(document_id, DocumentStatus::Completed)
                    .await?;
            }
            return Ok(IndexOutcome::AlreadyIndexed);
        }

        // Recorded before any pipeline work so a crash mid-extraction leaves
        // the document visibly `processing`.
        self.documents
            .update_status(document_id, DocumentStatus::Processing)
            .await?;

        match self.run_pipeline(&document).await {
            Ok(chunk_count) => {
                self.documents
                    .update_status(document_id, DocumentStatus::Completed)
                    .await?;
                info!(document_id, chunk_count, "document indexed");
                Ok(IndexOutcome::Indexed { chunk_count })
            }
            Err(error) => {
                warn!(document_id, %error, "indexing failed");
                self.documents
                    .update_status(document_id, DocumentStatus::Failed)
                    .await?;
                Ok(IndexOutcome::Failed {
                    reason: error.to_string(),
                })
            }
        }
    }

    async fn run_pipeline(&self, document: &DocumentRecord) -> Result<usize, IndexError> {
        let path = self.storage_path(document);
        if !path.exists() {
            return Err(IndexError::MissingFile(path.display().to_string()));
        }

        let blocks = self.parse_blocks(&path)?;

        let source = ChunkSource {
            document_id: document.id.clone(),
            pdf_name: document.original_filename.clone(),
            pdf_path: document.file_path.clone(),
        };
        let assistant = self
            .assistant
            .as_ref()
            .map(|assistant| assistant as &dyn AnswerProvider);
        let candidates =
            extraction::extract_candidates(&blocks, &source, &self.options, assistant).await;

        if candidates.is_empty() {
            return Err(IndexError::NoChunksExtracted);
        }

        let mut stored = 0usize;
        for candidate in &candidates {
            let embedding = match self.embedder.embed(&candidate.content).await {
                Ok(embedding) => embedding,
                Err(error) => {
                    warn!(document_id = %document.id, %error, "embedding failed for a chunk");
                    continue;
                }
            };

            let record = ChunkRecord::from_candidate(candidate, embedding);
            match self.chunks.put_chunk(&record).await {
                Ok(_) => stored += 1,
                Err(error) => {
                    warn!(document_id = %document.id, %error, "chunk write failed");
                }
            }
        }

        if stored == 0 {
            return Err(IndexError::NothingPersisted);
        }

        info!(
            document_id = %document.id,
            extracted = candidates.len(),
            stored,
            "chunks persisted"
        );
        Ok(stored)
    }

    fn parse_blocks(&self, path: &Path) -> Result<Vec<crate::parser::TextBlock>, IndexError> {
        // lopdf and the remote fallback block; keep them off the async worker.
        tokio::task::block_in_place(|| self.parser.parse(path))
    }

    pub async fn get_status(&self, document_id: &str) -> Result<DocumentStatus, StoreError> {
        let document = self
            .documents
            .fetch_document(document_id)
            .await?
            .ok_or_else(|| StoreError::DocumentNotFound(document_id.to_string()))?;
        Ok(document.status)
    }

    /// Removes every chunk of a document. Invoked on document deletion; safe
    /// on documents with zero chunks.
    pub async fn remove_index(&self, document_id: &str) -> Result<u64, StoreError> {
        let removed = self.chunks.delete_chunks(document_id).await?;
        info!(document_id, removed, "document index removed");
        Ok(removed)
    }

    pub fn documents(&self) -> &D {
        &self.documents
    }

    pub fn chunks(&self) -> &C {
        &self.chunks
    }
}
