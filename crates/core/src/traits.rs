use crate::error::{ProviderError, StoreError};
use crate::models::{ChunkRecord, DocumentRecord, DocumentStatus, ScoredChunk};
use async_trait::async_trait;

/// Tabular access to document records.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert_document(&self, document: &DocumentRecord) -> Result<(), StoreError>;

    async fn fetch_document(&self, document_id: &str)
        -> Result<Option<DocumentRecord>, StoreError>;

    /// Status writes must be durable before the next pipeline stage runs.
    async fn update_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
    ) -> Result<(), StoreError>;

    /// Non-deleted documents of the given content kind with status
    /// `uploaded` or `failed`, oldest first, capped at `limit`.
    async fn pending_documents(
        &self,
        content_kind: &str,
        limit: usize,
    ) -> Result<Vec<DocumentRecord>, StoreError>;
}

/// Durable chunk storage plus optional server-side vector search.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn put_chunk(&self, chunk: &ChunkRecord) -> Result<String, StoreError>;

    async fn has_chunks(&self, document_id: &str) -> Result<bool, StoreError>;

    /// Safe to call on a document with zero chunks; returns the count removed.
    async fn delete_chunks(&self, document_id: &str) -> Result<u64, StoreError>;

    /// Server-side nearest-neighbor search scoped to `document_ids`.
    /// `Ok(None)` means the backend has no native vector-search capability;
    /// the retrieval engine then falls back to a client-side scan.
    async fn nearest_chunks(
        &self,
        query_vector: &[f32],
        document_ids: &[String],
        limit: usize,
    ) -> Result<Option<Vec<ScoredChunk>>, StoreError>;

    /// Read-all escape hatch for the client-side fallback path.
    async fn chunks_for_documents(
        &self,
        document_ids: &[String],
    ) -> Result<Vec<ChunkRecord>, StoreError>;
}

/// Maps text to a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// Maps a prompt to generated text. Used for structured Q&A extraction,
/// question-validity classification, and final answer synthesis.
#[async_trait]
pub trait AnswerProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}
