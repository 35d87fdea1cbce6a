use crate::error::StoreError;
use crate::models::{ChunkRecord, DocumentRecord, DocumentStatus, ScoredChunk};
use crate::retrieval::cosine_similarity;
use crate::traits::{ChunkStore, DocumentStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Chunk row as the in-memory backend keeps it. The embedding is held as a
/// JSON string so reads exercise the same decode path the raw-insert
/// fallback of the remote backend produces.
#[derive(Debug, Clone)]
struct StoredChunk {
    id: String,
    document_id: String,
    content: String,
    embedding_json: String,
    metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Default)]
struct Inner {
    documents: HashMap<String, DocumentRecord>,
    chunks: Vec<StoredChunk>,
}

/// In-memory backend for tests and local runs. Implements both store traits
/// over the same shared state; clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    native_search: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables the server-side search path. Off by default so tests cover
    /// the client-side fallback scan unless they opt in.
    pub fn with_native_search(mut self) -> Self {
        self.native_search = true;
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Request("memory store lock poisoned".to_string()))
    }

    fn decode_chunk(stored: &StoredChunk) -> Result<ChunkRecord, StoreError> {
        let embedding: Vec<f32> = serde_json::from_str(&stored.embedding_json)?;
        Ok(ChunkRecord {
            id: stored.id.clone(),
            document_id: stored.document_id.clone(),
            content: stored.content.clone(),
            embedding,
            metadata: stored.metadata.clone(),
        })
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_document(&self, document: &DocumentRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner
            .documents
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn fetch_document(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentRecord>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.documents.get(document_id).cloned())
    }

    async fn update_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let document = inner
            .documents
            .get_mut(document_id)
            .ok_or_else(|| StoreError::DocumentNotFound(document_id.to_string()))?;
        document.status = status;
        document.updated_at = Utc::now();
        Ok(())
    }

    async fn pending_documents(
        &self,
        content_kind: &str,
        limit: usize,
    ) -> Result<Vec<DocumentRecord>, StoreError> {
        let inner = self.lock()?;
        let mut pending: Vec<DocumentRecord> = inner
            .documents
            .values()
            .filter(|document| {
                document.deleted_at.is_none()
                    && document.content_type == content_kind
                    && matches!(
                        document.status,
                        DocumentStatus::Uploaded | DocumentStatus::Failed
                    )
            })
            .cloned()
            .collect();
        pending.sort_by_key(|document| document.created_at);
        pending.truncate(limit);
        Ok(pending)
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn put_chunk(&self, chunk: &ChunkRecord) -> Result<String, StoreError> {
        let embedding_json = serde_json::to_string(&chunk.embedding)?;
        let mut inner = self.lock()?;
        inner.chunks.push(StoredChunk {
            id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            content: chunk.content.clone(),
            embedding_json,
            metadata: chunk.metadata.clone(),
        });
        Ok(chunk.id.clone())
    }

    async fn has_chunks(&self, document_id: &str) -> Result<bool, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .chunks
            .iter()
            .any(|chunk| chunk.document_id == document_id))
    }

    async fn delete_chunks(&self, document_id: &str) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.chunks.len();
        inner.chunks.retain(|chunk| chunk.document_id != document_id);
        Ok((before - inner.chunks.len()) as u64)
    }

    async fn nearest_chunks(
        &self,
        query_vector: &[f32],
        document_ids: &[String],
        limit: usize,
    ) -> Result<Option<Vec<ScoredChunk>>, StoreError> {
        if !self.native_search {
            return Ok(None);
        }

        let inner = self.lock()?;
        let mut scored = Vec::new();
        for stored in &inner.chunks {
            if !document_ids.contains(&stored.document_id) {
                continue;
            }
            let record = Self::decode_chunk(stored)?;
            scored.push(ScoredChunk {
                chunk_id: record.id,
                document_id: record.document_id,
                content: record.content,
                metadata: record.metadata,
                score: cosine_similarity(query_vector, &record.embedding),
            });
        }
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(Some(scored))
    }

    async fn chunks_for_documents(
        &self,
        document_ids: &[String],
    ) -> Result<Vec<ChunkRecord>, StoreError> {
        let inner = self.lock()?;
        inner
            .chunks
            .iter()
            .filter(|chunk| document_ids.contains(&chunk.document_id))
            .map(Self::decode_chunk)
            .collect()
    }
}
