use crate::error::StoreError;
use crate::models::{ChunkRecord, DocumentRecord, DocumentStatus, ScoredChunk};
use crate::traits::{ChunkStore, DocumentStore};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

const BACKEND: &str = "postgrest";
const DOCUMENTS_TABLE: &str = "documents";
const CHUNKS_TABLE: &str = "document_chunks";

/// RPC that writes a chunk with a typed vector column in one round trip.
const INSERT_CHUNK_FN: &str = "insert_document_chunk";
/// RPC that runs server-side nearest-neighbor search over the vector column.
const SEARCH_CHUNKS_FN: &str = "search_document_chunks";

/// Store backed by a PostgREST endpoint (Supabase-style). Documents and
/// chunks live in two tables; vector search and typed vector writes go
/// through SQL functions exposed as RPCs, with plain REST fallbacks when a
/// function is not installed.
#[derive(Clone)]
pub struct PostgrestStore {
    client: Client,
    base: Url,
    api_key: String,
}

impl PostgrestStore {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, StoreError> {
        let base = Url::parse(base_url)?;
        Ok(Self {
            client: Client::new(),
            base,
            api_key: api_key.into(),
        })
    }

    fn table_url(&self, table: &str) -> Result<Url, StoreError> {
        Ok(self.base.join(&format!("rest/v1/{table}"))?)
    }

    fn rpc_url(&self, function: &str) -> Result<Url, StoreError> {
        Ok(self.base.join(&format!("rest/v1/rpc/{function}"))?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn read_rows(&self, url: Url) -> Result<Vec<Value>, StoreError> {
        let response = self.authorize(self.client.get(url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(backend_error(status, response.text().await.ok()));
        }
        Ok(response.json().await?)
    }
}

fn backend_error(status: StatusCode, body: Option<String>) -> StoreError {
    StoreError::BackendResponse {
        backend: BACKEND.to_string(),
        details: format!("{status}: {}", body.unwrap_or_default()),
    }
}

/// The embedding column round-trips either as a JSON array (typed vector
/// read back through the RPC) or as a JSON-encoded string (raw REST insert
/// into a text column). Accept both.
fn decode_embedding(value: &Value) -> Option<Vec<f32>> {
    match value {
        Value::String(text) => serde_json::from_str(text).ok(),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_f64().map(|n| n as f32))
            .collect(),
        _ => None,
    }
}

fn row_to_chunk(row: &Value) -> Option<ChunkRecord> {
    let id = row.get("id").and_then(Value::as_str)?.to_string();
    let document_id = row.get("document_id").and_then(Value::as_str)?.to_string();
    let content = row.get("content").and_then(Value::as_str)?.to_string();
    let embedding = row.get("embedding").and_then(decode_embedding)?;
    let metadata = row
        .get("metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    Some(ChunkRecord {
        id,
        document_id,
        content,
        embedding,
        metadata,
    })
}

fn row_to_scored(row: &Value) -> Option<ScoredChunk> {
    Some(ScoredChunk {
        chunk_id: row.get("id").and_then(Value::as_str)?.to_string(),
        document_id: row.get("document_id").and_then(Value::as_str)?.to_string(),
        content: row.get("content").and_then(Value::as_str)?.to_string(),
        metadata: row
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        score: row.get("similarity").and_then(Value::as_f64)?,
    })
}

fn in_filter(ids: &[String]) -> String {
    format!("in.({})", ids.join(","))
}

#[async_trait]
impl DocumentStore for PostgrestStore {
    async fn insert_document(&self, document: &DocumentRecord) -> Result<(), StoreError> {
        let url = self.table_url(DOCUMENTS_TABLE)?;
        let response = self
            .authorize(self.client.post(url))
            .header("Prefer", "return=minimal")
            .json(document)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(backend_error(status, response.text().await.ok()));
        }
        Ok(())
    }

    async fn fetch_document(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentRecord>, StoreError> {
        let mut url = self.table_url(DOCUMENTS_TABLE)?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{document_id}"))
            .append_pair("limit", "1");

        let rows = self.read_rows(url).await?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }

    async fn update_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
    ) -> Result<(), StoreError> {
        let mut url = self.table_url(DOCUMENTS_TABLE)?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{document_id}"));

        let response = self
            .authorize(self.client.patch(url))
            .header("Prefer", "return=representation")
            .json(&json!({
                "status": status.as_str(),
                "updated_at": Utc::now(),
            }))
            .send()
            .await?;

        let response_status = response.status();
        if !response_status.is_success() {
            return Err(backend_error(response_status, response.text().await.ok()));
        }

        let rows: Vec<Value> = response.json().await?;
        if rows.is_empty() {
            return Err(StoreError::DocumentNotFound(document_id.to_string()));
        }
        Ok(())
    }

    async fn pending_documents(
        &self,
        content_kind: &str,
        limit: usize,
    ) -> Result<Vec<DocumentRecord>, StoreError> {
        let mut url = self.table_url(DOCUMENTS_TABLE)?;
        url.query_pairs_mut()
            .append_pair("status", "in.(uploaded,failed)")
            .append_pair("content_type", &format!("eq.{content_kind}"))
            .append_pair("deleted_at", "is.null")
            .append_pair("order", "created_at.asc")
            .append_pair("limit", &limit.to_string());

        let rows = self.read_rows(url).await?;
        rows.into_iter()
            .map(|row| Ok(serde_json::from_value(row)?))
            .collect()
    }
}

#[async_trait]
impl ChunkStore for PostgrestStore {
    /// Writes through the insert RPC, which casts the embedding into the
    /// typed vector column. If the function is missing or rejects the call,
    /// falls back to a raw REST insert with the embedding serialized as a
    /// JSON string.
    async fn put_chunk(&self, chunk: &ChunkRecord) -> Result<String, StoreError> {
        let url = self.rpc_url(INSERT_CHUNK_FN)?;
        let response = self
            .authorize(self.client.post(url))
            .json(&json!({
                "p_id": chunk.id,
                "p_document_id": chunk.document_id,
                "p_content": chunk.content,
                "p_embedding": chunk.embedding,
                "p_metadata": chunk.metadata,
            }))
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(chunk.id.clone());
        }

        let status = response.status();
        debug!(%status, "chunk insert rpc unavailable, using raw insert");

        let url = self.table_url(CHUNKS_TABLE)?;
        let response = self
            .authorize(self.client.post(url))
            .header("Prefer", "return=representation")
            .json(&json!({
                "id": chunk.id,
                "document_id": chunk.document_id,
                "content": chunk.content,
                "embedding": serde_json::to_string(&chunk.embedding)?,
                "metadata": chunk.metadata,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(backend_error(status, response.text().await.ok()));
        }

        let rows: Vec<Value> = response.json().await?;
        let id = rows
            .first()
            .and_then(|row| row.get("id"))
            .and_then(Value::as_str)
            .unwrap_or(&chunk.id)
            .to_string();
        Ok(id)
    }

    async fn has_chunks(&self, document_id: &str) -> Result<bool, StoreError> {
        let mut url = self.table_url(CHUNKS_TABLE)?;
        url.query_pairs_mut()
            .append_pair("document_id", &format!("eq.{document_id}"))
            .append_pair("select", "id")
            .append_pair("limit", "1");

        let rows = self.read_rows(url).await?;
        Ok(!rows.is_empty())
    }

    async fn delete_chunks(&self, document_id: &str) -> Result<u64, StoreError> {
        let mut url = self.table_url(CHUNKS_TABLE)?;
        url.query_pairs_mut()
            .append_pair("document_id", &format!("eq.{document_id}"));

        let response = self
            .authorize(self.client.delete(url))
            .header("Prefer", "return=representation")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(backend_error(status, response.text().await.ok()));
        }

        let rows: Vec<Value> = response.json().await?;
        Ok(rows.len() as u64)
    }

    async fn nearest_chunks(
        &self,
        query_vector: &[f32],
        document_ids: &[String],
        limit: usize,
    ) -> Result<Option<Vec<ScoredChunk>>, StoreError> {
        let url = self.rpc_url(SEARCH_CHUNKS_FN)?;
        let response = self
            .authorize(self.client.post(url))
            .json(&json!({
                "query_embedding": query_vector,
                "document_ids": document_ids,
                "match_count": limit,
            }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            // The search function is not installed on this backend.
            return Ok(None);
        }
        if !status.is_success() {
            return Err(backend_error(status, response.text().await.ok()));
        }

        let rows: Vec<Value> = response.json().await?;
        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            match row_to_scored(row) {
                Some(chunk) => scored.push(chunk),
                None => warn!("search rpc returned a malformed row, skipping"),
            }
        }
        Ok(Some(scored))
    }

    async fn chunks_for_documents(
        &self,
        document_ids: &[String],
    ) -> Result<Vec<ChunkRecord>, StoreError> {
        if document_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut url = self.table_url(CHUNKS_TABLE)?;
        url.query_pairs_mut()
            .append_pair("document_id", &in_filter(document_ids))
            .append_pair("select", "id,document_id,content,embedding,metadata");

        let rows = self.read_rows(url).await?;
        let mut chunks = Vec::with_capacity(rows.len());
        for row in &rows {
            match row_to_chunk(row) {
                Some(chunk) => chunks.push(chunk),
                None => {
                    warn!(
                        chunk_id = row.get("id").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
                        "chunk row could not be decoded, skipping"
                    );
                }
            }
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedding_decodes_from_json_string() {
        let value = json!("[0.5,-1.0,2.0]");
        assert_eq!(decode_embedding(&value), Some(vec![0.5, -1.0, 2.0]));
    }

    #[test]
    fn embedding_decodes_from_json_array() {
        let value = json!([0.5, -1.0, 2.0]);
        assert_eq!(decode_embedding(&value), Some(vec![0.5, -1.0, 2.0]));
    }

    #[test]
    fn malformed_embedding_is_rejected() {
        assert_eq!(decode_embedding(&json!("not a vector")), None);
        assert_eq!(decode_embedding(&json!({"x": 1})), None);
        assert_eq!(decode_embedding(&json!([1.0, "two"])), None);
    }

    #[test]
    fn chunk_row_maps_all_fields() {
        let row = json!({
            "id": "c-1",
            "document_id": "doc-1",
            "content": "Q: a\nA: b",
            "embedding": "[1.0,0.0]",
            "metadata": {"pdf_name": "faq.pdf"},
        });

        let chunk = row_to_chunk(&row).expect("row should map");
        assert_eq!(chunk.id, "c-1");
        assert_eq!(chunk.document_id, "doc-1");
        assert_eq!(chunk.embedding, vec![1.0, 0.0]);
        assert_eq!(
            chunk.metadata.get("pdf_name").and_then(Value::as_str),
            Some("faq.pdf")
        );
    }

    #[test]
    fn scored_row_requires_a_similarity_field() {
        let row = json!({
            "id": "c-1",
            "document_id": "doc-1",
            "content": "text",
        });
        assert!(row_to_scored(&row).is_none());

        let row = json!({
            "id": "c-1",
            "document_id": "doc-1",
            "content": "text",
            "similarity": 0.87,
        });
        let scored = row_to_scored(&row).expect("row should map");
        assert!((scored.score - 0.87).abs() < 1e-9);
    }

    #[test]
    fn in_filter_joins_ids() {
        let ids = vec!["a".to_string(), "b".to_string()];
        assert_eq!(in_filter(&ids), "in.(a,b)");
    }
}
