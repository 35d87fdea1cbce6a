use crate::error::RetrievalError;
use crate::guard::{self, Admissibility};
use crate::models::{
    ChunkRecord, EmptyReason, QueryResponse, RetrievalHit, RetrievalOutcome, ScoredChunk,
};
use crate::traits::{AnswerProvider, ChunkStore, EmbeddingProvider};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub question: String,
    /// Documents whose chunks are searched.
    pub document_ids: Vec<String>,
    /// Documents the caller still considers live; hits outside this set are
    /// dropped (protects against chunks lingering for soft-deleted
    /// documents). Defaults to `document_ids`.
    pub active_document_ids: Option<Vec<String>>,
    pub top_k: usize,
}

impl RetrievalRequest {
    pub fn new(question: impl Into<String>, document_ids: Vec<String>, top_k: usize) -> Self {
        Self {
            question: question.into(),
            document_ids,
            active_document_ids: None,
            top_k,
        }
    }
}

/// Cosine similarity over two vectors. Degenerate input (zero norm or
/// mismatched dimensionality) scores `0.0` rather than erroring.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub struct RetrievalEngine<S, E, A>
where
    S: ChunkStore,
    E: EmbeddingProvider,
    A: AnswerProvider,
{
    store: S,
    embedder: E,
    answerer: A,
}

impl<S, E, A> RetrievalEngine<S, E, A>
where
    S: ChunkStore,
    E: EmbeddingProvider,
    A: AnswerProvider,
{
    pub fn new(store: S, embedder: E, answerer: A) -> Self {
        Self {
            store,
            embedder,
            answerer,
        }
    }

    /// Ranked similarity search over the given document scope. Tries the
    /// store's native vector search first, then falls back to a client-side
    /// cosine scan over all chunks in scope.
    pub async fn search(
        &self,
        request: &RetrievalRequest,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        if request.document_ids.is_empty() {
            return Ok(RetrievalOutcome::Empty(EmptyReason::NoDocumentsSelected));
        }

        let query_vector = self
            .embedder
            .embed(&request.question)
            .await
            .map_err(|error| RetrievalError::SearchUnavailable(error.to_string()))?;

        // Ask for headroom so post-filtering still leaves enough candidates.
        let headroom = request.top_k.saturating_mul(2).max(1);

        let primary = match self
            .store
            .nearest_chunks(&query_vector, &request.document_ids, headroom)
            .await
        {
            Ok(candidates) => candidates,
            Err(error) => {
                warn!(%error, "native vector search failed, scanning client-side");
                None
            }
        };

        let candidates = match primary {
            Some(candidates) if !candidates.is_empty() => candidates,
            _ => {
                debug!("native vector search unusable, scanning chunks client-side");
                match self.scan_chunks(&query_vector, &request.document_ids, headroom).await? {
                    Some(candidates) => candidates,
                    None => return Ok(RetrievalOutcome::Empty(EmptyReason::NoChunksIndexed)),
                }
            }
        };

        if candidates.is_empty() {
            return Ok(RetrievalOutcome::Empty(EmptyReason::NoMatches));
        }

        let active: HashSet<&str> = request
            .active_document_ids
            .as_ref()
            .unwrap_or(&request.document_ids)
            .iter()
            .map(String::as_str)
            .collect();

        let hits: Vec<RetrievalHit> = candidates
            .into_iter()
            .filter(|candidate| {
                !candidate.document_id.is_empty() && active.contains(candidate.document_id.as_str())
            })
            .map(|candidate| RetrievalHit {
                chunk_id: candidate.chunk_id,
                document_id: candidate.document_id,
                pdf_name: candidate
                    .metadata
                    .get("pdf_name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                content: candidate.content,
                score: candidate.score,
            })
            .take(request.top_k)
            .collect();

        if hits.is_empty() {
            return Ok(RetrievalOutcome::Empty(EmptyReason::AllMatchesFiltered));
        }

        Ok(RetrievalOutcome::Hits(hits))
    }

    /// Client-side fallback: load every chunk in scope, decode the stored
    /// vectors, and rank by cosine similarity. `None` means the scope holds
    /// no chunks at all.
    async fn scan_chunks(
        &self,
        query_vector: &[f32],
        document_ids: &[String],
        limit: usize,
    ) -> Result<Option<Vec<ScoredChunk>>, RetrievalError> {
        let chunks = self
            .store
            .chunks_for_documents(document_ids)
            .await
            .map_err(|error| RetrievalError::SearchUnavailable(error.to_string()))?;

        if chunks.is_empty() {
            return Ok(None);
        }

        let mut scored: Vec<ScoredChunk> = chunks
            .into_iter()
            .filter(|chunk| !chunk.embedding.is_empty())
            .map(|chunk: ChunkRecord| ScoredChunk {
                score: cosine_similarity(query_vector, &chunk.embedding),
                chunk_id: chunk.id,
                document_id: chunk.document_id,
                content: chunk.content,
                metadata: chunk.metadata,
            })
            .collect();

        // Stable sort: candidates with tied scores keep their original order.
        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(limit);
        Ok(Some(scored))
    }

    /// Full query path: admissibility guard, retrieval, answer synthesis.
    pub async fn answer_query(
        &self,
        request: &RetrievalRequest,
    ) -> Result<QueryResponse, RetrievalError> {
        if let Admissibility::Rejected { reason } =
            guard::screen(&request.question, Some(&self.answerer)).await
        {
            debug!(question = %request.question, %reason, "question rejected before retrieval");
            return Ok(QueryResponse::NeedsClarification { reason });
        }

        let hits = match self.search(request).await? {
            RetrievalOutcome::Empty(reason) => {
                return Ok(QueryResponse::NoContext { reason });
            }
            RetrievalOutcome::Hits(hits) => hits,
        };

        let prompt = build_answer_prompt(&request.question, &hits);
        let answer = self
            .answerer
            .complete(&prompt)
            .await
            .map_err(|error| RetrievalError::AnswerUnavailable(error.to_string()))?;

        Ok(QueryResponse::Answered { answer, hits })
    }
}

fn build_answer_prompt(question: &str, hits: &[RetrievalHit]) -> String {
    let mut prompt = String::from(
        "Answer the question using only the context below. \
         If the context does not contain the answer, say so.\n\nContext:\n",
    );

    for (index, hit) in hits.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] ({})\n{}\n\n",
            index + 1,
            hit.pdf_name,
            hit.content
        ));
    }

    prompt.push_str(&format!("Question: {question}\nAnswer:"));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::stores::MemoryStore;
    use crate::traits::{AnswerProvider, ChunkStore, EmbeddingProvider};
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeEmbedder {
        vector: Vec<f32>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeEmbedder {
        fn returning(vector: Vec<f32>) -> Self {
            Self {
                vector,
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                vector: Vec::new(),
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        fn dimensions(&self) -> usize {
            self.vector.len()
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Status {
                    provider: "fake".to_string(),
                    status: "500".to_string(),
                });
            }
            Ok(self.vector.clone())
        }
    }

    struct FakeAnswerer {
        reply: &'static str,
    }

    #[async_trait]
    impl AnswerProvider for FakeAnswerer {
        async fn complete(&self, _prompt: &str) -> Result<String, ProviderError> {
            Ok(self.reply.to_string())
        }
    }

    fn chunk(id: &str, document_id: &str, embedding: Vec<f32>) -> ChunkRecord {
        let mut metadata = Map::new();
        metadata.insert(
            "pdf_name".to_string(),
            Value::String(format!("{document_id}.pdf")),
        );
        metadata.insert("chunk_type".to_string(), Value::String("qna_pair".to_string()));
        ChunkRecord {
            id: id.to_string(),
            document_id: document_id.to_string(),
            content: format!("content of {id}"),
            embedding,
            metadata,
        }
    }

    async fn seeded_store(chunks: Vec<ChunkRecord>) -> MemoryStore {
        let store = MemoryStore::new();
        for record in &chunks {
            store.put_chunk(record).await.expect("seed chunk");
        }
        store
    }

    fn ids(outcome: &RetrievalOutcome) -> Vec<String> {
        outcome
            .hits()
            .iter()
            .map(|hit| hit.chunk_id.clone())
            .collect()
    }

    #[test]
    fn cosine_of_a_vector_with_itself_is_one() {
        let v = vec![0.3, -1.2, 4.5];
        let score = cosine_similarity(&v, &v);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_with_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn cosine_with_mismatched_dimensions_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[tokio::test]
    async fn empty_document_scope_returns_empty_not_error() {
        let engine = RetrievalEngine::new(
            MemoryStore::new(),
            FakeEmbedder::returning(vec![1.0, 0.0]),
            FakeAnswerer { reply: "n/a" },
        );

        let outcome = engine
            .search(&RetrievalRequest::new("anything?", Vec::new(), 3))
            .await
            .expect("search should succeed");

        assert!(matches!(
            outcome,
            RetrievalOutcome::Empty(EmptyReason::NoDocumentsSelected)
        ));
    }

    #[tokio::test]
    async fn scope_without_chunks_reports_no_chunks_indexed() {
        let engine = RetrievalEngine::new(
            MemoryStore::new(),
            FakeEmbedder::returning(vec![1.0, 0.0]),
            FakeAnswerer { reply: "n/a" },
        );

        let outcome = engine
            .search(&RetrievalRequest::new(
                "anything?",
                vec!["doc-a".to_string()],
                3,
            ))
            .await
            .expect("search should succeed");

        assert!(matches!(
            outcome,
            RetrievalOutcome::Empty(EmptyReason::NoChunksIndexed)
        ));
    }

    #[tokio::test]
    async fn fallback_scan_ranks_by_descending_score_with_stable_ties() {
        let store = seeded_store(vec![
            chunk("c-low-1", "doc-a", vec![0.0, 1.0]),
            chunk("c-top", "doc-a", vec![1.0, 0.0]),
            chunk("c-mid", "doc-a", vec![0.6, 0.8]),
            chunk("c-low-2", "doc-a", vec![0.0, 2.0]),
        ])
        .await;

        let engine = RetrievalEngine::new(
            store,
            FakeEmbedder::returning(vec![1.0, 0.0]),
            FakeAnswerer { reply: "n/a" },
        );

        let outcome = engine
            .search(&RetrievalRequest::new("rank?", vec!["doc-a".to_string()], 10))
            .await
            .expect("search should succeed");

        // Tied zero-score chunks keep their insertion order.
        assert_eq!(ids(&outcome), vec!["c-top", "c-mid", "c-low-1", "c-low-2"]);
    }

    #[tokio::test]
    async fn results_are_truncated_to_top_k() {
        let store = seeded_store(vec![
            chunk("c1", "doc-a", vec![1.0, 0.0]),
            chunk("c2", "doc-a", vec![0.9, 0.1]),
            chunk("c3", "doc-a", vec![0.8, 0.2]),
        ])
        .await;

        let engine = RetrievalEngine::new(
            store,
            FakeEmbedder::returning(vec![1.0, 0.0]),
            FakeAnswerer { reply: "n/a" },
        );

        let outcome = engine
            .search(&RetrievalRequest::new("rank?", vec!["doc-a".to_string()], 2))
            .await
            .expect("search should succeed");

        assert_eq!(outcome.hits().len(), 2);
        assert_eq!(ids(&outcome), vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn hits_outside_the_active_set_are_dropped() {
        let store = seeded_store(vec![
            chunk("a1", "doc-a", vec![1.0, 0.0]),
            chunk("a2", "doc-a", vec![0.95, 0.05]),
            chunk("a3", "doc-a", vec![0.9, 0.1]),
            chunk("b1", "doc-b", vec![0.5, 0.5]),
            chunk("b2", "doc-b", vec![0.4, 0.6]),
        ])
        .await;

        let engine = RetrievalEngine::new(
            store,
            FakeEmbedder::returning(vec![1.0, 0.0]),
            FakeAnswerer { reply: "n/a" },
        );

        let mut request = RetrievalRequest::new(
            "which doc?",
            vec!["doc-a".to_string(), "doc-b".to_string()],
            10,
        );
        request.active_document_ids = Some(vec!["doc-b".to_string()]);

        let outcome = engine.search(&request).await.expect("search should succeed");

        let hit_ids = ids(&outcome);
        assert_eq!(hit_ids, vec!["b1", "b2"]);
        assert!(outcome
            .hits()
            .iter()
            .all(|hit| hit.document_id == "doc-b"));
    }

    #[tokio::test]
    async fn fully_filtered_results_are_reported_as_stale() {
        let store = seeded_store(vec![chunk("a1", "doc-a", vec![1.0, 0.0])]).await;

        let engine = RetrievalEngine::new(
            store,
            FakeEmbedder::returning(vec![1.0, 0.0]),
            FakeAnswerer { reply: "n/a" },
        );

        let mut request = RetrievalRequest::new("stale?", vec!["doc-a".to_string()], 3);
        request.active_document_ids = Some(vec!["doc-c".to_string()]);

        let outcome = engine.search(&request).await.expect("search should succeed");
        assert!(matches!(
            outcome,
            RetrievalOutcome::Empty(EmptyReason::AllMatchesFiltered)
        ));
    }

    #[tokio::test]
    async fn native_search_path_produces_ranked_hits() {
        let store = seeded_store(vec![
            chunk("c2", "doc-a", vec![0.6, 0.8]),
            chunk("c1", "doc-a", vec![1.0, 0.0]),
        ])
        .await
        .with_native_search();

        let engine = RetrievalEngine::new(
            store,
            FakeEmbedder::returning(vec![1.0, 0.0]),
            FakeAnswerer { reply: "n/a" },
        );

        let outcome = engine
            .search(&RetrievalRequest::new("rank?", vec!["doc-a".to_string()], 5))
            .await
            .expect("search should succeed");

        assert_eq!(ids(&outcome), vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn embedding_failure_surfaces_as_search_unavailable() {
        let store = seeded_store(vec![chunk("c1", "doc-a", vec![1.0, 0.0])]).await;
        let engine = RetrievalEngine::new(store, FakeEmbedder::failing(), FakeAnswerer {
            reply: "n/a",
        });

        let result = engine
            .search(&RetrievalRequest::new("broken?", vec!["doc-a".to_string()], 3))
            .await;

        assert!(matches!(result, Err(RetrievalError::SearchUnavailable(_))));
    }

    #[tokio::test]
    async fn punctuation_only_question_never_reaches_retrieval() {
        let embedder = FakeEmbedder::returning(vec![1.0, 0.0]);
        let engine = RetrievalEngine::new(MemoryStore::new(), embedder, FakeAnswerer {
            reply: "yes",
        });

        let response = engine
            .answer_query(&RetrievalRequest::new("?", vec!["doc-a".to_string()], 3))
            .await
            .expect("query should succeed");

        assert!(matches!(response, QueryResponse::NeedsClarification { .. }));
        assert_eq!(engine.embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn answered_queries_carry_evidence() {
        let store = seeded_store(vec![chunk("c1", "doc-a", vec![1.0, 0.0])]).await;
        let engine = RetrievalEngine::new(
            store,
            FakeEmbedder::returning(vec![1.0, 0.0]),
            FakeAnswerer {
                reply: "X is Y, per the guide.",
            },
        );

        let response = engine
            .answer_query(&RetrievalRequest::new(
                "What is the meaning of X?",
                vec!["doc-a".to_string()],
                3,
            ))
            .await
            .expect("query should succeed");

        match response {
            QueryResponse::Answered { answer, hits } => {
                assert_eq!(answer, "X is Y, per the guide.");
                assert_eq!(hits.len(), 1);
                assert_eq!(hits[0].chunk_id, "c1");
            }
            other => panic!("expected an answered response, got {other:?}"),
        }
    }
}
