use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The only content kind the indexing pipeline accepts.
pub const PDF_CONTENT_KIND: &str = "application/pdf";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }
}

/// One uploaded document. `folder_id` is display metadata only: chunks are
/// keyed by `id`, so a document keeps its index when it moves between folders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub user_id: String,
    pub folder_id: Option<String>,
    pub original_filename: String,
    /// Storage locator, relative to the configured storage root.
    pub file_path: String,
    pub content_type: String,
    /// SHA-256 of the file content as registered, for change detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub status: DocumentStatus,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn is_indexable(&self) -> bool {
        self.content_type == PDF_CONTENT_KIND
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    QnaPair,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QnaPair {
    pub question: String,
    pub answer: String,
}

impl QnaPair {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }

    /// The stored chunk text. This exact shape is embedded and searched
    /// verbatim, so it must stay stable across releases.
    pub fn content(&self) -> String {
        format!("Q: {}\nA: {}", self.question, self.answer)
    }
}

/// Output of the extraction pipeline, before embedding.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub document_id: String,
    pub content: String,
    pub kind: ChunkKind,
    pub pair: Option<QnaPair>,
    pub pdf_name: String,
    pub pdf_path: String,
}

impl ChunkCandidate {
    pub fn metadata(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("pdf_name".to_string(), Value::String(self.pdf_name.clone()));
        map.insert("pdf_path".to_string(), Value::String(self.pdf_path.clone()));
        map.insert(
            "chunk_type".to_string(),
            Value::String(
                match self.kind {
                    ChunkKind::QnaPair => "qna_pair",
                    ChunkKind::Fallback => "fallback",
                }
                .to_string(),
            ),
        );
        if let Some(pair) = &self.pair {
            map.insert("question".to_string(), Value::String(pair.question.clone()));
            map.insert("answer".to_string(), Value::String(pair.answer.clone()));
        }
        map
    }
}

/// One persisted retrieval unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Map<String, Value>,
}

impl ChunkRecord {
    pub fn from_candidate(candidate: &ChunkCandidate, embedding: Vec<f32>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: candidate.document_id.clone(),
            content: candidate.content.clone(),
            embedding,
            metadata: candidate.metadata(),
        }
    }

    pub fn pdf_name(&self) -> String {
        self.metadata
            .get("pdf_name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string()
    }
}

/// A chunk scored by a vector search, either server-side or client-side.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub score: f64,
}

/// One ranked retrieval result. Transient, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalHit {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub pdf_name: String,
    pub score: f64,
}

/// Why a search produced no hits. Each case carries a distinct diagnostic so
/// operators never have to inspect store internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    NoDocumentsSelected,
    NoChunksIndexed,
    NoMatches,
    AllMatchesFiltered,
}

impl EmptyReason {
    pub fn diagnostic(&self) -> &'static str {
        match self {
            EmptyReason::NoDocumentsSelected => "no documents were selected for search",
            EmptyReason::NoChunksIndexed => "no chunks are indexed for the selected documents",
            EmptyReason::NoMatches => "chunks exist but none could be matched",
            EmptyReason::AllMatchesFiltered => {
                "all matches belonged to documents outside the active set"
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum RetrievalOutcome {
    Empty(EmptyReason),
    Hits(Vec<RetrievalHit>),
}

impl RetrievalOutcome {
    pub fn hits(&self) -> &[RetrievalHit] {
        match self {
            RetrievalOutcome::Hits(hits) => hits,
            RetrievalOutcome::Empty(_) => &[],
        }
    }
}

/// Result of `answer_query`: either a generated answer with its evidence, a
/// precise empty diagnostic, or a clarification request from the guard.
#[derive(Debug, Clone)]
pub enum QueryResponse {
    NeedsClarification { reason: String },
    NoContext { reason: EmptyReason },
    Answered { answer: String, hits: Vec<RetrievalHit> },
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Knobs for the extraction pipeline.
#[derive(Debug, Clone)]
pub struct IndexingOptions {
    /// Sizing for the terminal plain-text splitter.
    pub fallback_max_chars: usize,
    pub fallback_min_chars: usize,
    pub fallback_overlap_chars: usize,
    /// Model-assisted extraction only runs when the block length falls in
    /// this band; shorter blocks are not worth a call, longer ones cost too
    /// much.
    pub model_assist_min_chars: usize,
    pub model_assist_max_chars: usize,
    /// Numbered-list items longer than this are not treated as questions.
    pub question_item_max_chars: usize,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            fallback_max_chars: 1_200,
            fallback_min_chars: 80,
            fallback_overlap_chars: 120,
            model_assist_min_chars: 80,
            model_assist_max_chars: 6_000,
            question_item_max_chars: 160,
        }
    }
}
