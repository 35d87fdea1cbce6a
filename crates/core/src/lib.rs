pub mod batch;
pub mod error;
pub mod extraction;
pub mod guard;
pub mod intake;
pub mod lifecycle;
pub mod models;
pub mod parser;
pub mod providers;
pub mod retrieval;
pub mod stores;
pub mod traits;

pub use batch::BatchScheduler;
pub use error::{IndexError, ProviderError, RetrievalError, StoreError};
pub use extraction::{extract_candidates, ChunkSource};
pub use guard::{screen, screen_by_length, Admissibility};
pub use intake::{
    digest_file, discover_pdf_files, register_folder, IntakeReport, RegisteredDocument,
    SkippedFile,
};
pub use lifecycle::{IndexOutcome, LifecycleController};
pub use models::{
    BatchReport, ChunkCandidate, ChunkKind, ChunkRecord, DocumentRecord, DocumentStatus,
    EmptyReason, IndexingOptions, QnaPair, QueryResponse, RetrievalHit, RetrievalOutcome,
    ScoredChunk, PDF_CONTENT_KIND,
};
pub use parser::{DocumentParser, LopdfParser, PdfBlockParser, TextBlock};
pub use providers::{OpenAiCompleter, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use retrieval::{cosine_similarity, RetrievalEngine, RetrievalRequest};
pub use stores::{MemoryStore, PostgrestStore};
pub use traits::{AnswerProvider, ChunkStore, DocumentStore, EmbeddingProvider};
