pub mod chunking;
pub mod cleaning;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod memory;
pub mod models;
pub mod retriever;
pub mod stores;
pub mod traits;

pub use chunking::{
    detect_problem_label, find_problem_labels, ChunkStrategy, Chunker, ChunkingConfig, LabelMatch,
    LabelPolicy, CHUNK_OVERLAP, CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE,
};
pub use cleaning::{normalize_whitespace, TextCleaner};
pub use embeddings::{
    dimensions_for_model, embed_with_retry, CharacterNgramEmbedder, Embedder, OpenAiEmbedder,
    RetryPolicy, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL, DEFAULT_OPENAI_BASE_URL,
};
pub use error::{EmbeddingError, IngestError, SearchError, StoreError};
pub use extractor::{LopdfExtractor, PdfExtractor};
pub use ingest::{
    discover_pdf_files, source_id_from_path, FolderReport, IngestionPipeline, SkippedPdf,
};
pub use memory::{render_memories, ConversationMemory, MemoryConfig};
pub use models::{
    ChunkMetadata, ChunkType, EmbeddingRecord, IngestionReport, LexicalQuery, MemoryRole,
    NeighborQuery, Resource, SearchHit, SourceFilter, TextChunk,
};
pub use retriever::{render_context, BoostWeights, RetrievalConfig, Retriever};
pub use stores::{InMemoryStore, QdrantStore};
pub use traits::{DocumentStore, KeywordIndex, VectorIndex};
