pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod factory;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod store;
pub mod stores;
pub mod tokenizer;
pub mod traits;

pub use chunking::{
    chunk_document, chunk_text, flatten_hybrid_chunks, hybrid_chunk, hybrid_chunk_with,
    is_table_block, BlockTableDetector, ChunkStrategy, ChunkingConfig, LineTableDetector,
    TableDetector,
};
pub use config::{BackendConfig, BackendKind};
pub use embeddings::{CharacterNgramEmbedder, Embedder, EmbedderCache, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ConfigError, IngestError, StoreError};
pub use extractor::{extract_text, resolve_reference};
pub use factory::VectorStoreFactory;
pub use ingest::{build_metadata, discover_documents, export_chunks, list_chunks, load_document};
pub use models::{
    Chunk, ChunkKind, ChunkMetadata, DocumentFingerprint, ExportedChunk, SearchHit, StoredChunk,
};
pub use orchestrator::{IngestOutcome, IngestionReport, Pipeline, SkippedDocument};
pub use store::{VectorStore, DEFAULT_SEARCH_LIMIT};
pub use tokenizer::{CharacterTokenizer, HfTokenizer, Tokenizer};
pub use traits::VectorBackend;
