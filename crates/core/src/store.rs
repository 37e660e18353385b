//! The public store contract. Backend failures never escape it: every
//! operation logs the error and returns its empty/false value instead.

use crate::config::BackendKind;
use crate::error::StoreError;
use crate::models::{ChunkMetadata, SearchHit, StoredChunk};
use crate::stores::{ChromaStore, FaissStore, MilvusStore, PineconeStore, QdrantStore, WeaviateStore};
use crate::traits::VectorBackend;
use tracing::{error, info, warn};

pub const DEFAULT_SEARCH_LIMIT: usize = 5;

pub enum VectorStore {
    Chroma(ChromaStore),
    Qdrant(QdrantStore),
    Weaviate(WeaviateStore),
    Milvus(MilvusStore),
    Faiss(FaissStore),
    Pinecone(PineconeStore),
}

impl From<ChromaStore> for VectorStore {
    fn from(store: ChromaStore) -> Self {
        VectorStore::Chroma(store)
    }
}

impl From<QdrantStore> for VectorStore {
    fn from(store: QdrantStore) -> Self {
        VectorStore::Qdrant(store)
    }
}

impl From<WeaviateStore> for VectorStore {
    fn from(store: WeaviateStore) -> Self {
        VectorStore::Weaviate(store)
    }
}

impl From<MilvusStore> for VectorStore {
    fn from(store: MilvusStore) -> Self {
        VectorStore::Milvus(store)
    }
}

impl From<FaissStore> for VectorStore {
    fn from(store: FaissStore) -> Self {
        VectorStore::Faiss(store)
    }
}

impl From<PineconeStore> for VectorStore {
    fn from(store: PineconeStore) -> Self {
        VectorStore::Pinecone(store)
    }
}

fn isolate<T>(backend: BackendKind, operation: &str, result: Result<T, StoreError>, fallback: T) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            error!(backend = %backend, operation, error = %err, "vector store operation failed");
            fallback
        }
    }
}

impl VectorStore {
    fn backend(&self) -> &dyn VectorBackend {
        match self {
            VectorStore::Chroma(store) => store,
            VectorStore::Qdrant(store) => store,
            VectorStore::Weaviate(store) => store,
            VectorStore::Milvus(store) => store,
            VectorStore::Faiss(store) => store,
            VectorStore::Pinecone(store) => store,
        }
    }

    fn backend_mut(&mut self) -> &mut dyn VectorBackend {
        match self {
            VectorStore::Chroma(store) => store,
            VectorStore::Qdrant(store) => store,
            VectorStore::Weaviate(store) => store,
            VectorStore::Milvus(store) => store,
            VectorStore::Faiss(store) => store,
            VectorStore::Pinecone(store) => store,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend().kind()
    }

    /// Embeds and persists `chunks` with their metadata, one record each.
    /// An empty batch succeeds without touching the backend.
    pub fn store_chunks(&mut self, chunks: &[String], metadata: &[ChunkMetadata]) -> bool {
        let kind = self.kind();
        if chunks.is_empty() {
            warn!(backend = %kind, "no chunks to store");
            return true;
        }
        if chunks.len() != metadata.len() {
            error!(
                backend = %kind,
                chunks = chunks.len(),
                metadata = metadata.len(),
                "chunk and metadata counts differ"
            );
            return false;
        }

        let written = self.backend_mut().insert(chunks, metadata);
        match isolate(kind, "store_chunks", written.map(Some), None) {
            Some(count) => {
                info!(backend = %kind, count, "stored chunks");
                true
            }
            None => false,
        }
    }

    /// At most `limit` hits, best first.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let mut hits = isolate(self.kind(), "search", self.backend().query(query, limit), Vec::new());
        hits.truncate(limit);
        hits
    }

    pub fn get_all_chunks(&self) -> Vec<StoredChunk> {
        isolate(self.kind(), "get_all_chunks", self.backend().list(), Vec::new())
    }

    /// `false` when the id is unknown or the backend call failed.
    pub fn delete_chunk(&mut self, id: &str) -> bool {
        let kind = self.kind();
        let removed = isolate(kind, "delete_chunk", self.backend_mut().remove(id), false);
        if !removed {
            info!(backend = %kind, id, "chunk not deleted");
        }
        removed
    }

    pub fn clear_collection(&mut self) -> bool {
        let kind = self.kind();
        let result = self.backend_mut().reset().map(|()| true);
        isolate(kind, "clear_collection", result, false)
    }

    /// Releases backend resources. The store cannot be used afterwards.
    pub fn close(mut self) -> bool {
        let kind = self.kind();
        let result = self.backend_mut().close().map(|()| true);
        isolate(kind, "close", result, false)
    }
}
