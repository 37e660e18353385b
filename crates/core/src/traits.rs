use crate::config::BackendKind;
use crate::error::StoreError;
use crate::models::{ChunkMetadata, SearchHit, StoredChunk};

/// Contract every backend adapter implements. Errors are returned as-is; the
/// public [`crate::VectorStore`] turns them into sentinel values.
pub trait VectorBackend {
    fn kind(&self) -> BackendKind;

    /// Persists one record per chunk and returns how many were written.
    /// Callers guarantee `chunks.len() == metadata.len()` and a non-empty batch.
    fn insert(&mut self, chunks: &[String], metadata: &[ChunkMetadata]) -> Result<usize, StoreError>;

    /// Hits ordered by descending score, at most `limit`.
    fn query(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, StoreError>;

    fn list(&self) -> Result<Vec<StoredChunk>, StoreError>;

    /// `Ok(false)` when no record has this id.
    fn remove(&mut self, id: &str) -> Result<bool, StoreError>;

    /// Drops and recreates the collection with the same settings.
    fn reset(&mut self) -> Result<(), StoreError>;

    fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
