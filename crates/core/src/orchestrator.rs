use crate::chunking::{chunk_document, flatten_hybrid_chunks, ChunkingConfig};
use crate::extractor::extract_text;
use crate::ingest::{
    build_metadata, discover_documents, fingerprint_document, load_document, source_name,
};
use crate::tokenizer::Tokenizer;
use crate::{ChunkKind, DocumentFingerprint, IngestError, SearchHit, VectorStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub fingerprint: DocumentFingerprint,
    pub chunk_count: usize,
    pub table_count: usize,
    /// False when nothing was chunked or the backend rejected the batch.
    pub stored: bool,
}

#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestionReport {
    pub documents: Vec<IngestOutcome>,
    pub skipped_files: Vec<SkippedDocument>,
}

impl IngestionReport {
    pub fn stored_chunks(&self) -> usize {
        self.documents
            .iter()
            .filter(|outcome| outcome.stored)
            .map(|outcome| outcome.chunk_count)
            .sum()
    }

    /// Every discovered document was chunked and stored.
    pub fn is_complete(&self) -> bool {
        self.skipped_files.is_empty() && self.documents.iter().all(|outcome| outcome.stored)
    }
}

/// Load, extract, chunk and store, one document at a time.
pub struct Pipeline {
    chunking: ChunkingConfig,
    tokenizer: Arc<dyn Tokenizer>,
    store: VectorStore,
}

impl Pipeline {
    pub fn new(chunking: ChunkingConfig, tokenizer: Arc<dyn Tokenizer>, store: VectorStore) -> Self {
        Self {
            chunking,
            tokenizer,
            store,
        }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut VectorStore {
        &mut self.store
    }

    pub fn into_store(self) -> VectorStore {
        self.store
    }

    /// `source` defaults to the file name.
    pub fn ingest_document(
        &mut self,
        path: &Path,
        source: Option<&str>,
    ) -> Result<IngestOutcome, IngestError> {
        let source = match source {
            Some(source) => source.to_string(),
            None => source_name(path)?,
        };
        let fingerprint = fingerprint_document(path, &source)?;
        let document = load_document(path)?;
        let text = extract_text(&document);
        let chunks = chunk_document(&text, self.tokenizer.as_ref(), &self.chunking)?;
        let table_count = chunks
            .iter()
            .filter(|chunk| chunk.kind == ChunkKind::Table)
            .count();

        if chunks.is_empty() {
            warn!(path = %path.display(), "no text chunks generated");
            return Ok(IngestOutcome {
                fingerprint,
                chunk_count: 0,
                table_count,
                stored: false,
            });
        }

        let metadata = build_metadata(&chunks, &source, &fingerprint.file_path);
        let stored = self
            .store
            .store_chunks(&flatten_hybrid_chunks(&chunks), &metadata);
        info!(
            path = %path.display(),
            chunks = chunks.len(),
            tables = table_count,
            stored,
            "ingested document"
        );

        Ok(IngestOutcome {
            fingerprint,
            chunk_count: chunks.len(),
            table_count,
            stored,
        })
    }

    /// Best effort: a failing file is recorded and the run continues.
    pub fn ingest_folder(&mut self, folder: &Path) -> Result<IngestionReport, IngestError> {
        let files = discover_documents(folder);

        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no .json, .md or .txt files found in {}",
                folder.display()
            )));
        }

        let mut report = IngestionReport::default();
        for path in files {
            match self.ingest_document(&path, None) {
                Ok(outcome) => report.documents.push(outcome),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping document");
                    report.skipped_files.push(SkippedDocument {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        self.store.search(query, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkStrategy;
    use crate::config::BackendConfig;
    use crate::factory::VectorStoreFactory;
    use crate::tokenizer::CharacterTokenizer;
    use std::fs;
    use tempfile::tempdir;

    fn pipeline(index_dir: &Path, strategy: ChunkStrategy) -> Result<Pipeline, Box<dyn std::error::Error>> {
        let mut config = BackendConfig::new("faiss");
        config.index_path = Some(index_dir.to_path_buf());
        config.dimension = Some(64);
        let store = VectorStoreFactory::create(&config)?;
        let chunking = ChunkingConfig::new(200, 20, strategy)?;
        Ok(Pipeline::new(chunking, Arc::new(CharacterTokenizer), store))
    }

    #[test]
    fn json_document_is_chunked_and_stored() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let docs = dir.path().join("docs");
        fs::create_dir(&docs)?;
        let path = docs.join("manual.json");
        fs::write(
            &path,
            r#"{"texts": [{"text": "Check the pump."}, {"text": "|a|b|\n|c|d|"}, {"text": "Then the valve."}]}"#,
        )?;

        let mut pipeline = pipeline(&dir.path().join("index"), ChunkStrategy::Hybrid)?;
        let outcome = pipeline.ingest_document(&path, None)?;
        assert!(outcome.stored);
        assert_eq!(outcome.chunk_count, 4);
        assert_eq!(outcome.table_count, 2);
        assert_eq!(outcome.fingerprint.source, "manual.json");

        let stored = pipeline.store().get_all_chunks();
        assert_eq!(stored.len(), 4);
        assert!(stored.iter().all(|chunk| chunk.metadata.total_chunks == 4));
        assert_eq!(stored[1].text, "|a|b|");

        let hits = pipeline.search("pump", 1);
        assert_eq!(hits.len(), 1);
        assert!(pipeline.search("   ", 3).is_empty());
        Ok(())
    }

    #[test]
    fn empty_document_is_not_stored() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.json");
        fs::write(&path, r#"{"unexpected": 123}"#)?;

        let mut pipeline = pipeline(&dir.path().join("index"), ChunkStrategy::Token)?;
        let outcome = pipeline.ingest_document(&path, Some("custom"))?;
        assert!(!outcome.stored);
        assert_eq!(outcome.chunk_count, 0);
        assert_eq!(outcome.fingerprint.source, "custom");
        assert!(pipeline.store().get_all_chunks().is_empty());
        Ok(())
    }

    #[test]
    fn folder_ingestion_skips_broken_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let docs = dir.path().join("docs");
        fs::create_dir(&docs)?;
        fs::write(docs.join("a.md"), "First paragraph.\n\nSecond paragraph.")?;
        fs::write(docs.join("b.json"), "{broken")?;
        fs::write(docs.join("c.txt"), "plain text notes")?;

        let mut pipeline = pipeline(&dir.path().join("index"), ChunkStrategy::Hybrid)?;
        let report = pipeline.ingest_folder(&docs)?;

        assert_eq!(report.documents.len(), 2);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(
            report.skipped_files[0].path.file_name().and_then(|name| name.to_str()),
            Some("b.json")
        );
        assert_eq!(report.stored_chunks(), 3);
        assert!(!report.is_complete());
        Ok(())
    }

    #[test]
    fn folder_without_documents_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut pipeline = pipeline(&dir.path().join("index"), ChunkStrategy::Hybrid)?;
        let empty = dir.path().join("empty");
        fs::create_dir(&empty)?;
        assert!(pipeline.ingest_folder(&empty).is_err());
        Ok(())
    }
}
