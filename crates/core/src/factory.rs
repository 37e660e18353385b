use crate::config::{BackendConfig, BackendKind};
use crate::embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
use crate::error::ConfigError;
use crate::store::VectorStore;
use crate::stores::{ChromaStore, FaissStore, MilvusStore, PineconeStore, QdrantStore, WeaviateStore};
use std::sync::Arc;
use tracing::info;

/// Builds a ready [`VectorStore`] from a [`BackendConfig`].
///
/// Construction connects, creates the collection or index when missing and
/// loads local files, so configuration and connection problems surface here
/// as errors instead of later as sentinel values.
pub struct VectorStoreFactory;

impl VectorStoreFactory {
    /// Uses the bundled n-gram embedder sized by `config.dimension`.
    pub fn create(config: &BackendConfig) -> Result<VectorStore, ConfigError> {
        let dimensions = config.dimension.unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS);
        if dimensions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dimension".to_string(),
                details: "must be greater than zero".to_string(),
            });
        }
        let embedder = Arc::new(CharacterNgramEmbedder::new(config.embedding_model.clone(), dimensions));
        Self::create_with_embedder(config, embedder)
    }

    pub fn create_with_embedder(
        config: &BackendConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<VectorStore, ConfigError> {
        let kind = config.kind()?;
        if let Some(expected) = config.dimension {
            if expected != embedder.dimensions() {
                return Err(ConfigError::InvalidValue {
                    field: "dimension".to_string(),
                    details: format!(
                        "config says {expected}, embedder {} produces {}",
                        embedder.model_id(),
                        embedder.dimensions()
                    ),
                });
            }
        }
        if config.collection_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "collection_name".to_string(),
                details: "must not be empty".to_string(),
            });
        }

        let store: VectorStore = match kind {
            BackendKind::Chroma => ChromaStore::connect(config, embedder)?.into(),
            BackendKind::Qdrant => QdrantStore::connect(config, embedder)?.into(),
            BackendKind::Weaviate => WeaviateStore::connect(config, embedder)?.into(),
            BackendKind::Milvus => MilvusStore::connect(config, embedder)?.into(),
            BackendKind::Faiss => VectorStore::from(FaissStore::open(config, embedder)?),
            BackendKind::Pinecone => PineconeStore::connect(config, embedder)?.into(),
        };
        info!(backend = %kind, collection = %config.collection_name, "vector store ready");
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::env_value;

    #[test]
    fn unknown_type_fails_construction() {
        let config = BackendConfig::new("elasticsearch");
        assert!(matches!(
            VectorStoreFactory::create(&config),
            Err(ConfigError::UnknownBackend(name)) if name == "elasticsearch"
        ));
    }

    #[test]
    fn type_match_is_case_insensitive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut config = BackendConfig::new("FAISS");
        config.index_path = Some(dir.path().to_path_buf());
        let store = VectorStoreFactory::create(&config)?;
        assert_eq!(store.kind(), BackendKind::Faiss);
        Ok(())
    }

    #[test]
    fn dimension_must_match_embedder() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut config = BackendConfig::new("faiss");
        config.index_path = Some(dir.path().to_path_buf());
        config.dimension = Some(128);
        let embedder: Arc<dyn Embedder> = Arc::new(CharacterNgramEmbedder::new("mini", 64));

        assert!(matches!(
            VectorStoreFactory::create_with_embedder(&config, embedder),
            Err(ConfigError::InvalidValue { field, .. }) if field == "dimension"
        ));
        config.dimension = Some(0);
        assert!(VectorStoreFactory::create(&config).is_err());
        Ok(())
    }

    #[test]
    fn pinecone_without_key_is_a_config_error() {
        if env_value("PINECONE_API_KEY").is_some() {
            return;
        }
        let config = BackendConfig::new("pinecone");
        assert!(matches!(
            VectorStoreFactory::create(&config),
            Err(ConfigError::MissingCredential { backend, field }) if backend == "pinecone" && field == "api_key"
        ));
    }

    #[test]
    fn unreachable_server_fails_at_construction() {
        let mut config = BackendConfig::new("qdrant");
        config.url = Some("http://127.0.0.1:9".to_string());
        config.timeout_secs = Some(1);
        assert!(matches!(
            VectorStoreFactory::create(&config),
            Err(ConfigError::Connect(_))
        ));
    }
}
