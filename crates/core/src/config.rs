//! Backend selection and connection settings.
//!
//! Every field except `type` is optional; adapters apply their own defaults.

use crate::embeddings::DEFAULT_EMBEDDING_MODEL;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_COLLECTION: &str = "pdf_chunks";
pub const DEFAULT_INDEX_PATH: &str = "./faiss_index";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Chroma,
    Qdrant,
    Weaviate,
    Milvus,
    Faiss,
    Pinecone,
}

impl BackendKind {
    pub const ALL: [BackendKind; 6] = [
        BackendKind::Chroma,
        BackendKind::Qdrant,
        BackendKind::Weaviate,
        BackendKind::Milvus,
        BackendKind::Faiss,
        BackendKind::Pinecone,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Chroma => "chroma",
            BackendKind::Qdrant => "qdrant",
            BackendKind::Weaviate => "weaviate",
            BackendKind::Milvus => "milvus",
            BackendKind::Faiss => "faiss",
            BackendKind::Pinecone => "pinecone",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_ascii_lowercase();
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lowered)
            .ok_or(ConfigError::UnknownBackend(lowered))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub backend: String,
    #[serde(default = "default_collection")]
    pub collection_name: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Must match the embedder's dimension when set.
    #[serde(default)]
    pub dimension: Option<usize>,

    #[serde(default)]
    pub index_path: Option<PathBuf>,

    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub secure: bool,

    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default)]
    pub cloud: Option<String>,

    #[serde(default)]
    pub use_sparse: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

impl BackendConfig {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            collection_name: default_collection(),
            embedding_model: default_embedding_model(),
            dimension: None,
            index_path: None,
            host: None,
            port: None,
            location: None,
            url: None,
            secure: false,
            api_key: None,
            environment: None,
            index_name: None,
            cloud: None,
            use_sparse: false,
            timeout_secs: None,
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Reads `VECTOR_STORE_TYPE` (default `faiss`), `EMBEDDING_MODEL`,
    /// `FAISS_INDEX_PATH`, `PINECONE_API_KEY` and `PINECONE_ENVIRONMENT`.
    pub fn from_env() -> Self {
        let mut config = Self::new(env_value("VECTOR_STORE_TYPE").unwrap_or_else(|| "faiss".into()));
        if let Some(model) = env_value("EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        config.index_path = env_value("FAISS_INDEX_PATH").map(PathBuf::from);
        config.api_key = env_value("PINECONE_API_KEY");
        config.environment = env_value("PINECONE_ENVIRONMENT");
        config
    }

    pub fn kind(&self) -> Result<BackendKind, ConfigError> {
        self.backend.parse()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INDEX_PATH))
    }

    /// Base URL from `url`, else `location`, else scheme + host + port.
    pub(crate) fn base_url(&self, default_host: &str, default_port: u16) -> String {
        if let Some(url) = self.url.as_deref().filter(|value| !value.trim().is_empty()) {
            return url.trim_end_matches('/').to_string();
        }
        if let Some(location) = self
            .location
            .as_deref()
            .filter(|value| !value.trim().is_empty())
        {
            return location.trim_end_matches('/').to_string();
        }
        let scheme = if self.secure { "https" } else { "http" };
        let host = self.host.as_deref().unwrap_or(default_host);
        let port = self.port.unwrap_or(default_port);
        format!("{scheme}://{host}:{port}")
    }
}

pub(crate) fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_is_case_insensitive() {
        assert_eq!("Qdrant".parse::<BackendKind>().unwrap(), BackendKind::Qdrant);
        assert_eq!(" FAISS ".parse::<BackendKind>().unwrap(), BackendKind::Faiss);
        assert!(matches!(
            "redis".parse::<BackendKind>(),
            Err(ConfigError::UnknownBackend(name)) if name == "redis"
        ));
    }

    #[test]
    fn json_config_applies_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("store.json");
        std::fs::write(&path, r#"{"type": "weaviate", "port": 9090, "secure": true}"#)?;

        let config = BackendConfig::from_json_file(&path)?;
        assert_eq!(config.kind()?, BackendKind::Weaviate);
        assert_eq!(config.collection_name, "pdf_chunks");
        assert_eq!(config.embedding_model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.base_url("localhost", 8080), "https://localhost:9090");
        assert_eq!(config.timeout(), Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn explicit_url_wins_over_host_and_port() {
        let mut config = BackendConfig::new("qdrant");
        config.location = Some("http://qdrant:6333/".to_string());
        config.host = Some("ignored".to_string());
        assert_eq!(config.base_url("localhost", 6333), "http://qdrant:6333");

        config.url = Some("https://cloud.example".to_string());
        assert_eq!(config.base_url("localhost", 6333), "https://cloud.example");
    }

    #[test]
    fn missing_type_is_a_parse_error() {
        let parsed = serde_json::from_str::<BackendConfig>(r#"{"collection_name": "x"}"#);
        assert!(parsed.is_err());
    }
}
