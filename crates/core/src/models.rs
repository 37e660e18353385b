use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    #[default]
    Text,
    Table,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Text => "text",
            ChunkKind::Table => "table",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed unit produced by the chunker. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    pub content: String,
}

impl Chunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::Text,
            content: content.into(),
        }
    }

    pub fn table(content: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::Table,
            content: content.into(),
        }
    }
}

/// Per-chunk metadata persisted next to every vector.
///
/// All fields default so records written by other tools (or older versions)
/// still deserialize.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub chunk_index: u64,
    #[serde(default)]
    pub total_chunks: u64,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub chunk_type: ChunkKind,
}

impl ChunkMetadata {
    pub fn source_or_unknown(&self) -> String {
        if self.source.is_empty() {
            "unknown".to_string()
        } else {
            self.source.clone()
        }
    }
}

/// A record as returned by `get_all_chunks`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredChunk {
    pub id: Option<String>,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub source: String,
}

/// A similarity hit. Scores are only comparable within one backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f64,
    pub source: String,
}

/// Flat record written by `export_chunks`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportedChunk {
    pub id: String,
    pub content: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub source: String,
    pub file_path: String,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

pub(crate) fn sort_by_score_desc(hits: &mut [SearchHit]) {
    hits.sort_by(|left, right| right.score.total_cmp(&left.score));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_serializes_kind_as_type() {
        let value = serde_json::to_value(Chunk::table("|a|b|")).unwrap();
        assert_eq!(value["type"], "table");
        assert_eq!(value["content"], "|a|b|");
    }

    #[test]
    fn partial_metadata_still_deserializes() {
        let metadata: ChunkMetadata =
            serde_json::from_str(r#"{"source": "a.pdf", "page": 3}"#).unwrap();
        assert_eq!(metadata.source, "a.pdf");
        assert_eq!(metadata.chunk_type, ChunkKind::Text);
        assert_eq!(ChunkMetadata::default().source_or_unknown(), "unknown");
    }
}
