use crate::{
    Chunk, ChunkMetadata, DocumentFingerprint, ExportedChunk, IngestError, StoredChunk,
    VectorStore,
};
use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const DOCUMENT_EXTENSIONS: [&str; 3] = ["json", "md", "txt"];

/// Recursively collects `.json`, `.md` and `.txt` files, sorted by path.
pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                DOCUMENT_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// `.json` files are parsed; anything else is returned as a JSON string.
pub fn load_document(path: &Path) -> Result<Value, IngestError> {
    let raw = fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        Ok(serde_json::from_str(&raw)?)
    } else {
        Ok(Value::String(raw))
    }
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn fingerprint_document(path: &Path, source: &str) -> Result<DocumentFingerprint, IngestError> {
    Ok(DocumentFingerprint {
        source: source.to_string(),
        file_path: path.to_string_lossy().to_string(),
        checksum: digest_file(path)?,
        ingested_at: Utc::now(),
    })
}

/// File name used as the `source` of a document when the caller has none.
pub fn source_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

/// One metadata record per chunk, indices dense from zero.
pub fn build_metadata(chunks: &[Chunk], source: &str, file_path: &str) -> Vec<ChunkMetadata> {
    let total = chunks.len() as u64;
    chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| ChunkMetadata {
            source: source.to_string(),
            chunk_index: index as u64,
            total_chunks: total,
            file_path: file_path.to_string(),
            chunk_type: chunk.kind,
        })
        .collect()
}

pub fn list_chunks(store: &VectorStore) -> Vec<StoredChunk> {
    store.get_all_chunks()
}

pub fn to_exported(chunks: &[StoredChunk]) -> Vec<ExportedChunk> {
    chunks
        .iter()
        .map(|chunk| ExportedChunk {
            id: chunk.id.clone().unwrap_or_default(),
            content: chunk.text.clone(),
            source: if chunk.source.is_empty() {
                chunk.metadata.source_or_unknown()
            } else {
                chunk.source.clone()
            },
        })
        .collect()
}

/// Writes every stored chunk as `[{id, content, source}]` and returns the count.
pub fn export_chunks(store: &VectorStore, path: &Path) -> Result<usize, IngestError> {
    let exported = to_exported(&list_chunks(store));
    write_export(&exported, path)?;
    Ok(exported.len())
}

/// Pretty JSON, two-space indent; non-ASCII stays unescaped.
pub fn write_export(chunks: &[ExportedChunk], path: &Path) -> Result<(), IngestError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(chunks)?)?;
    Ok(())
}
