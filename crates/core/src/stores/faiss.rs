//! In-process exact L2 index persisted as `{collection}.index` (vector
//! snapshot) and `{collection}.meta` (JSON records) under `index_path`.
//!
//! No file locking: two processes opening the same index path will clobber
//! each other's writes.

use crate::config::{BackendConfig, BackendKind};
use crate::embeddings::Embedder;
use crate::error::StoreError;
use crate::models::{sort_by_score_desc, ChunkMetadata, SearchHit, StoredChunk};
use crate::traits::VectorBackend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRecord {
    id: String,
    text: String,
    metadata: ChunkMetadata,
}

/// Brute-force squared-L2 index, row `i` belongs to record `i`.
#[derive(Debug, Clone, Default)]
struct FlatL2Index {
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatL2Index {
    fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
        }
    }

    fn add(&mut self, vectors: Vec<Vec<f32>>) -> Result<(), StoreError> {
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != self.dim) {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                actual: bad.len(),
            });
        }
        self.vectors.extend(vectors);
        Ok(())
    }

    /// `(row, distance)` pairs, nearest first.
    fn nearest(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut scored = self
            .vectors
            .iter()
            .enumerate()
            .map(|(row, vector)| (row, squared_l2(query, vector)))
            .collect::<Vec<_>>();
        scored.sort_by(|left, right| left.1.total_cmp(&right.1));
        scored.truncate(k);
        scored
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Binary layout: `[u32 dim][f32; dim]` repeated, little endian.
    fn write_to(&self, path: &Path) -> Result<(), StoreError> {
        let tmp = path.with_extension("index.tmp");
        {
            let mut out = fs::File::create(&tmp)?;
            for vector in &self.vectors {
                out.write_all(&(vector.len() as u32).to_le_bytes())?;
                out.write_all(bytemuck::cast_slice(&vector[..]))?;
            }
            out.flush()?;
        }
        fs::rename(tmp, path)?;
        Ok(())
    }

    fn read_from(path: &Path, dim: usize) -> Result<Self, StoreError> {
        let mut reader = BufReader::new(fs::File::open(path)?);
        let mut index = Self::new(dim);
        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(error) => return Err(error.into()),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut bytes = vec![0u8; 4 * len];
            reader.read_exact(&mut bytes)?;
            index.add(vec![bytemuck::pod_collect_to_vec::<u8, f32>(&bytes)])?;
        }
        Ok(index)
    }
}

fn squared_l2(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| (a - b) * (a - b))
        .sum()
}

pub struct FaissStore {
    index_file: PathBuf,
    meta_file: PathBuf,
    embedder: Arc<dyn Embedder>,
    index: FlatL2Index,
    records: Vec<IndexRecord>,
}

impl FaissStore {
    /// Loads `{collection}.index`/`.meta` when present, otherwise starts empty.
    pub fn open(config: &BackendConfig, embedder: Arc<dyn Embedder>) -> Result<Self, StoreError> {
        let dir = config.index_path();
        fs::create_dir_all(&dir)?;
        let index_file = dir.join(format!("{}.index", config.collection_name));
        let meta_file = dir.join(format!("{}.meta", config.collection_name));
        let dim = embedder.dimensions();

        let records: Vec<IndexRecord> = if meta_file.exists() {
            serde_json::from_str(&fs::read_to_string(&meta_file)?)?
        } else {
            Vec::new()
        };
        let index = if index_file.exists() {
            FlatL2Index::read_from(&index_file, dim)?
        } else {
            FlatL2Index::new(dim)
        };

        let mut store = Self {
            index_file,
            meta_file,
            embedder,
            index,
            records,
        };

        if store.index.len() != store.records.len() {
            warn!(
                vectors = store.index.len(),
                records = store.records.len(),
                "index and metadata disagree, re-embedding"
            );
            let index = store.embed_records(&store.records)?;
            let records = std::mem::take(&mut store.records);
            store.commit(index, records)?;
        }

        info!(
            path = %dir.display(),
            records = store.records.len(),
            "opened local index"
        );
        Ok(store)
    }

    fn save(&self) -> Result<(), StoreError> {
        self.persist(&self.index, &self.records)
    }

    fn persist(&self, index: &FlatL2Index, records: &[IndexRecord]) -> Result<(), StoreError> {
        index.write_to(&self.index_file)?;
        let tmp = self.meta_file.with_extension("meta.tmp");
        fs::write(&tmp, serde_json::to_vec(records)?)?;
        fs::rename(tmp, &self.meta_file)?;
        Ok(())
    }

    /// Fresh index over `records`, re-embedding every text.
    fn embed_records(&self, records: &[IndexRecord]) -> Result<FlatL2Index, StoreError> {
        let texts = records
            .iter()
            .map(|record| record.text.clone())
            .collect::<Vec<_>>();
        let mut index = FlatL2Index::new(self.embedder.dimensions());
        if !texts.is_empty() {
            index.add(self.embedder.embed_batch(&texts))?;
        }
        Ok(index)
    }

    /// Writes `index` and `records` to disk, then makes them current. A failed
    /// write leaves the in-memory state untouched.
    fn commit(&mut self, index: FlatL2Index, records: Vec<IndexRecord>) -> Result<(), StoreError> {
        self.persist(&index, &records)?;
        self.index = index;
        self.records = records;
        Ok(())
    }
}

impl VectorBackend for FaissStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Faiss
    }

    fn insert(&mut self, chunks: &[String], metadata: &[ChunkMetadata]) -> Result<usize, StoreError> {
        let mut index = self.index.clone();
        index.add(self.embedder.embed_batch(chunks))?;
        let mut records = self.records.clone();
        records.extend(chunks.iter().zip(metadata).map(|(text, metadata)| IndexRecord {
            id: Uuid::new_v4().to_string(),
            text: text.clone(),
            metadata: metadata.clone(),
        }));
        self.commit(index, records)?;
        debug!(count = chunks.len(), total = self.records.len(), "added vectors");
        Ok(chunks.len())
    }

    fn query(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, StoreError> {
        if self.records.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query);
        let mut hits = self
            .index
            .nearest(&vector, limit)
            .into_iter()
            .filter_map(|(row, distance)| {
                self.records.get(row).map(|record| SearchHit {
                    id: record.id.clone(),
                    text: record.text.clone(),
                    metadata: record.metadata.clone(),
                    score: 1.0 / (1.0 + f64::from(distance)),
                    source: record.metadata.source_or_unknown(),
                })
            })
            .collect::<Vec<_>>();
        sort_by_score_desc(&mut hits);
        Ok(hits)
    }

    fn list(&self) -> Result<Vec<StoredChunk>, StoreError> {
        Ok(self
            .records
            .iter()
            .map(|record| StoredChunk {
                id: Some(record.id.clone()),
                text: record.text.clone(),
                metadata: record.metadata.clone(),
                source: record.metadata.source_or_unknown(),
            })
            .collect())
    }

    fn remove(&mut self, id: &str) -> Result<bool, StoreError> {
        let Some(position) = self.records.iter().position(|record| record.id == id) else {
            return Ok(false);
        };
        let mut records = self.records.clone();
        records.remove(position);
        let index = self.embed_records(&records)?;
        self.commit(index, records)?;
        Ok(true)
    }

    fn reset(&mut self) -> Result<(), StoreError> {
        let index = FlatL2Index::new(self.embedder.dimensions());
        self.commit(index, Vec::new())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.save()
    }
}
