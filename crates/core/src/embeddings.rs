use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Maps text to a fixed-dimension vector.
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    fn model_id(&self) -> &str;
    fn embed(&self, text: &str) -> Vec<f32>;

    /// Batch form; implementations backed by a model should override this.
    fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Hashes character trigrams into buckets and L2-normalizes the result.
#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
    pub model_id: String,
}

impl CharacterNgramEmbedder {
    pub fn new(model_id: impl Into<String>, dimensions: usize) -> Self {
        Self {
            dimensions,
            model_id: model_id.into(),
        }
    }
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let bucket = (fnv1a(&token) % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

/// Caller-owned cache so several stores can share one loaded model.
#[derive(Default)]
pub struct EmbedderCache {
    entries: HashMap<String, Arc<dyn Embedder>>,
}

impl EmbedderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert_with<F>(&mut self, model_id: &str, load: F) -> Arc<dyn Embedder>
    where
        F: FnOnce() -> Arc<dyn Embedder>,
    {
        self.entries
            .entry(model_id.to_string())
            .or_insert_with(load)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Term-frequency sparse vector over hashed lowercase words, indices sorted
/// and unique. Used as the sparse half of hybrid search.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

pub fn sparse_term_vector(text: &str) -> SparseVector {
    let mut counts = BTreeMap::<u32, f32>::new();
    for term in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
    {
        let index = (fnv1a(&term.to_lowercase()) & u64::from(u32::MAX)) as u32;
        *counts.entry(index).or_insert(0.0) += 1.0;
    }

    SparseVector {
        indices: counts.keys().copied().collect(),
        values: counts.values().copied().collect(),
    }
}

fn fnv1a(token: &str) -> u64 {
    let mut hash = 1469598103934665603u64;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}
