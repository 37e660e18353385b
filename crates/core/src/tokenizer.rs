use crate::error::IngestError;
use std::path::Path;

/// Token-level view of text used by the chunker.
///
/// `encode` must not add special tokens so windows can be decoded and
/// re-encoded without drift.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>, IngestError>;
    fn decode(&self, tokens: &[u32]) -> Result<String, IngestError>;

    fn count(&self, text: &str) -> Result<usize, IngestError> {
        Ok(self.encode(text)?.len())
    }
}

/// Wraps a Hugging Face `tokenizer.json` (e.g. the one shipped with
/// `sentence-transformers/all-MiniLM-L6-v2`).
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|error| {
            IngestError::Tokenizer(format!("load {}: {error}", path.display()))
        })?;
        Ok(Self { inner })
    }
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, IngestError> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|error| IngestError::Tokenizer(error.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, IngestError> {
        self.inner
            .decode(tokens, true)
            .map_err(|error| IngestError::Tokenizer(error.to_string()))
    }
}

/// One token per Unicode scalar value. Lossless, needs no model files.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharacterTokenizer;

impl Tokenizer for CharacterTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, IngestError> {
        Ok(text.chars().map(u32::from).collect())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, IngestError> {
        tokens
            .iter()
            .map(|&token| {
                char::from_u32(token).ok_or_else(|| {
                    IngestError::Tokenizer(format!("token {token} is not a unicode scalar"))
                })
            })
            .collect()
    }

    fn count(&self, text: &str) -> Result<usize, IngestError> {
        Ok(text.chars().count())
    }
}
