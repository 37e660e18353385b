//! Token-bounded chunking.
//!
//! Two strategies are available: a plain sliding token window over the whole
//! text ([`chunk_text`]) and the table-aware hybrid splitter
//! ([`hybrid_chunk`]). The hybrid splitter isolates table-like spans first and
//! only size-bounds the prose between them; tables are never split.

use crate::error::IngestError;
use crate::models::{Chunk, ChunkKind};
use crate::tokenizer::Tokenizer;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const DEFAULT_MAX_TOKENS: usize = 512;
pub const DEFAULT_OVERLAP: usize = 50;

const TABLE_KEYWORDS: &str = r"(?i)\b(?:table|row|column|cell|header)s?\b";
const ASCII_BORDER: &str = r"^\s*\+-[-+]+\+\s*$";
const SENTENCE_BOUNDARY: &str = r"[.!?]\s+";
const PARAGRAPH_BREAK: &str = r"\n\s*\n";
const MULTI_SPACE: &str = r"\s{2,}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    #[default]
    Hybrid,
    Token,
}

impl FromStr for ChunkStrategy {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hybrid" => Ok(Self::Hybrid),
            "token" | "fixed" => Ok(Self::Token),
            other => Err(IngestError::InvalidChunkConfig(format!(
                "unknown chunking strategy `{other}` (expected hybrid or token)"
            ))),
        }
    }
}

/// Validated chunking parameters. `overlap < max_tokens` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    max_tokens: usize,
    overlap: usize,
    strategy: ChunkStrategy,
}

impl ChunkingConfig {
    pub fn new(
        max_tokens: usize,
        overlap: usize,
        strategy: ChunkStrategy,
    ) -> Result<Self, IngestError> {
        if max_tokens == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        if overlap >= max_tokens {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {overlap} must be smaller than max_tokens {max_tokens}"
            )));
        }
        Ok(Self {
            max_tokens,
            overlap,
            strategy,
        })
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn strategy(&self) -> ChunkStrategy {
        self.strategy
    }

    fn step(&self) -> usize {
        self.max_tokens - self.overlap
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            overlap: DEFAULT_OVERLAP,
            strategy: ChunkStrategy::Hybrid,
        }
    }
}

/// What a [`TableDetector`] classifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// Every line is classified on its own; each table line becomes one chunk.
    Line,
    /// Blank-line separated blocks are classified as a whole.
    Block,
}

/// Pluggable table heuristic used by the hybrid chunker.
pub trait TableDetector {
    fn granularity(&self) -> Granularity;
    fn is_table_like(&self, candidate: &str) -> bool;
}

/// Per-line heuristic: table keyword, more than one pipe- or tab-delimited
/// cell, or an ASCII-art border.
pub struct LineTableDetector {
    keywords: Regex,
    border: Regex,
}

impl LineTableDetector {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            keywords: Regex::new(TABLE_KEYWORDS)?,
            border: Regex::new(ASCII_BORDER)?,
        })
    }
}

impl TableDetector for LineTableDetector {
    fn granularity(&self) -> Granularity {
        Granularity::Line
    }

    fn is_table_like(&self, line: &str) -> bool {
        if line.trim().is_empty() {
            return false;
        }
        self.keywords.is_match(line)
            || delimited_cells(line, '|') > 1
            || delimited_cells(line, '\t') > 1
            || self.border.is_match(line)
    }
}

/// Whole-block heuristic, see [`is_table_block`].
pub struct BlockTableDetector {
    border: Regex,
    multi_space: Regex,
}

impl BlockTableDetector {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            border: Regex::new(ASCII_BORDER)?,
            multi_space: Regex::new(MULTI_SPACE)?,
        })
    }
}

impl TableDetector for BlockTableDetector {
    fn granularity(&self) -> Granularity {
        Granularity::Block
    }

    fn is_table_like(&self, block: &str) -> bool {
        let lines = block
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>();

        if lines.is_empty() {
            return false;
        }

        if constant_count_above_one(&lines, |line| line.matches('|').count())
            || constant_count_above_one(&lines, |line| line.matches('\t').count())
        {
            return true;
        }

        if lines.iter().any(|line| self.border.is_match(line)) {
            return true;
        }

        // a single line with a double space is ordinary prose
        lines.len() > 1
            && constant_count_above_one(&lines, |line| self.multi_space.split(line).count())
    }
}

/// Evaluates a multi-line candidate block: constant pipe count > 1 on every
/// line, constant tab count > 1, an ASCII-art border line, or a constant
/// multi-space column count > 1 across at least two lines.
pub fn is_table_block(block: &str) -> Result<bool, IngestError> {
    Ok(BlockTableDetector::new()?.is_table_like(block))
}

fn delimited_cells(line: &str, delimiter: char) -> usize {
    line.split(delimiter)
        .filter(|cell| !cell.trim().is_empty())
        .count()
}

fn constant_count_above_one<F>(lines: &[&str], count: F) -> bool
where
    F: Fn(&str) -> usize,
{
    let mut counts = lines.iter().map(|line| count(line));
    match counts.next() {
        Some(first) if first > 1 => counts.all(|other| other == first),
        _ => false,
    }
}

/// Baseline strategy: a sliding token window over the whole input, no table
/// awareness. Windows that decode to whitespace are dropped.
pub fn chunk_text(
    text: &str,
    tokenizer: &dyn Tokenizer,
    config: &ChunkingConfig,
) -> Result<Vec<String>, IngestError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let tokens = tokenizer.encode(text)?;
    let mut chunks = Vec::new();
    for window in sliding_windows(&tokens, config) {
        let decoded = tokenizer.decode(window)?;
        if !decoded.trim().is_empty() {
            chunks.push(decoded);
        }
    }
    Ok(chunks)
}

/// Token windows of `max_tokens` advancing by `max_tokens - overlap`.
/// Consecutive windows share exactly `overlap` tokens; the final window ends
/// at the last token.
pub fn sliding_windows<'t>(tokens: &'t [u32], config: &ChunkingConfig) -> Vec<&'t [u32]> {
    let mut windows = Vec::new();
    let mut start = 0;
    while start < tokens.len() {
        let end = (start + config.max_tokens).min(tokens.len());
        windows.push(&tokens[start..end]);
        if end == tokens.len() {
            break;
        }
        start += config.step();
    }
    windows
}

/// Table-aware chunking with the default per-line table heuristic.
pub fn hybrid_chunk(
    text: &str,
    tokenizer: &dyn Tokenizer,
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    let detector = LineTableDetector::new()?;
    hybrid_chunk_with(text, tokenizer, config, &detector)
}

pub fn hybrid_chunk_with(
    text: &str,
    tokenizer: &dyn Tokenizer,
    config: &ChunkingConfig,
    detector: &dyn TableDetector,
) -> Result<Vec<Chunk>, IngestError> {
    let splitter = ProseSplitter::new(tokenizer, config)?;
    let mut chunks = Vec::new();

    for block in partition_blocks(text, detector)? {
        match block.kind {
            ChunkKind::Table => chunks.push(Chunk::table(block.content.trim())),
            ChunkKind::Text => splitter.split_into(&block.content, &mut chunks)?,
        }
    }

    Ok(chunks)
}

/// Runs the strategy selected in `config`. Token-window chunks are typed as text.
pub fn chunk_document(
    text: &str,
    tokenizer: &dyn Tokenizer,
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    match config.strategy {
        ChunkStrategy::Hybrid => hybrid_chunk(text, tokenizer, config),
        ChunkStrategy::Token => Ok(chunk_text(text, tokenizer, config)?
            .into_iter()
            .map(Chunk::text)
            .collect()),
    }
}

pub fn flatten_hybrid_chunks(chunks: &[Chunk]) -> Vec<String> {
    chunks.iter().map(|chunk| chunk.content.clone()).collect()
}

/// Splits `text` into ordered raw text/table blocks.
pub fn partition_blocks(
    text: &str,
    detector: &dyn TableDetector,
) -> Result<Vec<Chunk>, IngestError> {
    let mut blocks = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    let (candidates, joiner): (Vec<&str>, &str) = match detector.granularity() {
        Granularity::Line => (text.lines().collect(), "\n"),
        Granularity::Block => (Regex::new(PARAGRAPH_BREAK)?.split(text).collect(), "\n\n"),
    };

    for candidate in candidates {
        if detector.is_table_like(candidate) {
            flush_pending(&mut pending, joiner, &mut blocks);
            blocks.push(Chunk::table(candidate));
        } else {
            pending.push(candidate);
        }
    }
    flush_pending(&mut pending, joiner, &mut blocks);

    Ok(blocks)
}

fn flush_pending(pending: &mut Vec<&str>, joiner: &str, blocks: &mut Vec<Chunk>) {
    if pending.is_empty() {
        return;
    }
    let joined = pending.join(joiner);
    pending.clear();
    if !joined.trim().is_empty() {
        blocks.push(Chunk::text(joined));
    }
}

/// Paragraph, then sentence, then token-window splitting of prose.
struct ProseSplitter<'a> {
    tokenizer: &'a dyn Tokenizer,
    config: &'a ChunkingConfig,
    paragraph_break: Regex,
    sentence_boundary: Regex,
}

impl<'a> ProseSplitter<'a> {
    fn new(tokenizer: &'a dyn Tokenizer, config: &'a ChunkingConfig) -> Result<Self, IngestError> {
        Ok(Self {
            tokenizer,
            config,
            paragraph_break: Regex::new(PARAGRAPH_BREAK)?,
            sentence_boundary: Regex::new(SENTENCE_BOUNDARY)?,
        })
    }

    fn split_into(&self, block: &str, out: &mut Vec<Chunk>) -> Result<(), IngestError> {
        for paragraph in self.paragraph_break.split(block) {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }

            if self.tokenizer.count(paragraph)? <= self.config.max_tokens {
                out.push(Chunk::text(paragraph));
                continue;
            }

            for sentence in self.sentences(paragraph) {
                let sentence = sentence.trim();
                if sentence.is_empty() {
                    continue;
                }

                let tokens = self.tokenizer.encode(sentence)?;
                if tokens.len() <= self.config.max_tokens {
                    out.push(Chunk::text(sentence));
                    continue;
                }

                for window in sliding_windows(&tokens, self.config) {
                    let decoded = self.tokenizer.decode(window)?;
                    let decoded = decoded.trim();
                    if !decoded.is_empty() {
                        out.push(Chunk::text(decoded));
                    }
                }
            }
        }
        Ok(())
    }

    /// Splits after `.`, `!` or `?` when followed by whitespace; the
    /// punctuation stays with its sentence.
    fn sentences<'t>(&self, paragraph: &'t str) -> Vec<&'t str> {
        let mut sentences = Vec::new();
        let mut start = 0;
        for boundary in self.sentence_boundary.find_iter(paragraph) {
            sentences.push(&paragraph[start..boundary.start() + 1]);
            start = boundary.end();
        }
        sentences.push(&paragraph[start..]);
        sentences
    }
}
