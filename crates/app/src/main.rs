use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use docvec_core::{
    chunk_document, export_chunks, extract_text, list_chunks, load_document, BackendConfig,
    CharacterTokenizer, ChunkStrategy, ChunkingConfig, HfTokenizer, Pipeline, Tokenizer,
    VectorStore, VectorStoreFactory, DEFAULT_SEARCH_LIMIT,
};
use docvec_core::chunking::{DEFAULT_MAX_TOKENS, DEFAULT_OVERLAP};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docvec", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON backend config file. Flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backend type: chroma, qdrant, weaviate, milvus, faiss or pinecone.
    #[arg(long)]
    backend: Option<String>,

    #[arg(long)]
    collection: Option<String>,

    #[arg(long)]
    embedding_model: Option<String>,

    /// Directory holding the local index files.
    #[arg(long)]
    index_path: Option<PathBuf>,

    /// Full server URL, overrides host and port.
    #[arg(long)]
    location: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    api_key: Option<String>,

    /// Pinecone region.
    #[arg(long)]
    environment: Option<String>,

    /// Dense + sparse hybrid search (qdrant only).
    #[arg(long, default_value_t = false)]
    use_sparse: bool,

    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    max_tokens: usize,

    #[arg(long, default_value_t = DEFAULT_OVERLAP)]
    overlap: usize,

    /// Chunking strategy: hybrid or token.
    #[arg(long, default_value = "hybrid")]
    strategy: String,

    /// tokenizer.json used for token counting. Falls back to one token per character.
    #[arg(long, env = "DOCVEC_TOKENIZER")]
    tokenizer: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk and store one document or every document under a folder.
    Ingest {
        /// A .json, .md or .txt file, or a folder searched recursively.
        #[arg(long)]
        path: PathBuf,
        /// Source label stored with each chunk (single files only).
        #[arg(long)]
        source: Option<String>,
    },
    /// Similarity search over the collection.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
    /// Print every stored chunk.
    List {
        /// Characters of chunk text to print.
        #[arg(long, default_value = "120")]
        preview: usize,
    },
    /// Write `[{id, content, source}]` for the whole collection.
    Export {
        #[arg(long, default_value = "chunks_export.json")]
        output: PathBuf,
    },
    /// Delete one chunk by id.
    Delete {
        #[arg(long)]
        id: String,
    },
    /// Drop and recreate the collection.
    Clear,
    /// Print the chunks of a document without storing them.
    Chunk {
        #[arg(long)]
        path: PathBuf,
    },
}

impl Cli {
    fn backend_config(&self) -> anyhow::Result<BackendConfig> {
        let mut config = match &self.config {
            Some(path) => BackendConfig::from_json_file(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => BackendConfig::from_env(),
        };

        if let Some(backend) = &self.backend {
            config.backend = backend.clone();
        }
        if let Some(collection) = &self.collection {
            config.collection_name = collection.clone();
        }
        if let Some(model) = &self.embedding_model {
            config.embedding_model = model.clone();
        }
        if let Some(index_path) = &self.index_path {
            config.index_path = Some(index_path.clone());
        }
        if let Some(location) = &self.location {
            config.location = Some(location.clone());
        }
        if let Some(host) = &self.host {
            config.host = Some(host.clone());
        }
        if self.port.is_some() {
            config.port = self.port;
        }
        if let Some(api_key) = &self.api_key {
            config.api_key = Some(api_key.clone());
        }
        if let Some(environment) = &self.environment {
            config.environment = Some(environment.clone());
        }
        config.use_sparse |= self.use_sparse;
        Ok(config)
    }

    fn chunking(&self) -> anyhow::Result<ChunkingConfig> {
        let strategy: ChunkStrategy = self.strategy.parse()?;
        Ok(ChunkingConfig::new(self.max_tokens, self.overlap, strategy)?)
    }

    fn tokenizer(&self) -> anyhow::Result<Arc<dyn Tokenizer>> {
        match &self.tokenizer {
            Some(path) => Ok(Arc::new(
                HfTokenizer::from_file(path).with_context(|| format!("loading {}", path.display()))?,
            )),
            None => {
                warn!("no tokenizer file given, counting characters as tokens");
                Ok(Arc::new(CharacterTokenizer))
            }
        }
    }
}

fn open_store(cli: &Cli) -> anyhow::Result<VectorStore> {
    let config = cli.backend_config()?;
    let store = VectorStoreFactory::create(&config)?;
    info!(backend = %store.kind(), collection = %config.collection_name, "store opened");
    Ok(store)
}

fn close(store: VectorStore) {
    if !store.close() {
        warn!("store did not close cleanly");
    }
}

fn preview(text: &str, limit: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= limit {
        flat
    } else {
        format!("{}...", flat.chars().take(limit).collect::<String>())
    }
}

fn ingest(cli: &Cli, path: &Path, source: Option<&str>) -> anyhow::Result<()> {
    let mut pipeline = Pipeline::new(cli.chunking()?, cli.tokenizer()?, open_store(cli)?);

    let complete = if path.is_dir() {
        let report = pipeline.ingest_folder(path)?;
        for skipped in &report.skipped_files {
            warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
        }
        for outcome in &report.documents {
            println!(
                "{} chunks={} tables={} stored={}",
                outcome.fingerprint.file_path, outcome.chunk_count, outcome.table_count, outcome.stored
            );
        }
        println!(
            "{} chunks stored from {} documents ({} skipped) at {}",
            report.stored_chunks(),
            report.documents.len(),
            report.skipped_files.len(),
            Utc::now().to_rfc3339()
        );
        report.is_complete()
    } else {
        let outcome = pipeline.ingest_document(path, source)?;
        println!(
            "{} chunks={} tables={} stored={} sha256={}",
            outcome.fingerprint.file_path,
            outcome.chunk_count,
            outcome.table_count,
            outcome.stored,
            outcome.fingerprint.checksum
        );
        outcome.stored
    };

    close(pipeline.into_store());
    if !complete {
        bail!("ingestion finished with failures");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "docvec boot"
    );

    match &cli.command {
        Command::Ingest { path, source } => ingest(&cli, path, source.as_deref())?,
        Command::Search { query, limit } => {
            let store = open_store(&cli)?;
            let hits = store.search(query, *limit);
            if hits.is_empty() {
                println!("no results for: {query}");
            }
            for (rank, hit) in hits.iter().enumerate() {
                println!(
                    "{}. score={:.4} id={} source={} chunk={}/{} type={}",
                    rank + 1,
                    hit.score,
                    hit.id,
                    hit.source,
                    hit.metadata.chunk_index,
                    hit.metadata.total_chunks,
                    hit.metadata.chunk_type
                );
                println!("   {}", preview(&hit.text, 300));
            }
            close(store);
        }
        Command::List { preview: width } => {
            let store = open_store(&cli)?;
            let chunks = list_chunks(&store);
            for chunk in &chunks {
                println!(
                    "{} [{}] {}",
                    chunk.id.as_deref().unwrap_or("-"),
                    chunk.source,
                    preview(&chunk.text, *width)
                );
            }
            println!("{} chunks", chunks.len());
            close(store);
        }
        Command::Export { output } => {
            let store = open_store(&cli)?;
            let count = export_chunks(&store, output)?;
            println!("exported {count} chunks to {}", output.display());
            close(store);
        }
        Command::Delete { id } => {
            let mut store = open_store(&cli)?;
            let deleted = store.delete_chunk(id);
            close(store);
            if !deleted {
                bail!("chunk {id} was not deleted");
            }
            println!("deleted {id}");
        }
        Command::Clear => {
            let mut store = open_store(&cli)?;
            let cleared = store.clear_collection();
            close(store);
            if !cleared {
                bail!("collection was not cleared");
            }
            println!("collection cleared");
        }
        Command::Chunk { path } => {
            let text = extract_text(&load_document(path)?);
            let tokenizer = cli.tokenizer()?;
            let chunks = chunk_document(&text, tokenizer.as_ref(), &cli.chunking()?)?;
            for (index, chunk) in chunks.iter().enumerate() {
                println!(
                    "--- chunk {index} [{}] tokens={}",
                    chunk.kind,
                    tokenizer.count(&chunk.content)?
                );
                println!("{}", chunk.content);
            }
            println!("{} chunks", chunks.len());
        }
    }

    Ok(())
}
