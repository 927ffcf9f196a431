use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use course_rag_core::{
    render_context, source_id_from_path, CharacterNgramEmbedder, Chunker, DocumentStore, Embedder,
    InMemoryStore, IngestionPipeline, LopdfExtractor, OpenAiEmbedder, PdfExtractor, QdrantStore,
    Retriever, SourceFilter, TextCleaner, VectorIndex, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_OPENAI_BASE_URL,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendKind {
    /// In-process store persisted as a JSON snapshot.
    Memory,
    Qdrant,
}

#[derive(Parser)]
#[command(name = "course-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Vector store backend
    #[arg(long, value_enum, default_value = "memory")]
    backend: BackendKind,

    /// Snapshot file for the memory backend
    #[arg(long, env = "RAG_SNAPSHOT", default_value = "rag-store.json")]
    snapshot: PathBuf,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "course_chunks")]
    qdrant_collection: String,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    openai_base_url: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Embedding model name
    #[arg(long, env = "EMBED_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embed_model: String,

    /// Use the local trigram embedder instead of the embedding API.
    #[arg(long, default_value_t = false)]
    offline_embeddings: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every PDF below a folder; sources are named after file stems.
    Ingest {
        #[arg(long)]
        folder: PathBuf,
    },
    /// Ingest one PDF, replacing whatever the source held before.
    IngestFile {
        #[arg(long)]
        path: PathBuf,
        /// Source id; defaults to the sanitized file stem.
        #[arg(long)]
        source: Option<String>,
    },
    /// Show how a PDF would be chunked without embedding or storing it.
    Chunk {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        source: Option<String>,
    },
    /// Retrieve the most relevant chunks for a question.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "5")]
        limit: usize,
        /// Restrict results to these sources (repeatable).
        #[arg(long = "source")]
        sources: Vec<String>,
        /// Print the grounding context block instead of scored hits.
        #[arg(long, default_value_t = false)]
        context: bool,
    },
    /// List stored sources with their embedding counts.
    Sources,
}

enum Backend {
    Memory {
        store: Arc<InMemoryStore>,
        snapshot: PathBuf,
    },
    Qdrant(Arc<QdrantStore>),
}

impl Backend {
    async fn open(cli: &Cli, dimensions: usize) -> anyhow::Result<Self> {
        match cli.backend {
            BackendKind::Memory => {
                let store = InMemoryStore::load(&cli.snapshot)
                    .await
                    .with_context(|| format!("loading {}", cli.snapshot.display()))?;
                if let Some(stored) = store.dimensions().await {
                    if stored != dimensions {
                        bail!(
                            "snapshot {} holds {stored}-dimensional embeddings but the embedder produces {dimensions}",
                            cli.snapshot.display()
                        );
                    }
                }
                Ok(Self::Memory {
                    store: Arc::new(store),
                    snapshot: cli.snapshot.clone(),
                })
            }
            BackendKind::Qdrant => {
                let store = QdrantStore::new(&cli.qdrant_url, &cli.qdrant_collection, dimensions)?;
                store.ensure_collection().await?;
                Ok(Self::Qdrant(Arc::new(store)))
            }
        }
    }

    fn store(&self) -> Arc<dyn DocumentStore> {
        match self {
            Self::Memory { store, .. } => store.clone() as Arc<dyn DocumentStore>,
            Self::Qdrant(store) => store.clone(),
        }
    }

    async fn persist(&self) -> anyhow::Result<()> {
        if let Self::Memory { store, snapshot } = self {
            store
                .save(snapshot)
                .await
                .with_context(|| format!("writing {}", snapshot.display()))?;
            info!(path = %snapshot.display(), "saved store snapshot");
        }
        Ok(())
    }
}

fn build_embedder(cli: &Cli) -> anyhow::Result<Arc<dyn Embedder>> {
    if cli.offline_embeddings {
        return Ok(Arc::new(CharacterNgramEmbedder::default()));
    }

    let Some(api_key) = cli.openai_api_key.as_deref() else {
        bail!("OPENAI_API_KEY is not set; pass --openai-api-key or --offline-embeddings");
    };
    Ok(Arc::new(OpenAiEmbedder::new(
        &cli.openai_base_url,
        api_key,
        &cli.embed_model,
    )?))
}

fn resolve_source(path: &Path, source: Option<String>) -> anyhow::Result<String> {
    match source {
        Some(source) => Ok(source),
        None => Ok(source_id_from_path(path)?),
    }
}

async fn connect(cli: &Cli) -> anyhow::Result<(Backend, Arc<dyn Embedder>)> {
    let embedder = build_embedder(cli)?;
    let backend = Backend::open(cli, embedder.dimensions()).await?;
    Ok((backend, embedder))
}

async fn preview_chunks(path: &Path, source: Option<String>) -> anyhow::Result<()> {
    let source = resolve_source(path, source)?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let raw = LopdfExtractor.extract_text(&bytes)?;
    let cleaned = TextCleaner::new().clean_paragraphs(&raw);

    for (index, chunk) in Chunker::default().chunk(&cleaned, &source).iter().enumerate() {
        println!(
            "#{index} type={} label={} chars={}",
            chunk.metadata.chunk_type.as_str(),
            chunk.metadata.problem_label.as_deref().unwrap_or("-"),
            chunk.content.chars().count()
        );
        println!("{}\n", chunk.content);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "course-rag boot"
    );

    match &cli.command {
        Command::Ingest { folder } => {
            let (backend, embedder) = connect(&cli).await?;
            let pipeline = IngestionPipeline::new(backend.store(), embedder);
            let report = pipeline.ingest_folder(folder).await?;

            for skipped in &report.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
            }
            for document in &report.documents {
                println!(
                    "{}: {} chunks ({} dropped, {} replaced) sha256={}",
                    document.source,
                    document.chunk_count,
                    document.dropped_chunks,
                    document.replaced_records,
                    document.checksum
                );
            }
            println!(
                "{} chunks ingested from {} documents at {}",
                report.chunk_count(),
                report.documents.len(),
                Utc::now().to_rfc3339()
            );
            backend.persist().await?;
        }
        Command::IngestFile { path, source } => {
            let source = resolve_source(path, source.clone())?;
            let (backend, embedder) = connect(&cli).await?;
            let pipeline = IngestionPipeline::new(backend.store(), embedder);
            let report = pipeline.ingest_path(path, Some(&source)).await?;
            println!(
                "{}: {} chunks ({} dropped, {} replaced)",
                report.source, report.chunk_count, report.dropped_chunks, report.replaced_records
            );
            backend.persist().await?;
        }
        Command::Chunk { path, source } => preview_chunks(path, source.clone()).await?,
        Command::Search {
            query,
            limit,
            sources,
            context,
        } => {
            let (backend, embedder) = connect(&cli).await?;
            let filter = (!sources.is_empty()).then(|| SourceFilter::new(sources.iter().cloned()));
            let retriever = Retriever::new(backend.store(), embedder);
            let hits = retriever
                .find_relevant_content(query, *limit, filter.as_ref())
                .await?;

            if *context {
                println!("{}", render_context(&hits));
            } else {
                println!("query: {query}");
                for hit in &hits {
                    println!(
                        "[{}] similarity={:.4} resource={}",
                        hit.source.as_deref().unwrap_or("unknown"),
                        hit.similarity,
                        hit.resource_id
                    );
                    println!("  {}", hit.content);
                }
            }
        }
        Command::Sources => {
            let (backend, _) = connect(&cli).await?;
            let counts = backend.store().source_counts().await?;
            if counts.is_empty() {
                println!("store is empty");
            }
            for (source, count) in counts {
                println!("{source}\t{count}");
            }
        }
    }

    Ok(())
}
