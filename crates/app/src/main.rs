use std::path::PathBuf;

use anyhow::Context;
use book_rag_core::{
    Answer, AskRequest, ChunkingConfig, ContextLevel, EngineConfig, EngineError,
    IngestionPipeline, OpenAiChat, OpenAiConfig, OpenAiEmbedder, QdrantStore, RagEngine,
    TextChunker,
};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "book-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL
    #[arg(long, default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection holding the book content
    #[arg(long, default_value = "ai_ml_book_content")]
    collection: String,

    /// Optional Qdrant API key
    #[arg(long, env = "QDRANT_API_KEY")]
    qdrant_api_key: Option<String>,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: String,

    /// Chat completion model
    #[arg(long, default_value = "gpt-4")]
    chat_model: String,

    /// Embedding model
    #[arg(long, default_value = "text-embedding-ada-002")]
    embedding_model: String,

    /// Embedding vector dimension
    #[arg(long, default_value = "1536")]
    dimension: usize,

    /// Generation temperature
    #[arg(long, default_value = "0.7")]
    temperature: f32,

    /// Generation token budget
    #[arg(long, default_value = "1000")]
    max_tokens: u32,

    /// Chunk size in characters
    #[arg(long, default_value = "1000")]
    chunk_size: usize,

    /// Overlap between consecutive chunks in characters
    #[arg(long, default_value = "200")]
    chunk_overlap: usize,

    /// Retrieved chunks fed into generation
    #[arg(long, default_value = "3")]
    context_limit: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a folder of book content (JSON or Markdown) into the index.
    Ingest {
        /// Folder containing content files, searched recursively.
        #[arg(long)]
        content_dir: PathBuf,
    },
    /// Ask a question and print the cited answer.
    Ask {
        /// The question to answer.
        #[arg(long)]
        message: String,
        /// Citation detail: basic, medium or detailed.
        #[arg(long, default_value = "medium")]
        context_level: ContextLevel,
        /// Validate the answer against its retrieved context afterwards.
        #[arg(long)]
        validate: bool,
    },
    /// Retrieve matching chunks without generating an answer.
    Search {
        /// Search query.
        #[arg(long)]
        query: String,
    },
    /// Explain a code snippet, grounded in book content.
    Explain {
        /// Question about the code.
        #[arg(long)]
        question: String,
        /// Path to the code file to explain.
        #[arg(long)]
        code_file: PathBuf,
        /// Citation detail: basic, medium or detailed.
        #[arg(long, default_value = "medium")]
        context_level: ContextLevel,
    },
    /// Recommend content similar to previously liked points.
    Recommend {
        /// Framing query for the generated response.
        #[arg(long)]
        query: String,
        /// Point ids to use as positive examples.
        #[arg(long, required = true)]
        positive_id: Vec<String>,
        /// Citation detail: basic, medium or detailed.
        #[arg(long, default_value = "medium")]
        context_level: ContextLevel,
    },
    /// Print collection and model statistics.
    Stats,
}

fn openai_config(cli: &Cli) -> OpenAiConfig {
    let mut config = OpenAiConfig::new(&cli.openai_api_key);
    config.chat_model = cli.chat_model.clone();
    config.embedding_model = cli.embedding_model.clone();
    config.temperature = cli.temperature;
    config.max_tokens = cli.max_tokens;
    config.dimensions = cli.dimension;
    config
}

fn qdrant_store(cli: &Cli) -> QdrantStore {
    let store = QdrantStore::new(&cli.qdrant_url, &cli.collection, cli.dimension);
    match &cli.qdrant_api_key {
        Some(key) => store.with_api_key(key),
        None => store,
    }
}

fn build_engine(cli: &Cli) -> RagEngine<OpenAiEmbedder, QdrantStore, OpenAiChat> {
    let config = openai_config(cli);
    RagEngine::new(
        OpenAiEmbedder::new(config.clone()),
        qdrant_store(cli),
        OpenAiChat::new(config),
    )
    .with_config(EngineConfig {
        context_limit: cli.context_limit,
        ..Default::default()
    })
}

/// Any uncaught engine failure surfaces as the uniform failure shape:
/// generic message, no citations, zeroed confidence and token count.
fn print_answer(result: Result<Answer, EngineError>) -> anyhow::Result<()> {
    let answer = match result {
        Ok(answer) => answer,
        Err(err) => {
            error!(error = %err, "request failed");
            Answer::failure()
        }
    };
    println!("{}", serde_json::to_string_pretty(&answer)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "book-rag boot");

    match &cli.command {
        Command::Ingest { content_dir } => {
            let chunker = TextChunker::new(ChunkingConfig {
                chunk_size: cli.chunk_size,
                chunk_overlap: cli.chunk_overlap,
            })?;
            let pipeline = IngestionPipeline::new(
                OpenAiEmbedder::new(openai_config(&cli)),
                qdrant_store(&cli),
                chunker,
                content_dir.clone(),
            );

            let report = pipeline.ingest_all().await?;
            for skipped in &report.skipped {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Ask {
            message,
            context_level,
            validate,
        } => {
            let engine = build_engine(&cli);
            let request = AskRequest {
                message: message.clone(),
                conversation_id: None,
                context_level: *context_level,
                code_content: None,
            };

            let result = engine.ask(&request).await;
            if *validate {
                if let Ok(answer) = &result {
                    let context = engine
                        .retrieve_context(message, context_level.retrieval_filter().as_ref(), 5)
                        .await
                        .unwrap_or_default();
                    let (is_valid, score) = engine.validate_answer(&answer.response, &context).await;
                    println!("validation: is_valid={is_valid} confidence={score:.2}");
                }
            }
            print_answer(result)?;
        }
        Command::Search { query } => {
            let engine = build_engine(&cli);
            let results = engine
                .search(query)
                .await
                .context("search failed")?;

            for result in results {
                println!(
                    "[{:.4}] id={} chapter={}",
                    result.score,
                    result.source_id,
                    result.metadata.source.chapter.as_deref().unwrap_or("Unknown"),
                );
                println!("  {}", result.content);
            }
        }
        Command::Explain {
            question,
            code_file,
            context_level,
        } => {
            let code = tokio::fs::read_to_string(code_file)
                .await
                .with_context(|| format!("unable to read {}", code_file.display()))?;
            let engine = build_engine(&cli);
            print_answer(engine.explain_code(&code, question, *context_level).await)?;
        }
        Command::Recommend {
            query,
            positive_id,
            context_level,
        } => {
            let engine = build_engine(&cli);
            print_answer(engine.recommend(query, positive_id, *context_level).await)?;
        }
        Command::Stats => {
            let engine = build_engine(&cli);
            let stats = engine.stats().await.context("stats unavailable")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
