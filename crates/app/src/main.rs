use chrono::Utc;
use clap::{Parser, Subcommand};
use qna_rag_core::{
    register_folder, BatchScheduler, IndexOutcome, IndexingOptions, LifecycleController,
    OpenAiCompleter, OpenAiEmbedder, PdfBlockParser, PostgrestStore, QueryResponse,
    RetrievalEngine, RetrievalRequest,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "qna-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// PostgREST base URL (Supabase project URL).
    #[arg(long, env = "SUPABASE_URL")]
    store_url: String,

    /// Service key used for both the apikey header and bearer auth.
    #[arg(long, env = "SUPABASE_SERVICE_KEY", hide_env_values = true)]
    store_key: String,

    /// API key for the embedding and completion endpoints.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: String,

    /// OpenAI-compatible API base URL.
    #[arg(long, default_value = "https://api.openai.com/v1")]
    openai_base_url: String,

    #[arg(long, default_value = "text-embedding-3-small")]
    embedding_model: String,

    #[arg(long, default_value = "gpt-4o-mini")]
    answer_model: String,

    /// Root directory holding the stored PDF files.
    #[arg(long, env = "STORAGE_ROOT", default_value = "storage")]
    storage_root: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Copy every PDF under a folder into storage and record it as uploaded.
    Register {
        #[arg(long)]
        folder: String,
        #[arg(long)]
        user_id: String,
    },
    /// Index one document now.
    Index {
        #[arg(long)]
        document_id: String,
    },
    /// Index the pending backlog once.
    Batch {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Index the pending backlog on a fixed period until interrupted.
    Watch {
        #[arg(long, default_value = "60")]
        interval_secs: u64,
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Answer a question from the indexed chunks of the given documents.
    Query {
        #[arg(long)]
        question: String,
        /// Document ids to search, comma separated.
        #[arg(long, value_delimiter = ',')]
        document_ids: Vec<String>,
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// Show the indexing status of one document.
    Status {
        #[arg(long)]
        document_id: String,
    },
    /// Remove every indexed chunk of one document.
    Remove {
        #[arg(long)]
        document_id: String,
    },
}

type Controller = LifecycleController<
    PostgrestStore,
    PostgrestStore,
    PdfBlockParser,
    OpenAiEmbedder,
    OpenAiCompleter,
>;

fn build_controller(cli: &Cli) -> anyhow::Result<Controller> {
    let store = PostgrestStore::new(&cli.store_url, &cli.store_key)?;
    let embedder = OpenAiEmbedder::new(
        &cli.openai_base_url,
        &cli.openai_api_key,
        &cli.embedding_model,
    );
    let assistant = OpenAiCompleter::new(
        &cli.openai_base_url,
        &cli.openai_api_key,
        &cli.answer_model,
    );

    Ok(LifecycleController::new(
        store.clone(),
        store,
        PdfBlockParser::default(),
        embedder,
        Some(assistant),
        cli.storage_root.clone(),
        IndexingOptions::default(),
    ))
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
        "qna-rag boot"
    );

    match &cli.command {
        Command::Register { folder, user_id } => {
            let store = PostgrestStore::new(&cli.store_url, &cli.store_key)?;
            let report =
                register_folder(&store, &cli.storage_root, Path::new(folder), user_id).await?;

            for skipped in &report.skipped {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "file skipped");
            }
            for document in &report.registered {
                println!(
                    "registered {} as document {}",
                    document.original_filename, document.document_id
                );
            }
            println!(
                "{} registered, {} skipped",
                report.registered.len(),
                report.skipped.len()
            );
        }
        Command::Index { document_id } => {
            let controller = build_controller(&cli)?;
            match controller.start_indexing(document_id).await? {
                IndexOutcome::Indexed { chunk_count } => {
                    println!("indexed {document_id}: {chunk_count} chunks");
                }
                IndexOutcome::AlreadyIndexed => {
                    println!("{document_id} was already indexed");
                }
                IndexOutcome::Failed { reason } => {
                    println!("indexing {document_id} failed: {reason}");
                }
            }
        }
        Command::Batch { limit } => {
            let scheduler = BatchScheduler::new(build_controller(&cli)?);
            let report = scheduler.run_batch(*limit).await?;
            println!(
                "batch finished: attempted={} succeeded={} failed={}",
                report.attempted, report.succeeded, report.failed
            );
        }
        Command::Watch {
            interval_secs,
            limit,
        } => {
            let scheduler = BatchScheduler::new(build_controller(&cli)?);
            println!("watching backlog every {interval_secs}s (ctrl-c to stop)");
            scheduler
                .run_forever(Duration::from_secs(*interval_secs), *limit)
                .await;
        }
        Command::Query {
            question,
            document_ids,
            top_k,
        } => {
            let store = PostgrestStore::new(&cli.store_url, &cli.store_key)?;
            let embedder = OpenAiEmbedder::new(
                &cli.openai_base_url,
                &cli.openai_api_key,
                &cli.embedding_model,
            );
            let answerer = OpenAiCompleter::new(
                &cli.openai_base_url,
                &cli.openai_api_key,
                &cli.answer_model,
            );
            let engine = RetrievalEngine::new(store, embedder, answerer);

            let request = RetrievalRequest::new(question.clone(), document_ids.clone(), *top_k);
            match engine.answer_query(&request).await? {
                QueryResponse::NeedsClarification { reason } => {
                    println!("please rephrase the question: {reason}");
                }
                QueryResponse::NoContext { reason } => {
                    println!("no answer available: {}", reason.diagnostic());
                }
                QueryResponse::Answered { answer, hits } => {
                    println!("{answer}\n");
                    for hit in hits {
                        println!(
                            "[{}] score={:.4} document_id={}",
                            hit.pdf_name, hit.score, hit.document_id
                        );
                    }
                }
            }
        }
        Command::Status { document_id } => {
            let controller = build_controller(&cli)?;
            let status = controller.get_status(document_id).await?;
            println!("{document_id}: {}", status.as_str());
        }
        Command::Remove { document_id } => {
            let controller = build_controller(&cli)?;
            let removed = controller.remove_index(document_id).await?;
            println!("removed {removed} chunks for {document_id}");
        }
    }

    Ok(())
}
