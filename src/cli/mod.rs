//! CLI commands implementation.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::extract::{self, DocumentFormat};
use crate::llm::{HttpEmbeddingClient, HttpGenerationClient};
use crate::models::Document;
use crate::queue::{dedup_key, JobPayload, JobQueue, JobType};
use crate::repository::Repository;
use crate::services::{request_quiz, PipelineContext, Worker, DEFAULT_QUESTION_COUNT};
use crate::storage::{store_upload, LocalBlobStore};

#[derive(Parser)]
#[command(name = "quizforge")]
#[command(about = "Asynchronous document-to-quiz generation pipeline")]
#[command(version)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and blob storage
    Init,

    /// Run the pipeline worker loops
    Work,

    /// Store a file and enqueue it for processing
    Enqueue {
        /// Path to the document file
        file: PathBuf,
        /// Owning user id
        #[arg(short, long, default_value = "local")]
        user: String,
    },

    /// Request quiz generation for a processed document
    Quiz {
        /// Document id
        document_id: String,
        /// Owning user id
        #[arg(short, long, default_value = "local")]
        user: String,
        /// Number of questions
        #[arg(short = 'n', long, default_value_t = DEFAULT_QUESTION_COUNT)]
        count: u32,
    },

    /// Show queue depths and entity counts
    Status,

    /// Report availability of required external tools
    Tools,

    /// Return a dead-lettered job to its queue
    Redrive {
        /// Job id from the dead-letter listing
        job_id: String,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => init(&config),
        Commands::Work => work(config).await,
        Commands::Enqueue { file, user } => enqueue(&config, &file, &user).await,
        Commands::Quiz {
            document_id,
            user,
            count,
        } => quiz(&config, &document_id, &user, count),
        Commands::Status => status(&config),
        Commands::Tools => tools(),
        Commands::Redrive { job_id } => redrive(&config, &job_id),
    }
}

fn init(config: &AppConfig) -> anyhow::Result<()> {
    Repository::new(&config.database.path)?;
    JobQueue::new(&config.database.path, config.queue.clone())?;
    std::fs::create_dir_all(&config.storage.root)?;
    println!("database: {}", config.database.path.display());
    println!("blob storage: {}", config.storage.root.display());
    Ok(())
}

async fn work(config: AppConfig) -> anyhow::Result<()> {
    let api_key = config.api_key();
    let ctx = PipelineContext {
        repo: Arc::new(Repository::new(&config.database.path)?),
        queue: Arc::new(JobQueue::new(&config.database.path, config.queue.clone())?),
        blobs: Arc::new(LocalBlobStore::new(&config.storage.root)),
        embedder: Arc::new(HttpEmbeddingClient::new(
            config.embedding.clone(),
            api_key.clone(),
        )?),
        generator: Arc::new(HttpGenerationClient::new(config.generation.clone(), api_key)?),
        config: Arc::new(config),
    };
    Worker::new(ctx).run().await
}

async fn enqueue(config: &AppConfig, file: &std::path::Path, user: &str) -> anyhow::Result<()> {
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("invalid file name: {}", file.display()))?
        .to_string();

    let bytes = std::fs::read(file)?;
    let format = DocumentFormat::detect("application/octet-stream", &filename, &bytes)
        .ok_or_else(|| anyhow::anyhow!("unsupported document format: {filename}"))?;
    let mime_type = format.mime_type().to_string();

    let blobs = LocalBlobStore::new(&config.storage.root);
    let blob_key = store_upload(&blobs, file, &mime_type).await?;

    let repo = Repository::new(&config.database.path)?;
    let document = Document::new(
        uuid::Uuid::new_v4().to_string(),
        user.to_string(),
        filename,
        blob_key.clone(),
        mime_type.clone(),
    );
    repo.create_document(&document)?;

    let queue = JobQueue::new(&config.database.path, config.queue.clone())?;
    let payload = JobPayload::document_processing(&document.id, &blob_key, &mime_type, user);
    let dedup = dedup_key(&document.id, config.queue.dedup_window_secs);
    let job_id = queue.enqueue(&payload, &dedup)?;

    println!("document: {}", document.id);
    println!("job: {job_id}");
    Ok(())
}

fn quiz(config: &AppConfig, document_id: &str, user: &str, count: u32) -> anyhow::Result<()> {
    let repo = Repository::new(&config.database.path)?;
    let queue = JobQueue::new(&config.database.path, config.queue.clone())?;
    match request_quiz(&repo, &queue, config, document_id, user, count)? {
        Some(quiz) => println!("quiz: {}", quiz.id),
        None => println!("a quiz for this document is already generating"),
    }
    Ok(())
}

fn status(config: &AppConfig) -> anyhow::Result<()> {
    let queue = JobQueue::new(&config.database.path, config.queue.clone())?;
    for job_type in [JobType::DocumentProcessing, JobType::QuizGeneration] {
        let depth = queue.depth(job_type)?;
        println!(
            "{:<20} available={} inflight={} dead={}",
            job_type.as_str(),
            depth.available,
            depth.inflight,
            depth.dead
        );
        if let Some(oldest) = depth.oldest_enqueued_at {
            println!("{:<20} oldest enqueued {}", "", oldest.to_rfc3339());
        }
        for (job_id, _payload, last_error) in queue.dead_letters(job_type)? {
            println!(
                "  dead {job_id}: {}",
                last_error.as_deref().unwrap_or("(no recorded error)")
            );
        }
    }
    Ok(())
}

fn tools() -> anyhow::Result<()> {
    for (tool, available) in extract::check_tools() {
        let mark = if available { "ok" } else { "MISSING" };
        println!("{tool:<12} {mark}");
    }
    Ok(())
}

fn redrive(config: &AppConfig, job_id: &str) -> anyhow::Result<()> {
    let queue = JobQueue::new(&config.database.path, config.queue.clone())?;
    queue.redrive(job_id)?;
    println!("redriven: {job_id}");
    Ok(())
}
