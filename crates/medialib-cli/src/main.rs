//! medialib: run migrations, upload and inspect files, and work the job queue.
//!
//! Reads DATABASE_URL, MEDIALIB_CONFIG and the other settings from the
//! environment (or a `.env` file).

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use medialib_cli::{describe_error, detect_mime, init_tracing, truncate_string, Runtime};
use medialib_core::models::{FileQuery, UploadAttributes};
use medialib_core::{Config, FileType};
use medialib_services::{Dispatch, JobQueue, JobQueueConfig, UploadSource};

#[derive(Parser)]
#[command(name = "medialib", about = "Media library pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Upload a file and schedule its transformations
    Upload {
        /// Path to the file to upload
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
        /// Transformation group
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        caption: Option<String>,
        /// Disk to store on instead of the default
        #[arg(long)]
        disk: Option<String>,
        #[arg(long)]
        hidden: bool,
    },
    /// Print the URL of a file or one of its transformations
    Url {
        id: Uuid,
        #[arg(long)]
        transformation: Option<String>,
        #[arg(long)]
        full_preview: bool,
        #[arg(long)]
        download: bool,
    },
    /// List files
    List {
        /// Filter by type: image, video, document, audio
        #[arg(long)]
        r#type: Option<FileType>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long, default_value = "50")]
        limit: i64,
        #[arg(long, default_value = "0")]
        offset: i64,
        /// Output format: json or table
        #[arg(long, default_value = "table")]
        format: String,
        /// Also list uploads whose original was never confirmed stored
        #[arg(long)]
        include_incomplete: bool,
    },
    /// Run one transformation of a file again
    Retransform { id: Uuid, name: String },
    /// Delete a file and schedule removal of its stored objects
    Delete { id: Uuid },
    /// Process deferred transformations and cleanups
    Worker {
        /// Queues to consume (defaults to JOB_QUEUE_NAMES)
        #[arg(long = "queue")]
        queues: Vec<String>,
        /// Process every runnable job once, then exit
        #[arg(long)]
        drain: bool,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {}", describe_error(&err));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    if let Commands::Migrate = cli.command {
        config.validate()?;
        let pool = medialib_db::connect(&config).await?;
        medialib_db::run_migrations(&pool).await?;
        return Ok(());
    }

    let runtime = Runtime::connect(config).await?;
    let library = runtime.library.clone();

    match cli.command {
        Commands::Migrate => {}
        Commands::Upload {
            path,
            name,
            group,
            caption,
            disk,
            hidden,
        } => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let mime_type = detect_mime(&data, &path, library.config())
                .with_context(|| format!("Cannot determine the type of {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let attributes = UploadAttributes {
                name,
                caption,
                group,
                is_hidden: hidden,
                ..Default::default()
            };
            let file = library
                .upload_file(
                    UploadSource::new(data, filename, mime_type),
                    attributes,
                    disk.as_deref(),
                )
                .await?;

            let preview = library.preview_url(&file).await?;
            print_json(&serde_json::json!({ "file": file, "preview": preview }))?;
        }
        Commands::Url {
            id,
            transformation,
            full_preview,
            download,
        } => {
            let file = library.get_file(id).await?;
            let url = library
                .get_url(&file, transformation.as_deref(), full_preview, download)
                .await?;
            print_json(&serde_json::json!({ "url": url }))?;
        }
        Commands::List {
            r#type,
            group,
            limit,
            offset,
            format,
            include_incomplete,
        } => {
            let mut query = FileQuery::new().limit(limit);
            query.offset = Some(offset);
            if include_incomplete {
                query = query.include_incomplete();
            }
            if let Some(file_type) = r#type {
                query = query.of_type(file_type);
            }
            if let Some(group) = group {
                query = query.group(group);
            }
            let files = library.list_files(&query).await?;

            if format == "json" {
                print_json(&files)?;
            } else {
                println!("{:<36}  {:<8}  {:<30}  {:>10}  {}", "ID", "TYPE", "NAME", "SIZE", "GROUP");
                for file in &files {
                    println!(
                        "{:<36}  {:<8}  {:<30}  {:>10}  {}",
                        file.id,
                        file.file_type,
                        truncate_string(file.display_name(), 30),
                        file.human_size(),
                        file.group()
                    );
                }
                println!("{} file(s)", files.len());
            }
        }
        Commands::Retransform { id, name } => match library.retransform(id, &name).await? {
            Dispatch::Inline(result) => print_json(&result)?,
            Dispatch::Queued(job) => print_json(&serde_json::json!({
                "queued": job.queue,
                "job_id": job.id,
            }))?,
        },
        Commands::Delete { id } => {
            let deleted = library.delete_file(id).await?;
            print_json(&serde_json::json!({ "id": id, "deleted": deleted }))?;
        }
        Commands::Worker { queues, drain } => {
            let queue_config = JobQueueConfig::from_config(&runtime.config).with_queues(queues);
            let jobs = library.stores().jobs.clone();

            if drain {
                let queue = JobQueue::new_no_worker(jobs, queue_config, library.job_context());
                let processed = queue.drain().await?;
                print_json(&serde_json::json!({ "processed": processed }))?;
            } else {
                let queue = JobQueue::new(
                    jobs,
                    queue_config,
                    library.job_context(),
                    Some(runtime.pool.clone()),
                );
                tracing::info!(queues = ?queue.queues(), "Worker running, press Ctrl-C to stop");
                tokio::signal::ctrl_c()
                    .await
                    .context("Failed to listen for shutdown signal")?;
                queue.shutdown().await;
            }
        }
    }

    Ok(())
}
