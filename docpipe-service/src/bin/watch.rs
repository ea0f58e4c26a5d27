//! `docpipe-watch`: follow documents through a running pipeline service.
//!
//! Optionally uploads a file first, then monitors every given document until
//! it completes or fails and prints its task event log.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use futures::stream::select_all;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::warn;

use docpipe_service::config::load_config;
use docpipe_service::error::format_error_chain_ref;
use docpipe_service::monitor::{HttpStatusClient, MonitorEvent, StatusMonitor};

/// Watch documents move through the docpipe pipeline.
#[derive(Parser)]
#[command(name = "docpipe-watch", version)]
struct Cli {
    /// Base URL of the docpipe service
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Upload this file before watching; its document id is watched too
    #[arg(long)]
    upload: Option<PathBuf>,

    /// Title for the uploaded file (defaults to the file name)
    #[arg(long, requires = "upload")]
    title: Option<String>,

    /// Queue priority for the uploaded file
    #[arg(long, requires = "upload")]
    priority: Option<i64>,

    /// HTTP timeout per request, in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Document ids to watch
    documents: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {}", format_error_chain_ref(e.as_ref()));
            ExitCode::from(2)
        }
    }
}

/// Returns whether every watched document completed
async fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let config = load_config()?;
    let client = Arc::new(HttpStatusClient::new(
        &cli.server,
        Duration::from_secs(cli.timeout),
    )?);

    let mut documents = cli.documents;
    if let Some(path) = &cli.upload {
        let content = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let outcome = client
            .upload(content, &filename, cli.title.as_deref(), cli.priority)
            .await?;
        if outcome.duplicate {
            println!("{} already uploaded as {}", filename, outcome.document_id);
        } else {
            println!("uploaded {} as {}", filename, outcome.document_id);
        }
        documents.push(outcome.document_id);
    }

    if documents.is_empty() {
        return Err("nothing to watch: pass document ids or --upload".into());
    }

    let monitor = StatusMonitor::new(client.clone(), config.monitor);
    let mut streams = Vec::with_capacity(documents.len());
    for document_id in &documents {
        streams.push(UnboundedReceiverStream::new(
            monitor.start_monitoring(document_id)?,
        ));
    }

    let mut events = select_all(streams);
    let mut all_completed = true;
    while let Some(event) = events.next().await {
        match event {
            MonitorEvent::Progress(report) => {
                println!(
                    "{} {:?} {:.1}%",
                    report.document_id, report.status, report.percentage
                );
            }
            MonitorEvent::Stalled {
                document_id,
                percentage,
                stalled_for,
            } => {
                println!(
                    "{} stalled at {:.1}% for {}s",
                    document_id,
                    percentage,
                    stalled_for.as_secs()
                );
            }
            MonitorEvent::Completed(report) => {
                println!("{} completed", report.document_id);
                print_task_log(&client, &report.document_id).await;
            }
            MonitorEvent::Failed {
                document_id,
                message,
                recoverable,
            } => {
                all_completed = false;
                println!(
                    "{} failed ({}): {}",
                    document_id,
                    if recoverable { "retryable" } else { "permanent" },
                    message
                );
                print_task_log(&client, &document_id).await;
            }
        }
    }

    Ok(all_completed)
}

async fn print_task_log(client: &HttpStatusClient, document_id: &str) {
    let tasks = match client.list_tasks(document_id).await {
        Ok(tasks) => tasks,
        Err(e) => {
            warn!(doc_id = %document_id, error = %e, "Failed to fetch tasks");
            return;
        }
    };

    for task in tasks {
        println!(
            "  {} [{:?}] retries {}/{}",
            task.stage, task.status, task.retry_count, task.max_retries
        );
        match client.task_events(&task.id).await {
            Ok(events) => {
                for event in events {
                    println!(
                        "    {}/{} {:>5.1}% {}",
                        event.step, event.total_steps, event.percentage, event.message
                    );
                }
            }
            Err(e) => warn!(task_id = %task.id, error = %e, "Failed to fetch task events"),
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docpipe_service=warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
