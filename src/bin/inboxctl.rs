//! Command-line client for the remote event inbox.
//!
//! Settings come from `INBOX_*` environment variables; flags override them.

use std::{process::ExitCode, sync::Arc};

use clap::{Parser, Subcommand};
use inboxsync::{
    config::{ConfigError, InboxConfig},
    credential::{
        CredentialError, CredentialHolder, CredentialManager, sqlite::SqliteCredentialStore,
    },
    event::{NewEvent, Page},
    op::{BulkOperation, BulkResult},
    remote::{EventDirectory, RemoteError, http::HttpEventDirectory},
    runtime::{
        events::InboxEvent,
        handle::{InboxError, InboxHandle, spawn_inbox},
    },
    types::{EventId, EventStatus},
};

#[derive(Parser, Debug)]
#[command(name = "inboxctl", version, about = "Browse and triage a remote event inbox")]
struct CliArgs {
    /// API base URL (overrides INBOX_API_ENDPOINT).
    #[arg(long)]
    endpoint: Option<String>,

    /// Page size (overrides INBOX_DEFAULT_PAGE_SIZE).
    #[arg(long)]
    page_size: Option<u32>,

    /// Cap on concurrent calls during bulk operations.
    #[arg(long)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List one page of events.
    List {
        /// Only events with this status.
        #[arg(long)]
        status: Option<EventStatus>,
        /// Number of pages to walk forward from the first.
        #[arg(long, default_value_t = 1)]
        pages: usize,
        /// Print pages as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Acknowledge one or more events.
    Ack {
        #[arg(required = true)]
        ids: Vec<EventId>,
    },
    /// Permanently delete one or more events.
    Delete {
        #[arg(required = true)]
        ids: Vec<EventId>,
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
    /// Poll the first page and report changes until interrupted.
    Watch {
        #[arg(long)]
        status: Option<EventStatus>,
    },
    /// Validate and store an API key.
    Login { key: String },
    /// Forget the stored API key.
    Logout,
    /// Probe the service health endpoint.
    Health,
    /// Submit a new event.
    Ingest {
        #[arg(long = "type")]
        event_type: String,
        #[arg(long)]
        source: String,
        /// JSON payload.
        #[arg(long, default_value = "{}")]
        payload: String,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Inbox(#[from] InboxError),
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("refusing to delete without --yes")]
    Unconfirmed,
    #[error("{0} of the requested events failed")]
    Partial(usize),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: CliArgs) -> Result<(), CliError> {
    let mut config = InboxConfig::from_env()?;
    if let Some(endpoint) = args.endpoint {
        config.api_base_url = endpoint.trim_end_matches('/').to_string();
    }
    if let Some(size) = args.page_size {
        config.page_size = size.clamp(1, inboxsync::config::MAX_PAGE_SIZE);
    }
    if let Some(n) = args.concurrency {
        config.bulk_concurrency = (n > 0).then_some(n);
    }

    let holder = CredentialHolder::default();
    let store = SqliteCredentialStore::open(&config.credential_db)?;
    let credentials = CredentialManager::new(holder.clone(), Box::new(store));

    let http = HttpEventDirectory::from_config(&config, holder)?;
    tracing::debug!(endpoint = %http.base_url(), "using inbox API");
    let directory: Arc<dyn EventDirectory> = Arc::new(http);

    let fallback = config.api_key.as_deref();
    match args.command {
        Command::Login { .. } | Command::Logout => {}
        Command::Health => {
            credentials.bootstrap(fallback).await?;
        }
        _ => {
            credentials.restore(directory.as_ref(), fallback).await?;
        }
    }

    match args.command {
        Command::List { status, pages, json } => {
            config.polling_enabled = false;
            let inbox = spawn_inbox(Arc::clone(&directory), &config);
            inbox.set_filter(status).await?;
            let mut page = inbox.read().await?;
            for n in 0..pages.max(1) {
                if n > 0 {
                    if !page.has_next() {
                        break;
                    }
                    inbox.next_page().await?;
                    page = inbox.read().await?;
                }
                print_page(&page, json)?;
            }
            inbox.shutdown().await?;
        }
        Command::Ack { ids } => {
            run_bulk(directory, &config, BulkOperation::Acknowledge, ids).await?;
        }
        Command::Delete { ids, yes } => {
            if !yes {
                return Err(CliError::Unconfirmed);
            }
            run_bulk(directory, &config, BulkOperation::Delete, ids).await?;
        }
        Command::Watch { status } => {
            let inbox = spawn_inbox(directory, &config);
            inbox.set_filter(status).await?;
            watch(&inbox).await?;
            inbox.shutdown().await?;
        }
        Command::Login { key } => {
            credentials.login(directory.as_ref(), &key).await?;
            println!("API key stored");
        }
        Command::Logout => {
            credentials.logout().await?;
            println!("API key removed");
        }
        Command::Health => {
            let health = directory.health().await?;
            println!("{} (version {}, {})", health.status, health.version, health.timestamp);
        }
        Command::Ingest {
            event_type,
            source,
            payload,
        } => {
            let event = NewEvent {
                event_type,
                source,
                payload: serde_json::from_str(&payload)?,
                metadata: None,
            };
            let receipt = directory.ingest(&event).await?;
            println!("{} {}: {}", receipt.event_id, receipt.status, receipt.message);
        }
    }

    Ok(())
}

async fn run_bulk(
    directory: Arc<dyn EventDirectory>,
    config: &InboxConfig,
    operation: BulkOperation,
    ids: Vec<EventId>,
) -> Result<(), CliError> {
    let config = InboxConfig {
        polling_enabled: false,
        ..config.clone()
    };
    let inbox = spawn_inbox(directory, &config);
    let result = inbox.bulk_ids(operation, ids).await?;
    inbox.shutdown().await?;
    report_bulk(&result)
}

fn report_bulk(result: &BulkResult) -> Result<(), CliError> {
    for id in &result.succeeded {
        println!("{}: {id}", result.operation);
    }
    for line in result.failure_lines() {
        eprintln!("failed {line}");
    }
    if result.failed.is_empty() {
        Ok(())
    } else {
        Err(CliError::Partial(result.failed.len()))
    }
}

fn print_page(page: &Page, json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(page)?);
        return Ok(());
    }
    for event in &page.events {
        println!(
            "{}  {:<12}  {:<24}  {:<16}  {}",
            event.event_id,
            event.status.as_str(),
            event.event_type,
            event.source,
            event.ingested_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!(
        "{} of {} events{}",
        page.events.len(),
        page.total_count,
        if page.has_next() { ", more available" } else { "" }
    );
    Ok(())
}

async fn watch(inbox: &InboxHandle) -> Result<(), CliError> {
    let page = inbox.read().await?;
    print_page(&page, false)?;
    let mut events = inbox.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(InboxEvent::PageLoaded { .. }) => {
                    let page = inbox.read().await?;
                    println!();
                    print_page(&page, false)?;
                }
                // Re-reading a stale key starts the refetch; its PageLoaded renders.
                Ok(InboxEvent::Invalidated { .. }) => {
                    inbox.read().await?;
                }
                Ok(InboxEvent::FetchFailed { message, .. }) => eprintln!("refresh failed: {message}"),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}
