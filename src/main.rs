//! Command-line entry point for the vigia harvester.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vigia::config;
use vigia::extract::FieldExtractor;
use vigia::harvester::{self, page_loader::HttpPageLoader, CaptureConfig, CaptureWorker};
use vigia::repository::VisitStore;
use vigia::services::search::{execute_query, Validity};

#[derive(Parser)]
#[command(
    name = "vigia",
    version,
    about = "Visitor record harvester and local search for the Portaria Virtual portal"
)]
struct Cli {
    /// Override the database path.
    #[arg(long, global = true, env = "VIGIA_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the capture worker until interrupted.
    Capture {
        /// Override the portal base URL.
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Search stored records by terms (every term must match).
    Search {
        terms: Vec<String>,
        /// Emit results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Recompute derived fields for every stored record.
    Reprocess,
    /// Show store statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut settings = config::load_settings().await;

    let db_path = match cli.database {
        Some(path) => path,
        None => {
            settings
                .ensure_directories()
                .context("failed to create data directory")?;
            settings.database_path()
        }
    };
    let store = Arc::new(
        VisitStore::open(&db_path, FieldExtractor::new())
            .with_context(|| format!("failed to open store at {}", db_path.display()))?,
    );

    match cli.command {
        Command::Capture { base_url } => {
            if let Some(base_url) = base_url {
                settings.base_url = base_url.trim_end_matches('/').to_string();
                settings.login.login_url = format!("{}/login", settings.base_url);
            }
            url::Url::parse(&settings.base_url)
                .with_context(|| format!("invalid base URL {}", settings.base_url))?;

            let loader = Arc::new(HttpPageLoader::new(
                &settings.user_agent,
                Duration::from_secs(settings.request_timeout),
                settings.login.clone(),
            ));
            let capture_config = CaptureConfig {
                base_url: settings.base_url.clone(),
                ..Default::default()
            };

            let (handle, cancel) = harvester::stop_channel();
            let worker = CaptureWorker::new(
                loader,
                store,
                FieldExtractor::new(),
                capture_config,
                cancel,
            );
            let task = tokio::spawn(worker.run());

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            info!("stop requested");
            handle.stop();
            task.await??;
        }
        Command::Search { terms, json } => {
            let hits = execute_query(&store, &terms.join(" "));
            if json {
                let rows: Vec<serde_json::Value> = hits
                    .iter()
                    .map(|hit| {
                        serde_json::json!({
                            "id": hit.record.id,
                            "name": hit.record.name,
                            "document_id": hit.record.document_id,
                            "validity_window": hit.record.validity_window,
                            "url": harvester::record_url(&settings.base_url, hit.record.id),
                            "expired": hit.validity == Validity::Expired,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for hit in &hits {
                    let flag = match hit.validity {
                        Validity::Expired => " [expired]",
                        Validity::Valid => "",
                    };
                    println!(
                        "ID {}: {} | {} | {}{}\n  {}",
                        hit.record.id,
                        hit.record.name,
                        hit.record.document_id,
                        hit.record.validity_window,
                        flag,
                        harvester::record_url(&settings.base_url, hit.record.id),
                    );
                }
                if hits.is_empty() {
                    println!("no matches");
                }
            }
        }
        Command::Reprocess => {
            let updated = store.reprocess_all()?;
            println!("reprocessed {updated} records");
        }
        Command::Stats => {
            println!("records: {}", store.count()?);
            println!("highest id: {}", store.max_id()?);
        }
    }

    Ok(())
}
