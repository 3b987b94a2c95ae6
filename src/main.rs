use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use gleaner::config::Config;
use gleaner::feed::RefreshPipeline;
use gleaner::policy::HostPolicy;
use gleaner::sched::Scheduler;
use gleaner::service;
use gleaner::storage::Database;

#[derive(Parser, Debug)]
#[command(name = "gleaner", about = "Feed aggregation service core")]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = "gleaner.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the polling scheduler until interrupted
    Run,

    /// Subscribe a user to a feed URL
    Add {
        url: String,
        #[arg(long)]
        user: i64,
        #[arg(long)]
        folder: Option<String>,
    },

    /// Subscribe a user to every URL in a file (one per line, optional
    /// tab-separated folder name)
    Import {
        file: PathBuf,
        #[arg(long)]
        user: i64,
    },

    /// Refresh a single feed immediately
    Refresh {
        #[arg(long)]
        feed: i64,
    },

    /// Recount the unread counters for a feed
    Recount {
        #[arg(long)]
        feed: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Arc::new(Config::load(&args.config).context("Failed to load configuration")?);
    let policy = Arc::new(HostPolicy::from_config(&config).context("Invalid host policy")?);

    let db = Database::open(&config.database_path)
        .await
        .context("Failed to open database")?;

    let client = reqwest::Client::builder()
        .user_agent(concat!("gleaner/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .context("Failed to build HTTP client")?;

    let pipeline = Arc::new(RefreshPipeline::new(db, client, policy, config));

    match args.command {
        Command::Run => {
            let scheduler = Scheduler::new(Arc::clone(&pipeline));
            tracing::info!("Scheduler running, Ctrl-C to stop");
            tokio::select! {
                _ = scheduler.run() => {}
                _ = tokio::signal::ctrl_c() => {
                    // In-flight cycles are simply abandoned; the next run
                    // re-attempts from scratch
                    tracing::info!("Shutting down");
                }
            }
        }

        Command::Add { url, user, folder } => {
            match service::subscribe(&pipeline, user, &url, folder.as_deref()).await {
                Ok(feed) => println!(
                    "Subscribed to {} (feed {})",
                    feed.title.as_deref().unwrap_or(&feed.fetch_url),
                    feed.id
                ),
                Err(e) => {
                    eprintln!("Could not subscribe: {e}");
                    std::process::exit(1);
                }
            }
        }

        Command::Import { file, user } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let pairs: Vec<(String, Option<String>)> = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(|line| match line.split_once('\t') {
                    Some((url, folder)) => (url.to_owned(), Some(folder.trim().to_owned())),
                    None => (line.to_owned(), None),
                })
                .collect();

            let report = service::import(&pipeline, user, &pairs).await;
            println!("Subscribed: {}", report.subscribed);
            for (url, error) in &report.failures {
                println!("Failed: {url}: {error}");
            }
            if !report.failures.is_empty() {
                std::process::exit(1);
            }
        }

        Command::Refresh { feed } => {
            let outcome = pipeline.refresh_feed(feed).await;
            println!("{outcome:?}");
        }

        Command::Recount { feed } => {
            pipeline
                .db
                .recalculate_unread_for_feed(feed)
                .await
                .context("Recount failed")?;
            println!("Recounted unread entries for feed {feed}");
        }
    }

    Ok(())
}
