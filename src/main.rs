use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use feedhaul::config::Config;
use feedhaul::feed::{BatchOutcome, Fetcher, HttpFeedClient, ProgressTracker, ScriptRunner};
use feedhaul::rules::Rules;
use feedhaul::storage::{Database, DatabaseError, SubscriptionUpdate};
use feedhaul::sync::{FreshRssClient, SyncService};

const PROGRESS_POLL: Duration = Duration::from_millis(250);

/// Get the config directory path (~/.config/feedhaul/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedhaul"))
}

#[derive(Parser, Debug)]
#[command(name = "feedhaul", about = "Personal RSS/Atom aggregator")]
struct Args {
    /// Config file (defaults to ~/.config/feedhaul/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every subscription once
    Refresh,
    /// Fetch every subscription on the configured interval
    Daemon,
    /// Subscribe to a feed URL
    Add {
        url: String,
        #[arg(long, default_value = "")]
        category: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// Subscribe to a script in the scripts directory
    AddScript {
        path: String,
        #[arg(long, default_value = "")]
        category: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// Subscribe without fetching
    Import {
        title: String,
        url: String,
        #[arg(long, default_value = "")]
        category: String,
    },
    /// Edit a subscription; only the given fields change
    Update {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// Script path in the scripts directory; an empty value makes it a URL feed again
        #[arg(long)]
        script: Option<String>,
    },
    /// Delete a subscription and its articles
    Remove { id: i64 },
    /// Import subscriptions and unread articles from FreshRSS
    Sync {
        /// Mark the pulled articles read on the server
        #[arg(long)]
        mark_read: bool,
    },
    /// List subscriptions
    List,
    /// Show recent articles of a subscription
    Articles {
        id: i64,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::Permissions::from_mode(0o700);
        if let Err(e) = std::fs::set_permissions(&config_dir, mode) {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let scripts_dir = config.scripts_dir(&config_dir);
    if !scripts_dir.exists() {
        std::fs::create_dir_all(&scripts_dir).context("Failed to create scripts directory")?;
    }

    let db_path = config.database_path(&config_dir);
    if let Some(parent) = db_path.parent().filter(|p| !p.exists()) {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => Arc::new(db),
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: {}", DatabaseError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    config
        .seed_settings(&db)
        .await
        .context("Failed to seed settings")?;

    let http = reqwest::Client::builder()
        .user_agent(concat!("feedhaul/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let fetcher = Arc::new(
        Fetcher::new(
            db.clone(),
            Arc::new(HttpFeedClient::new(http.clone())),
            Arc::new(ProgressTracker::new()),
        )
        .with_scripts(ScriptRunner::new(scripts_dir))
        .with_rules(Arc::new(Rules::new(db.clone())))
        .with_http_client(http.clone()),
    );

    match args.command {
        Command::Refresh => refresh(fetcher).await,
        Command::Daemon => daemon(fetcher, config.refresh_interval_minutes).await,
        Command::Add { url, category, title } => {
            let id = fetcher
                .add_subscription(&url, &category, title.as_deref())
                .await
                .with_context(|| format!("Failed to add {}", url))?;
            println!("Added subscription {}", id);
            Ok(())
        }
        Command::AddScript { path, category, title } => {
            let id = fetcher
                .add_script_subscription(&path, &category, title.as_deref())
                .await
                .with_context(|| format!("Failed to add script {}", path))?;
            println!("Added subscription {}", id);
            Ok(())
        }
        Command::Import { title, url, category } => {
            let id = fetcher.import_subscription(&title, &url, &category).await?;
            println!("Imported subscription {}", id);
            Ok(())
        }
        Command::Update {
            id,
            title,
            url,
            category,
            script,
        } => {
            let update = SubscriptionUpdate {
                title,
                url,
                category,
                script_path: script,
            };
            if update.is_empty() {
                anyhow::bail!("Nothing to update; pass --title, --url, --category or --script");
            }
            if !db.update_subscription(id, &update).await? {
                anyhow::bail!("No subscription with id {}", id);
            }
            println!("Updated subscription {}", id);
            Ok(())
        }
        Command::Remove { id } => {
            if db.get_subscription(id).await?.is_none() {
                anyhow::bail!("No subscription with id {}", id);
            }
            let removed = db.delete_subscription(id).await?;
            println!("Removed subscription {} ({} articles)", id, removed);
            Ok(())
        }
        Command::Sync { mark_read } => {
            let (server, user, password) = config.freshrss().ok_or_else(|| {
                anyhow::anyhow!(
                    "FreshRSS is not configured; set freshrss_url, freshrss_username \
                     and freshrss_password in {}",
                    config_path.display()
                )
            })?;
            let client = FreshRssClient::new(
                http,
                server,
                user,
                SecretString::from(password.to_string()),
            );
            let report = SyncService::new(client, db.clone())
                .with_mark_read(mark_read)
                .sync()
                .await
                .context("FreshRSS sync failed")?;
            println!(
                "Synced {} new subscriptions, {}/{} new articles",
                report.subscriptions_added, report.articles_saved, report.articles_fetched
            );
            Ok(())
        }
        Command::List => {
            for sub in db.get_subscriptions().await? {
                let status = sub.last_error.as_deref().unwrap_or("ok");
                println!(
                    "{:>4}  [{}] {}  <{}>  {}",
                    sub.id, sub.category, sub.title, sub.url, status
                );
            }
            Ok(())
        }
        Command::Articles { id, limit } => {
            for article in db.get_recent_articles(id, limit).await? {
                let title = article.translated_title.as_deref().unwrap_or(&article.title);
                let marker = if article.is_read { ' ' } else { '*' };
                println!("{} {:>6}  {}  {}", marker, article.id, title, article.url);
            }
            Ok(())
        }
    }
}

/// Run one batch, printing progress until it ends. Ctrl-C cancels.
async fn refresh(fetcher: Arc<Fetcher>) -> Result<()> {
    let cancel = CancellationToken::new();
    let outcome = run_batch(&fetcher, cancel).await?;
    report(&outcome);
    Ok(())
}

async fn run_batch(fetcher: &Arc<Fetcher>, cancel: CancellationToken) -> Result<BatchOutcome> {
    let mut batch = tokio::spawn({
        let fetcher = Arc::clone(fetcher);
        let cancel = cancel.clone();
        async move { fetcher.fetch_all(cancel).await }
    });

    let mut ticker = tokio::time::interval(PROGRESS_POLL);
    loop {
        tokio::select! {
            outcome = &mut batch => {
                eprintln!();
                return outcome.context("Fetch task failed");
            }
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                eprintln!("\nCancelling...");
                cancel.cancel();
            }
            _ = ticker.tick() => {
                let progress = fetcher.progress();
                if progress.running {
                    eprint!("\rFetching {}/{}", progress.current, progress.total);
                }
            }
        }
    }
}

/// Run a batch every `interval_minutes` until Ctrl-C.
async fn daemon(fetcher: Arc<Fetcher>, interval_minutes: u64) -> Result<()> {
    let period = Duration::from_secs(interval_minutes.max(1) * 60);
    let shutdown = CancellationToken::new();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        }
    });

    tracing::info!(interval_minutes = interval_minutes.max(1), "Daemon started");
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let outcome = fetcher.fetch_all(shutdown.child_token()).await;
                report(&outcome);
            }
        }
    }

    tracing::info!("Daemon stopped");
    Ok(())
}

fn report(outcome: &BatchOutcome) {
    match outcome {
        BatchOutcome::Completed(s) => println!(
            "Fetched {}/{} subscriptions ({} failed), {} new articles",
            s.completed, s.total, s.failed, s.articles_saved
        ),
        BatchOutcome::Cancelled(s) => println!(
            "Cancelled after {}/{} subscriptions ({} discarded), {} new articles",
            s.completed, s.total, s.cancelled, s.articles_saved
        ),
        BatchOutcome::AlreadyRunning => println!("A fetch is already running"),
        BatchOutcome::Aborted(reason) => eprintln!("Fetch aborted: {}", reason),
    }
}
