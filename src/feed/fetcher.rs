use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::FeedClient;
use super::error::FetchError;
use super::normalize::Normalizer;
use super::parser::RawFeed;
use super::progress::{Progress, ProgressTracker};
use super::script::ScriptRunner;
use crate::rules::RuleEngine;
use crate::storage::{Article, NewSubscription, Store, Subscription};
use crate::translate::{self, Translator};

/// Fixed size of the fetch worker pool.
pub const MAX_CONCURRENT_FETCHES: usize = 5;

/// Settings key written at the end of every batch that ran.
pub const LAST_UPDATE_SETTING: &str = "last_article_update";

/// Counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Subscriptions in the snapshot
    pub total: usize,
    /// Sources that ran to an outcome (success or failure)
    pub completed: usize,
    /// Sources that ran and failed
    pub failed: usize,
    /// Sources that ran but dropped their articles because the batch was cancelled
    pub cancelled: usize,
    /// Newly inserted articles across all sources
    pub articles_saved: usize,
}

/// How a call to [`Fetcher::fetch_all`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed(BatchSummary),
    Cancelled(BatchSummary),
    /// Another batch was already running; nothing was done
    AlreadyRunning,
    /// The subscription list could not be loaded; nothing was dispatched
    Aborted(String),
}

/// Everything a single source task needs. Cheap to clone into spawned tasks.
#[derive(Clone)]
struct Pipeline {
    store: Arc<dyn Store>,
    client: Arc<dyn FeedClient>,
    scripts: Option<Arc<ScriptRunner>>,
    rules: Option<Arc<dyn RuleEngine>>,
}

/// Fetches every subscription through a bounded worker pool.
///
/// At most one batch runs at a time per [`ProgressTracker`]; progress is
/// readable from any thread while a batch runs.
pub struct Fetcher {
    pipeline: Pipeline,
    progress: Arc<ProgressTracker>,
    translator: Option<Arc<dyn Translator>>,
    http: reqwest::Client,
}

impl Fetcher {
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<dyn FeedClient>,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            pipeline: Pipeline {
                store,
                client,
                scripts: None,
                rules: None,
            },
            progress,
            translator: None,
            http: reqwest::Client::new(),
        }
    }

    /// Enable script-backed subscriptions.
    pub fn with_scripts(mut self, runner: ScriptRunner) -> Self {
        self.pipeline.scripts = Some(Arc::new(runner));
        self
    }

    /// Run `rules` on the articles each source persists.
    pub fn with_rules(mut self, rules: Arc<dyn RuleEngine>) -> Self {
        self.pipeline.rules = Some(rules);
        self
    }

    /// Use a fixed translator instead of resolving one from settings.
    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// HTTP client handed to translators resolved from settings.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn progress(&self) -> Progress {
        self.progress.snapshot()
    }

    /// Fetch all subscriptions once.
    ///
    /// Returns immediately with [`BatchOutcome::AlreadyRunning`] if a batch is
    /// in progress. Per-source failures are recorded on the subscription and
    /// never end the batch. Cancelling `cancel` stops dispatch; sources already
    /// running finish their current step and skip persistence.
    pub async fn fetch_all(&self, cancel: CancellationToken) -> BatchOutcome {
        let Some(_batch) = self.progress.try_begin() else {
            tracing::info!("Fetch already running, ignoring request");
            return BatchOutcome::AlreadyRunning;
        };

        let normalizer = self.normalizer().await;

        let mut subscriptions = match self.pipeline.store.list_subscriptions().await {
            Ok(subs) => subs,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load subscriptions, aborting fetch");
                return BatchOutcome::Aborted(e.to_string());
            }
        };

        // Filled by FreshRSS sync, never fetched
        subscriptions.retain(|sub| !sub.is_synced());

        let total = subscriptions.len();
        self.progress.set_total(total);
        tracing::info!(
            count = total,
            translate = normalizer.translates(),
            "Starting fetch"
        );

        let handles = self.dispatch(subscriptions, &normalizer, &cancel).await;

        let mut summary = BatchSummary {
            total,
            ..Default::default()
        };
        for handle in handles {
            match handle.await {
                Ok(Some(Ok(saved))) => {
                    summary.completed += 1;
                    summary.articles_saved += saved;
                }
                Ok(Some(Err(FetchError::Cancelled))) => {
                    summary.completed += 1;
                    summary.cancelled += 1;
                }
                Ok(Some(Err(_))) => {
                    summary.completed += 1;
                    summary.failed += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    // The task died before counting itself
                    tracing::warn!(error = %e, "Fetch task panicked");
                    self.progress.complete_one();
                    summary.completed += 1;
                    summary.failed += 1;
                }
            }
        }

        let stamp = Utc::now().to_rfc3339();
        if let Err(e) = self
            .pipeline
            .store
            .set_setting(LAST_UPDATE_SETTING, &stamp)
            .await
        {
            tracing::warn!(error = %e, "Failed to record last update time");
        }

        if cancel.is_cancelled() {
            tracing::info!(
                completed = summary.completed,
                discarded = summary.cancelled,
                total = total,
                "Fetch cancelled"
            );
            BatchOutcome::Cancelled(summary)
        } else {
            tracing::info!(
                completed = summary.completed,
                failed = summary.failed,
                saved = summary.articles_saved,
                "Fetch finished"
            );
            BatchOutcome::Completed(summary)
        }
    }

    /// Spawn one task per subscription, never more than
    /// [`MAX_CONCURRENT_FETCHES`] in flight. Each task yields `None` when it
    /// was cancelled before starting.
    async fn dispatch(
        &self,
        subscriptions: Vec<Subscription>,
        normalizer: &Normalizer,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<Option<Result<usize, FetchError>>>> {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES));
        let mut handles = Vec::with_capacity(subscriptions.len());

        for subscription in subscriptions {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Fetch cancelled, stopping dispatch");
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let pipeline = self.pipeline.clone();
            let normalizer = normalizer.clone();
            let progress = Arc::clone(&self.progress);
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                // Held until the task returns, on every path
                let _permit = permit;

                if cancel.is_cancelled() {
                    tracing::debug!(
                        subscription_id = subscription.id,
                        "Skipping source, fetch cancelled"
                    );
                    return None;
                }

                let result = pipeline.refresh(&subscription, &normalizer, &cancel).await;
                progress.complete_one();
                Some(result)
            }));
        }

        handles
    }

    /// Build the batch's normalizer from the translation settings.
    async fn normalizer(&self) -> Normalizer {
        if self.setting("translation_enabled").await.as_deref() != Some("true") {
            return Normalizer::new();
        }

        let Some(lang) = self
            .setting("target_language")
            .await
            .filter(|l| !l.trim().is_empty())
        else {
            tracing::debug!("Translation enabled without a target language, skipping");
            return Normalizer::new();
        };

        let translator = match &self.translator {
            Some(t) => Arc::clone(t),
            None => {
                let provider = self.setting("translation_provider").await;
                let key = self.setting("deepl_api_key").await;
                translate::from_settings(provider.as_deref(), key.as_deref(), self.http.clone())
            }
        };

        Normalizer::with_translation(translator, lang.trim())
    }

    async fn setting(&self, key: &str) -> Option<String> {
        match self.pipeline.store.get_setting(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = key, error = %e, "Failed to read setting");
                None
            }
        }
    }

    /// Fetch a feed URL once and subscribe to it.
    ///
    /// `title` overrides the feed's own title when non-empty.
    pub async fn add_subscription(
        &self,
        url: &str,
        category: &str,
        title: Option<&str>,
    ) -> Result<i64, FetchError> {
        let feed = self
            .pipeline
            .client
            .fetch_and_parse(url, &CancellationToken::new())
            .await?;

        self.create(feed, url.to_string(), None, category, title)
            .await
    }

    /// Run a script once and subscribe to its output.
    pub async fn add_script_subscription(
        &self,
        script_path: &str,
        category: &str,
        title: Option<&str>,
    ) -> Result<i64, FetchError> {
        let runner = self.pipeline.scripts.as_ref().ok_or_else(no_script_runner)?;
        let feed = runner
            .execute(script_path, Some(ScriptRunner::MAX_RUNTIME))
            .await?;

        self.create(
            feed,
            format!("script://{}", script_path),
            Some(script_path.to_string()),
            category,
            title,
        )
        .await
    }

    /// Subscribe without fetching; link and image are filled on the first batch.
    pub async fn import_subscription(
        &self,
        title: &str,
        url: &str,
        category: &str,
    ) -> Result<i64, FetchError> {
        let sub = NewSubscription {
            title: title.to_string(),
            url: url.to_string(),
            category: category.to_string(),
            ..Default::default()
        };
        self.pipeline
            .store
            .create_subscription(&sub)
            .await
            .map_err(|e| FetchError::PersistenceFailed(e.to_string()))
    }

    async fn create(
        &self,
        feed: RawFeed,
        url: String,
        script_path: Option<String>,
        category: &str,
        title: Option<&str>,
    ) -> Result<i64, FetchError> {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or(feed.title);

        let sub = NewSubscription {
            title,
            url,
            link: feed.link,
            description: feed.description,
            category: category.to_string(),
            image_url: feed.image,
            script_path,
        };

        let id = self
            .pipeline
            .store
            .create_subscription(&sub)
            .await
            .map_err(|e| FetchError::PersistenceFailed(e.to_string()))?;

        tracing::info!(subscription_id = id, title = %sub.title, "Subscription added");
        Ok(id)
    }
}

fn no_script_runner() -> FetchError {
    FetchError::ScriptExecutionFailed {
        reason: "script runner not configured".to_string(),
        stderr: None,
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

impl Pipeline {
    /// Fetch one source end to end and return the number of new articles.
    async fn refresh(
        &self,
        sub: &Subscription,
        normalizer: &Normalizer,
        cancel: &CancellationToken,
    ) -> Result<usize, FetchError> {
        let feed = match self.resolve(sub, cancel).await {
            Ok(feed) => feed,
            Err(e) => {
                self.record_failure(sub, &e).await;
                return Err(e);
            }
        };

        self.record_success(sub, &feed).await;

        let articles = normalizer.normalize_all(sub, &feed.entries).await;

        if cancel.is_cancelled() {
            tracing::debug!(
                subscription_id = sub.id,
                "Fetch cancelled, discarding articles"
            );
            return Err(FetchError::Cancelled);
        }

        if articles.is_empty() {
            return Ok(0);
        }

        let saved = match self.store.save_articles(&articles).await {
            Ok(saved) => saved,
            Err(e) => {
                let err = FetchError::PersistenceFailed(e.to_string());
                tracing::warn!(
                    subscription_id = sub.id,
                    title = %sub.title,
                    error = %err,
                    "Failed to save articles"
                );
                return Err(err);
            }
        };

        self.apply_rules(sub, &saved).await;

        tracing::debug!(
            subscription_id = sub.id,
            title = %sub.title,
            entries = feed.entries.len(),
            saved = saved.len(),
            "Source updated"
        );
        Ok(saved.len())
    }

    async fn resolve(
        &self,
        sub: &Subscription,
        cancel: &CancellationToken,
    ) -> Result<RawFeed, FetchError> {
        match sub.script() {
            Some(script) => {
                let runner = self.scripts.as_ref().ok_or_else(no_script_runner)?;
                runner.execute(script, None).await
            }
            None => self.client.fetch_and_parse(&sub.url, cancel).await,
        }
    }

    async fn record_failure(&self, sub: &Subscription, err: &FetchError) {
        if !err.is_recorded() {
            tracing::debug!(subscription_id = sub.id, error = %err, "Source not recorded");
            return;
        }

        tracing::warn!(
            subscription_id = sub.id,
            title = %sub.title,
            error = %err,
            "Fetch failed"
        );
        if let Err(e) = self
            .store
            .record_fetch_error(sub.id, Some(&err.to_string()))
            .await
        {
            tracing::warn!(subscription_id = sub.id, error = %e, "Failed to record fetch error");
        }
    }

    /// Clear the last error and fill in the cached link and image.
    async fn record_success(&self, sub: &Subscription, feed: &RawFeed) {
        if let Err(e) = self.store.record_fetch_error(sub.id, None).await {
            tracing::warn!(subscription_id = sub.id, error = %e, "Failed to clear fetch error");
        }

        if is_blank(sub.image_url.as_deref()) {
            if let Some(image) = feed.image.as_deref().filter(|i| !i.trim().is_empty()) {
                if let Err(e) = self.store.update_cached_image(sub.id, image).await {
                    tracing::warn!(
                        subscription_id = sub.id,
                        error = %e,
                        "Failed to cache feed image"
                    );
                }
            }
        }

        if is_blank(sub.link.as_deref()) {
            if let Some(link) = feed.link.as_deref().filter(|l| !l.trim().is_empty()) {
                if let Err(e) = self.store.update_cached_link(sub.id, link).await {
                    tracing::warn!(
                        subscription_id = sub.id,
                        error = %e,
                        "Failed to cache feed link"
                    );
                }
            }
        }
    }

    async fn apply_rules(&self, sub: &Subscription, saved: &[Article]) {
        let Some(rules) = &self.rules else {
            return;
        };
        if saved.is_empty() {
            return;
        }

        match rules.apply_to_articles(saved).await {
            Ok(0) => {}
            Ok(affected) => {
                tracing::info!(
                    subscription_id = sub.id,
                    title = %sub.title,
                    count = affected,
                    "Applied rules"
                );
            }
            Err(e) => {
                tracing::warn!(
                    subscription_id = sub.id,
                    title = %sub.title,
                    error = %e,
                    "Failed to apply rules"
                );
            }
        }
    }
}
