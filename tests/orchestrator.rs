//! Integration tests for the batch fetcher: pool bounds, progress,
//! cancellation and partial-failure handling.
//!
//! Sources are served by in-process mock clients; articles go to a real
//! SQLite file so concurrent workers write through the same pool they would
//! in production.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use feedhaul::feed::{
    BatchOutcome, FeedClient, FetchError, Fetcher, ProgressTracker, RawEntry, RawFeed,
    LAST_UPDATE_SETTING, MAX_CONCURRENT_FETCHES,
};
use feedhaul::rules::{RuleEngine, RuleError};
use feedhaul::storage::{
    Article, ArticleFlags, Database, NewArticle, NewSubscription, Store, Subscription,
    SYNCED_SUBSCRIPTION_URL,
};

// ============================================================================
// Fixtures
// ============================================================================

/// Serves a two-entry feed for any URL after `delay`, failing URLs in `failing`.
///
/// With `gate` set, every fetch waits for a permit before answering.
/// With `linkless` set, the feed has three entries without links or ids.
#[derive(Default)]
struct MockClient {
    delay: Duration,
    failing: HashSet<String>,
    gate: Option<Arc<Semaphore>>,
    linkless: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl MockClient {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl FeedClient for MockClient {
    async fn fetch_and_parse(
        &self,
        url: &str,
        _cancel: &CancellationToken,
    ) -> Result<RawFeed, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        tokio::time::sleep(self.delay).await;
        if let Some(gate) = &self.gate {
            let _open = gate.acquire().await;
        }

        if self.failing.contains(url) {
            return Err(FetchError::NetworkFetchFailed("connection refused".into()));
        }

        if self.linkless {
            let entries = ["Morning note", "Noon note", "Evening note"]
                .iter()
                .map(|title| RawEntry {
                    title: title.to_string(),
                    content: Some(format!("<p>{}</p>", title)),
                    ..Default::default()
                })
                .collect();
            return Ok(RawFeed {
                title: "Notes".into(),
                entries,
                ..Default::default()
            });
        }

        let entry = |n: u32| RawEntry {
            title: format!("Post {}", n),
            link: Some(format!("{}/post/{}", url, n)),
            content: Some(format!("<p>Body {}</p>", n)),
            published: Utc.with_ymd_and_hms(2024, 3, n, 12, 0, 0).single(),
            ..Default::default()
        };

        Ok(RawFeed {
            title: "Mock".into(),
            link: Some(format!("{}/home", url)),
            entries: vec![entry(1), entry(2)],
            ..Default::default()
        })
    }
}

/// Records the articles it is handed; optionally fails every call.
#[derive(Default)]
struct RecordingRules {
    fail: bool,
    seen: Mutex<Vec<i64>>,
}

#[async_trait]
impl RuleEngine for RecordingRules {
    async fn apply_to_articles(&self, articles: &[Article]) -> Result<usize, RuleError> {
        self.seen
            .lock()
            .unwrap()
            .extend(articles.iter().map(|a| a.id));
        if self.fail {
            return Err(RuleError::Store(anyhow::anyhow!("rules table unavailable")));
        }
        Ok(0)
    }
}

async fn file_db(dir: &tempfile::TempDir) -> Arc<Database> {
    let path = dir.path().join("feeds.db");
    Arc::new(Database::open(path.to_str().unwrap()).await.unwrap())
}

async fn subscribe(db: &Database, count: usize) -> Vec<i64> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        ids.push(
            db.insert_subscription(&NewSubscription {
                title: format!("Feed {}", i),
                url: format!("https://feed{}.example.com", i),
                ..Default::default()
            })
            .await
            .unwrap(),
        );
    }
    ids
}

async fn article_count(db: &Database, ids: &[i64]) -> usize {
    let mut total = 0;
    for id in ids {
        total += db.get_recent_articles(*id, 100).await.unwrap().len();
    }
    total
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_completion_reaches_total_despite_failures() {
    let dir = tempfile::tempdir().unwrap();
    let db = file_db(&dir).await;
    let ids = subscribe(&db, 8).await;

    let client = Arc::new(MockClient {
        failing: ["https://feed2.example.com", "https://feed5.example.com"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        ..Default::default()
    });
    let fetcher = Fetcher::new(db.clone(), client, Arc::new(ProgressTracker::new()));

    match fetcher.fetch_all(CancellationToken::new()).await {
        BatchOutcome::Completed(summary) => {
            assert_eq!(summary.total, 8);
            assert_eq!(summary.completed, 8);
            assert_eq!(summary.failed, 2);
            assert_eq!(summary.articles_saved, 12);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let progress = fetcher.progress();
    assert_eq!(progress.total, 8);
    assert_eq!(progress.current, 8);
    assert!(!progress.running);

    let failed = db.get_subscription(ids[2]).await.unwrap().unwrap();
    assert!(failed.last_error.unwrap().contains("connection refused"));
    let ok = db.get_subscription(ids[0]).await.unwrap().unwrap();
    assert_eq!(ok.last_error, None);
    assert_eq!(ok.link.as_deref(), Some("https://feed0.example.com/home"));
    assert_eq!(article_count(&db, &ids).await, 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_never_exceeds_limit() {
    let dir = tempfile::tempdir().unwrap();
    let db = file_db(&dir).await;
    subscribe(&db, 20).await;

    let client = Arc::new(MockClient::with_delay(Duration::from_millis(30)));
    let fetcher = Fetcher::new(db, client.clone(), Arc::new(ProgressTracker::new()));

    fetcher.fetch_all(CancellationToken::new()).await;

    assert_eq!(client.calls.load(Ordering::SeqCst), 20);
    let max = client.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= MAX_CONCURRENT_FETCHES, "saw {} concurrent fetches", max);
    assert!(max > 1, "fetches never overlapped");
}

#[tokio::test]
async fn test_second_start_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let db = file_db(&dir).await;
    subscribe(&db, 3).await;

    // Every fetch of the first batch parks on the gate until it is opened
    let gate = Arc::new(Semaphore::new(0));
    let client = Arc::new(MockClient {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let fetcher = Arc::new(Fetcher::new(
        db,
        client.clone(),
        Arc::new(ProgressTracker::new()),
    ));

    let first = tokio::spawn({
        let fetcher = fetcher.clone();
        async move { fetcher.fetch_all(CancellationToken::new()).await }
    });

    while client.calls.load(Ordering::SeqCst) < 3 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let before = fetcher.progress();
    assert!(before.running);
    assert_eq!((before.total, before.current), (3, 0));

    assert_eq!(
        fetcher.fetch_all(CancellationToken::new()).await,
        BatchOutcome::AlreadyRunning
    );
    assert_eq!(fetcher.progress(), before);

    gate.add_permits(3);
    assert!(matches!(first.await.unwrap(), BatchOutcome::Completed(_)));
    assert_eq!(client.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_cancel_after_dispatch_persists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let db = file_db(&dir).await;
    let ids = subscribe(&db, 12).await;

    // Fetches ignore the token, so every started source reaches the
    // pre-persist check after cancellation.
    let client = Arc::new(MockClient::with_delay(Duration::from_millis(150)));
    let fetcher = Arc::new(Fetcher::new(
        db.clone(),
        client.clone(),
        Arc::new(ProgressTracker::new()),
    ));
    let cancel = CancellationToken::new();

    let batch = tokio::spawn({
        let fetcher = fetcher.clone();
        let cancel = cancel.clone();
        async move { fetcher.fetch_all(cancel).await }
    });

    while client.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();

    let outcome = batch.await.unwrap();
    let summary = match outcome {
        BatchOutcome::Cancelled(summary) => summary,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(summary.articles_saved, 0);
    // Sources that dropped their articles are not failures
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.cancelled, summary.completed);
    assert!(summary.completed >= 1);

    let progress = fetcher.progress();
    assert!(!progress.running);
    assert!(progress.current <= progress.total);
    assert!(client.calls.load(Ordering::SeqCst) <= MAX_CONCURRENT_FETCHES);
    assert_eq!(article_count(&db, &ids).await, 0);

    // Cancellation is not a subscription error
    for id in ids {
        assert_eq!(db.get_subscription(id).await.unwrap().unwrap().last_error, None);
    }
}

#[tokio::test]
async fn test_hook_receives_only_new_articles() {
    let dir = tempfile::tempdir().unwrap();
    let db = file_db(&dir).await;
    let ids = subscribe(&db, 2).await;

    let rules = Arc::new(RecordingRules::default());
    let fetcher = Fetcher::new(
        db.clone(),
        Arc::new(MockClient::default()),
        Arc::new(ProgressTracker::new()),
    )
    .with_rules(rules.clone());

    fetcher.fetch_all(CancellationToken::new()).await;
    let mut seen = rules.seen.lock().unwrap().clone();
    seen.sort_unstable();

    let mut stored: Vec<i64> = Vec::new();
    for id in &ids {
        stored.extend(db.get_recent_articles(*id, 100).await.unwrap().iter().map(|a| a.id));
    }
    stored.sort_unstable();
    assert_eq!(seen, stored);

    // Nothing new the second time, so the hook is not invoked again
    rules.seen.lock().unwrap().clear();
    fetcher.fetch_all(CancellationToken::new()).await;
    assert!(rules.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_hook_failure_does_not_affect_batch() {
    let dir = tempfile::tempdir().unwrap();
    let db = file_db(&dir).await;
    let ids = subscribe(&db, 3).await;

    let fetcher = Fetcher::new(
        db.clone(),
        Arc::new(MockClient::default()),
        Arc::new(ProgressTracker::new()),
    )
    .with_rules(Arc::new(RecordingRules {
        fail: true,
        ..Default::default()
    }));

    match fetcher.fetch_all(CancellationToken::new()).await {
        BatchOutcome::Completed(summary) => {
            assert_eq!(summary.failed, 0);
            assert_eq!(summary.articles_saved, 6);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(fetcher.progress().current, 3);
    for id in ids {
        assert_eq!(db.get_subscription(id).await.unwrap().unwrap().last_error, None);
    }
}

#[tokio::test]
async fn test_last_update_written() {
    let dir = tempfile::tempdir().unwrap();
    let db = file_db(&dir).await;
    subscribe(&db, 1).await;

    let fetcher = Fetcher::new(
        db.clone(),
        Arc::new(MockClient::default()),
        Arc::new(ProgressTracker::new()),
    );
    fetcher.fetch_all(CancellationToken::new()).await;

    let stamp = db.get_setting(LAST_UPDATE_SETTING).await.unwrap().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());
}

#[tokio::test]
async fn test_linkless_entries_all_stored() {
    let dir = tempfile::tempdir().unwrap();
    let db = file_db(&dir).await;
    let ids = subscribe(&db, 1).await;

    let fetcher = Fetcher::new(
        db.clone(),
        Arc::new(MockClient {
            linkless: true,
            ..Default::default()
        }),
        Arc::new(ProgressTracker::new()),
    );

    match fetcher.fetch_all(CancellationToken::new()).await {
        BatchOutcome::Completed(summary) => assert_eq!(summary.articles_saved, 3),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(article_count(&db, &ids).await, 3);

    // Same entries again: identities are stable, nothing new
    match fetcher.fetch_all(CancellationToken::new()).await {
        BatchOutcome::Completed(summary) => assert_eq!(summary.articles_saved, 0),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(article_count(&db, &ids).await, 3);
}

#[tokio::test]
async fn test_synced_subscription_not_fetched() {
    let dir = tempfile::tempdir().unwrap();
    let db = file_db(&dir).await;
    subscribe(&db, 1).await;
    db.insert_subscription(&NewSubscription {
        title: "FreshRSS Synced Articles".into(),
        url: SYNCED_SUBSCRIPTION_URL.into(),
        ..Default::default()
    })
    .await
    .unwrap();

    let client = Arc::new(MockClient::default());
    let fetcher = Fetcher::new(db, client.clone(), Arc::new(ProgressTracker::new()));

    match fetcher.fetch_all(CancellationToken::new()).await {
        BatchOutcome::Completed(summary) => {
            assert_eq!(summary.total, 1);
            assert_eq!(summary.failed, 0);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_subscription_list_completes() {
    let dir = tempfile::tempdir().unwrap();
    let db = file_db(&dir).await;

    let fetcher = Fetcher::new(
        db,
        Arc::new(MockClient::default()),
        Arc::new(ProgressTracker::new()),
    );
    match fetcher.fetch_all(CancellationToken::new()).await {
        BatchOutcome::Completed(summary) => assert_eq!(summary.total, 0),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(!fetcher.progress().running);
}

// ============================================================================
// Store failure
// ============================================================================

/// A store whose subscription list is unreadable.
#[derive(Default)]
struct BrokenStore {
    settings_written: AtomicUsize,
}

#[async_trait]
impl Store for BrokenStore {
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        Err(anyhow::anyhow!("disk I/O error"))
    }

    async fn record_fetch_error(&self, _id: i64, _message: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn update_cached_image(&self, _id: i64, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn update_cached_link(&self, _id: i64, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn save_articles(&self, _articles: &[NewArticle]) -> Result<Vec<Article>> {
        Ok(Vec::new())
    }

    async fn query_recent_articles(&self, _id: i64, _limit: usize) -> Result<Vec<Article>> {
        Ok(Vec::new())
    }

    async fn get_setting(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set_setting(&self, _key: &str, _value: &str) -> Result<()> {
        self.settings_written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_subscription(&self, _sub: &NewSubscription) -> Result<i64> {
        Ok(1)
    }

    async fn set_article_flags(&self, _ids: &[i64], _flags: ArticleFlags) -> Result<u64> {
        Ok(0)
    }
}

#[tokio::test]
async fn test_subscription_load_failure_aborts() {
    let store = Arc::new(BrokenStore::default());
    let client = Arc::new(MockClient::default());
    let fetcher = Fetcher::new(store.clone(), client.clone(), Arc::new(ProgressTracker::new()));

    match fetcher.fetch_all(CancellationToken::new()).await {
        BatchOutcome::Aborted(reason) => assert!(reason.contains("disk I/O error")),
        other => panic!("unexpected outcome {:?}", other),
    }

    assert!(!fetcher.progress().running);
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.settings_written.load(Ordering::SeqCst), 0);

    // The tracker is free again
    assert!(matches!(
        fetcher.fetch_all(CancellationToken::new()).await,
        BatchOutcome::Aborted(_)
    ));
}

// ============================================================================
// Persistence failure
// ============================================================================

/// Delegates to a real database but refuses to save one subscription's articles.
struct FlakyStore {
    inner: Arc<Database>,
    refuse: i64,
}

#[async_trait]
impl Store for FlakyStore {
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        self.inner.list_subscriptions().await
    }

    async fn record_fetch_error(&self, id: i64, message: Option<&str>) -> Result<()> {
        self.inner.record_fetch_error(id, message).await
    }

    async fn update_cached_image(&self, id: i64, url: &str) -> Result<()> {
        self.inner.update_cached_image(id, url).await
    }

    async fn update_cached_link(&self, id: i64, url: &str) -> Result<()> {
        self.inner.update_cached_link(id, url).await
    }

    async fn save_articles(&self, articles: &[NewArticle]) -> Result<Vec<Article>> {
        if articles.iter().any(|a| a.subscription_id == self.refuse) {
            return Err(anyhow::anyhow!("database disk image is malformed"));
        }
        self.inner.save_articles(articles).await
    }

    async fn query_recent_articles(&self, id: i64, limit: usize) -> Result<Vec<Article>> {
        self.inner.query_recent_articles(id, limit).await
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.inner.get_setting(key).await
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set_setting(key, value).await
    }

    async fn create_subscription(&self, sub: &NewSubscription) -> Result<i64> {
        self.inner.create_subscription(sub).await
    }

    async fn set_article_flags(&self, ids: &[i64], flags: ArticleFlags) -> Result<u64> {
        self.inner.set_article_flags(ids, flags).await
    }
}

#[tokio::test]
async fn test_save_failure_isolated_to_one_source() {
    let dir = tempfile::tempdir().unwrap();
    let db = file_db(&dir).await;
    let ids = subscribe(&db, 4).await;

    let store = Arc::new(FlakyStore {
        inner: db.clone(),
        refuse: ids[1],
    });
    let fetcher = Fetcher::new(
        store,
        Arc::new(MockClient::with_delay(Duration::from_millis(20))),
        Arc::new(ProgressTracker::new()),
    );

    match fetcher.fetch_all(CancellationToken::new()).await {
        BatchOutcome::Completed(summary) => {
            assert_eq!(summary.total, 4);
            assert_eq!(summary.completed, 4);
            assert_eq!(summary.failed, 1);
            assert_eq!(summary.cancelled, 0);
            assert_eq!(summary.articles_saved, 6);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(fetcher.progress().current, 4);

    // The fetch itself succeeded, so nothing is recorded on the subscription
    let refused = db.get_subscription(ids[1]).await.unwrap().unwrap();
    assert_eq!(refused.last_error, None);
    assert_eq!(article_count(&db, &ids[1..2]).await, 0);

    for id in [ids[0], ids[2], ids[3]] {
        assert_eq!(db.get_recent_articles(id, 100).await.unwrap().len(), 2);
    }
}
