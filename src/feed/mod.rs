//! Feed retrieval: sources, parsing, normalization and the batch fetcher.
//!
//! # Architecture
//!
//! - [`parser`] - `feed-rs` documents mapped to [`RawFeed`] / [`RawEntry`]
//! - [`client`] - network fetching behind the [`FeedClient`] trait
//! - [`script`] - script-backed sources run from the scripts directory
//! - [`normalize`] - raw entries to [`NewArticle`](crate::storage::NewArticle)s
//! - [`fetcher`] - the bounded worker pool that refreshes every subscription
//! - [`progress`] - shared batch progress
//!
//! # Example
//!
//! ```ignore
//! let fetcher = Fetcher::new(store, Arc::new(HttpFeedClient::new(client)), progress)
//!     .with_scripts(ScriptRunner::new(scripts_dir));
//! let outcome = fetcher.fetch_all(CancellationToken::new()).await;
//! ```

mod client;
mod error;
mod fetcher;
mod normalize;
mod parser;
mod progress;
mod script;

pub use client::{FeedClient, HttpFeedClient};
pub use error::{FetchError, Platform};
pub use fetcher::{
    BatchOutcome, BatchSummary, Fetcher, LAST_UPDATE_SETTING, MAX_CONCURRENT_FETCHES,
};
pub use normalize::{entry_guid, normalize_entry, resolve_image, Normalizer};
pub use parser::{parse_feed, Enclosure, RawEntry, RawFeed};
pub use progress::{Progress, ProgressTracker, RunningBatch};
pub use script::{launcher_for, Launcher, ScriptRunner};
