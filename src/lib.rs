//! Personal feed aggregator: subscriptions, a bounded fetch pool, article
//! storage and optional title translation and rules, plus FreshRSS sync.

pub mod config;
pub mod feed;
pub mod rules;
pub mod storage;
pub mod sync;
pub mod translate;
pub mod util;
