mod articles;
mod schema;
mod settings;
mod store;
mod subscriptions;
mod types;

pub use schema::Database;
pub use store::Store;
pub use types::{
    Article, ArticleFlags, DatabaseError, NewArticle, NewSubscription, Subscription,
    SubscriptionUpdate, SYNCED_SUBSCRIPTION_URL,
};
