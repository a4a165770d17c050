//! Settings-backed article rules.
//!
//! Rules live as a JSON array under the `rules` setting and are evaluated
//! against freshly persisted articles after each source is fetched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::storage::{Article, ArticleFlags, Store};

/// Settings key holding the rule list.
pub const RULES_SETTING: &str = "rules";

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Invalid rules setting: {0}")]
    InvalidRules(#[from] serde_json::Error),
    #[error("Rule store operation failed: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Title,
    Content,
    Url,
    Category,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub field: Field,
    pub contains: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    MarkRead,
    Favorite,
    Hide,
}

impl Action {
    fn flags(self) -> ArticleFlags {
        match self {
            Action::MarkRead => ArticleFlags {
                read: Some(true),
                ..Default::default()
            },
            Action::Favorite => ArticleFlags {
                favorite: Some(true),
                ..Default::default()
            },
            Action::Hide => ArticleFlags {
                hidden: Some(true),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub condition: Condition,
    pub action: Action,
}

fn enabled_by_default() -> bool {
    true
}

impl Rule {
    /// Case-insensitive substring match. An empty needle never matches.
    pub fn matches(&self, article: &Article, category: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let needle = self.condition.contains.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }

        let haystack = match self.condition.field {
            Field::Title => article.title.as_str(),
            Field::Content => article.content.as_str(),
            Field::Url => article.url.as_str(),
            Field::Category => category,
        };
        haystack.to_lowercase().contains(&needle)
    }
}

/// Parse the stored rule list. An empty value means no rules.
pub fn parse_rules(raw: &str) -> Result<Vec<Rule>, RuleError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(raw)?)
}

#[async_trait]
pub trait RuleEngine: Send + Sync {
    /// Apply all enabled rules and return how many articles were affected.
    async fn apply_to_articles(&self, articles: &[Article]) -> Result<usize, RuleError>;
}

pub struct Rules {
    store: Arc<dyn Store>,
}

impl Rules {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn load(&self) -> Result<Vec<Rule>, RuleError> {
        match self.store.get_setting(RULES_SETTING).await? {
            Some(raw) => parse_rules(&raw),
            None => Ok(Vec::new()),
        }
    }

    async fn categories(&self) -> Result<HashMap<i64, String>, RuleError> {
        Ok(self
            .store
            .list_subscriptions()
            .await?
            .into_iter()
            .map(|s| (s.id, s.category))
            .collect())
    }
}

#[async_trait]
impl RuleEngine for Rules {
    async fn apply_to_articles(&self, articles: &[Article]) -> Result<usize, RuleError> {
        if articles.is_empty() {
            return Ok(0);
        }

        let rules: Vec<Rule> = self.load().await?.into_iter().filter(|r| r.enabled).collect();
        if rules.is_empty() {
            return Ok(0);
        }

        let categories = if rules.iter().any(|r| r.condition.field == Field::Category) {
            self.categories().await?
        } else {
            HashMap::new()
        };

        let mut affected = BTreeSet::new();
        for rule in &rules {
            let ids: Vec<i64> = articles
                .iter()
                .filter(|a| {
                    let category = categories
                        .get(&a.subscription_id)
                        .map(String::as_str)
                        .unwrap_or("");
                    rule.matches(a, category)
                })
                .map(|a| a.id)
                .collect();

            if ids.is_empty() {
                continue;
            }

            self.store.set_article_flags(&ids, rule.action.flags()).await?;
            tracing::debug!(rule = %rule.name, count = ids.len(), "Rule applied");
            affected.extend(ids);
        }

        Ok(affected.len())
    }
}
