use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::parser::RawEntry;
use crate::storage::{NewArticle, Subscription};
use crate::translate::Translator;
use crate::util::{clean_html, first_image_src};

/// Image for an entry: structured image, then the first image enclosure,
/// then the first `<img>` in content, then in description.
pub fn resolve_image(entry: &RawEntry) -> Option<String> {
    let non_empty = |s: &&str| !s.trim().is_empty();

    entry
        .image
        .as_deref()
        .filter(non_empty)
        .or_else(|| {
            entry
                .enclosures
                .iter()
                .find(|e| e.is_image())
                .map(|e| e.url.as_str())
                .filter(non_empty)
        })
        .or_else(|| entry.content.as_deref().and_then(first_image_src))
        .or_else(|| entry.description.as_deref().and_then(first_image_src))
        .map(str::to_string)
}

/// Stable identity of an entry within its subscription.
///
/// The feed's own id when present, otherwise a SHA-256 of
/// `link|title|published` so link-less entries stay distinct.
pub fn entry_guid(entry: &RawEntry) -> String {
    if let Some(id) = entry.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        return id.to_string();
    }

    let input = format!(
        "{}|{}|{}",
        entry.link.as_deref().unwrap_or(""),
        entry.title,
        entry
            .published
            .map(|p| p.timestamp().to_string())
            .unwrap_or_default()
    );
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Build the article candidate for one entry.
///
/// Deterministic for a given entry as long as it carries a publish time;
/// `now` is only used when it doesn't.
pub fn normalize_entry(
    subscription: &Subscription,
    entry: &RawEntry,
    now: DateTime<Utc>,
) -> NewArticle {
    let content = entry
        .content
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .or(entry.description.as_deref())
        .map(clean_html)
        .unwrap_or_default();

    NewArticle {
        subscription_id: subscription.id,
        guid: entry_guid(entry),
        title: entry.title.clone(),
        url: entry.link.clone().unwrap_or_default(),
        image_url: resolve_image(entry),
        content,
        published_at: entry.published.unwrap_or(now).timestamp(),
        translated_title: None,
    }
}

/// Turns raw entries into articles, translating titles when configured.
#[derive(Clone, Default)]
pub struct Normalizer {
    translation: Option<(Arc<dyn Translator>, String)>,
}

impl Normalizer {
    /// A normalizer that never translates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate titles into `target_language` with `translator`.
    pub fn with_translation(translator: Arc<dyn Translator>, target_language: &str) -> Self {
        Self {
            translation: Some((translator, target_language.to_string())),
        }
    }

    pub fn translates(&self) -> bool {
        self.translation.is_some()
    }

    pub async fn normalize(&self, subscription: &Subscription, entry: &RawEntry) -> NewArticle {
        let mut article = normalize_entry(subscription, entry, Utc::now());

        if let Some((translator, lang)) = &self.translation {
            if !article.title.is_empty() {
                match translator.translate(&article.title, lang).await {
                    Ok(translated) => article.translated_title = Some(translated),
                    Err(e) => {
                        tracing::debug!(
                            subscription_id = subscription.id,
                            translator = translator.name(),
                            error = %e,
                            "Title translation failed, keeping original"
                        );
                    }
                }
            }
        }

        article
    }

    pub async fn normalize_all(
        &self,
        subscription: &Subscription,
        entries: &[RawEntry],
    ) -> Vec<NewArticle> {
        let mut articles = Vec::with_capacity(entries.len());
        for entry in entries {
            articles.push(self.normalize(subscription, entry).await);
        }
        articles
    }
}
