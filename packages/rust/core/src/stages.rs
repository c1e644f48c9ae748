//! Capability traits for the external stages.
//!
//! The pipeline never talks to a model directly. It hands batches to a
//! [`Classifier`] and a [`Summarizer`]; the LLM crate provides the production
//! implementations and tests provide scripted ones. Teaser articles that
//! survive the filter are completed through an [`Expander`].

use std::future::Future;

use serde::Serialize;

use feeddigest_shared::{Article, FilterVerdict, Result};

/// One article as presented to an external stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageItem {
    pub title: String,
    /// Plain text, already cut to the stage's per-item limit.
    pub text: String,
}

/// Input to one classifier call.
#[derive(Debug, Clone)]
pub struct ClassifyRequest {
    pub items: Vec<StageItem>,
    pub interest_tags: Vec<String>,
    pub noise_tags: Vec<String>,
    pub model: String,
    pub temperature: f32,
}

/// Input to one summarizer call.
#[derive(Debug, Clone)]
pub struct SummarizeRequest {
    pub items: Vec<StageItem>,
    /// Maximum summary length in characters.
    pub max_length: usize,
    pub language: String,
    pub model: String,
    pub temperature: f32,
}

/// Produces one verdict per item, in input order.
pub trait Classifier: Send + Sync + 'static {
    fn classify(
        &self,
        request: &ClassifyRequest,
    ) -> impl Future<Output = Result<Vec<FilterVerdict>>> + Send;
}

/// Produces one summary per item, in input order.
pub trait Summarizer: Send + Sync + 'static {
    fn summarize(
        &self,
        request: &SummarizeRequest,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// Fetches the full text behind a teaser article.
///
/// Runs after the seen check, so an article's identity is always what the
/// feed supplied.
pub trait Expander: Send + Sync + 'static {
    /// Full text for `article`, or `None` to keep the feed's own text.
    fn expand(&self, article: &Article) -> impl Future<Output = Option<String>> + Send;
}

/// Keeps every article as the feed supplied it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExpansion;

impl Expander for NoExpansion {
    async fn expand(&self, _article: &Article) -> Option<String> {
        None
    }
}

/// First `max` characters of `text`, on a char boundary.
pub(crate) fn clip(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("héllo", 2), "hé");
        assert_eq!(clip("日本語テキスト", 3), "日本語");
        assert_eq!(clip("short", 100), "short");
        assert_eq!(clip("", 3), "");
    }
}
