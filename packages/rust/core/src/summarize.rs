//! Summarization stage: re-batch kept articles under a text budget and
//! summarize the batches in parallel.
//!
//! At most `summary.concurrency` batches are in flight. Results are matched
//! back to their articles by position. Summaries longer than the configured
//! maximum are cut and flagged, never expanded.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use feeddigest_shared::{
    ExternalFailureKind, FeedDigestError, Fingerprint, PipelineConfig, Result, Summary,
};

use crate::batcher::batch_by_budget;
use crate::filter::KeptArticle;
use crate::fingerprint::{Candidate, normalize_text};
use crate::pipeline::ProgressReporter;
use crate::retry::{CallPolicy, call_with_retry};
use crate::stages::{StageItem, SummarizeRequest, Summarizer, clip};

const STAGE: &str = "summarize";

/// A kept article together with its summary.
#[derive(Debug, Clone)]
pub struct SummarizedArticle {
    pub candidate: Candidate,
    pub tags: Vec<String>,
    pub summary: Summary,
}

/// Result of the summarization stage, in input order.
#[derive(Debug, Default)]
pub struct SummarizeOutcome {
    pub summarized: Vec<SummarizedArticle>,
    /// Members of failed batches. Must not be marked seen.
    pub skipped: Vec<Fingerprint>,
    pub batches: usize,
    pub batches_skipped: usize,
    pub truncated: usize,
}

/// Cut `text` to at most `max_chars` characters.
pub fn bound_summary(text: &str, max_chars: usize) -> Summary {
    let text = text.trim();
    let clipped = clip(text, max_chars);
    if clipped.len() < text.len() {
        Summary {
            text: clipped.trim_end().to_string(),
            truncated: true,
        }
    } else {
        Summary {
            text: text.to_string(),
            truncated: false,
        }
    }
}

/// Runs summarization batches against a [`Summarizer`].
pub struct SummarizerOrchestrator<S> {
    summarizer: Arc<S>,
    config: Arc<PipelineConfig>,
}

impl<S: Summarizer> SummarizerOrchestrator<S> {
    pub fn new(summarizer: Arc<S>, config: Arc<PipelineConfig>) -> Self {
        Self { summarizer, config }
    }

    /// Summarize `kept`, skipping batches that fail after retries or do not
    /// finish before `deadline`.
    #[instrument(skip_all, fields(articles = kept.len()))]
    pub async fn run(
        &self,
        kept: Vec<KeptArticle>,
        deadline: Instant,
        progress: &dyn ProgressReporter,
    ) -> SummarizeOutcome {
        let budget = self.config.batch_char_budget;
        let batches = batch_by_budget(kept, self.config.process_size, budget, |k| {
            item_weight(&k.candidate, budget)
        });
        let total = batches.len();
        let semaphore = Arc::new(Semaphore::new(self.config.summary_concurrency.max(1)));
        let policy = CallPolicy {
            retry: self.config.retry.clone(),
            call_timeout: self.config.call_timeout,
            deadline,
        };

        let mut handles = Vec::with_capacity(total);
        for (index, batch) in batches.into_iter().enumerate() {
            let fingerprints: Vec<Fingerprint> =
                batch.iter().map(|k| k.candidate.fingerprint).collect();
            let summarizer = self.summarizer.clone();
            let config = self.config.clone();
            let policy = policy.clone();
            let sem = semaphore.clone();

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                let request = SummarizeRequest {
                    items: batch
                        .iter()
                        .map(|k| stage_item(&k.candidate, config.batch_char_budget))
                        .collect(),
                    max_length: config.max_tokens,
                    language: config.language.clone(),
                    model: config.summary_model.clone(),
                    temperature: config.summary_temperature,
                };
                debug!(batch = index, size = batch.len(), "summarizing batch");
                let backend = summarizer.as_ref();
                let request = &request;
                let result =
                    call_with_retry(&policy, STAGE, index, move || summarize_checked(backend, request)).await;
                (batch, result)
            });
            handles.push((fingerprints, handle));
        }

        let mut outcome = SummarizeOutcome {
            batches: total,
            ..Default::default()
        };

        for (index, (fingerprints, handle)) in handles.into_iter().enumerate() {
            match handle.await {
                Ok((batch, Ok(texts))) => {
                    for (kept, text) in batch.into_iter().zip(texts) {
                        let summary = bound_summary(&text, self.config.max_tokens);
                        if summary.truncated {
                            outcome.truncated += 1;
                            debug!(
                                fingerprint = %kept.candidate.fingerprint.short(),
                                original_chars = text.chars().count(),
                                max_chars = self.config.max_tokens,
                                "summary truncated"
                            );
                        }
                        outcome.summarized.push(SummarizedArticle {
                            candidate: kept.candidate,
                            tags: kept.tags,
                            summary,
                        });
                    }
                }
                Ok((batch, Err(e))) => {
                    warn!(batch = index, size = batch.len(), error = %e, "summary batch skipped");
                    outcome.batches_skipped += 1;
                    outcome.skipped.extend(fingerprints);
                }
                Err(e) => {
                    error!(batch = index, error = %e, "summary batch task failed");
                    outcome.batches_skipped += 1;
                    outcome.skipped.extend(fingerprints);
                }
            }
            progress.batch_done(STAGE, index + 1, total);
        }

        if outcome.truncated > 0 {
            info!(count = outcome.truncated, max_chars = self.config.max_tokens, "summaries truncated");
        }
        info!(
            batches = total,
            batches_skipped = outcome.batches_skipped,
            summarized = outcome.summarized.len(),
            skipped = outcome.skipped.len(),
            "summarize stage complete"
        );
        outcome
    }
}

async fn summarize_checked<S: Summarizer>(
    summarizer: &S,
    request: &SummarizeRequest,
) -> Result<Vec<String>> {
    let texts = summarizer.summarize(request).await?;
    if texts.len() != request.items.len() {
        return Err(FeedDigestError::external(
            STAGE,
            ExternalFailureKind::Malformed,
            format!(
                "expected {} summaries, got {}",
                request.items.len(),
                texts.len()
            ),
        ));
    }
    Ok(texts)
}

/// Characters an article contributes to a batch, capped at the budget since
/// longer bodies are clipped before sending.
fn item_weight(candidate: &Candidate, budget: usize) -> usize {
    let chars = candidate.article.title.chars().count() + candidate.article.content.chars().count();
    chars.min(budget)
}

fn stage_item(candidate: &Candidate, budget: usize) -> StageItem {
    let text = normalize_text(&candidate.article.content);
    StageItem {
        title: candidate.article.title.clone(),
        text: clip(&text, budget).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use feeddigest_shared::{AppConfig, Article};

    use super::*;
    use crate::pipeline::SilentProgress;

    fn config(process_size: usize, budget: usize, max_tokens: usize) -> Arc<PipelineConfig> {
        let mut app = AppConfig::default();
        app.interests.interest_tags = vec!["AI".into()];
        app.summary.process_size = process_size;
        app.summary.batch_char_budget = budget;
        app.summary.max_tokens = max_tokens;
        app.summary.concurrency = 3;
        app.retry.max_retries = 0;
        Arc::new(PipelineConfig::from_app(&app).expect("valid config"))
    }

    fn kept(title: &str, content: &str) -> KeptArticle {
        KeptArticle {
            candidate: Candidate::new(Article {
                feed: "https://example.com/feed".into(),
                title: title.into(),
                link: format!("https://example.com/{title}"),
                published: None,
                content: content.into(),
            }),
            tags: vec!["AI".into()],
        }
    }

    /// Echoes "summary of <title>", or fails batches containing "boom".
    /// Tracks peak concurrency.
    #[derive(Default)]
    struct EchoSummarizer {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl Summarizer for EchoSummarizer {
        async fn summarize(&self, request: &SummarizeRequest) -> Result<Vec<String>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.batch_sizes.lock().unwrap().push(request.items.len());
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if request.items.iter().any(|i| i.title.contains("boom")) {
                return Err(FeedDigestError::external(
                    STAGE,
                    ExternalFailureKind::Unavailable,
                    "backend down",
                ));
            }
            Ok(request
                .items
                .iter()
                .map(|i| format!("summary of {}", i.title))
                .collect())
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(600)
    }

    #[test]
    fn bound_summary_cuts_and_flags() {
        let s = bound_summary("  abcdefghij  ", 4);
        assert_eq!(s.text, "abcd");
        assert!(s.truncated);

        let s = bound_summary("short", 10);
        assert_eq!(s.text, "short");
        assert!(!s.truncated);

        let s = bound_summary("新闻摘要内容", 2);
        assert_eq!(s.text, "新闻");
        assert!(s.truncated);
    }

    #[tokio::test(start_paused = true)]
    async fn summaries_align_with_input_order() {
        let summarizer = Arc::new(EchoSummarizer::default());
        let orchestrator = SummarizerOrchestrator::new(summarizer.clone(), config(2, 10_000, 200));

        let input = vec![kept("a", "x"), kept("b", "y"), kept("c", "z"), kept("d", "w"), kept("e", "v")];
        let outcome = orchestrator.run(input, deadline(), &SilentProgress).await;

        let texts: Vec<_> = outcome.summarized.iter().map(|s| s.summary.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["summary of a", "summary of b", "summary of c", "summary of d", "summary of e"]
        );
        assert_eq!(outcome.batches, 3);
        assert!(summarizer.peak.load(Ordering::SeqCst) <= 3);
        assert!(summarizer.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_isolates_long_articles() {
        let summarizer = Arc::new(EchoSummarizer::default());
        let orchestrator = SummarizerOrchestrator::new(summarizer.clone(), config(10, 100, 200));

        let long = "w".repeat(500);
        let input = vec![kept("a", "short"), kept("long", &long), kept("b", "short")];
        let outcome = orchestrator.run(input, deadline(), &SilentProgress).await;

        assert_eq!(outcome.summarized.len(), 3);
        let mut sizes = summarizer.batch_sizes.lock().unwrap().clone();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_is_skipped() {
        let summarizer = Arc::new(EchoSummarizer::default());
        let orchestrator = SummarizerOrchestrator::new(summarizer, config(1, 10_000, 200));

        let input = vec![kept("a", "x"), kept("boom", "y"), kept("c", "z")];
        let boom = input[1].candidate.fingerprint;
        let outcome = orchestrator.run(input, deadline(), &SilentProgress).await;

        assert_eq!(outcome.summarized.len(), 2);
        assert_eq!(outcome.skipped, vec![boom]);
        assert_eq!(outcome.batches_skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlong_summaries_are_truncated() {
        let orchestrator =
            SummarizerOrchestrator::new(Arc::new(EchoSummarizer::default()), config(5, 10_000, 8));
        let outcome = orchestrator
            .run(vec![kept("article", "body")], deadline(), &SilentProgress)
            .await;

        assert_eq!(outcome.truncated, 1);
        let summary = &outcome.summarized[0].summary;
        assert!(summary.truncated);
        assert_eq!(summary.text, "summary");
    }
}
