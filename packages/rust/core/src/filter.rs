//! Filter stage: classify candidates in batches and apply the keep policy.
//!
//! Batches are classified through the [`Classifier`] with bounded retries.
//! A batch that still fails is skipped as a whole; its articles are neither
//! kept nor rejected, so they are never marked seen and come back next run.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use feeddigest_shared::{
    ExternalFailureKind, FeedDigestError, FilterVerdict, Fingerprint, PipelineConfig, Result,
};

use crate::batcher::batch_by_count;
use crate::fingerprint::{Candidate, normalize_text};
use crate::pipeline::ProgressReporter;
use crate::retry::{CallPolicy, call_with_retry};
use crate::stages::{Classifier, ClassifyRequest, StageItem, clip};

const STAGE: &str = "filter";

/// Characters of body text sent with each title.
const SNIPPET_CHARS: usize = 280;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Outcome of the keep policy for one verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Kept, with the configured interest tags it matched.
    Keep(Vec<String>),
    /// Dropped because a noise tag matched. Wins over everything else.
    Noise(Vec<String>),
    /// The classifier itself said drop.
    Vetoed,
    /// No configured interest tag matched.
    NoInterest,
}

impl Decision {
    pub fn is_keep(&self) -> bool {
        matches!(self, Self::Keep(_))
    }
}

/// Apply the keep policy. Tag comparison is case-insensitive; returned tags
/// use the configured spelling.
pub fn decide(verdict: &FilterVerdict, interest_tags: &[String], noise_tags: &[String]) -> Decision {
    let matched = |configured: &[String]| -> Vec<String> {
        configured
            .iter()
            .filter(|tag| verdict.tags.iter().any(|t| t.trim().eq_ignore_ascii_case(tag.trim())))
            .cloned()
            .collect()
    };

    let noise = matched(noise_tags);
    if !noise.is_empty() {
        return Decision::Noise(noise);
    }
    if !verdict.keep {
        return Decision::Vetoed;
    }
    let interest = matched(interest_tags);
    if interest.is_empty() {
        Decision::NoInterest
    } else {
        Decision::Keep(interest)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// A candidate that passed the filter.
#[derive(Debug, Clone)]
pub struct KeptArticle {
    pub candidate: Candidate,
    pub tags: Vec<String>,
}

/// Result of the filter stage, in input order.
#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub kept: Vec<KeptArticle>,
    /// Classified and dropped. Eligible to be marked seen.
    pub rejected: Vec<Candidate>,
    /// Members of failed batches. Must not be marked seen.
    pub skipped: Vec<Fingerprint>,
    pub batches: usize,
    pub batches_skipped: usize,
}

/// Runs classification batches against a [`Classifier`].
pub struct FilterOrchestrator<C> {
    classifier: Arc<C>,
    config: Arc<PipelineConfig>,
}

impl<C: Classifier> FilterOrchestrator<C> {
    pub fn new(classifier: Arc<C>, config: Arc<PipelineConfig>) -> Self {
        Self { classifier, config }
    }

    /// Classify `candidates` and split them into kept, rejected and skipped.
    ///
    /// Never fails: backend errors are contained per batch.
    #[instrument(skip_all, fields(candidates = candidates.len()))]
    pub async fn run(
        &self,
        candidates: Vec<Candidate>,
        deadline: Instant,
        progress: &dyn ProgressReporter,
    ) -> FilterOutcome {
        let batches = batch_by_count(candidates, self.config.batch_size);
        let total = batches.len();
        let semaphore = Arc::new(Semaphore::new(self.config.filter_concurrency.max(1)));
        let policy = CallPolicy {
            retry: self.config.retry.clone(),
            call_timeout: self.config.call_timeout,
            deadline,
        };

        let mut handles = Vec::with_capacity(total);
        for (index, batch) in batches.into_iter().enumerate() {
            let fingerprints: Vec<Fingerprint> = batch.iter().map(|c| c.fingerprint).collect();
            let classifier = self.classifier.clone();
            let config = self.config.clone();
            let policy = policy.clone();
            let sem = semaphore.clone();

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                let request = ClassifyRequest {
                    items: batch.iter().map(stage_item).collect(),
                    interest_tags: config.interest_tags.clone(),
                    noise_tags: config.noise_tags.clone(),
                    model: config.filter_model.clone(),
                    temperature: config.filter_temperature,
                };
                let backend = classifier.as_ref();
                let request = &request;
                let result =
                    call_with_retry(&policy, STAGE, index, move || classify_checked(backend, request)).await;
                (batch, result)
            });
            handles.push((fingerprints, handle));
        }

        let mut outcome = FilterOutcome {
            batches: total,
            ..Default::default()
        };

        for (index, (fingerprints, handle)) in handles.into_iter().enumerate() {
            match handle.await {
                Ok((batch, Ok(verdicts))) => {
                    for (candidate, verdict) in batch.into_iter().zip(verdicts) {
                        let decision =
                            decide(&verdict, &self.config.interest_tags, &self.config.noise_tags);
                        debug!(
                            fingerprint = %candidate.fingerprint.short(),
                            title = %candidate.article.title,
                            ?decision,
                            "classified"
                        );
                        match decision {
                            Decision::Keep(tags) => outcome.kept.push(KeptArticle { candidate, tags }),
                            _ => outcome.rejected.push(candidate),
                        }
                    }
                }
                Ok((batch, Err(e))) => {
                    warn!(batch = index, size = batch.len(), error = %e, "filter batch skipped");
                    outcome.batches_skipped += 1;
                    outcome.skipped.extend(fingerprints);
                }
                Err(e) => {
                    error!(batch = index, error = %e, "filter batch task failed");
                    outcome.batches_skipped += 1;
                    outcome.skipped.extend(fingerprints);
                }
            }
            progress.batch_done(STAGE, index + 1, total);
        }

        info!(
            batches = total,
            batches_skipped = outcome.batches_skipped,
            kept = outcome.kept.len(),
            rejected = outcome.rejected.len(),
            skipped = outcome.skipped.len(),
            "filter stage complete"
        );
        outcome
    }
}

/// One classifier call; a verdict count that does not match the batch is a
/// malformed response and fails the whole batch.
async fn classify_checked<C: Classifier>(
    classifier: &C,
    request: &ClassifyRequest,
) -> Result<Vec<FilterVerdict>> {
    let verdicts = classifier.classify(request).await?;
    if verdicts.len() != request.items.len() {
        return Err(FeedDigestError::external(
            STAGE,
            ExternalFailureKind::Malformed,
            format!(
                "expected {} verdicts, got {}",
                request.items.len(),
                verdicts.len()
            ),
        ));
    }
    Ok(verdicts)
}

fn stage_item(candidate: &Candidate) -> StageItem {
    let text = normalize_text(&candidate.article.content);
    StageItem {
        title: candidate.article.title.clone(),
        text: clip(&text, SNIPPET_CHARS).to_string(),
    }
}
