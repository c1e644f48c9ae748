//! End-to-end digest run: articles → fingerprint → seen check → filter →
//! full text → summarize → assemble → commit.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use feeddigest_shared::{Article, Digest, PipelineConfig};
use feeddigest_storage::SeenStore;

use crate::digest::assemble_and_commit;
use crate::filter::{FilterOrchestrator, KeptArticle};
use crate::fingerprint::Candidate;
use crate::stages::{Classifier, Expander, NoExpansion, Summarizer};
use crate::summarize::SummarizerOrchestrator;

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each stage batch settles, successful or not.
    fn batch_done(&self, stage: &str, done: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn batch_done(&self, _stage: &str, _done: usize, _total: usize) {}
    fn done(&self, _report: &RunReport) {}
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Counters for one run, persisted in the run history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Articles handed to the run.
    pub fetched: usize,
    /// Dropped as repeats of an earlier article in the same run.
    pub duplicates: usize,
    /// Dropped because an earlier run already processed them.
    pub already_seen: usize,
    /// New articles sent to the filter stage.
    pub candidates: usize,
    pub kept: usize,
    pub rejected: usize,
    /// Kept but held back by `run.max_articles`.
    pub deferred: usize,
    /// Kept teasers replaced with their full page text.
    pub expanded: usize,
    pub filter_batches: usize,
    pub filter_batches_skipped: usize,
    pub summary_batches: usize,
    pub summary_batches_skipped: usize,
    /// Articles left unprocessed by skipped batches.
    pub skipped: usize,
    pub truncated: usize,
    pub entries: usize,
    pub marked_seen: usize,
    pub lost_claims: usize,
    pub elapsed_ms: u64,
}

/// Result of a run: the frozen digest and what happened along the way.
#[derive(Debug)]
pub struct RunReport {
    pub digest: Digest,
    pub stats: RunStats,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// One configured pipeline. Reusable across runs.
pub struct Pipeline<C, S, E = NoExpansion> {
    config: Arc<PipelineConfig>,
    filter: FilterOrchestrator<C>,
    summarizer: SummarizerOrchestrator<S>,
    expander: Arc<E>,
}

impl<C: Classifier, S: Summarizer> Pipeline<C, S> {
    /// A pipeline that summarizes articles as the feeds supplied them.
    pub fn new(config: Arc<PipelineConfig>, classifier: Arc<C>, summarizer: Arc<S>) -> Self {
        Self {
            filter: FilterOrchestrator::new(classifier, config.clone()),
            summarizer: SummarizerOrchestrator::new(summarizer, config.clone()),
            expander: Arc::new(NoExpansion),
            config,
        }
    }
}

impl<C: Classifier, S: Summarizer, E: Expander> Pipeline<C, S, E> {
    /// Complete kept teasers through `expander` before summarizing.
    pub fn with_expander<X: Expander>(self, expander: Arc<X>) -> Pipeline<C, S, X> {
        Pipeline {
            config: self.config,
            filter: self.filter,
            summarizer: self.summarizer,
            expander,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline over `articles`.
    ///
    /// Always produces a digest, possibly empty. Failed or unfinished batches
    /// are skipped and their articles stay unseen for the next run.
    #[instrument(skip_all, fields(articles = articles.len()))]
    pub async fn run(
        &self,
        articles: Vec<Article>,
        store: &SeenStore,
        progress: &dyn ProgressReporter,
    ) -> RunReport {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.run_timeout;
        let mut stats = RunStats {
            fetched: articles.len(),
            ..Default::default()
        };

        info!(
            articles = articles.len(),
            degraded_store = store.is_degraded(),
            "starting digest run"
        );

        // --- Phase 1: Fingerprint + dedup ---
        progress.phase("Checking for new articles");
        let mut in_run = HashSet::new();
        let mut candidates = Vec::new();
        for article in articles {
            let candidate = Candidate::new(article);
            if !in_run.insert(candidate.fingerprint) {
                stats.duplicates += 1;
                debug!(fingerprint = %candidate.fingerprint.short(), "duplicate within run");
                continue;
            }
            if store.contains(&candidate.fingerprint).await {
                stats.already_seen += 1;
                continue;
            }
            candidates.push(candidate);
        }
        stats.candidates = candidates.len();
        info!(
            candidates = stats.candidates,
            duplicates = stats.duplicates,
            already_seen = stats.already_seen,
            "new articles identified"
        );

        // --- Phase 2: Filter ---
        progress.phase("Filtering");
        let filtered = self.filter.run(candidates, deadline, progress).await;
        stats.filter_batches = filtered.batches;
        stats.filter_batches_skipped = filtered.batches_skipped;
        stats.skipped += filtered.skipped.len();
        stats.kept = filtered.kept.len();
        stats.rejected = filtered.rejected.len();

        let mut kept = filtered.kept;
        if let Some(cap) = self.config.max_articles.filter(|cap| kept.len() > *cap) {
            let deferred = kept.split_off(cap);
            stats.deferred = deferred.len();
            info!(cap, deferred = stats.deferred, "article cap reached, deferring the rest to the next run");
        }

        // --- Phase 3: Full text ---
        // Identity was fixed at fingerprinting; only the text sent to the
        // summarizer changes here.
        progress.phase("Fetching full text");
        stats.expanded = self.expand(&mut kept, deadline).await;

        // --- Phase 4: Summarize ---
        progress.phase("Summarizing");
        let summarized = self.summarizer.run(kept, deadline, progress).await;
        stats.summary_batches = summarized.batches;
        stats.summary_batches_skipped = summarized.batches_skipped;
        stats.skipped += summarized.skipped.len();
        stats.truncated = summarized.truncated;

        // --- Phase 5: Assemble + commit ---
        progress.phase("Assembling digest");
        let assembled =
            assemble_and_commit(summarized.summarized, &filtered.rejected, store, Utc::now()).await;
        stats.entries = assembled.digest.len();
        stats.marked_seen = assembled.marked_seen;
        stats.lost_claims = assembled.lost_claims;
        stats.elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            entries = stats.entries,
            kept = stats.kept,
            rejected = stats.rejected,
            skipped = stats.skipped,
            deferred = stats.deferred,
            expanded = stats.expanded,
            marked_seen = stats.marked_seen,
            elapsed_ms = stats.elapsed_ms,
            "digest run complete"
        );

        let report = RunReport {
            digest: assembled.digest,
            stats,
        };
        progress.done(&report);
        report
    }

    /// Replace kept teasers with their full text, at most
    /// `expand_concurrency` fetches at a time. Returns how many were replaced.
    async fn expand(&self, kept: &mut [KeptArticle], deadline: tokio::time::Instant) -> usize {
        let semaphore = Arc::new(Semaphore::new(self.config.expand_concurrency.max(1)));
        let mut handles = Vec::with_capacity(kept.len());
        for item in kept.iter() {
            let expander = self.expander.clone();
            let sem = semaphore.clone();
            let article = item.candidate.article.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                tokio::time::timeout_at(deadline, expander.expand(&article))
                    .await
                    .ok()
                    .flatten()
            }));
        }

        let mut expanded = 0;
        for (item, handle) in kept.iter_mut().zip(handles) {
            match handle.await {
                Ok(Some(text)) => {
                    debug!(fingerprint = %item.candidate.fingerprint.short(), chars = text.len(), "teaser expanded");
                    item.candidate.article.content = text;
                    expanded += 1;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "full text task failed, keeping feed text"),
            }
        }
        if expanded > 0 {
            info!(expanded, "teasers replaced with full text");
        }
        expanded
    }
}
