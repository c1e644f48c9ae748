//! Digest pipeline for feeddigest.
//!
//! Takes the articles fetched for a run, drops the ones already processed,
//! filters the rest against the user's interest and noise tags, completes
//! kept teasers with their full text, summarizes what is kept, and assembles
//! a per-feed digest. The seen store is updated only after an article's
//! content is in the digest.

pub mod batcher;
pub mod digest;
pub mod filter;
pub mod fingerprint;
pub mod pipeline;
pub mod retry;
pub mod stages;
pub mod summarize;

pub use digest::{Assembled, DigestBuilder, assemble_and_commit};
pub use filter::{Decision, FilterOrchestrator, FilterOutcome, KeptArticle, decide};
pub use fingerprint::{Candidate, IdentityBasis, fingerprint, fingerprint_with_basis};
pub use pipeline::{Pipeline, ProgressReporter, RunReport, RunStats, SilentProgress};
pub use stages::{
    ClassifyRequest, Classifier, Expander, NoExpansion, StageItem, SummarizeRequest, Summarizer,
};
pub use summarize::{SummarizeOutcome, SummarizedArticle, SummarizerOrchestrator, bound_summary};
