//! Chat-completions backend for the filter and summarize stages.
//!
//! [`OpenAiBackend`] implements both [`feeddigest_core::Classifier`] and
//! [`feeddigest_core::Summarizer`] against any OpenAI-compatible endpoint.

mod client;
mod prompt;
mod types;

pub use client::OpenAiBackend;
