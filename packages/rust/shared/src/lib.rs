//! Shared types, error model, and configuration for feeddigest.
//!
//! This crate is the foundation depended on by all other feeddigest crates.
//! It provides:
//! - [`FeedDigestError`], the unified error type
//! - Domain types ([`Article`], [`Fingerprint`], [`SeenRecord`], [`Digest`], ...)
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, FailOpen, FetchConfig, FetchSection, FilterSection, InterestsSection, LlmSection,
    OutputFormat, OutputSection, PipelineConfig, RetryConfig, RetrySection, RunSection,
    StoreSection, SummarySection, config_dir, expand_home, config_file_path, init_config, init_config_at,
    load_config, load_config_from, validate_api_key,
};
pub use error::{ExternalFailureKind, FeedDigestError, Result};
pub use types::{
    Article, Digest, DigestEntry, DigestSection, FilterVerdict, Fingerprint, SeenRecord, Summary,
};
