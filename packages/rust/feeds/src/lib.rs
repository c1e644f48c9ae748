//! Feed fetching for feeddigest.
//!
//! Downloads the configured RSS/Atom feeds in parallel, parses them with
//! `feed-rs`, and turns each entry into an [`Article`](feeddigest_shared::Article)
//! holding exactly what the feed supplied. Teaser entries ("Read more") are
//! completed later, through the [`Expander`](feeddigest_core::Expander)
//! implementation, once the pipeline knows they are new and kept.

pub mod extract;
pub mod fetcher;

pub use fetcher::{FeedFailure, FeedFetcher, FetchReport};
