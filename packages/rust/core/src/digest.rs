//! Digest assembly and the commit to the seen store.
//!
//! Each summarized article is first placed in the in-memory digest and only
//! then claimed in the seen store. If the claim is lost (another run got there
//! first), the entry is taken back out so it is never delivered twice. Once
//! every entry is settled the digest is frozen and rejected articles are
//! recorded as seen.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use feeddigest_shared::{Digest, DigestEntry, DigestSection, Fingerprint, SeenRecord};
use feeddigest_storage::SeenStore;

use crate::fingerprint::Candidate;
use crate::summarize::SummarizedArticle;

// ---------------------------------------------------------------------------
// DigestBuilder
// ---------------------------------------------------------------------------

/// Mutable digest under construction. Sections appear in first-seen feed
/// order; entries are sorted oldest first when the digest is frozen.
#[derive(Debug)]
pub struct DigestBuilder {
    generated_at: DateTime<Utc>,
    sections: Vec<DigestSection>,
    present: HashSet<Fingerprint>,
}

impl DigestBuilder {
    pub fn new(generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            sections: Vec::new(),
            present: HashSet::new(),
        }
    }

    /// Add an entry. Returns `false` if its fingerprint is already present.
    pub fn push(&mut self, entry: DigestEntry) -> bool {
        if !self.present.insert(entry.fingerprint) {
            return false;
        }
        match self.sections.iter_mut().find(|s| s.feed == entry.article.feed) {
            Some(section) => section.entries.push(entry),
            None => self.sections.push(DigestSection {
                feed: entry.article.feed.clone(),
                entries: vec![entry],
            }),
        }
        true
    }

    /// Remove an entry. Returns `false` if it was not present.
    pub fn retract(&mut self, fingerprint: &Fingerprint) -> bool {
        if !self.present.remove(fingerprint) {
            return false;
        }
        for section in &mut self.sections {
            section.entries.retain(|e| e.fingerprint != *fingerprint);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.present.len()
    }

    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }

    /// Freeze into a [`Digest`]. Entries within a feed are ordered by
    /// publication time; undated entries keep their relative order at the end.
    pub fn build(mut self) -> Digest {
        for section in &mut self.sections {
            section
                .entries
                .sort_by_key(|e| (e.article.published.is_none(), e.article.published));
        }
        Digest::new(self.generated_at, self.sections)
    }
}

// ---------------------------------------------------------------------------
// Assembly + commit
// ---------------------------------------------------------------------------

/// What the assembler did.
#[derive(Debug)]
pub struct Assembled {
    pub digest: Digest,
    /// Fingerprints newly recorded in the seen store.
    pub marked_seen: usize,
    /// Entries dropped because their claim was already taken.
    pub lost_claims: usize,
}

/// Build the digest from `summarized` and commit it to `store`.
///
/// Each entry is claimed strictly after it is in the digest. `rejected`
/// articles are recorded after the digest is frozen.
#[instrument(skip_all, fields(summarized = summarized.len(), rejected = rejected.len()))]
pub async fn assemble_and_commit(
    summarized: Vec<SummarizedArticle>,
    rejected: &[Candidate],
    store: &SeenStore,
    generated_at: DateTime<Utc>,
) -> Assembled {
    let mut builder = DigestBuilder::new(generated_at);
    let mut marked_seen = 0usize;
    let mut lost_claims = 0usize;

    for item in summarized {
        let fingerprint = item.candidate.fingerprint;
        let record = seen_record(&item.candidate, generated_at);
        let entry = DigestEntry {
            fingerprint,
            article: item.candidate.article,
            tags: item.tags,
            summary: item.summary,
        };

        if !builder.push(entry) {
            debug!(fingerprint = %fingerprint.short(), "duplicate entry ignored");
            continue;
        }
        if store.insert_record(&record).await {
            marked_seen += 1;
        } else {
            builder.retract(&fingerprint);
            lost_claims += 1;
            warn!(fingerprint = %fingerprint.short(), "already claimed by another run, dropped from digest");
        }
    }

    let digest = builder.build();

    for candidate in rejected {
        if store
            .insert_record(&seen_record(candidate, generated_at))
            .await
        {
            marked_seen += 1;
        }
    }

    info!(
        entries = digest.len(),
        sections = digest.sections().len(),
        marked_seen,
        lost_claims,
        "digest assembled"
    );

    Assembled {
        digest,
        marked_seen,
        lost_claims,
    }
}

fn seen_record(candidate: &Candidate, at: DateTime<Utc>) -> SeenRecord {
    SeenRecord {
        fingerprint: candidate.fingerprint,
        first_seen: at,
        feed: Some(candidate.article.feed.clone()),
        title: Some(candidate.article.title.clone()),
    }
}
