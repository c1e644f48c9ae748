//! Core domain types for feeddigest runs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Article
// ---------------------------------------------------------------------------

/// A single item as delivered by a feed. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// Source feed identifier (the feed URL).
    pub feed: String,
    /// Item title.
    pub title: String,
    /// Item link, unique within a feed.
    pub link: String,
    /// Publication timestamp, when the feed provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    /// Raw content or snippet.
    #[serde(default)]
    pub content: String,
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// SHA-256 identity of an article's normalized title, link and content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Wrap a raw digest.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Lowercase hex form, as stored in the seen store.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex chars, for log fields.
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl FromStr for Fingerprint {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| format!("invalid fingerprint {s:?}: {e}"))?;
        Ok(Self(bytes))
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_hex()
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

// ---------------------------------------------------------------------------
// Seen records
// ---------------------------------------------------------------------------

/// A fingerprint that has been fully processed by an earlier (or the current) run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenRecord {
    pub fingerprint: Fingerprint,
    pub first_seen: DateTime<Utc>,
    /// Feed the article came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed: Option<String>,
    /// Title at the time it was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl SeenRecord {
    /// A record carrying only the fingerprint and timestamp.
    pub fn bare(fingerprint: Fingerprint, first_seen: DateTime<Utc>) -> Self {
        Self {
            fingerprint,
            first_seen,
            feed: None,
            title: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage outputs
// ---------------------------------------------------------------------------

/// Classifier output for one article.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterVerdict {
    /// The classifier's own keep/drop call.
    pub keep: bool,
    /// Interest and noise tags the classifier matched.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Summarizer output for one article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    /// Set when the backend's text exceeded the configured maximum and was cut.
    #[serde(default)]
    pub truncated: bool,
}

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// One article with its summary, as it appears in a digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestEntry {
    pub fingerprint: Fingerprint,
    pub article: Article,
    /// Interest tags that kept this article.
    #[serde(default)]
    pub tags: Vec<String>,
    pub summary: Summary,
}

/// Entries from a single feed, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestSection {
    pub feed: String,
    pub entries: Vec<DigestEntry>,
}

/// The ordered output document of one run. Frozen at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    generated_at: DateTime<Utc>,
    sections: Vec<DigestSection>,
}

impl Digest {
    /// Freeze a set of sections into a digest. Empty sections are dropped.
    pub fn new(generated_at: DateTime<Utc>, sections: Vec<DigestSection>) -> Self {
        let sections = sections
            .into_iter()
            .filter(|s| !s.entries.is_empty())
            .collect();
        Self {
            generated_at,
            sections,
        }
    }

    /// When the digest was assembled.
    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// Local calendar date the digest belongs to (UTC).
    pub fn date(&self) -> NaiveDate {
        self.generated_at.date_naive()
    }

    /// Sections in feed order.
    pub fn sections(&self) -> &[DigestSection] {
        &self.sections
    }

    /// All entries in document order.
    pub fn entries(&self) -> impl Iterator<Item = &DigestEntry> {
        self.sections.iter().flat_map(|s| s.entries.iter())
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.sections.iter().map(|s| s.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(fp: u8, title: &str) -> DigestEntry {
        DigestEntry {
            fingerprint: Fingerprint::from_bytes([fp; 32]),
            article: Article {
                feed: "https://example.com/feed".into(),
                title: title.into(),
                link: format!("https://example.com/{fp}"),
                published: None,
                content: String::new(),
            },
            tags: vec!["AI".into()],
            summary: Summary {
                text: "short".into(),
                truncated: false,
            },
        }
    }

    #[test]
    fn fingerprint_hex_roundtrip() {
        let fp = Fingerprint::from_bytes([0xab; 32]);
        let hex = fp.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("abab"));
        let parsed: Fingerprint = hex.parse().expect("parse fingerprint");
        assert_eq!(parsed, fp);
        assert_eq!(fp.short(), "abababababab");
    }

    #[test]
    fn fingerprint_rejects_bad_input() {
        assert!("abc".parse::<Fingerprint>().is_err());
        assert!("zz".repeat(32).parse::<Fingerprint>().is_err());
        assert!("ab".repeat(33).parse::<Fingerprint>().is_err());
        assert!("é".repeat(32).parse::<Fingerprint>().is_err());
    }

    #[test]
    fn fingerprint_serializes_as_hex_string() {
        let fp = Fingerprint::from_bytes([1; 32]);
        let json = serde_json::to_string(&fp).expect("serialize");
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let back: Fingerprint = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, fp);
    }

    #[test]
    fn digest_drops_empty_sections_and_counts_entries() {
        let digest = Digest::new(
            Utc::now(),
            vec![
                DigestSection {
                    feed: "a".into(),
                    entries: vec![entry(1, "one"), entry(2, "two")],
                },
                DigestSection {
                    feed: "b".into(),
                    entries: vec![],
                },
            ],
        );
        assert_eq!(digest.sections().len(), 1);
        assert_eq!(digest.len(), 2);
        assert!(!digest.is_empty());
        let titles: Vec<_> = digest.entries().map(|e| e.article.title.as_str()).collect();
        assert_eq!(titles, ["one", "two"]);
    }
}
