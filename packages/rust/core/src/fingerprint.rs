//! Deterministic article identity.
//!
//! A fingerprint is the SHA-256 of an article's normalized title, link and
//! content. Normalization strips markup and collapses whitespace so that
//! cosmetic feed changes (re-indented HTML, trailing spaces) do not produce a
//! new identity. Articles without content fall back to a link-only identity.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use feeddigest_shared::{Article, Fingerprint};

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[xX][0-9a-fA-F]{1,6}|#[0-9]{1,7}|nbsp|amp|lt|gt|quot|apos);")
        .expect("valid regex")
});

/// Which parts of the article contributed to its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityBasis {
    /// Title, link and content.
    Full,
    /// Content was empty; link only.
    Link,
    /// Content and link were both empty; title only.
    Title,
}

/// An article paired with its fingerprint, as it moves through the pipeline.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub fingerprint: Fingerprint,
    pub article: Article,
}

impl Candidate {
    /// Fingerprint an article.
    pub fn new(article: Article) -> Self {
        Self {
            fingerprint: fingerprint(&article),
            article,
        }
    }
}

/// Compute the fingerprint of an article. Never fails.
pub fn fingerprint(article: &Article) -> Fingerprint {
    fingerprint_with_basis(article).0
}

/// Compute the fingerprint and report which fields it was derived from.
pub fn fingerprint_with_basis(article: &Article) -> (Fingerprint, IdentityBasis) {
    let title = normalize_text(&article.title);
    let link = canonical_link(&article.link);
    let content = normalize_text(&article.content);

    let mut hasher = Sha256::new();
    let basis = if !content.is_empty() {
        hasher.update(b"full\0");
        hasher.update(title.as_bytes());
        hasher.update(b"\0");
        hasher.update(link.as_bytes());
        hasher.update(b"\0");
        hasher.update(content.as_bytes());
        IdentityBasis::Full
    } else if !link.is_empty() {
        hasher.update(b"link\0");
        hasher.update(link.as_bytes());
        IdentityBasis::Link
    } else {
        hasher.update(b"title\0");
        hasher.update(title.as_bytes());
        IdentityBasis::Title
    };

    let fp = Fingerprint::from_bytes(hasher.finalize().into());
    if basis != IdentityBasis::Full {
        debug!(fingerprint = %fp.short(), ?basis, title = %article.title, "article has no content, using reduced identity");
    }
    (fp, basis)
}

/// Strip markup, decode numeric and common named entities, and collapse
/// whitespace.
pub fn normalize_text(raw: &str) -> String {
    let stripped = TAG_RE.replace_all(raw, " ");
    let decoded = ENTITY_RE.replace_all(&stripped, |caps: &regex::Captures| {
        decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    });
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entity(name: &str) -> Option<String> {
    let named = match name {
        "nbsp" => " ",
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        _ => {
            let code = match name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => name.strip_prefix('#')?.parse().ok()?,
            };
            return char::from_u32(code).map(String::from);
        }
    };
    Some(named.to_string())
}

/// Canonical form of a link: fragment dropped, scheme and host lowercased.
fn canonical_link(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(title: &str, link: &str, content: &str) -> Article {
        Article {
            feed: "https://example.com/feed".into(),
            title: title.into(),
            link: link.into(),
            published: None,
            content: content.into(),
        }
    }

    #[test]
    fn same_article_same_fingerprint() {
        let a = article("Rust 2024", "https://example.com/a", "<p>Edition news</p>");
        assert_eq!(fingerprint(&a), fingerprint(&a.clone()));
    }

    #[test]
    fn cosmetic_changes_do_not_change_identity() {
        let a = article("Rust 2024", "https://example.com/a", "<p>Edition   news</p>");
        let b = article(
            "  Rust   2024 ",
            "https://EXAMPLE.com/a#comments",
            "<div>\n  <p>Edition news</p>\n</div>",
        );
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn content_change_changes_identity() {
        let a = article("Rust 2024", "https://example.com/a", "first draft");
        let b = article("Rust 2024", "https://example.com/a", "second draft");
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn feed_is_not_part_of_identity() {
        let a = article("Same", "https://example.com/a", "body");
        let mut b = a.clone();
        b.feed = "https://mirror.example.org/rss".into();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn empty_content_falls_back_to_link() {
        let a = article("Title one", "https://example.com/a", "");
        let b = article("Title two", "https://example.com/a", "   <br/> ");
        let (fa, basis) = fingerprint_with_basis(&a);
        assert_eq!(basis, IdentityBasis::Link);
        assert_eq!(fa, fingerprint(&b));
    }

    #[test]
    fn empty_everything_still_fingerprints() {
        let (fp, basis) = fingerprint_with_basis(&article("", "", ""));
        assert_eq!(basis, IdentityBasis::Title);
        assert_eq!(fp.to_hex().len(), 64);
    }

    #[test]
    fn normalize_strips_tags_and_entities() {
        assert_eq!(
            normalize_text("<b>AT&amp;T</b>&nbsp;&lt;news&gt;\n\n"),
            "AT&T <news>"
        );
    }

    #[test]
    fn numeric_entities_match_their_characters() {
        assert_eq!(normalize_text("It&#8217;s &#x2014; caf&#233;"), "It’s — café");
        assert_eq!(normalize_text("a&#39;b&#160;c"), "a'b c");
        // Not a character: left as written.
        assert_eq!(normalize_text("&#xD800;"), "&#xD800;");
    }

    #[test]
    fn entity_spelling_does_not_change_identity() {
        let a = article("It’s here", "https://example.com/a", "<p>Don’t miss it</p>");
        let b = article(
            "It&#8217;s here",
            "https://example.com/a",
            "<p>Don&#x2019;t miss it</p>",
        );
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }
}
