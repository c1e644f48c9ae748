//! HTML → plain text for feed snippets and full article pages.

use scraper::{Html, Selector};
use tracing::debug;

/// Tags dropped entirely during conversion.
const SKIP_TAGS: [&str; 8] = [
    "script", "style", "nav", "iframe", "noscript", "svg", "img", "footer",
];

/// Convert an HTML fragment to readable text (lightweight Markdown).
///
/// Falls back to the concatenated text nodes if conversion fails.
pub fn html_to_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();
    match converter.convert(html) {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            debug!(error = %e, "htmd conversion failed, using text nodes");
            let fragment = Html::parse_fragment(html);
            fragment
                .root_element()
                .text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        }
    }
}

/// Extract the main content HTML of a full page, without site chrome.
pub fn main_content_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    let selectors = [
        "article",
        "[role=\"main\"]",
        "main",
        ".post-content",
        ".entry-content",
        ".content",
        "body",
    ];

    for sel_str in &selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    html.to_string()
}

/// Whether a snippet is only a teaser pointing at the full article.
pub fn is_teaser(snippet: &str, markers: &[String]) -> bool {
    markers
        .iter()
        .any(|m| !m.is_empty() && snippet.contains(m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_simple_html() {
        let text = html_to_text("<p>Hello <b>world</b></p><script>alert(1)</script>");
        assert!(text.contains("Hello"));
        assert!(text.contains("world"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("<p>"));
    }

    #[test]
    fn empty_html_is_empty_text() {
        assert_eq!(html_to_text("   "), "");
    }

    #[test]
    fn main_content_prefers_article() {
        let html = r#"<html><body><nav>Menu</nav><article><p>The story.</p></article><footer>(c)</footer></body></html>"#;
        let main = main_content_html(html);
        assert!(main.contains("The story."));
        assert!(!main.contains("Menu"));
    }

    #[test]
    fn main_content_falls_back_to_body() {
        let main = main_content_html("<html><body><div>Only body</div></body></html>");
        assert!(main.contains("Only body"));
    }

    #[test]
    fn teaser_detection() {
        let markers = vec!["查看全文".to_string(), "Read more".to_string()];
        assert!(is_teaser("短摘要……查看全文", &markers));
        assert!(is_teaser("<a href='x'>Read more</a>", &markers));
        assert!(!is_teaser("A complete paragraph.", &markers));
        assert!(!is_teaser("anything", &[String::new()]));
    }
}
