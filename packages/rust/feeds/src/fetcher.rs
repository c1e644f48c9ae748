//! Concurrent feed fetcher.
//!
//! Each feed is fetched and parsed on its own task, at most
//! `fetch.concurrency` at a time. A feed that fails (network error, bad
//! status, unparseable XML) is reported and skipped; the other feeds are
//! unaffected. Article pages are only fetched on request, through
//! [`Expander`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use feeddigest_core::Expander;
use feeddigest_shared::{Article, FeedDigestError, FetchConfig, Result};

use crate::extract::{html_to_text, is_teaser, main_content_html};

/// User-Agent string for feed and article requests.
const USER_AGENT: &str = concat!("feeddigest/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// FetchReport
// ---------------------------------------------------------------------------

/// A feed that could not be fetched this run.
#[derive(Debug, Clone)]
pub struct FeedFailure {
    pub feed: String,
    pub error: String,
}

/// Everything fetched in one pass over the configured feeds.
#[derive(Debug, Clone)]
pub struct FetchReport {
    /// Articles from all feeds, in feed order then entry order.
    pub articles: Vec<Article>,
    pub failures: Vec<FeedFailure>,
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// FeedFetcher
// ---------------------------------------------------------------------------

/// Fetches and parses the configured feeds.
pub struct FeedFetcher {
    config: FetchConfig,
    client: Client,
}

impl FeedFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| USER_AGENT.to_string());
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.timeout)
            .build()
            .map_err(|e| FeedDigestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Fetch every configured feed.
    #[instrument(skip_all, fields(feeds = self.config.feeds.len()))]
    pub async fn fetch_all(&self) -> FetchReport {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        info!(
            feeds = self.config.feeds.len(),
            concurrency = self.config.concurrency,
            "fetching feeds"
        );

        let mut handles = Vec::with_capacity(self.config.feeds.len());
        for feed in &self.config.feeds {
            let client = self.client.clone();
            let sem = semaphore.clone();
            let feed_url = feed.clone();

            handles.push((
                feed.clone(),
                tokio::spawn(async move {
                    let _permit = sem.acquire().await.expect("semaphore closed");
                    fetch_feed(&client, &feed_url).await
                }),
            ));
        }

        let mut report = FetchReport {
            articles: Vec::new(),
            failures: Vec::new(),
            duration: Duration::ZERO,
        };

        for (feed, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(FeedDigestError::Network(format!("fetch task failed: {e}"))),
            };
            match result {
                Ok(articles) => {
                    debug!(%feed, articles = articles.len(), "feed fetched");
                    report.articles.extend(articles);
                }
                Err(e) => {
                    warn!(%feed, error = %e, "feed fetch failed, skipping");
                    report.failures.push(FeedFailure {
                        feed,
                        error: e.to_string(),
                    });
                }
            }
        }

        report.duration = start.elapsed();
        info!(
            articles = report.articles.len(),
            failed_feeds = report.failures.len(),
            duration_ms = report.duration.as_millis() as u64,
            "feeds fetched"
        );
        report
    }
}

impl Expander for FeedFetcher {
    /// Fetch the linked page of a teaser and extract its main text. Anything
    /// that is not a teaser, or whose page cannot be read, keeps its snippet.
    async fn expand(&self, article: &Article) -> Option<String> {
        if article.link.is_empty() || !is_teaser(&article.content, &self.config.full_text_markers) {
            return None;
        }
        match fetch_full_text(&self.client, &article.link).await {
            Ok(full) if !full.is_empty() => Some(full),
            Ok(_) => {
                debug!(link = %article.link, "full page had no text, keeping snippet");
                None
            }
            Err(e) => {
                warn!(link = %article.link, error = %e, "full text fetch failed, keeping snippet");
                None
            }
        }
    }
}

/// Fetch and parse one feed.
async fn fetch_feed(client: &Client, feed_url: &str) -> Result<Vec<Article>> {
    let response = client
        .get(feed_url)
        .send()
        .await
        .map_err(|e| FeedDigestError::Network(format!("{feed_url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FeedDigestError::Network(format!("{feed_url}: HTTP {status}")));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| FeedDigestError::Network(format!("{feed_url}: failed to read body: {e}")))?;

    let feed = feed_rs::parser::parse(&body[..])
        .map_err(|e| FeedDigestError::parse(format!("{feed_url}: not a valid feed: {e}")))?;

    let mut articles = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        let title = entry.title.map(|t| t.content).unwrap_or_default();
        let link = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_else(|| entry.id.clone());
        let snippet_html = entry
            .content
            .and_then(|c| c.body)
            .or_else(|| entry.summary.map(|s| s.content))
            .unwrap_or_default();

        articles.push(Article {
            feed: feed_url.to_string(),
            title,
            link,
            published: entry.published.or(entry.updated),
            content: html_to_text(&snippet_html),
        });
    }

    Ok(articles)
}

async fn fetch_full_text(client: &Client, link: &str) -> Result<String> {
    let response = client
        .get(link)
        .send()
        .await
        .map_err(|e| FeedDigestError::Network(format!("{link}: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(FeedDigestError::Network(format!("{link}: HTTP {status}")));
    }
    let html = response
        .text()
        .await
        .map_err(|e| FeedDigestError::Network(format!("{link}: failed to read body: {e}")))?;
    Ok(html_to_text(&main_content_html(&html)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rss(base: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example News</title>
    <link>{base}</link>
    <description>Test feed</description>
    <item>
      <title>First story</title>
      <link>{base}/posts/1</link>
      <description><![CDATA[<p>The complete first story.</p>]]></description>
      <pubDate>Mon, 03 Jun 2024 09:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Second story</title>
      <link>{base}/posts/2</link>
      <description><![CDATA[<p>A teaser… <a href="{base}/posts/2">Read more</a></p>]]></description>
    </item>
  </channel>
</rss>"#
        )
    }

    fn config(feeds: Vec<String>) -> FetchConfig {
        FetchConfig {
            feeds,
            concurrency: 2,
            timeout: Duration::from_secs(5),
            full_text_markers: vec!["Read more".into()],
            user_agent: None,
        }
    }

    async fn mount_feed(server: &wiremock::MockServer, path: &str) {
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path(path))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_string(rss(&server.uri()))
                    .insert_header("content-type", "application/rss+xml"),
            )
            .mount(server)
            .await;
    }

    fn full_page() -> wiremock::Mock {
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/posts/2"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(
                "<html><body><nav>Menu</nav><article><p>The whole second story.</p></article></body></html>",
            ))
    }

    #[tokio::test]
    async fn fetches_and_parses_without_following_links() {
        let server = wiremock::MockServer::start().await;
        let base = server.uri();
        mount_feed(&server, "/feed.xml").await;
        full_page().expect(0).mount(&server).await;

        let feed_url = format!("{base}/feed.xml");
        let fetcher = FeedFetcher::new(config(vec![feed_url.clone()])).expect("fetcher");
        let report = fetcher.fetch_all().await;

        assert!(report.failures.is_empty());
        assert_eq!(report.articles.len(), 2);

        let first = &report.articles[0];
        assert_eq!(first.feed, feed_url);
        assert_eq!(first.title, "First story");
        assert_eq!(first.link, format!("{base}/posts/1"));
        assert!(first.published.is_some());
        assert!(first.content.contains("The complete first story."));

        let second = &report.articles[1];
        assert!(second.content.contains("A teaser"));
        assert!(second.content.contains("Read more"));
    }

    #[tokio::test]
    async fn teaser_identity_survives_page_outage() {
        let server = wiremock::MockServer::start().await;
        mount_feed(&server, "/feed.xml").await;
        let fetcher =
            FeedFetcher::new(config(vec![format!("{}/feed.xml", server.uri())])).expect("fetcher");

        let up = {
            let _page = full_page().mount_as_scoped(&server).await;
            fetcher.fetch_all().await
        };
        let down = fetcher.fetch_all().await;

        assert_eq!(up.articles, down.articles);
        assert_eq!(
            feeddigest_core::fingerprint(&up.articles[1]),
            feeddigest_core::fingerprint(&down.articles[1])
        );
    }

    #[tokio::test]
    async fn expand_replaces_only_teasers_with_page_text() {
        let server = wiremock::MockServer::start().await;
        mount_feed(&server, "/feed.xml").await;
        full_page().mount(&server).await;

        let fetcher =
            FeedFetcher::new(config(vec![format!("{}/feed.xml", server.uri())])).expect("fetcher");
        let report = fetcher.fetch_all().await;
        let (complete, teaser) = (&report.articles[0], &report.articles[1]);

        assert_eq!(fetcher.expand(complete).await, None);
        let full = fetcher.expand(teaser).await.expect("teaser expanded");
        assert!(full.contains("The whole second story."));
        assert!(!full.contains("Menu"));

        let mut missing = teaser.clone();
        missing.link = format!("{}/posts/404", server.uri());
        assert_eq!(fetcher.expand(&missing).await, None);
    }

    #[tokio::test]
    async fn failing_feed_is_isolated() {
        let server = wiremock::MockServer::start().await;
        let base = server.uri();

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/good.xml"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(rss(&base)))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/down.xml"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/junk.xml"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("not a feed"))
            .mount(&server)
            .await;

        let fetcher = FeedFetcher::new(config(vec![
            format!("{base}/down.xml"),
            format!("{base}/good.xml"),
            format!("{base}/junk.xml"),
        ]))
        .expect("fetcher");
        let report = fetcher.fetch_all().await;

        assert_eq!(report.articles.len(), 2);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures[0].feed.ends_with("/down.xml"));
        assert!(report.failures[1].feed.ends_with("/junk.xml"));
    }
}
