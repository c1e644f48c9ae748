//! OpenAI-compatible chat completions backend.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::{debug, instrument};

use feeddigest_core::{Classifier, ClassifyRequest, SummarizeRequest, Summarizer};
use feeddigest_shared::{ExternalFailureKind, FeedDigestError, FilterVerdict, LlmSection, Result};

use crate::prompt;
use crate::types::{ChatMessage, ChatRequest, ChatResponse};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("feeddigest/", env!("CARGO_PKG_VERSION"));

/// Classifier and summarizer backed by a chat completions endpoint.
///
/// Call timeouts are enforced by the pipeline; the HTTP client only carries a
/// generous ceiling so abandoned connections are eventually closed.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl OpenAiBackend {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| FeedDigestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key: api_key.into(),
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Build from the `[llm]` section and a resolved API key.
    pub fn from_config(llm: &LlmSection, api_key: impl Into<String>) -> Result<Self> {
        Self::new(api_key, llm.base_url.clone())
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|_| FeedDigestError::config("API key contains invalid header characters"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Send one chat completion and return the first choice's text.
    async fn chat(&self, stage: &'static str, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(stage, model = %request.model, messages = request.messages.len(), "chat request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    ExternalFailureKind::Timeout
                } else {
                    ExternalFailureKind::Unavailable
                };
                FeedDigestError::external(stage, kind, format!("request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(stage, status, &body));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            FeedDigestError::external(
                stage,
                ExternalFailureKind::Malformed,
                format!("unreadable response body: {e}"),
            )
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                FeedDigestError::external(stage, ExternalFailureKind::Malformed, "response has no content")
            })
    }
}

/// Map a non-success status. Client errors other than 429 mean the request
/// itself is wrong, so they are not worth retrying.
fn status_error(stage: &'static str, status: StatusCode, body: &str) -> FeedDigestError {
    let detail: String = body.chars().take(200).collect();
    match status {
        StatusCode::TOO_MANY_REQUESTS => FeedDigestError::external(
            stage,
            ExternalFailureKind::RateLimited,
            format!("rate limited: {detail}"),
        ),
        s if s.is_client_error() => {
            FeedDigestError::config(format!("{stage} backend rejected the request ({s}): {detail}"))
        }
        s => FeedDigestError::external(
            stage,
            ExternalFailureKind::Unavailable,
            format!("backend error ({s}): {detail}"),
        ),
    }
}

impl Classifier for OpenAiBackend {
    #[instrument(skip_all, fields(items = request.items.len(), model = %request.model))]
    async fn classify(&self, request: &ClassifyRequest) -> Result<Vec<FilterVerdict>> {
        let chat = ChatRequest {
            model: request.model.clone(),
            messages: vec![
                ChatMessage::system(prompt::classify_system_prompt()),
                ChatMessage::user(prompt::classify_user_prompt(request)),
            ],
            temperature: request.temperature,
        };
        let text = self.chat("filter", &chat).await?;
        prompt::parse_verdicts(&text, request.items.len())
    }
}

impl Summarizer for OpenAiBackend {
    #[instrument(skip_all, fields(items = request.items.len(), model = %request.model))]
    async fn summarize(&self, request: &SummarizeRequest) -> Result<Vec<String>> {
        let chat = ChatRequest {
            model: request.model.clone(),
            messages: vec![
                ChatMessage::system(prompt::summarize_system_prompt(request)),
                ChatMessage::user(prompt::summarize_user_prompt(request)),
            ],
            temperature: request.temperature,
        };
        let text = self.chat("summarize", &chat).await?;
        prompt::parse_summaries(&text, request.items.len())
    }
}

#[cfg(test)]
mod tests {
    use feeddigest_core::StageItem;
    use serde_json::json;

    use super::*;

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    fn classify_request() -> ClassifyRequest {
        ClassifyRequest {
            items: vec![
                StageItem {
                    title: "New model release".into(),
                    text: "A lab released a model.".into(),
                },
                StageItem {
                    title: "50% off headphones".into(),
                    text: String::new(),
                },
            ],
            interest_tags: vec!["AI".into()],
            noise_tags: vec!["advertisement".into()],
            model: "gpt-4o-mini".into(),
            temperature: 0.3,
        }
    }

    async fn mount(server: &wiremock::MockServer, template: wiremock::ResponseTemplate) {
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/chat/completions"))
            .and(wiremock::matchers::header("authorization", "Bearer test-key"))
            .respond_with(template)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn classify_parses_verdicts() {
        let server = wiremock::MockServer::start().await;
        let answer = r#"[{"id":0,"keep":true,"tags":["AI"]},{"id":1,"keep":false,"tags":["advertisement"]}]"#;
        mount(&server, wiremock::ResponseTemplate::new(200).set_body_json(completion(answer))).await;

        let backend = OpenAiBackend::new("test-key", server.uri()).expect("client");
        let verdicts = backend.classify(&classify_request()).await.expect("classify");

        assert_eq!(verdicts.len(), 2);
        assert!(verdicts[0].keep);
        assert_eq!(verdicts[1].tags, vec!["advertisement".to_string()]);
    }

    #[tokio::test]
    async fn summarize_handles_fenced_json() {
        let server = wiremock::MockServer::start().await;
        let answer = "```json\n[{\"id\":0,\"summary\":\"A lab shipped a model.\"}]\n```";
        mount(&server, wiremock::ResponseTemplate::new(200).set_body_json(completion(answer))).await;

        let backend = OpenAiBackend::new("test-key", format!("{}/", server.uri())).expect("client");
        let request = SummarizeRequest {
            items: vec![StageItem {
                title: "New model release".into(),
                text: "A lab released a model.".into(),
            }],
            max_length: 200,
            language: "English".into(),
            model: "gpt-4o-mini".into(),
            temperature: 0.7,
        };
        let summaries = backend.summarize(&request).await.expect("summarize");
        assert_eq!(summaries, vec!["A lab shipped a model.".to_string()]);
    }

    #[tokio::test]
    async fn rate_limit_is_transient() {
        let server = wiremock::MockServer::start().await;
        mount(&server, wiremock::ResponseTemplate::new(429).set_body_string("slow down")).await;

        let backend = OpenAiBackend::new("test-key", server.uri()).expect("client");
        let err = backend.classify(&classify_request()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(
            err,
            FeedDigestError::External {
                kind: ExternalFailureKind::RateLimited,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new("wrong-key", server.uri()).expect("client");
        let err = backend.classify(&classify_request()).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn garbage_content_is_malformed() {
        let server = wiremock::MockServer::start().await;
        mount(
            &server,
            wiremock::ResponseTemplate::new(200).set_body_json(completion("Sorry, I can't.")),
        )
        .await;

        let backend = OpenAiBackend::new("test-key", server.uri()).expect("client");
        let err = backend.classify(&classify_request()).await.unwrap_err();
        assert!(matches!(
            err,
            FeedDigestError::External {
                kind: ExternalFailureKind::Malformed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let server = wiremock::MockServer::start().await;
        mount(&server, wiremock::ResponseTemplate::new(503)).await;

        let backend = OpenAiBackend::new("test-key", server.uri()).expect("client");
        let err = backend.classify(&classify_request()).await.unwrap_err();
        assert!(err.is_transient());
    }
}
