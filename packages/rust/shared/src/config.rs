//! Application configuration for feeddigest.
//!
//! User config lives at `~/.feeddigest/feeddigest.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FeedDigestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "feeddigest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".feeddigest";

// ---------------------------------------------------------------------------
// Config structs (matching feeddigest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Subscribed feed URLs.
    #[serde(default)]
    pub feeds: Vec<String>,

    /// Language summaries are written in.
    #[serde(default = "default_language")]
    pub language: String,

    /// Keep/drop criteria.
    #[serde(default)]
    pub interests: InterestsSection,

    /// Filter stage settings.
    #[serde(default)]
    pub filter: FilterSection,

    /// Summarization stage settings.
    #[serde(default)]
    pub summary: SummarySection,

    /// Seen store settings.
    #[serde(default)]
    pub store: StoreSection,

    /// Digest output settings.
    #[serde(default)]
    pub output: OutputSection,

    /// Run-level limits.
    #[serde(default)]
    pub run: RunSection,

    /// Retry/backoff for external calls.
    #[serde(default)]
    pub retry: RetrySection,

    /// Language-model backend settings.
    #[serde(default)]
    pub llm: LlmSection,

    /// Feed fetching settings.
    #[serde(default)]
    pub fetch: FetchSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            language: default_language(),
            interests: InterestsSection::default(),
            filter: FilterSection::default(),
            summary: SummarySection::default(),
            store: StoreSection::default(),
            output: OutputSection::default(),
            run: RunSection::default(),
            retry: RetrySection::default(),
            llm: LlmSection::default(),
            fetch: FetchSection::default(),
        }
    }
}

fn default_language() -> String {
    "English".into()
}

/// `[interests]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterestsSection {
    /// An article must match at least one of these to be kept.
    #[serde(default)]
    pub interest_tags: Vec<String>,

    /// An article matching any of these is dropped, even if it matches an interest tag.
    #[serde(default = "default_noise_tags")]
    pub noise_tags: Vec<String>,
}

impl Default for InterestsSection {
    fn default() -> Self {
        Self {
            interest_tags: Vec::new(),
            noise_tags: default_noise_tags(),
        }
    }
}

fn default_noise_tags() -> Vec<String> {
    vec![
        "advertisement".into(),
        "promotion".into(),
        "sponsored".into(),
    ]
}

/// `[filter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSection {
    /// Maximum articles per classifier call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Model identifier for the classifier.
    #[serde(default = "default_filter_model")]
    pub model: String,

    /// Sampling temperature for the classifier.
    #[serde(default = "default_filter_temperature")]
    pub temperature: f32,

    /// Classifier batches in flight at once.
    #[serde(default = "default_one")]
    pub concurrency: usize,
}

impl Default for FilterSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            model: default_filter_model(),
            temperature: default_filter_temperature(),
            concurrency: default_one(),
        }
    }
}

fn default_batch_size() -> usize {
    50
}
fn default_filter_model() -> String {
    "gpt-4o-mini".into()
}
fn default_filter_temperature() -> f32 {
    0.3
}
fn default_one() -> usize {
    1
}

/// `[summary]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarySection {
    /// Maximum articles per summarizer call.
    #[serde(default = "default_process_size")]
    pub process_size: usize,

    /// Maximum summary length, in characters.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Maximum aggregate article length (characters) per summarizer call.
    #[serde(default = "default_batch_char_budget")]
    pub batch_char_budget: usize,

    /// Model identifier for the summarizer.
    #[serde(default = "default_summary_model")]
    pub model: String,

    /// Sampling temperature for the summarizer.
    #[serde(default = "default_summary_temperature")]
    pub temperature: f32,

    /// Summarizer batches in flight at once.
    #[serde(default = "default_summary_concurrency")]
    pub concurrency: usize,
}

impl Default for SummarySection {
    fn default() -> Self {
        Self {
            process_size: default_process_size(),
            max_tokens: default_max_tokens(),
            batch_char_budget: default_batch_char_budget(),
            model: default_summary_model(),
            temperature: default_summary_temperature(),
            concurrency: default_summary_concurrency(),
        }
    }
}

fn default_process_size() -> usize {
    5
}
fn default_max_tokens() -> usize {
    200
}
fn default_batch_char_budget() -> usize {
    24_000
}
fn default_summary_model() -> String {
    "gpt-4o-mini".into()
}
fn default_summary_temperature() -> f32 {
    0.7
}
fn default_summary_concurrency() -> usize {
    4
}

/// Direction the seen store fails in when its database is unusable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailOpen {
    /// Treat every article as new: duplicates are possible, nothing is lost.
    #[default]
    #[serde(rename = "new")]
    TreatAsNew,
    /// Treat every article as already seen: nothing is duplicated, content may be missed.
    #[serde(rename = "seen")]
    TreatAsSeen,
}

impl std::fmt::Display for FailOpen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TreatAsNew => f.write_str("treat-as-new"),
            Self::TreatAsSeen => f.write_str("treat-as-seen"),
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// Seen store database file.
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Fail-open direction: "new" or "seen".
    #[serde(default)]
    pub fail_open: FailOpen,

    /// Prune seen records older than this many days at the start of each run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            fail_open: FailOpen::default(),
            retention_days: None,
        }
    }
}

fn default_store_path() -> String {
    "~/.feeddigest/seen.db".into()
}

/// Digest output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    /// Directory digests are written to.
    #[serde(default = "default_output_base")]
    pub base_path: String,

    /// "markdown" or "json".
    #[serde(default)]
    pub format: OutputFormat,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            base_path: default_output_base(),
            format: OutputFormat::default(),
        }
    }
}

fn default_output_base() -> String {
    "~/feeddigest/daily".into()
}

/// `[run]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Whole-run deadline for the filter and summarize stages.
    #[serde(default = "default_run_timeout")]
    pub timeout_secs: u64,

    /// Timeout for a single classifier/summarizer call.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Cap on articles summarized per run; the rest wait for the next run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_articles: Option<usize>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_run_timeout(),
            call_timeout_secs: default_call_timeout(),
            max_articles: None,
        }
    }
}

fn default_run_timeout() -> u64 {
    600
}
fn default_call_timeout() -> u64 {
    60
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    1_000
}
fn default_max_backoff() -> u64 {
    30_000
}
fn default_multiplier() -> f64 {
    2.0
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSection {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSection {
    /// Feeds, and later full-text pages of kept teasers, fetched in parallel.
    #[serde(default = "default_fetch_concurrency")]
    pub concurrency: usize,

    /// Per-request timeout.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Snippet markers that trigger fetching the full article page for a
    /// new, kept article.
    #[serde(default = "default_full_text_markers")]
    pub full_text_markers: Vec<String>,

    /// Overrides the default `feeddigest/<version>` User-Agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            concurrency: default_fetch_concurrency(),
            timeout_secs: default_fetch_timeout(),
            full_text_markers: default_full_text_markers(),
            user_agent: None,
        }
    }
}

fn default_fetch_concurrency() -> usize {
    8
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_full_text_markers() -> Vec<String> {
    vec!["查看全文".into(), "Read more".into()]
}

// ---------------------------------------------------------------------------
// Runtime configs (built once from AppConfig, immutable afterwards)
// ---------------------------------------------------------------------------

/// Retry/backoff parameters for external calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl From<&RetrySection> for RetryConfig {
    fn from(section: &RetrySection) -> Self {
        Self {
            max_retries: section.max_retries,
            initial_backoff: Duration::from_millis(section.initial_backoff_ms),
            max_backoff: Duration::from_millis(section.max_backoff_ms),
            multiplier: section.multiplier,
        }
    }
}

/// Everything the dedup/filter/summarize pipeline reads, merged and validated.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub interest_tags: Vec<String>,
    pub noise_tags: Vec<String>,
    pub language: String,
    /// Filter-stage batch cap.
    pub batch_size: usize,
    pub filter_model: String,
    pub filter_temperature: f32,
    pub filter_concurrency: usize,
    /// Summarization-stage batch cap.
    pub process_size: usize,
    /// Maximum summary length in characters.
    pub max_tokens: usize,
    pub batch_char_budget: usize,
    pub summary_model: String,
    pub summary_temperature: f32,
    pub summary_concurrency: usize,
    /// Full-text page fetches in flight for kept teasers.
    pub expand_concurrency: usize,
    pub store_path: PathBuf,
    pub fail_open: FailOpen,
    pub retention_days: Option<u32>,
    pub output_base: PathBuf,
    pub output_format: OutputFormat,
    pub run_timeout: Duration,
    pub call_timeout: Duration,
    pub max_articles: Option<usize>,
    pub retry: RetryConfig,
}

impl PipelineConfig {
    /// Build the runtime config from the file config and validate it.
    pub fn from_app(config: &AppConfig) -> Result<Self> {
        let pipeline = Self {
            interest_tags: clean_tags(&config.interests.interest_tags),
            noise_tags: clean_tags(&config.interests.noise_tags),
            language: config.language.clone(),
            batch_size: config.filter.batch_size,
            filter_model: config.filter.model.clone(),
            filter_temperature: config.filter.temperature,
            filter_concurrency: config.filter.concurrency,
            process_size: config.summary.process_size,
            max_tokens: config.summary.max_tokens,
            batch_char_budget: config.summary.batch_char_budget,
            summary_model: config.summary.model.clone(),
            summary_temperature: config.summary.temperature,
            summary_concurrency: config.summary.concurrency,
            expand_concurrency: config.fetch.concurrency,
            store_path: expand_home(&config.store.path),
            fail_open: config.store.fail_open,
            retention_days: config.store.retention_days,
            output_base: expand_home(&config.output.base_path),
            output_format: config.output.format,
            run_timeout: Duration::from_secs(config.run.timeout_secs),
            call_timeout: Duration::from_secs(config.run.call_timeout_secs),
            max_articles: config.run.max_articles,
            retry: RetryConfig::from(&config.retry),
        };
        pipeline.validate()?;
        Ok(pipeline)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.interest_tags.is_empty() {
            return Err(FeedDigestError::config(
                "interests.interest_tags must list at least one tag",
            ));
        }
        let positive = [
            ("filter.batch_size", self.batch_size),
            ("filter.concurrency", self.filter_concurrency),
            ("summary.process_size", self.process_size),
            ("summary.max_tokens", self.max_tokens),
            ("summary.batch_char_budget", self.batch_char_budget),
            ("summary.concurrency", self.summary_concurrency),
            ("fetch.concurrency", self.expand_concurrency),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(FeedDigestError::config(format!("{name} must be greater than 0")));
            }
        }
        if self.run_timeout.is_zero() || self.call_timeout.is_zero() {
            return Err(FeedDigestError::config(
                "run.timeout_secs and run.call_timeout_secs must be greater than 0",
            ));
        }
        if self.filter_model.trim().is_empty() || self.summary_model.trim().is_empty() {
            return Err(FeedDigestError::config("filter.model and summary.model are required"));
        }
        if self.retry.multiplier < 1.0 {
            return Err(FeedDigestError::config("retry.multiplier must be at least 1.0"));
        }
        Ok(())
    }
}

/// Runtime settings for the fetch collaborator.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub feeds: Vec<String>,
    pub concurrency: usize,
    pub timeout: Duration,
    pub full_text_markers: Vec<String>,
    pub user_agent: Option<String>,
}

impl FetchConfig {
    /// Build the fetch config from the file config and validate it.
    pub fn from_app(config: &AppConfig) -> Result<Self> {
        if config.feeds.is_empty() {
            return Err(FeedDigestError::config("feeds must list at least one feed URL"));
        }
        for feed in &config.feeds {
            url::Url::parse(feed)
                .map_err(|e| FeedDigestError::config(format!("invalid feed URL '{feed}': {e}")))?;
        }
        if config.fetch.concurrency == 0 || config.fetch.timeout_secs == 0 {
            return Err(FeedDigestError::config(
                "fetch.concurrency and fetch.timeout_secs must be greater than 0",
            ));
        }
        Ok(Self {
            feeds: config.feeds.clone(),
            concurrency: config.fetch.concurrency,
            timeout: Duration::from_secs(config.fetch.timeout_secs),
            full_text_markers: config.fetch.full_text_markers.clone(),
            user_agent: config.fetch.user_agent.clone(),
        })
    }
}

fn clean_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            out.push(tag.to_string());
        }
    }
    out
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.feeddigest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| FeedDigestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.feeddigest/feeddigest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| FeedDigestError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        FeedDigestError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the default config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    init_config_at(&config_file_path()?)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Err(FeedDigestError::config(format!(
            "config file already exists at {}",
            path.display()
        )));
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| FeedDigestError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| FeedDigestError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| FeedDigestError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path.to_path_buf())
}

/// Check that the API key env var is set and non-empty, returning its value.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(FeedDigestError::config(format!(
            "API key not found. Set the {var_name} environment variable."
        ))),
    }
}
