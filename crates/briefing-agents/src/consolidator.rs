//! Content adapter: fetch raw text for a list of sources.
//!
//! Each source is fetched on its own through the fallback chain for its
//! format. A failure yields a record with `fetch_error` set; it never
//! aborts the batch and never borrows content from another source.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use briefing_core::artifact::{RawContentRecord, SourceDescriptor, SourceFormat};
use briefing_core::resilience::FallbackChain;
use futures::stream::{self, StreamExt};
use regex::Regex;
use thiserror::Error;

use crate::config::FetchConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("empty response body")]
    Empty,

    #[error("strategy not configured: {0}")]
    NotConfigured(&'static str),
}

/// One way of turning a source into text.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self, source: &SourceDescriptor) -> Result<String, FetchError>;
}

// ── HTML helpers ────────────────────────────────────────────────────

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>|<noscript\b.*?</noscript>|<!--.*?-->")
        .expect("SCRIPT_OR_STYLE regex should compile")
});
static BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(?:p|div|br|li|ul|ol|h[1-6]|tr|article|section|header|footer|blockquote)\b[^>]*>")
        .expect("BLOCK_TAG regex should compile")
});
static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("ANY_TAG regex should compile"));
static TITLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("TITLE_TAG regex should compile"));
static META_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("META_TAG regex should compile"));
static TAG_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z][a-z0-9:_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("TAG_ATTR regex should compile")
});
static NUMERIC_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&#(?:[xX]([0-9a-fA-F]{1,6})|([0-9]{1,7}));").expect("NUMERIC_ENTITY regex should compile")
});

/// `content` of the first `<meta property="og:title">` (or `name=`), in
/// any attribute order and with either quote style.
fn og_title(html: &str) -> Option<&str> {
    META_TAG.find_iter(html).find_map(|tag| {
        let mut is_og_title = false;
        let mut content = None;
        for caps in TAG_ATTR.captures_iter(tag.as_str()) {
            let (Some(name), Some(value)) = (caps.get(1), caps.get(2).or_else(|| caps.get(3))) else {
                continue;
            };
            match name.as_str().to_ascii_lowercase().as_str() {
                "property" | "name" if value.as_str().eq_ignore_ascii_case("og:title") => is_og_title = true,
                "content" => content = Some(value.as_str()),
                _ => {}
            }
        }
        if is_og_title {
            content
        } else {
            None
        }
    })
}

fn decode_entities(text: &str) -> String {
    let numeric = NUMERIC_ENTITY.replace_all(text, |caps: &regex::Captures<'_>| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (None, Some(dec)) => dec.as_str().parse::<u32>().ok(),
            _ => None,
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });
    numeric
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Visible text of an HTML document, one block per line.
pub fn html_to_text(html: &str) -> String {
    let without_scripts = SCRIPT_OR_STYLE.replace_all(html, " ");
    let with_breaks = BLOCK_TAG.replace_all(&without_scripts, "\n");
    let stripped = ANY_TAG.replace_all(&with_breaks, " ");
    decode_entities(&stripped)
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// `og:title` if present, else `<title>`.
pub fn extract_title(html: &str) -> Option<String> {
    let raw = og_title(html)
        .filter(|t| !t.trim().is_empty())
        .or_else(|| TITLE_TAG.captures(html).and_then(|caps| caps.get(1)).map(|m| m.as_str()))?;
    let title = decode_entities(raw).split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

pub fn is_youtube_url(url: &str) -> bool {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .is_some_and(|h| {
            matches!(
                h.trim_start_matches("www.").trim_start_matches("m."),
                "youtube.com" | "youtu.be"
            )
        })
}

// ── Strategies ──────────────────────────────────────────────────────

fn http_client(config: &FetchConfig) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| FetchError::Transport(format!("failed to build HTTP client: {}", e)))
}

async fn get_text(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::Transport(e.to_string()))?;
    if !response.status().is_success() {
        return Err(FetchError::Http {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }
    response.text().await.map_err(|e| FetchError::Transport(e.to_string()))
}

/// Plain HTTP GET plus tag stripping.
pub struct WebPageStrategy {
    client: reqwest::Client,
}

impl WebPageStrategy {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: http_client(config)?,
        })
    }

    /// Raw HTML of a page.
    pub async fn get_html(&self, url: &str) -> Result<String, FetchError> {
        get_text(&self.client, url).await
    }
}

#[async_trait]
impl FetchStrategy for WebPageStrategy {
    fn name(&self) -> &'static str {
        "webpage"
    }

    async fn fetch(&self, source: &SourceDescriptor) -> Result<String, FetchError> {
        let text = html_to_text(&self.get_html(&source.url).await?);
        if text.trim().is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(text)
    }
}

/// External transcript service: `GET <endpoint>?url=<video url>` returns
/// plain text.
pub struct TranscriptServiceStrategy {
    client: reqwest::Client,
    endpoint: String,
}

impl TranscriptServiceStrategy {
    pub fn new(config: &FetchConfig, endpoint: &str) -> Result<Self, FetchError> {
        Ok(Self {
            client: http_client(config)?,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl FetchStrategy for TranscriptServiceStrategy {
    fn name(&self) -> &'static str {
        "transcript_service"
    }

    async fn fetch(&self, source: &SourceDescriptor) -> Result<String, FetchError> {
        let url = reqwest::Url::parse_with_params(&self.endpoint, &[("url", source.url.as_str())])
            .map_err(|e| FetchError::Transport(format!("bad transcript endpoint: {}", e)))?;
        let text = get_text(&self.client, url.as_str()).await?;
        if text.trim().is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(text.trim().to_string())
    }
}

// ── Adapter ─────────────────────────────────────────────────────────

type StrategyChain = FallbackChain<Arc<dyn FetchStrategy>>;

/// Fetches sources concurrently, one fallback chain per format.
pub struct ContentAdapter {
    chains: HashMap<SourceFormat, StrategyChain>,
    timeout: Duration,
    max_concurrency: usize,
    min_content_chars: usize,
}

impl ContentAdapter {
    /// Adapter with no chains; add them with [`ContentAdapter::with_chain`].
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            chains: HashMap::new(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_concurrency: config.max_concurrency.max(1),
            min_content_chars: config.min_content_chars,
        }
    }

    /// Standard HTTP chains: articles use the web page; videos try the
    /// transcript service (when configured) before the web page.
    pub fn http(config: &FetchConfig) -> Result<Self, FetchError> {
        let webpage: Arc<dyn FetchStrategy> = Arc::new(WebPageStrategy::new(config)?);

        let mut video = FallbackChain::new("video");
        if let Some(endpoint) = &config.transcript_endpoint {
            let transcript: Arc<dyn FetchStrategy> = Arc::new(TranscriptServiceStrategy::new(config, endpoint)?);
            video = video.add_tier(transcript.name(), 1.0, transcript);
        }
        video = video.add_tier(webpage.name(), 0.5, webpage.clone());

        let article = FallbackChain::new("article").add_tier(webpage.name(), 1.0, webpage);

        Ok(Self::new(config)
            .with_chain(SourceFormat::Article, article)
            .with_chain(SourceFormat::Video, video))
    }

    pub fn with_chain(mut self, format: SourceFormat, chain: StrategyChain) -> Self {
        self.chains.insert(format, chain);
        self
    }

    pub fn min_content_chars(&self) -> usize {
        self.min_content_chars
    }

    /// One record per source, in input order.
    pub async fn fetch_all(&self, sources: &[SourceDescriptor]) -> Vec<RawContentRecord> {
        let mut indexed: Vec<(usize, RawContentRecord)> = stream::iter(sources.iter().enumerate())
            .map(|(idx, source)| async move { (idx, self.fetch_one(source).await) })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(idx, _)| *idx);

        let failed = indexed.iter().filter(|(_, r)| r.fetch_error.is_some()).count();
        tracing::info!(
            total = sources.len(),
            failed,
            "Fetched sources"
        );
        indexed.into_iter().map(|(_, record)| record).collect()
    }

    pub async fn fetch_one(&self, source: &SourceDescriptor) -> RawContentRecord {
        let Some(chain) = self.chains.get(&source.format) else {
            return RawContentRecord::failed(
                source.clone(),
                format!("no fetch strategy for format '{}'", source.format),
            );
        };

        let timeout = self.timeout;
        let response = chain
            .execute(|strategy| {
                let strategy = strategy.clone();
                let source = source.clone();
                async move {
                    match tokio::time::timeout(timeout, strategy.fetch(&source)).await {
                        Ok(Ok(text)) if !text.trim().is_empty() => Ok(text),
                        Ok(Ok(_)) => Err(FetchError::Empty.to_string()),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!("timed out after {:?}", timeout)),
                    }
                }
            })
            .await;

        match &response.payload {
            Some(text) => {
                if response.is_degraded() {
                    tracing::debug!(source = %source.name, served_by = %response.served_by, "Fetched via fallback");
                }
                let record = RawContentRecord::fetched(source.clone(), text.clone(), &response.served_by, self.min_content_chars);
                if record.below_threshold {
                    tracing::warn!(
                        source = %source.name,
                        chars = record.text.chars().count(),
                        "Content below minimum length"
                    );
                }
                record
            }
            None => {
                let reason = response.aggregate_warning();
                tracing::warn!(source = %source.name, error = %reason, "Fetch failed");
                RawContentRecord::failed(source.clone(), reason)
            }
        }
    }
}
