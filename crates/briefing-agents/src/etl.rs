//! News ETL: curated URL list → region-labelled article records.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use briefing_core::artifact::{ArticleRecord, SourceDescriptor};
use futures::stream::{self, StreamExt};

use crate::consolidator::{extract_title, FetchError, WebPageStrategy};
use crate::generator::UnitTransformer;

/// Curated input, one URL per line, in the input directory.
pub const ARTICLE_LINKS_FILE: &str = "input_article_links.txt";

/// Rank given to URLs no configured source claims.
const UNATTRIBUTED_RANK: u8 = 5;

/// Resolves a page title.
#[async_trait]
pub trait TitleSource: Send + Sync {
    async fn title(&self, url: &str) -> Result<String, FetchError>;
}

#[async_trait]
impl TitleSource for WebPageStrategy {
    async fn title(&self, url: &str) -> Result<String, FetchError> {
        let html = self.get_html(url).await?;
        extract_title(&html).ok_or(FetchError::Empty)
    }
}

/// URLs from the curated list: comments and blanks skipped, duplicates
/// removed, first occurrence wins.
pub fn parse_article_links(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| {
            let ok = line.starts_with("http://") || line.starts_with("https://");
            if !ok {
                tracing::warn!(line, "Ignoring non-URL line in article list");
            }
            ok
        })
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect()
}

/// Read the curated list. A missing file is an empty list.
pub fn read_article_links(path: &Path) -> std::io::Result<Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(parse_article_links(&raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "Article list not found; no curated articles this run");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

fn host_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_lowercase()))
}

/// Source name and rank for a URL, matched by host against the configured
/// sources. Unclaimed URLs are attributed to their host at the lowest rank.
pub fn attribute(url: &str, sources: &[SourceDescriptor]) -> (String, u8) {
    let Some(host) = host_of(url) else {
        return (url.to_string(), UNATTRIBUTED_RANK);
    };
    sources
        .iter()
        .filter(|s| host_of(&s.url).as_deref() == Some(host.as_str()))
        .min_by_key(|s| s.rank)
        .map(|s| (s.name.clone(), s.rank))
        .unwrap_or((host, UNATTRIBUTED_RANK))
}

pub struct NewsEtl {
    titles: Arc<dyn TitleSource>,
    transformer: Arc<UnitTransformer>,
    max_concurrency: usize,
}

impl NewsEtl {
    pub fn new(titles: Arc<dyn TitleSource>, transformer: Arc<UnitTransformer>, max_concurrency: usize) -> Self {
        Self {
            titles,
            transformer,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// One record per URL, in input order.
    pub async fn run(&self, urls: &[String], sources: &[SourceDescriptor]) -> Vec<ArticleRecord> {
        let mut indexed: Vec<(usize, ArticleRecord)> = stream::iter(urls.iter().enumerate())
            .map(|(idx, url)| async move { (idx, self.enrich(url, sources).await) })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(idx, _)| *idx);
        indexed.into_iter().map(|(_, record)| record).collect()
    }

    async fn enrich(&self, url: &str, sources: &[SourceDescriptor]) -> ArticleRecord {
        let (source, rank) = attribute(url, sources);
        let (title, title_error) = match self.titles.title(url).await {
            Ok(title) => (title, None),
            Err(e) => {
                tracing::warn!(url, error = %e, "Title fetch failed; using URL");
                (url.to_string(), Some(e.to_string()))
            }
        };
        let region = self.transformer.categorise(&title, url).await;
        tracing::debug!(url, region = %region, "Article categorised");
        ArticleRecord {
            url: url.to_string(),
            title,
            source,
            rank,
            region,
            title_error,
        }
    }
}
