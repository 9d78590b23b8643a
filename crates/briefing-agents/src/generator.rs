//! Unit transformers: exactly one model call per input unit.
//!
//! A failed call never escapes as an error. The unit comes back carrying a
//! visible failure marker so the report shows what needs follow-up and the
//! rest of the batch carries on.

use std::sync::Arc;

use briefing_core::artifact::{
    ArticleRecord, ArticleSummary, EconomicSnapshot, RawContentRecord, RegionSection, SectionSchema,
    SectionStatus, TransformedUnit,
};
use briefing_core::budget::truncate_chars;
use briefing_core::sanitize::sanitize_model_output;
use briefing_core::{canonical_set, RegionKey, RegionalArtifact, CANONICAL_REGIONS};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};

use crate::config::ModelConfig;
use crate::llm::{ModelClient, ModelRequest};
use crate::prompts::{render, TemplateId};

pub struct UnitTransformer {
    client: Arc<dyn ModelClient>,
    model: ModelConfig,
}

impl UnitTransformer {
    pub fn new(client: Arc<dyn ModelClient>, model: &ModelConfig) -> Self {
        Self {
            client,
            model: model.clone(),
        }
    }

    /// One call with `params`, sanitised. Failures become a marker unit.
    pub async fn call(&self, unit_id: &str, template: TemplateId, params: &[(&str, &str)]) -> TransformedUnit {
        let request = ModelRequest::new(template, self.model.model_for(template), render(template, params));
        match self.client.invoke(&request).await {
            Ok(text) => TransformedUnit::ok(unit_id, sanitize_model_output(&text)),
            Err(e) => {
                tracing::warn!(unit = unit_id, template = %template, error = %e, "Unit transform failed");
                TransformedUnit::failed(unit_id, &e.to_string())
            }
        }
    }

    /// Transform one fetched record. Records that failed to fetch or are
    /// below the content threshold are skipped without a model call.
    pub async fn transform(
        &self,
        unit_id: &str,
        record: &RawContentRecord,
        template: TemplateId,
        extra: &[(&str, &str)],
    ) -> TransformedUnit {
        if !record.is_usable() {
            let detail = match &record.fetch_error {
                Some(err) => format!("fetch failed: {}", err),
                None => format!("{} characters of content", record.text.chars().count()),
            };
            tracing::info!(unit = unit_id, detail = %detail, "Skipping unit with insufficient content");
            return TransformedUnit::insufficient(unit_id, &detail);
        }

        let mut params: Vec<(&str, &str)> = vec![("source", record.source.name.as_str())];
        params.extend_from_slice(extra);
        params.push(("content", record.text.as_str()));
        self.call(unit_id, template, &params).await
    }

    /// Intelligence brief of one curated article.
    pub async fn summarize(&self, article: &ArticleRecord, record: &RawContentRecord) -> ArticleSummary {
        let summary = self
            .transform(&article.url, record, TemplateId::IntelBrief, &[("title", article.title.as_str())])
            .await;
        ArticleSummary {
            article: article.clone(),
            summary,
        }
    }

    /// Economic ledger for the run month.
    pub async fn economic_snapshot(&self, date: NaiveDate) -> EconomicSnapshot {
        let month = date.format("%B %Y").to_string();
        let content = self
            .call("economic_snapshot", TemplateId::EconomicSnapshot, &[("month", &month)])
            .await;
        EconomicSnapshot { date, content }
    }

    /// Single-label region classification. Anything unrecognised, and any
    /// failure, is `Unknown`.
    pub async fn categorise(&self, title: &str, url: &str) -> RegionKey {
        let regions = region_list(CANONICAL_REGIONS);
        let unit = self
            .call(
                url,
                TemplateId::RegionCategoriser,
                &[("regions", &regions), ("title", title), ("url", url)],
            )
            .await;
        if !unit.is_ok() {
            return RegionKey::Unknown;
        }
        let answer = unit.text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        let region = RegionKey::categorise(answer);
        if region == RegionKey::Unknown && !answer.trim().eq_ignore_ascii_case("unknown") {
            tracing::debug!(url, answer, "Categoriser answer not recognised");
        }
        region
    }

    /// Materialist analysis: one call per canonical region that has at
    /// least one usable summary. Regions without summaries keep the
    /// placeholder.
    pub async fn materialist_analysis(
        &self,
        summaries: &[ArticleSummary],
        context_cap: usize,
        max_concurrency: usize,
    ) -> RegionalArtifact {
        let mut artifact = RegionalArtifact::placeholders(SectionSchema::Narrative, &canonical_set());

        let groups: Vec<(RegionKey, String)> = CANONICAL_REGIONS
            .into_iter()
            .filter_map(|region| {
                let briefs: Vec<String> = summaries
                    .iter()
                    .filter(|s| s.article.region == region && s.summary.is_ok())
                    .map(|s| format!("### {} ({})\n{}", s.article.title, s.article.source, s.summary.text))
                    .collect();
                (!briefs.is_empty()).then(|| {
                    let joined = briefs.join("\n\n");
                    let (kept, _) = truncate_chars(&joined, context_cap);
                    (region, kept.to_string())
                })
            })
            .collect();

        let results: Vec<(RegionKey, TransformedUnit)> = stream::iter(groups)
            .map(|(region, context)| async move {
                let unit = self
                    .call(
                        &region.slug(),
                        TemplateId::MaterialistAnalysis,
                        &[("region", region.name()), ("context", &context)],
                    )
                    .await;
                (region, unit)
            })
            .buffer_unordered(max_concurrency.max(1))
            .collect()
            .await;

        for (region, unit) in results {
            // The failed unit's text already carries the marker.
            let status = if unit.is_ok() {
                SectionStatus::Parsed
            } else {
                SectionStatus::Failed
            };
            artifact.insert(
                region,
                RegionSection {
                    status,
                    body: unit.text,
                    subsections: Vec::new(),
                },
            );
        }
        artifact
    }
}

/// Region names, one per line, for templates that list them.
pub fn region_list(regions: impl IntoIterator<Item = RegionKey>) -> String {
    regions
        .into_iter()
        .map(|r| format!("- {}", r.name()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockModelClient, ModelError};
    use briefing_core::artifact::{SourceDescriptor, SourceFormat, SourceType, UnitStatus, FAILURE_MARKER};

    fn record(text: &str) -> RawContentRecord {
        let source = SourceDescriptor {
            name: "Wire".into(),
            url: "https://example.com/a".into(),
            source_type: SourceType::Analysis,
            format: SourceFormat::Article,
            rank: 1,
        };
        RawContentRecord::fetched(source, text.to_string(), "webpage", 20)
    }

    fn article(url: &str, region: RegionKey) -> ArticleRecord {
        ArticleRecord {
            url: url.into(),
            title: format!("Title {}", url),
            source: "Wire".into(),
            rank: 2,
            region,
            title_error: None,
        }
    }

    #[tokio::test]
    async fn test_short_input_skips_model_call() {
        let mut mock = MockModelClient::new();
        mock.expect_invoke().times(0);
        let transformer = UnitTransformer::new(Arc::new(mock), &ModelConfig::default());

        let unit = transformer.transform("u1", &record("short"), TemplateId::IntelBrief, &[]).await;
        assert_eq!(unit.status, UnitStatus::InsufficientContent);
    }

    #[tokio::test]
    async fn test_output_is_sanitised() {
        let mut mock = MockModelClient::new();
        mock.expect_invoke()
            .withf(|req| req.prompt.contains("a long enough body of text") && req.prompt.contains("SOURCE: Wire"))
            .returning(|_| Ok("> echoed prompt\n**Bottom line:** tension rises.\n".into()));
        let transformer = UnitTransformer::new(Arc::new(mock), &ModelConfig::default());

        let unit = transformer
            .transform("u1", &record("a long enough body of text"), TemplateId::IntelBrief, &[("title", "T")])
            .await;
        assert!(unit.is_ok());
        assert_eq!(unit.text, "**Bottom line:** tension rises.");
    }

    #[tokio::test]
    async fn test_failure_is_visible_marker() {
        let mut mock = MockModelClient::new();
        mock.expect_invoke()
            .returning(|_| Err(ModelError::Api { status: 429, body: "quota".into() }));
        let transformer = UnitTransformer::new(Arc::new(mock), &ModelConfig::default());

        let unit = transformer.call("u1", TemplateId::IntelBrief, &[]).await;
        assert_eq!(unit.status, UnitStatus::ModelFailed);
        assert!(unit.text.starts_with(FAILURE_MARKER));
        assert!(unit.text.contains("429"));
    }

    #[tokio::test]
    async fn test_categorise_uses_aliases_and_falls_back() {
        let mut mock = MockModelClient::new();
        mock.expect_invoke()
            .withf(|req| req.template == TemplateId::RegionCategoriser)
            .returning(|req| {
                if req.prompt.contains("URL: https://a") {
                    Ok("Middle East\n".into())
                } else if req.prompt.contains("URL: https://b") {
                    Ok("Atlantis".into())
                } else {
                    Err(ModelError::Transport("reset".into()))
                }
            });
        let transformer = UnitTransformer::new(Arc::new(mock), &ModelConfig::default());

        assert_eq!(transformer.categorise("t", "https://a").await, RegionKey::WestAsia);
        assert_eq!(transformer.categorise("t", "https://b").await, RegionKey::Unknown);
        assert_eq!(transformer.categorise("t", "https://c").await, RegionKey::Unknown);
    }

    #[tokio::test]
    async fn test_materialist_groups_by_region() {
        let mut mock = MockModelClient::new();
        mock.expect_invoke()
            .withf(|req| req.template == TemplateId::MaterialistAnalysis)
            .times(2)
            .returning(|req| {
                if req.prompt.contains("for China.") {
                    Ok("Capital flows east.".into())
                } else {
                    Err(ModelError::Timeout(std::time::Duration::from_secs(300)))
                }
            });
        let transformer = UnitTransformer::new(Arc::new(mock), &ModelConfig::default());

        let summaries = vec![
            ArticleSummary {
                article: article("https://1", RegionKey::China),
                summary: TransformedUnit::ok("https://1", "brief one".into()),
            },
            ArticleSummary {
                article: article("https://2", RegionKey::Russia),
                summary: TransformedUnit::ok("https://2", "brief two".into()),
            },
            ArticleSummary {
                article: article("https://3", RegionKey::SouthAsia),
                summary: TransformedUnit::failed("https://3", "boom"),
            },
        ];
        let artifact = transformer.materialist_analysis(&summaries, 10_000, 2).await;

        assert_eq!(artifact.regions(), canonical_set());
        assert_eq!(artifact.get(RegionKey::China).unwrap().body, "Capital flows east.");
        assert_eq!(artifact.get(RegionKey::Russia).unwrap().status, SectionStatus::Failed);
        let russia = artifact.get(RegionKey::Russia).unwrap();
        assert_eq!(russia.body.matches(FAILURE_MARKER).count(), 1);
        assert_eq!(artifact.get(RegionKey::SouthAsia).unwrap().status, SectionStatus::Placeholder);
    }

    #[test]
    fn test_region_list_format() {
        let list = region_list([RegionKey::China, RegionKey::Russia]);
        assert_eq!(list, "- China\n- Russia");
    }
}
