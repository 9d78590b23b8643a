//! Phase orchestrator.
//!
//! Drives the seven phases in order over an explicit [`RunContext`]. For
//! each phase the checkpoint store decides skip-vs-run: a complete,
//! verifiable checkpoint restores the artifact; anything else executes the
//! phase and persists its artifact before the checkpoint flips to complete.
//! Corruption is logged and answered by re-running the phase.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use briefing_core::artifact::{
    ArticleRecord, ArticleSummary, FinalReport, GlobalOverview, SectionStatus, SourceDescriptor, SourceFormat,
    SourceType, UnitStatus,
};
use briefing_core::budget::ContextLayer;
use briefing_core::report::{render_section, FinalReportInputs};
use briefing_core::{
    canonical_set, canonical_set_with_unknown, CheckpointError, CheckpointStore, PhaseId, PhaseState,
    PhaseTracker, RegionalArtifact, ReportFormatter, RunKey, SectionSchema,
};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::consolidator::{is_youtube_url, ContentAdapter, WebPageStrategy};
use crate::etl::{read_article_links, NewsEtl, TitleSource, ARTICLE_LINKS_FILE};
use crate::generator::UnitTransformer;
use crate::llm::{GatedClient, ModelClient};
use crate::prompts::TemplateId;
use crate::summary::{PhaseReport, RunSummary, RUN_SUMMARY_FILE};
use crate::synthesizer::Reducer;

/// Everything a run needs, passed explicitly to every phase.
pub struct RunContext {
    pub run_key: RunKey,
    pub run_date: NaiveDate,
    pub config: Arc<RunConfig>,
    pub store: CheckpointStore,
    pub cancel: CancellationToken,
}

impl RunContext {
    /// Context rooted at the config's output directory.
    pub fn new(config: RunConfig, run_date: NaiveDate) -> Self {
        let store = CheckpointStore::new(config.output_directory.clone());
        Self {
            run_key: RunKey::from_date(run_date),
            run_date,
            config: Arc::new(config),
            store,
            cancel: CancellationToken::new(),
        }
    }

    pub fn run_dir(&self) -> PathBuf {
        self.store.run_dir(&self.run_key)
    }
}

/// External collaborators of the phases.
pub struct PhaseServices {
    pub adapter: Arc<ContentAdapter>,
    pub titles: Arc<dyn TitleSource>,
    pub client: Arc<dyn ModelClient>,
}

impl PhaseServices {
    /// HTTP fetchers and a gated model client built from config.
    pub fn http(config: &RunConfig, client: Arc<dyn ModelClient>) -> Result<Self> {
        let adapter = ContentAdapter::http(&config.fetch).context("failed to build content adapter")?;
        let titles = WebPageStrategy::new(&config.fetch).context("failed to build title fetcher")?;
        Ok(Self {
            adapter: Arc::new(adapter),
            titles: Arc::new(titles),
            client: Arc::new(GatedClient::from_config(client, &config.model)),
        })
    }
}

/// Artifacts produced or restored so far in this invocation.
#[derive(Default)]
struct PhaseArtifacts {
    overview: Option<GlobalOverview>,
    articles: Option<Vec<ArticleRecord>>,
    summaries: Option<Vec<ArticleSummary>>,
    materialist: Option<RegionalArtifact>,
    briefing: Option<RegionalArtifact>,
    lenses: Option<RegionalArtifact>,
    report: Option<FinalReport>,
}

fn need<T>(slot: &Option<T>, phase: PhaseId) -> Result<&T> {
    slot.as_ref()
        .ok_or_else(|| anyhow!("{} artifact is not available", phase))
}

/// `rerun` plus every phase that consumes one of them, transitively.
pub fn invalidation_set(rerun: &[PhaseId]) -> BTreeSet<PhaseId> {
    let mut set: BTreeSet<PhaseId> = rerun.iter().copied().collect();
    for phase in PhaseId::ALL {
        if phase.consumes().iter().any(|p| set.contains(p)) {
            set.insert(phase);
        }
    }
    set
}

pub struct PhaseOrchestrator {
    ctx: RunContext,
    adapter: Arc<ContentAdapter>,
    transformer: Arc<UnitTransformer>,
    reducer: Reducer,
    etl: NewsEtl,
    formatter: ReportFormatter,
    tracker: PhaseTracker,
}

impl PhaseOrchestrator {
    pub fn new(ctx: RunContext, services: PhaseServices) -> Self {
        let model = &ctx.config.model;
        let transformer = Arc::new(UnitTransformer::new(services.client.clone(), model));
        let reducer = Reducer::new(services.client, model);
        let etl = NewsEtl::new(services.titles, transformer.clone(), ctx.config.fetch.max_concurrency);
        Self {
            formatter: ReportFormatter::new(ctx.run_date),
            tracker: PhaseTracker::new(),
            adapter: services.adapter,
            transformer,
            reducer,
            etl,
            ctx,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn tracker(&self) -> &PhaseTracker {
        &self.tracker
    }

    /// Run every phase not already complete. `rerun` phases, and whatever
    /// consumes them, are invalidated first.
    ///
    /// Errors are reserved for the store itself; phase-level failures are
    /// reported in the returned summary.
    pub async fn run(&mut self, rerun: &[PhaseId]) -> Result<RunSummary> {
        let run_key = self.ctx.run_key.clone();
        info!(
            run_key = %run_key,
            run_dir = %self.ctx.run_dir().display(),
            "Starting weekly intelligence run"
        );

        for phase in invalidation_set(rerun) {
            self.ctx
                .store
                .invalidate(&run_key, phase)
                .with_context(|| format!("failed to invalidate {}", phase))?;
        }

        let mut summary = RunSummary::new(run_key.clone());
        let mut artifacts = PhaseArtifacts::default();
        let mut executed: BTreeSet<PhaseId> = BTreeSet::new();

        for phase in PhaseId::ALL {
            if self.ctx.cancel.is_cancelled() {
                warn!(phase = %phase, "Run cancelled before phase");
                summary.aborted = true;
                break;
            }
            let started = Instant::now();

            if let Some(upstream) = phase.consumes().iter().find(|p| executed.contains(p)) {
                info!(phase = %phase, upstream = %upstream, "Upstream re-executed; invalidating");
                self.ctx.store.invalidate(&run_key, phase)?;
            }

            let restored = self
                .restore(phase, &mut artifacts)
                .with_context(|| format!("cannot resume {}", phase))?;
            if let Some(warning_count) = restored {
                self.tracker.restore(phase)?;
                info!(phase = %phase, run_key = %run_key, "[SKIP] checkpoint complete");
                summary.record(PhaseReport {
                    phase,
                    status: PhaseState::Complete,
                    skipped: true,
                    warning_count,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error: None,
                });
                continue;
            }

            self.tracker.start(phase)?;
            info!(phase = %phase, run_key = %run_key, "[RUN] executing phase");

            let cancel = self.ctx.cancel.clone();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.execute(phase, &mut artifacts) => Some(result),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Some(Ok(warning_count)) => {
                    self.tracker.complete(phase)?;
                    executed.insert(phase);
                    info!(phase = %phase, warnings = warning_count, duration_ms, "Phase complete");
                    summary.record(PhaseReport {
                        phase,
                        status: PhaseState::Complete,
                        skipped: false,
                        warning_count,
                        duration_ms,
                        error: None,
                    });
                }
                Some(Err(e)) => {
                    let reason = format!("{:#}", e);
                    error!(phase = %phase, error = %reason, "Phase failed");
                    self.tracker.fail(phase, &reason)?;
                    summary.record(PhaseReport {
                        phase,
                        status: PhaseState::Failed,
                        skipped: false,
                        warning_count: 0,
                        duration_ms,
                        error: Some(reason),
                    });
                    break;
                }
                None => {
                    warn!(phase = %phase, "Run cancelled mid-phase; in-flight work discarded");
                    self.tracker.fail(phase, "cancelled")?;
                    summary.record(PhaseReport {
                        phase,
                        status: PhaseState::Failed,
                        skipped: false,
                        warning_count: 0,
                        duration_ms,
                        error: Some("cancelled".to_string()),
                    });
                    summary.aborted = true;
                    break;
                }
            }
        }

        summary.finish();
        tracing::debug!(transitions = %self.tracker.summary(), "Phase tracker");
        info!("Run summary:\n{}", summary.render_table());

        // A fully restored run leaves the run directory untouched.
        if summary.executed_any() {
            self.ctx
                .store
                .write_json(&run_key, RUN_SUMMARY_FILE, &summary)
                .context("failed to write run summary")?;
        }
        Ok(summary)
    }

    /// Load a complete phase's artifact. `None` means the phase must run.
    fn restore(&self, phase: PhaseId, artifacts: &mut PhaseArtifacts) -> Result<Option<usize>, CheckpointError> {
        let store = &self.ctx.store;
        let key = &self.ctx.run_key;
        let loaded = match phase {
            PhaseId::GlobalOverview => store.load(key, phase).map(|a| artifacts.overview = Some(a)),
            PhaseId::NewsEtl => store.load(key, phase).map(|a| artifacts.articles = Some(a)),
            PhaseId::Summarization => store.load(key, phase).map(|a| artifacts.summaries = Some(a)),
            PhaseId::MaterialistAnalysis => store.load(key, phase).map(|a| artifacts.materialist = Some(a)),
            PhaseId::GlobalBriefing => store.load(key, phase).map(|a| artifacts.briefing = Some(a)),
            PhaseId::MultiLensAnalysis => store.load(key, phase).map(|a| artifacts.lenses = Some(a)),
            PhaseId::FinalAssembly => store.load(key, phase).map(|a| artifacts.report = Some(a)),
        };

        match loaded {
            Ok(()) => Ok(Some(store.get(key, phase)?.map_or(0, |cp| cp.warning_count))),
            Err(CheckpointError::NotComplete { .. }) => Ok(None),
            Err(e) if e.is_corruption() => {
                error!(phase = %phase, error = %e, "Checkpoint corrupted; re-running phase");
                store.clear_checkpoint(key, phase)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Execute one phase and persist its artifact. Returns the warning count.
    async fn execute(&self, phase: PhaseId, artifacts: &mut PhaseArtifacts) -> Result<usize> {
        self.ctx.store.begin(&self.ctx.run_key, phase)?;

        match phase {
            PhaseId::GlobalOverview => {
                let (overview, warnings) = self.global_overview().await;
                self.persist(phase, &overview, warnings, &self.formatter.render_global_overview(&overview))?;
                artifacts.overview = Some(overview);
                Ok(warnings)
            }
            PhaseId::NewsEtl => {
                let path = self.ctx.config.input_directory.join(ARTICLE_LINKS_FILE);
                let urls = read_article_links(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let articles = self
                    .etl
                    .run(&urls, &self.ctx.config.sources_of(SourceType::Analysis))
                    .await;
                let warnings = articles.iter().filter(|a| a.title_error.is_some()).count();
                self.persist(phase, &articles, warnings, &self.formatter.render_articles(&articles))?;
                artifacts.articles = Some(articles);
                Ok(warnings)
            }
            PhaseId::Summarization => {
                let summaries = self.summarization(need(&artifacts.articles, PhaseId::NewsEtl)?).await;
                let warnings = summaries.iter().filter(|s| !s.summary.is_ok()).count();
                self.persist(phase, &summaries, warnings, &self.formatter.render_summaries(&summaries))?;
                artifacts.summaries = Some(summaries);
                Ok(warnings)
            }
            PhaseId::MaterialistAnalysis => {
                let summaries = need(&artifacts.summaries, PhaseId::Summarization)?;
                let materialist = self
                    .transformer
                    .materialist_analysis(
                        summaries,
                        self.ctx.config.budget.analysis_chars,
                        self.ctx.config.model.max_concurrency,
                    )
                    .await;
                let warnings = materialist.failed_count();
                let markdown = self.formatter.render_regional("Materialist Analysis", &materialist);
                self.persist(phase, &materialist, warnings, &markdown)?;
                artifacts.materialist = Some(materialist);
                Ok(warnings)
            }
            PhaseId::GlobalBriefing => {
                let layers = self.briefing_layers(
                    need(&artifacts.overview, PhaseId::GlobalOverview)?,
                    need(&artifacts.summaries, PhaseId::Summarization)?,
                    need(&artifacts.materialist, PhaseId::MaterialistAnalysis)?,
                );
                let expected = canonical_set();
                let regions = Reducer::regions_param(&expected);
                let outcome = self
                    .reducer
                    .reduce(
                        &layers,
                        TemplateId::GlobalBriefing,
                        &[("regions", &regions)],
                        &expected,
                        SectionSchema::Briefing,
                    )
                    .await;
                let warnings = outcome.warning_count() + outcome.artifact.failed_count();
                let markdown = self.formatter.render_regional("Global Briefing", &outcome.artifact);
                self.persist(phase, &outcome.artifact, warnings, &markdown)?;
                artifacts.briefing = Some(outcome.artifact);
                Ok(warnings)
            }
            PhaseId::MultiLensAnalysis => {
                let layers = self.lens_layers(
                    need(&artifacts.overview, PhaseId::GlobalOverview)?,
                    need(&artifacts.briefing, PhaseId::GlobalBriefing)?,
                );
                let outcome = self.reducer.multi_lens(&layers, &canonical_set()).await;
                let warnings = outcome.warning_count() + outcome.artifact.failed_count();
                let markdown = self.formatter.render_regional("Multi-Lens Analysis", &outcome.artifact);
                self.persist(phase, &outcome.artifact, warnings, &markdown)?;
                artifacts.lenses = Some(outcome.artifact);
                Ok(warnings)
            }
            PhaseId::FinalAssembly => {
                let report = self.formatter.render_final_report(&FinalReportInputs {
                    run_key: self.ctx.run_key.as_str(),
                    overview: need(&artifacts.overview, PhaseId::GlobalOverview)?,
                    briefing: need(&artifacts.briefing, PhaseId::GlobalBriefing)?,
                    lenses: need(&artifacts.lenses, PhaseId::MultiLensAnalysis)?,
                    articles: need(&artifacts.articles, PhaseId::NewsEtl)?,
                    sources: &self.ctx.config.sources,
                });
                let path = self
                    .ctx
                    .store
                    .save_report(&self.ctx.run_key, &report.filename, &report.markdown)?;
                self.ctx.store.put(&self.ctx.run_key, phase, &report, 0)?;
                info!(path = %path.display(), "Final report written");
                artifacts.report = Some(report);
                Ok(0)
            }
        }
    }

    /// Phase report first, then artifact and checkpoint.
    fn persist<T: Serialize>(&self, phase: PhaseId, artifact: &T, warnings: usize, markdown: &str) -> Result<()> {
        let filename = self.formatter.filename(&phase.stem().replace('_', "-"));
        self.ctx.store.save_report(&self.ctx.run_key, &filename, markdown)?;
        self.ctx.store.put(&self.ctx.run_key, phase, artifact, warnings)?;
        Ok(())
    }

    async fn global_overview(&self) -> (GlobalOverview, usize) {
        let sources = self.ctx.config.sources_of(SourceType::Datapoint);
        let headlines = self.adapter.fetch_all(&sources).await;

        let mainstream = headlines
            .iter()
            .filter(|r| !r.text.trim().is_empty())
            .map(|r| format!("### {}\n{}", r.source.name, r.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let layers = [ContextLayer::new(
            "mainstream headlines",
            mainstream,
            self.ctx.config.budget.mainstream_chars,
        )];
        let expected = canonical_set_with_unknown();
        let regions = Reducer::regions_param(&expected);
        let params = [("regions", regions.as_str())];

        let (narrative, economic_snapshot) = tokio::join!(
            self.reducer.reduce(
                &layers,
                TemplateId::MainstreamNarrative,
                &params,
                &expected,
                SectionSchema::Narrative,
            ),
            self.transformer.economic_snapshot(self.ctx.run_date),
        );

        let fetch_failures = headlines.iter().filter(|r| r.fetch_error.is_some()).count();
        let warnings = narrative.warning_count()
            + narrative.artifact.failed_count()
            + fetch_failures
            + usize::from(!economic_snapshot.content.is_ok());
        let overview = GlobalOverview {
            headlines,
            narrative: narrative.artifact,
            economic_snapshot,
        };
        (overview, warnings)
    }

    /// Fetch and summarise every article. Completed units are reused from
    /// their slots; failed units are not stored so a rerun retries them.
    async fn summarization(&self, articles: &[ArticleRecord]) -> Vec<ArticleSummary> {
        let store = &self.ctx.store;
        let key = &self.ctx.run_key;
        let phase = PhaseId::Summarization;

        let mut indexed: Vec<(usize, ArticleSummary)> = stream::iter(articles.iter().enumerate())
            .map(|(idx, article)| async move {
                match store.get_unit::<ArticleSummary>(key, phase, &article.url) {
                    Ok(Some(done)) if done.article == *article => {
                        tracing::debug!(url = %article.url, "Reusing stored summary");
                        return (idx, done);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(url = %article.url, error = %e, "Unit slot unreadable"),
                }

                let record = self.adapter.fetch_one(&article_source(article)).await;
                let summary = self.transformer.summarize(article, &record).await;
                if summary.summary.status != UnitStatus::ModelFailed {
                    if let Err(e) = store.put_unit(key, phase, &article.url, &summary) {
                        warn!(url = %article.url, error = %e, "Failed to store unit");
                    }
                }
                (idx, summary)
            })
            .buffer_unordered(self.ctx.config.fetch.max_concurrency.max(1))
            .collect()
            .await;

        indexed.sort_by_key(|(idx, _)| *idx);
        indexed.into_iter().map(|(_, s)| s).collect()
    }

    fn briefing_layers(
        &self,
        overview: &GlobalOverview,
        summaries: &[ArticleSummary],
        materialist: &RegionalArtifact,
    ) -> Vec<ContextLayer> {
        let budget = &self.ctx.config.budget;
        vec![
            economic_layer(overview, budget.economic_chars),
            ContextLayer::new("mainstream narrative", regional_text(&overview.narrative), budget.narrative_chars),
            ContextLayer::new("analysis headlines", summaries_text(summaries), budget.analysis_chars),
            ContextLayer::new("materialist analysis", regional_text(materialist), budget.materialist_chars),
        ]
    }

    fn lens_layers(&self, overview: &GlobalOverview, briefing: &RegionalArtifact) -> Vec<ContextLayer> {
        let budget = &self.ctx.config.budget;
        vec![
            economic_layer(overview, budget.economic_chars),
            ContextLayer::new("mainstream narrative", regional_text(&overview.narrative), budget.narrative_chars),
            ContextLayer::new("global briefing", regional_text(briefing), budget.briefing_chars),
        ]
    }
}

/// Descriptor used to fetch a curated article's body.
fn article_source(article: &ArticleRecord) -> SourceDescriptor {
    let format = if is_youtube_url(&article.url) {
        SourceFormat::Video
    } else {
        SourceFormat::Article
    };
    SourceDescriptor {
        name: article.source.clone(),
        url: article.url.clone(),
        source_type: SourceType::Analysis,
        format,
        rank: article.rank,
    }
}

fn economic_layer(overview: &GlobalOverview, cap: usize) -> ContextLayer {
    let content = &overview.economic_snapshot.content;
    let text = if content.is_ok() { content.text.as_str() } else { "" };
    ContextLayer::new("economic snapshot", text, cap)
}

/// Parsed regions only; placeholders and failures are not context.
fn regional_text(artifact: &RegionalArtifact) -> String {
    artifact
        .entries()
        .iter()
        .filter(|e| e.section.status == SectionStatus::Parsed)
        .map(|e| format!("## {}\n{}", e.region, render_section(artifact.schema, &e.section).trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn summaries_text(summaries: &[ArticleSummary]) -> String {
    summaries
        .iter()
        .filter(|s| s.summary.is_ok())
        .map(|s| {
            format!(
                "## {}\nSource: {} | Region: {}\n{}",
                s.article.title, s.article.source, s.article.region, s.summary.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidation_cascades_downstream() {
        let set = invalidation_set(&[PhaseId::Summarization]);
        let expected: BTreeSet<_> = [
            PhaseId::Summarization,
            PhaseId::MaterialistAnalysis,
            PhaseId::GlobalBriefing,
            PhaseId::MultiLensAnalysis,
            PhaseId::FinalAssembly,
        ]
        .into();
        assert_eq!(set, expected);
    }

    #[test]
    fn test_invalidating_final_assembly_touches_nothing_else() {
        let set = invalidation_set(&[PhaseId::FinalAssembly]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_news_etl_rerun_skips_global_overview() {
        let set = invalidation_set(&[PhaseId::NewsEtl]);
        assert!(!set.contains(&PhaseId::GlobalOverview));
        assert!(set.contains(&PhaseId::FinalAssembly));
    }

    #[test]
    fn test_youtube_articles_fetch_as_video() {
        let article = ArticleRecord {
            url: "https://youtu.be/abc".into(),
            title: "t".into(),
            source: "s".into(),
            rank: 3,
            region: briefing_core::RegionKey::Unknown,
            title_error: None,
        };
        assert_eq!(article_source(&article).format, SourceFormat::Video);
    }
}
