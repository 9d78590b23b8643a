//! End-to-end orchestrator runs against scripted collaborators.
//!
//! The model client answers per template and records every call, the fetch
//! strategy serves canned pages, so each test can count exactly which model
//! calls a run made and which phases it skipped.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use briefing_agents::config::RunConfig;
use briefing_agents::consolidator::{ContentAdapter, FetchError, FetchStrategy};
use briefing_agents::etl::{TitleSource, ARTICLE_LINKS_FILE};
use briefing_agents::llm::{ModelClient, ModelError, ModelRequest};
use briefing_agents::prompts::{TemplateId, NO_DATA_FOUND};
use briefing_agents::summary::RUN_SUMMARY_FILE;
use briefing_agents::{PhaseOrchestrator, PhaseServices, RunContext, RunSummary};
use briefing_core::artifact::{
    ArticleSummary, FinalReport, GlobalOverview, SourceDescriptor, SourceFormat, SourceType, UnitStatus,
    FAILURE_MARKER, LENS_SUBSECTIONS,
};
use briefing_core::resilience::FallbackChain;
use briefing_core::{PhaseId, PhaseState, RegionKey, RunKey};
use chrono::NaiveDate;
use tempfile::TempDir;

// ── Scripted collaborators ──────────────────────────────────────────

#[derive(Default)]
struct ScriptedModel {
    calls: Mutex<Vec<TemplateId>>,
}

impl ScriptedModel {
    fn count(&self, template: TemplateId) -> usize {
        self.calls.lock().unwrap().iter().filter(|t| **t == template).count()
    }

    fn total(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

fn lens_answer(region: &str) -> String {
    LENS_SUBSECTIONS
        .iter()
        .map(|lens| format!("### {}\n{} on {}.\n", lens, lens, region))
        .collect()
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn invoke(&self, request: &ModelRequest) -> Result<String, ModelError> {
        self.calls.lock().unwrap().push(request.template);
        let answer = match request.template {
            TemplateId::MainstreamNarrative => {
                "## Global\nMarkets wobble.\n## China\nExports rise.\n## Unknown\nMisc.\n".to_string()
            }
            TemplateId::EconomicSnapshot => "| Indicator | Region |\n|---|---|\n| Brent | Global |".to_string(),
            TemplateId::RegionCategoriser => {
                if request.prompt.contains("/china-") {
                    "China".to_string()
                } else {
                    "Europe".to_string()
                }
            }
            TemplateId::IntelBrief => {
                if request.prompt.contains("fail-me") {
                    return Err(ModelError::Api {
                        status: 500,
                        body: "upstream overloaded".into(),
                    });
                }
                "**Bottom line:** something happened.".to_string()
            }
            TemplateId::MaterialistAnalysis => "Material interests collide.".to_string(),
            TemplateId::GlobalBriefing => {
                "## China\n### Mainstream Narrative\nExports rise.\n### Strategic Analysis\nLeverage grows.\n"
                    .to_string()
            }
            TemplateId::MultiLens => {
                if request.prompt.contains("for the region: China.") {
                    lens_answer("China")
                } else {
                    NO_DATA_FOUND.to_string()
                }
            }
        };
        Ok(answer)
    }
}

struct CannedPages;

#[async_trait]
impl FetchStrategy for CannedPages {
    fn name(&self) -> &'static str {
        "canned"
    }

    async fn fetch(&self, source: &SourceDescriptor) -> Result<String, FetchError> {
        if source.url.contains("blocked") {
            return Err(FetchError::Http {
                status: 403,
                url: source.url.clone(),
            });
        }
        Ok(format!("Full text of {}. {}", source.url, "Lorem ipsum dolor sit amet. ".repeat(10)))
    }
}

struct CannedTitles;

#[async_trait]
impl TitleSource for CannedTitles {
    async fn title(&self, url: &str) -> Result<String, FetchError> {
        let slug = url.rsplit('/').next().unwrap_or(url);
        Ok(format!("Story {}", slug))
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
}

fn source(name: &str, url: &str, kind: SourceType, rank: u8) -> SourceDescriptor {
    SourceDescriptor {
        name: name.into(),
        url: url.into(),
        source_type: kind,
        format: SourceFormat::Article,
        rank,
    }
}

const ARTICLE_LINKS: &str = "\
# curated this week
https://analyst.example/china-ports
https://analyst.example/eu-energy
https://analyst.example/fail-me
https://analyst.example/china-chips
https://analyst.example/eu-farmers
";

fn setup() -> (TempDir, RunConfig) {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("inputs");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join(ARTICLE_LINKS_FILE), ARTICLE_LINKS).unwrap();

    let config = RunConfig {
        sources: vec![
            source("Wire A", "https://wire-a.example/world", SourceType::Datapoint, 1),
            source("Wire B", "https://blocked.example/world", SourceType::Datapoint, 2),
            source("Analyst", "https://analyst.example/", SourceType::Analysis, 2),
        ],
        output_directory: dir.path().join("outputs"),
        input_directory: input,
        ..RunConfig::default()
    };
    (dir, config)
}

fn orchestrator(config: &RunConfig, model: Arc<ScriptedModel>) -> PhaseOrchestrator {
    let fetch = &config.fetch;
    let adapter = ContentAdapter::new(fetch).with_chain(
        SourceFormat::Article,
        FallbackChain::new("article").add_tier("canned", 1.0, Arc::new(CannedPages) as Arc<dyn FetchStrategy>),
    );
    let services = PhaseServices {
        adapter: Arc::new(adapter),
        titles: Arc::new(CannedTitles),
        client: model,
    };
    PhaseOrchestrator::new(RunContext::new(config.clone(), run_date()), services)
}

async fn run(config: &RunConfig, rerun: &[PhaseId]) -> (RunSummary, Arc<ScriptedModel>) {
    let model = Arc::new(ScriptedModel::default());
    let summary = orchestrator(config, model.clone()).run(rerun).await.unwrap();
    (summary, model)
}

fn run_dir(config: &RunConfig) -> std::path::PathBuf {
    config.output_directory.join(RunKey::from_date(run_date()).as_str())
}

fn final_report(config: &RunConfig) -> String {
    fs::read_to_string(run_dir(config).join("reports").join("2026-10-18-weekly-news.md")).unwrap()
}

fn executed(summary: &RunSummary) -> Vec<PhaseId> {
    summary
        .phases
        .iter()
        .filter(|r| !r.skipped && r.status == PhaseState::Complete)
        .map(|r| r.phase)
        .collect()
}

fn load<T: serde::de::DeserializeOwned>(config: &RunConfig, phase: PhaseId) -> T {
    briefing_core::CheckpointStore::new(&config.output_directory)
        .load(&RunKey::from_date(run_date()), phase)
        .unwrap()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_run_produces_report() {
    let (_dir, config) = setup();
    let (summary, model) = run(&config, &[]).await;

    assert!(summary.successful, "{}", summary.render_table());
    assert_eq!(executed(&summary), PhaseId::ALL.to_vec());
    assert_eq!(model.count(TemplateId::MainstreamNarrative), 1);
    assert_eq!(model.count(TemplateId::EconomicSnapshot), 1);
    assert_eq!(model.count(TemplateId::RegionCategoriser), 5);
    assert_eq!(model.count(TemplateId::IntelBrief), 5);
    // China and Europe have usable summaries.
    assert_eq!(model.count(TemplateId::MaterialistAnalysis), 2);
    assert_eq!(model.count(TemplateId::GlobalBriefing), 1);
    assert_eq!(model.count(TemplateId::MultiLens), 14);

    let report = final_report(&config);
    assert!(report.starts_with("---\nlayout: post"));
    let global = report.find("# Global <a id='global'></a>").unwrap();
    let china = report.find("# China <a id='china'></a>").unwrap();
    let oceania = report.find("# Oceania <a id='oceania'></a>").unwrap();
    assert!(global < china && china < oceania);
    assert!(report.contains("Leverage grows."));
    assert!(report.contains("Lens: The Realist"));
    assert!(report.contains("Story china-ports"));

    let stored: FinalReport = load(&config, PhaseId::FinalAssembly);
    assert_eq!(stored.markdown, report);
    assert!(run_dir(&config).join(RUN_SUMMARY_FILE).exists());
}

#[tokio::test]
async fn test_second_run_skips_everything() {
    let (_dir, config) = setup();
    let (first, _) = run(&config, &[]).await;
    assert!(first.successful);
    let report_before = final_report(&config);
    let summary_before = fs::read(run_dir(&config).join(RUN_SUMMARY_FILE)).unwrap();

    let (second, model) = run(&config, &[]).await;

    assert!(second.successful);
    assert_eq!(model.total(), 0);
    assert!(second.phases.iter().all(|r| r.skipped));
    assert_eq!(final_report(&config), report_before);
    assert_eq!(fs::read(run_dir(&config).join(RUN_SUMMARY_FILE)).unwrap(), summary_before);
}

#[tokio::test]
async fn test_one_failed_summary_of_five_is_marked() {
    let (_dir, config) = setup();
    let (summary, _) = run(&config, &[]).await;
    assert!(summary.successful);
    assert_eq!(summary.phase(PhaseId::Summarization).unwrap().warning_count, 1);

    let summaries: Vec<ArticleSummary> = load(&config, PhaseId::Summarization);
    assert_eq!(summaries.len(), 5);
    let ok = summaries.iter().filter(|s| s.summary.is_ok()).count();
    assert_eq!(ok, 4);
    let failed = summaries.iter().find(|s| s.article.url.ends_with("fail-me")).unwrap();
    assert_eq!(failed.summary.status, UnitStatus::ModelFailed);
    assert!(failed.summary.text.starts_with(FAILURE_MARKER));
    assert!(failed.summary.text.contains("upstream overloaded"));
}

#[tokio::test]
async fn test_blocked_source_does_not_block_others() {
    let (_dir, config) = setup();
    run(&config, &[]).await;

    let overview: GlobalOverview = load(&config, PhaseId::GlobalOverview);
    assert_eq!(overview.headlines.len(), 2);
    assert!(overview.headlines[0].fetch_error.is_none());
    assert!(overview.headlines[0].text.contains("wire-a.example"));
    assert!(overview.headlines[1].text.is_empty());
    assert!(overview.headlines[1].fetch_error.as_deref().unwrap().contains("403"));
    assert_eq!(overview.narrative.len(), 15);
    assert_eq!(overview.narrative.get(RegionKey::China).unwrap().body, "Exports rise.");
}

#[tokio::test]
async fn test_rerun_invalidates_phase_and_downstream() {
    let (_dir, config) = setup();
    run(&config, &[]).await;

    let (summary, model) = run(&config, &[PhaseId::GlobalBriefing]).await;

    assert!(summary.successful);
    assert_eq!(
        executed(&summary),
        vec![PhaseId::GlobalBriefing, PhaseId::MultiLensAnalysis, PhaseId::FinalAssembly]
    );
    assert_eq!(model.count(TemplateId::GlobalBriefing), 1);
    assert_eq!(model.count(TemplateId::MultiLens), 14);
    assert_eq!(model.count(TemplateId::IntelBrief), 0);
}

#[tokio::test]
async fn test_corrupted_artifact_is_rerun() {
    let (_dir, config) = setup();
    run(&config, &[]).await;

    let artifact = run_dir(&config).join("artifacts").join("p6_multi_lens_analysis.json");
    let bytes = fs::read(&artifact).unwrap();
    fs::write(&artifact, &bytes[..bytes.len() / 3]).unwrap();

    let (summary, model) = run(&config, &[]).await;

    assert!(summary.successful);
    assert_eq!(executed(&summary), vec![PhaseId::MultiLensAnalysis, PhaseId::FinalAssembly]);
    assert_eq!(model.count(TemplateId::MultiLens), 14);
    assert_eq!(model.count(TemplateId::GlobalBriefing), 0);
}

#[tokio::test]
async fn test_interrupted_summarization_reuses_finished_units() {
    let (_dir, config) = setup();
    run(&config, &[]).await;

    // Crash after the units landed but before the phase checkpoint did.
    fs::remove_file(run_dir(&config).join("checkpoints").join("p3_summarization.json")).unwrap();

    let (summary, model) = run(&config, &[]).await;

    assert!(summary.successful);
    assert!(summary.phase(PhaseId::NewsEtl).unwrap().skipped);
    assert!(!summary.phase(PhaseId::Summarization).unwrap().skipped);
    // Only the failed unit is retried.
    assert_eq!(model.count(TemplateId::IntelBrief), 1);
    assert_eq!(model.count(TemplateId::RegionCategoriser), 0);
}

#[tokio::test]
async fn test_corrupted_summaries_keep_finished_units() {
    let (_dir, config) = setup();
    run(&config, &[]).await;

    let artifact = run_dir(&config).join("artifacts").join("p3_summarization.jsonl");
    let bytes = fs::read(&artifact).unwrap();
    fs::write(&artifact, &bytes[..bytes.len() / 2]).unwrap();

    let (summary, model) = run(&config, &[]).await;

    assert!(summary.successful);
    assert!(!summary.phase(PhaseId::Summarization).unwrap().skipped);
    assert_eq!(model.count(TemplateId::IntelBrief), 1);
    assert_eq!(model.count(TemplateId::RegionCategoriser), 0);
}

#[tokio::test]
async fn test_newer_checkpoint_format_halts_without_deleting() {
    let (_dir, config) = setup();
    run(&config, &[]).await;

    let checkpoint = run_dir(&config).join("checkpoints").join("p1_global_overview.json");
    let mut value: serde_json::Value = serde_json::from_slice(&fs::read(&checkpoint).unwrap()).unwrap();
    value["version"] = serde_json::json!(99);
    fs::write(&checkpoint, serde_json::to_vec_pretty(&value).unwrap()).unwrap();

    let model = Arc::new(ScriptedModel::default());
    let err = orchestrator(&config, model.clone()).run(&[]).await.unwrap_err();

    assert!(format!("{:#}", err).contains("cannot resume"), "{:#}", err);
    assert!(checkpoint.exists());
    assert_eq!(model.total(), 0);
}

#[tokio::test]
async fn test_cancelled_run_stops_cleanly() {
    let (_dir, config) = setup();
    let model = Arc::new(ScriptedModel::default());
    let mut pipeline = orchestrator(&config, model.clone());
    pipeline.context().cancel.cancel();

    let summary = pipeline.run(&[]).await.unwrap();

    assert!(summary.aborted);
    assert!(!summary.successful);
    assert_eq!(summary.phases.len(), 7);
    assert!(summary.phases.iter().all(|r| r.status == PhaseState::NotStarted));
    assert_eq!(model.total(), 0);
    assert!(!Path::new(&run_dir(&config)).join(RUN_SUMMARY_FILE).exists());
}
