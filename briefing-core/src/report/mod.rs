//! Markdown rendering of phase artifacts.
//!
//! Every function here is pure: it reads an artifact and returns text. The
//! region loop always walks [`CANONICAL_REGIONS`], so output order never
//! depends on the order a model emitted regions in.

pub mod markdown;

use chrono::NaiveDate;

use crate::artifact::{
    ArticleRecord, ArticleSummary, EconomicSnapshot, FinalReport, GlobalOverview, RawContentRecord,
    RegionSection, RegionalArtifact, SectionSchema, SourceDescriptor, SourceType,
};
use crate::region::{RegionKey, CANONICAL_REGIONS};

use self::markdown::{anchor, clean_text, dropdown, h1, h2, h3, link};

const IN_DEPTH_TITLE: &str = "In-Depth Analysis";
const NAV_CHUNK: usize = 7;

/// Renders artifacts for one run date.
#[derive(Debug, Clone, Copy)]
pub struct ReportFormatter {
    run_date: NaiveDate,
}

impl ReportFormatter {
    pub fn new(run_date: NaiveDate) -> Self {
        Self { run_date }
    }

    /// `<YYYY-MM-DD>-<stem>.md`
    pub fn filename(&self, stem: &str) -> String {
        format!("{}-{}.md", self.run_date.format("%Y-%m-%d"), stem)
    }

    fn header(&self, title: &str) -> Vec<String> {
        vec![
            h1(&format!("{} ({})", title, self.run_date.format("%Y-%m-%d"))),
            String::new(),
            "---".to_string(),
            String::new(),
        ]
    }

    /// Region-keyed artifact in its schema's markdown convention.
    pub fn render_regional(&self, title: &str, artifact: &RegionalArtifact) -> String {
        let mut out = self.header(title);
        for entry in artifact.entries() {
            out.push(h2(entry.region.name()));
            out.push(String::new());
            out.push(render_section(artifact.schema, &entry.section));
            out.push("---".to_string());
            out.push(String::new());
        }
        out.join("\n")
    }

    pub fn render_headlines(&self, headlines: &[RawContentRecord]) -> String {
        let mut out = self.header("Consolidated Mainstream Headlines");
        if headlines.is_empty() {
            out.push("_No mainstream data found._".to_string());
            return out.join("\n");
        }
        for record in headlines {
            let title = format!("{} [{}]", record.source.name, record.source.format);
            let body = match &record.fetch_error {
                Some(err) => format!("**FETCH FAILED**\n{}", err),
                None if record.text.trim().is_empty() => "No content.".to_string(),
                None => record.text.clone(),
            };
            out.push(dropdown(&title, &body));
        }
        out.join("\n")
    }

    pub fn render_economic_snapshot(&self, snapshot: &EconomicSnapshot) -> String {
        let mut out = vec![
            "> **Generated Artifact:** Economic Snapshot".to_string(),
            format!("> **Date:** {}", snapshot.date),
            "---".to_string(),
            String::new(),
        ];
        out.push(snapshot.content.text.clone());
        out.join("\n")
    }

    /// Phase 1 report: narrative, economic snapshot, then raw headlines.
    pub fn render_global_overview(&self, overview: &GlobalOverview) -> String {
        [
            self.render_regional("Mainstream News Narrative", &overview.narrative),
            self.render_economic_snapshot(&overview.economic_snapshot),
            self.render_headlines(&overview.headlines),
        ]
        .join("\n\n")
    }

    /// Phase 2 report: curated articles grouped by region.
    pub fn render_articles(&self, articles: &[ArticleRecord]) -> String {
        let mut out = self.header("Analysis Headlines");
        if articles.is_empty() {
            out.push("_No analysis data found._".to_string());
            return out.join("\n");
        }
        for region in RegionKey::all() {
            let lines = article_lines(articles, region);
            if lines.is_empty() {
                continue;
            }
            out.push(h2(region.name()));
            out.push(String::new());
            out.extend(lines);
            out.push(String::new());
        }
        out.join("\n")
    }

    /// Phase 3 report: one block per article.
    pub fn render_summaries(&self, summaries: &[ArticleSummary]) -> String {
        let mut out = self.header("Article Summaries");
        for item in summaries {
            out.push(h2(&item.article.title));
            out.push(format!("**Source:** {}  ", item.article.source));
            out.push(format!("**Region:** {}  ", item.article.region));
            out.push(format!("**URL:** {}", item.article.url));
            out.push(String::new());
            out.push(item.summary.text.clone());
            out.push(String::new());
            out.push("---".to_string());
            out.push(String::new());
        }
        out.join("\n")
    }

    /// Phase 7: the published weekly post.
    pub fn render_final_report(&self, inputs: &FinalReportInputs<'_>) -> FinalReport {
        let date_str = self.run_date.format("%Y-%m-%d").to_string();
        let display_date = self.run_date.format("%d %B %Y");

        let mut out = vec![
            "---".to_string(),
            "layout: post".to_string(),
            format!("title:  Global Briefing | {}", display_date),
            format!("date:   {} 08:00:00 +0800", date_str),
            "categories: weekly news".to_string(),
            "---".to_string(),
            String::new(),
            navigation(),
            String::new(),
            "---".to_string(),
            String::new(),
        ];

        out.push(dropdown(
            "Economic Snapshot",
            &clean_text(&inputs.overview.economic_snapshot.content.text),
        ));

        for region in CANONICAL_REGIONS {
            out.push(format!("{} {}", h1(region.name()), anchor(&region.slug())));
            out.push(String::new());

            if let Some(section) = inputs.briefing.get(region) {
                out.push(render_section(SectionSchema::Briefing, section));
            }
            if let Some(section) = inputs.lenses.get(region) {
                out.push(render_section(SectionSchema::Lenses, section));
                out.push("<br>".to_string());
                out.push(String::new());
            }

            let lines = article_lines(inputs.articles, region);
            if !lines.is_empty() {
                out.extend(lines);
                out.push(String::new());
            }
        }

        let unknown = article_lines(inputs.articles, RegionKey::Unknown);
        if !unknown.is_empty() {
            out.push(format!(
                "{} {}",
                h1(IN_DEPTH_TITLE),
                anchor(&markdown::slugify(IN_DEPTH_TITLE))
            ));
            out.push(String::new());
            out.extend(unknown);
            out.push(String::new());
        }

        out.push("---".to_string());
        out.push(sources_footer(inputs.sources));

        FinalReport {
            run_key: inputs.run_key.to_string(),
            filename: format!("{}-weekly-news.md", date_str),
            markdown: out.join("\n"),
        }
    }
}

/// Everything the final assembly reads.
#[derive(Debug, Clone, Copy)]
pub struct FinalReportInputs<'a> {
    pub run_key: &'a str,
    pub overview: &'a GlobalOverview,
    pub briefing: &'a RegionalArtifact,
    pub lenses: &'a RegionalArtifact,
    pub articles: &'a [ArticleRecord],
    pub sources: &'a [SourceDescriptor],
}

/// One region's payload. Every allow-listed sub-heading is emitted even when
/// its text is empty.
pub fn render_section(schema: SectionSchema, section: &RegionSection) -> String {
    let mut out = Vec::new();
    if !section.body.trim().is_empty() {
        out.push(clean_text(&section.body));
        out.push(String::new());
    }
    match schema {
        SectionSchema::Narrative => {}
        SectionSchema::Briefing => {
            for sub in &section.subsections {
                out.push(h3(&sub.title));
                out.push(String::new());
                if !sub.text.trim().is_empty() {
                    out.push(clean_text(&sub.text));
                    out.push(String::new());
                }
            }
        }
        SectionSchema::Lenses => {
            for sub in &section.subsections {
                out.push(dropdown(&format!("Lens: {}", sub.title), &clean_text(&sub.text)));
            }
        }
    }
    out.join("\n")
}

fn navigation() -> String {
    let mut links: Vec<String> = CANONICAL_REGIONS
        .iter()
        .map(|r| link(r.name(), &format!("#{}", r.slug())))
        .collect();
    links.push(link(IN_DEPTH_TITLE, &format!("#{}", markdown::slugify(IN_DEPTH_TITLE))));

    let rows: Vec<String> = links.chunks(NAV_CHUNK).map(|c| c.join(" | ")).collect();
    format!("**Navigate:** \n{}", rows.join("  \n"))
}

/// `* [`source` title](url)` lines for one region, ordered by rank then source.
fn article_lines(articles: &[ArticleRecord], region: RegionKey) -> Vec<String> {
    let mut matching: Vec<&ArticleRecord> = articles.iter().filter(|a| a.region == region).collect();
    matching.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.source.cmp(&b.source)));
    matching
        .into_iter()
        .map(|a| {
            let title = a.title.replace('|', "-").replace('[', "(").replace(']', ")");
            format!("* [`{}` {}]({})", a.source, title, a.url)
        })
        .collect()
}

fn sources_footer(sources: &[SourceDescriptor]) -> String {
    let render = |kind: SourceType| -> String {
        sources
            .iter()
            .filter(|s| s.source_type == kind)
            .map(|s| link(&s.name, &s.url))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut footer = vec![h3("Sources"), "<small>".to_string()];
    let datapoints = render(SourceType::Datapoint);
    if !datapoints.is_empty() {
        footer.push(format!("**Datapoints:** {}  ", datapoints));
    }
    let analysis = render(SourceType::Analysis);
    if !analysis.is_empty() {
        footer.push(format!("**Analysis:** {}", analysis));
    }
    footer.push("</small>".to_string());
    footer.join("\n")
}
