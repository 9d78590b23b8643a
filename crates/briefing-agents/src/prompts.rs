//! Prompt templates.
//!
//! Templates use `{name}` placeholders filled by [`render`]. The heading
//! grammar each template asks for is the one `StructuredTextParser`
//! enforces; the wording around it is free to change.

use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Marker the lens template emits for a region with nothing to analyse.
pub const NO_DATA_FOUND: &str = "NO_DATA_FOUND";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateId {
    MainstreamNarrative,
    EconomicSnapshot,
    RegionCategoriser,
    IntelBrief,
    MaterialistAnalysis,
    GlobalBriefing,
    MultiLens,
}

impl TemplateId {
    pub fn name(self) -> &'static str {
        match self {
            Self::MainstreamNarrative => "mainstream_narrative",
            Self::EconomicSnapshot => "economic_snapshot",
            Self::RegionCategoriser => "region_categoriser",
            Self::IntelBrief => "intel_brief",
            Self::MaterialistAnalysis => "materialist_analysis",
            Self::GlobalBriefing => "global_briefing",
            Self::MultiLens => "multi_lens",
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            Self::MainstreamNarrative => MAINSTREAM_NARRATIVE,
            Self::EconomicSnapshot => ECONOMIC_SNAPSHOT,
            Self::RegionCategoriser => REGION_CATEGORISER,
            Self::IntelBrief => INTEL_BRIEF,
            Self::MaterialistAnalysis => MATERIALIST_ANALYSIS,
            Self::GlobalBriefing => GLOBAL_BRIEFING,
            Self::MultiLens => MULTI_LENS,
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("PLACEHOLDER regex should compile"));

/// Fill `{key}` placeholders in one pass over the template, so braces inside
/// substituted values are never expanded. Unknown placeholders are left as-is.
pub fn render(template: TemplateId, params: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template.text(), |caps: &Captures<'_>| {
            params
                .iter()
                .find(|(key, _)| *key == &caps[1])
                .map(|(_, value)| value.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

const MAINSTREAM_NARRATIVE: &str = r#"You are a wire-desk editor. Summarise what mainstream outlets reported this week, region by region.

REGIONS (use exactly these names, in this order):
{regions}

OUTPUT FORMAT (strict markdown):
- One level-2 heading per region: `## <Region name>`.
- Under each heading, 3-6 sentences on the dominant narrative.
- Use `## Unknown` for stories you cannot place.
- No other level-2 headings. Do not quote the input.

INPUT:
{context}
"#;

const ECONOMIC_SNAPSHOT: &str = r#"You are an economic analyst. Produce a geopolitical economic ledger for {month}.

Return one markdown table with columns: Indicator | Region | Latest value | Change | Significance.
Cover commodities, currencies, trade flows, sovereign debt and sanctions. No prose outside the table.
"#;

const REGION_CATEGORISER: &str = r#"Classify the article below into exactly one region.

Allowed answers (copy one verbatim):
{regions}
Unknown

Answer with the region name only.

TITLE: {title}
URL: {url}
"#;

const INTEL_BRIEF: &str = r#"You are an intelligence analyst. Write a concise intelligence brief of the source below.

Structure:
**Bottom line:** one sentence.
**Key facts:** 3-5 bullet points.
**Implications:** 2-3 sentences.

Do not quote the source verbatim.

SOURCE: {source}
TITLE: {title}

CONTENT:
{content}
"#;

const MATERIALIST_ANALYSIS: &str = r#"You are a political economist. Using historical materialism, analyse this week's developments for {region}.

Identify the material interests at stake, who benefits, and the contradictions the events reveal.
Write 3-5 paragraphs of plain prose, no headings.

BRIEFS:
{context}
"#;

const GLOBAL_BRIEFING: &str = r#"You are a strategic analyst writing the weekly global briefing.

REGIONS (use exactly these names, in this order):
{regions}

For EVERY region produce:

## <Region name>
### Mainstream Narrative
What mainstream outlets say happened.
### Strategic Analysis
What it means, drawing on the economic, analysis and materialist layers.

Use exactly those two level-3 headings. Do not add others.

INPUT:
{context}
"#;

const MULTI_LENS: &str = r#"You are a geopolitical analysis engine. Generate a multi-lens analysis for the region: {region}.

Lenses (use exactly these level-3 headings, in this order):
{lenses}

If there is nothing relevant to {region} in the input, output only: NO_DATA_FOUND

Otherwise write about 150 words under each `### <Lens name>` heading.
Do not include a region heading.

INPUT:
{context}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fills_placeholders() {
        let out = render(TemplateId::MultiLens, &[("region", "Russia"), ("lenses", "L"), ("context", "C")]);
        assert!(out.contains("for the region: Russia."));
        assert!(out.contains("relevant to Russia"));
        assert!(!out.contains("{region}"));
        assert!(!out.contains("{context}"));
    }

    #[test]
    fn test_render_does_not_expand_inside_values() {
        let out = render(
            TemplateId::RegionCategoriser,
            &[("regions", "- China"), ("title", "Why {url} matters"), ("url", "https://a.example/x")],
        );
        assert!(out.contains("TITLE: Why {url} matters"));
        assert!(out.contains("URL: https://a.example/x"));
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let out = render(TemplateId::EconomicSnapshot, &[]);
        assert!(out.contains("{month}"));
    }

    #[test]
    fn test_names_are_unique() {
        let all = [
            TemplateId::MainstreamNarrative,
            TemplateId::EconomicSnapshot,
            TemplateId::RegionCategoriser,
            TemplateId::IntelBrief,
            TemplateId::MaterialistAnalysis,
            TemplateId::GlobalBriefing,
            TemplateId::MultiLens,
        ];
        let names: std::collections::BTreeSet<_> = all.iter().map(|t| t.name()).collect();
        assert_eq!(names.len(), all.len());
    }

    #[test]
    fn test_lens_template_mentions_marker() {
        assert!(TemplateId::MultiLens.text().contains(NO_DATA_FOUND));
    }
}
