//! Data model shared by every phase.
//!
//! Records are plain serde structs: phases hand them to each other by value
//! and persist them through the checkpoint store. Nothing in here mutates
//! after construction; a retry produces a fresh record.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::region::RegionKey;

/// Body used for a region the model never produced.
pub const PLACEHOLDER_SENTINEL: &str = "*No intelligence found for this region in the current cycle.*";

/// Prefix of every visible failure marker.
pub const FAILURE_MARKER: &str = "**GENERATION FAILED**";

/// Body used when a unit was skipped for lack of input text.
pub const INSUFFICIENT_CONTENT_MARKER: &str = "**SKIPPED: INSUFFICIENT CONTENT**";

/// Visible failure text: bold marker, then the reason on its own line.
pub fn failure_text(reason: &str) -> String {
    format!("{}\n{}", FAILURE_MARKER, reason)
}

// ============================================================================
// Sources and raw content
// ============================================================================

/// Editorial role of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Critical/strategic commentary; feeds the news ETL.
    Analysis,
    /// Mainstream outlets; feeds the global overview.
    Datapoint,
}

/// How a source's content is retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    #[serde(alias = "youtube")]
    Video,
    #[serde(alias = "webpage")]
    Article,
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Article => write!(f, "article"),
        }
    }
}

/// A configured source. Loaded once per run, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub format: SourceFormat,
    /// Editorial priority, 1 (highest) to 5.
    pub rank: u8,
}

/// Fetched text for one source. One per source per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawContentRecord {
    pub source: SourceDescriptor,
    pub text: String,
    pub fetched_at: DateTime<Utc>,
    /// Aggregate of every failed fetch attempt; `text` is empty when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
    /// Text shorter than the configured minimum. Flagged, never dropped.
    #[serde(default)]
    pub below_threshold: bool,
    /// Which fetch strategy produced the text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_by: Option<String>,
}

impl RawContentRecord {
    /// A successful fetch, flagged against `min_chars`.
    pub fn fetched(source: SourceDescriptor, text: String, served_by: &str, min_chars: usize) -> Self {
        let below_threshold = text.chars().count() < min_chars;
        Self {
            source,
            text,
            fetched_at: Utc::now(),
            fetch_error: None,
            below_threshold,
            served_by: Some(served_by.to_string()),
        }
    }

    /// A failed fetch: empty text, error recorded.
    pub fn failed(source: SourceDescriptor, error: impl Into<String>) -> Self {
        Self {
            source,
            text: String::new(),
            fetched_at: Utc::now(),
            fetch_error: Some(error.into()),
            below_threshold: true,
            served_by: None,
        }
    }

    /// Whether downstream transformers should spend a model call on this.
    pub fn is_usable(&self) -> bool {
        self.fetch_error.is_none() && !self.below_threshold
    }
}

// ============================================================================
// Per-unit transforms
// ============================================================================

/// Outcome of a single-unit transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Ok,
    /// Policy skip: the input was below the content threshold.
    InsufficientContent,
    /// The model call failed or timed out.
    ModelFailed,
}

/// One transformer output. `text` always holds something a reader can see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedUnit {
    pub unit_id: String,
    pub status: UnitStatus,
    pub text: String,
}

impl TransformedUnit {
    pub fn ok(unit_id: impl Into<String>, text: String) -> Self {
        Self {
            unit_id: unit_id.into(),
            status: UnitStatus::Ok,
            text,
        }
    }

    pub fn insufficient(unit_id: impl Into<String>, detail: &str) -> Self {
        Self {
            unit_id: unit_id.into(),
            status: UnitStatus::InsufficientContent,
            text: format!("{}\n{}", INSUFFICIENT_CONTENT_MARKER, detail),
        }
    }

    pub fn failed(unit_id: impl Into<String>, reason: &str) -> Self {
        Self {
            unit_id: unit_id.into(),
            status: UnitStatus::ModelFailed,
            text: failure_text(reason),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == UnitStatus::Ok
    }
}

/// A curated analysis article after the news ETL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub url: String,
    pub title: String,
    pub source: String,
    pub rank: u8,
    pub region: RegionKey,
    /// Set when the title could not be fetched and the URL stands in for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_error: Option<String>,
}

/// An article together with its intel-brief summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleSummary {
    pub article: ArticleRecord,
    pub summary: TransformedUnit,
}

// ============================================================================
// Regional artifacts
// ============================================================================

/// Shape of the per-region payload. Each shape has a fixed sub-heading
/// allow-list that the parser and the formatter both honour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionSchema {
    /// Free narrative text, no sub-sections.
    Narrative,
    /// Two-section briefing.
    Briefing,
    /// Nine analytical lenses.
    Lenses,
}

/// Sub-headings of the two-section briefing.
pub const BRIEFING_SUBSECTIONS: [&str; 2] = ["Mainstream Narrative", "Strategic Analysis"];

/// Sub-headings of the multi-lens analysis, in rendering order.
pub const LENS_SUBSECTIONS: [&str; 9] = [
    "The GPE Perspective",
    "The Market Fundamentalist",
    "The Liberal Institutionalist",
    "The Realist",
    "The Civilizational Nationalist",
    "The Post-Structuralist Critic",
    "The Singaporean Strategist",
    "The CPC Strategist",
    "The Fusion (Actionable Strategy)",
];

impl SectionSchema {
    /// Allow-listed sub-heading text, in order.
    pub fn subsections(self) -> &'static [&'static str] {
        match self {
            Self::Narrative => &[],
            Self::Briefing => &BRIEFING_SUBSECTIONS,
            Self::Lenses => &LENS_SUBSECTIONS,
        }
    }
}

/// How a region's section came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    /// Extracted from model output.
    Parsed,
    /// The model omitted the region; filled with the sentinel.
    Placeholder,
    /// The model call behind this region failed.
    Failed,
}

/// A named sub-section inside a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subsection {
    pub title: String,
    pub text: String,
}

/// Payload for one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSection {
    pub status: SectionStatus,
    /// Narrative text, or the text preceding the first sub-heading.
    pub body: String,
    /// One entry per allow-listed sub-heading, in schema order.
    pub subsections: Vec<Subsection>,
}

impl RegionSection {
    fn empty_subsections(schema: SectionSchema) -> Vec<Subsection> {
        schema
            .subsections()
            .iter()
            .map(|title| Subsection {
                title: (*title).to_string(),
                text: String::new(),
            })
            .collect()
    }

    /// Sentinel body plus empty sub-sections.
    pub fn placeholder(schema: SectionSchema) -> Self {
        Self {
            status: SectionStatus::Placeholder,
            body: PLACEHOLDER_SENTINEL.to_string(),
            subsections: Self::empty_subsections(schema),
        }
    }

    /// Visible failure marker plus empty sub-sections.
    pub fn failed(schema: SectionSchema, reason: &str) -> Self {
        Self {
            status: SectionStatus::Failed,
            body: failure_text(reason),
            subsections: Self::empty_subsections(schema),
        }
    }

    /// Text of a named sub-section, if the schema has it.
    pub fn subsection(&self, title: &str) -> Option<&str> {
        self.subsections
            .iter()
            .find(|s| s.title == title)
            .map(|s| s.text.as_str())
    }
}

/// One keyed entry of a [`RegionalArtifact`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionEntry {
    pub region: RegionKey,
    pub section: RegionSection,
}

/// Region-keyed payloads, always in canonical order.
///
/// Entries are kept sorted and unique by construction; the only ways in are
/// [`RegionalArtifact::insert`] and the bulk constructors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionalArtifact {
    pub schema: SectionSchema,
    entries: Vec<RegionEntry>,
}

impl RegionalArtifact {
    pub fn new(schema: SectionSchema) -> Self {
        Self {
            schema,
            entries: Vec::new(),
        }
    }

    /// Every expected region set to the placeholder.
    pub fn placeholders(schema: SectionSchema, expected: &BTreeSet<RegionKey>) -> Self {
        let mut artifact = Self::new(schema);
        for region in expected {
            artifact.insert(*region, RegionSection::placeholder(schema));
        }
        artifact
    }

    /// Every expected region set to the same visible failure.
    pub fn all_failed(schema: SectionSchema, expected: &BTreeSet<RegionKey>, reason: &str) -> Self {
        let mut artifact = Self::new(schema);
        for region in expected {
            artifact.insert(*region, RegionSection::failed(schema, reason));
        }
        artifact
    }

    /// Insert or replace the section for `region`, keeping canonical order.
    pub fn insert(&mut self, region: RegionKey, section: RegionSection) {
        match self.entries.binary_search_by(|e| e.region.cmp(&region)) {
            Ok(idx) => self.entries[idx].section = section,
            Err(idx) => self.entries.insert(idx, RegionEntry { region, section }),
        }
    }

    pub fn get(&self, region: RegionKey) -> Option<&RegionSection> {
        self.entries
            .binary_search_by(|e| e.region.cmp(&region))
            .ok()
            .map(|idx| &self.entries[idx].section)
    }

    pub fn contains(&self, region: RegionKey) -> bool {
        self.get(region).is_some()
    }

    /// Entries in canonical order.
    pub fn entries(&self) -> &[RegionEntry] {
        &self.entries
    }

    pub fn regions(&self) -> BTreeSet<RegionKey> {
        self.entries.iter().map(|e| e.region).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of regions that carry a failure marker.
    pub fn failed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.section.status == SectionStatus::Failed)
            .count()
    }
}

// ============================================================================
// Phase artifacts
// ============================================================================

/// Month-keyed economic table produced in the global overview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicSnapshot {
    pub date: NaiveDate,
    /// Markdown table, or a visible failure marker.
    pub content: TransformedUnit,
}

/// Phase 1 output: raw mainstream headlines, their regional narrative, and
/// the economic snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalOverview {
    pub headlines: Vec<RawContentRecord>,
    pub narrative: RegionalArtifact,
    pub economic_snapshot: EconomicSnapshot,
}

/// Phase 7 output. Immutable once written; one per run key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReport {
    pub run_key: String,
    pub filename: String,
    pub markdown: String,
}
