//! Structured-text parser for region-keyed model output.
//!
//! The grammar is deliberately small:
//!
//! ```text
//! ## <Region name>
//! optional preamble
//! ### <Allow-listed sub-heading>
//! text
//! ```
//!
//! Anything outside the grammar becomes a [`ParseWarning`]. Parsing never
//! fails: the worst case is an all-placeholder artifact whose key set still
//! equals the expected set.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::artifact::{RegionSection, RegionalArtifact, SectionSchema, SectionStatus, Subsection};
use crate::region::RegionKey;

/// Category of a recoverable parse deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseWarningKind {
    /// Expected region absent; placeholder inserted.
    MissingRegion,
    /// Region heading present but with nothing under it; placeholder inserted.
    EmptyRegion,
    /// Heading that names no expected region; dropped.
    UnmatchedRegion,
    /// Second heading for a region already seen; dropped.
    DuplicateRegion,
    /// Allow-listed sub-heading absent but a near-miss heading was found.
    /// The sub-section is left empty; the near-miss content is not used.
    SubsectionMismatch,
    /// Allow-listed sub-heading absent with no near-miss.
    MissingSubsection,
    /// Sub-heading outside the allow-list; dropped.
    UnmatchedSubsection,
    /// Second occurrence of an allow-listed sub-heading; dropped.
    DuplicateSubsection,
}

impl fmt::Display for ParseWarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingRegion => "missing_region",
            Self::EmptyRegion => "empty_region",
            Self::UnmatchedRegion => "unmatched_region",
            Self::DuplicateRegion => "duplicate_region",
            Self::SubsectionMismatch => "subsection_mismatch",
            Self::MissingSubsection => "missing_subsection",
            Self::UnmatchedSubsection => "unmatched_subsection",
            Self::DuplicateSubsection => "duplicate_subsection",
        };
        f.write_str(s)
    }
}

/// A non-fatal deviation from the grammar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    pub kind: ParseWarningKind,
    /// Region the deviation belongs to, when one could be identified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<RegionKey>,
    pub detail: String,
}

impl ParseWarning {
    fn new(kind: ParseWarningKind, region: Option<RegionKey>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            region,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.region {
            Some(region) => write!(f, "[{}] {}: {}", self.kind, region, self.detail),
            None => write!(f, "[{}] {}", self.kind, self.detail),
        }
    }
}

/// Result of [`StructuredTextParser::parse`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub artifact: RegionalArtifact,
    pub warnings: Vec<ParseWarning>,
}

impl ParseOutcome {
    /// Warnings attributed to one region.
    pub fn warnings_for(&self, region: RegionKey) -> Vec<&ParseWarning> {
        self.warnings
            .iter()
            .filter(|w| w.region == Some(region))
            .collect()
    }

    pub fn count(&self, kind: ParseWarningKind) -> usize {
        self.warnings.iter().filter(|w| w.kind == kind).count()
    }
}

// `[ \t]+` right after `##` keeps `###` lines out. CRLF mode so a
// trailing `\r` never lands in the label.
static REGION_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mR)^##[ \t]+(.+?)[ \t]*$").expect("REGION_HEADING regex should compile")
});

static SUBSECTION_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mR)^###[ \t]+(.+?)[ \t]*$").expect("SUBSECTION_HEADING regex should compile")
});

/// Split `text` on `re` into `(label, body)` pairs in document order.
/// Returns the text preceding the first heading separately.
fn split_on_headings<'a>(text: &'a str, re: &Regex) -> (&'a str, Vec<(&'a str, &'a str)>) {
    let mut pairs = Vec::new();
    let mut preamble_end = text.len();
    let mut current: Option<(&str, usize)> = None;

    for caps in re.captures_iter(text) {
        let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        match current.take() {
            Some((prev_label, body_start)) => pairs.push((prev_label, &text[body_start..whole.start()])),
            None => preamble_end = whole.start(),
        }
        current = Some((label.as_str(), whole.end()));
    }
    if let Some((label, body_start)) = current {
        pairs.push((label, &text[body_start..]));
    }
    (&text[..preamble_end], pairs)
}

/// Lowercase alphanumeric words longer than three characters.
fn significant_words(label: &str) -> BTreeSet<String> {
    label
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
        .map(str::to_lowercase)
        .collect()
}

fn is_near_miss(expected: &str, found: &str) -> bool {
    let a = significant_words(expected);
    let b = significant_words(found);
    a.intersection(&b).next().is_some()
}

/// Parser bound to one section schema.
#[derive(Debug, Clone, Copy)]
pub struct StructuredTextParser {
    schema: SectionSchema,
}

impl StructuredTextParser {
    pub fn new(schema: SectionSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> SectionSchema {
        self.schema
    }

    /// Parse a multi-region response.
    ///
    /// The returned artifact's key set equals `expected` exactly and is in
    /// canonical order, whatever order (or subset) the text used.
    pub fn parse(&self, raw: &str, expected: &BTreeSet<RegionKey>) -> ParseOutcome {
        let mut artifact = RegionalArtifact::new(self.schema);
        let mut warnings = Vec::new();
        let mut seen: BTreeSet<RegionKey> = BTreeSet::new();

        let (_preamble, pairs) = split_on_headings(raw, &REGION_HEADING);

        for (label, body) in pairs {
            let Some(region) = self.match_region(label, expected) else {
                warnings.push(ParseWarning::new(
                    ParseWarningKind::UnmatchedRegion,
                    None,
                    format!("dropped heading '{}'", label),
                ));
                continue;
            };

            if !seen.insert(region) {
                warnings.push(ParseWarning::new(
                    ParseWarningKind::DuplicateRegion,
                    Some(region),
                    format!("ignored repeated heading '{}'", label),
                ));
                continue;
            }

            if body.trim().is_empty() {
                warnings.push(ParseWarning::new(
                    ParseWarningKind::EmptyRegion,
                    Some(region),
                    "heading present with no content",
                ));
                artifact.insert(region, RegionSection::placeholder(self.schema));
                continue;
            }

            let (section, mut section_warnings) = self.parse_region_body(body, region);
            warnings.append(&mut section_warnings);
            artifact.insert(region, section);
        }

        for region in expected {
            if !artifact.contains(*region) {
                warnings.push(ParseWarning::new(
                    ParseWarningKind::MissingRegion,
                    Some(*region),
                    "region absent from model output",
                ));
                artifact.insert(*region, RegionSection::placeholder(self.schema));
            }
        }

        ParseOutcome { artifact, warnings }
    }

    /// Parse the body of a single region (text after its `##` heading, or a
    /// whole single-region response).
    pub fn parse_region_body(&self, body: &str, region: RegionKey) -> (RegionSection, Vec<ParseWarning>) {
        let allow_list = self.schema.subsections();
        if allow_list.is_empty() {
            let section = RegionSection {
                status: SectionStatus::Parsed,
                body: body.trim().to_string(),
                subsections: Vec::new(),
            };
            return (section, Vec::new());
        }

        let mut warnings = Vec::new();
        let (preamble, pairs) = split_on_headings(body, &SUBSECTION_HEADING);

        let mut texts: Vec<Option<String>> = vec![None; allow_list.len()];
        let mut unmatched: Vec<&str> = Vec::new();

        for (label, text) in pairs {
            match allow_list.iter().position(|allowed| *allowed == label) {
                Some(idx) if texts[idx].is_some() => warnings.push(ParseWarning::new(
                    ParseWarningKind::DuplicateSubsection,
                    Some(region),
                    format!("ignored repeated sub-heading '{}'", label),
                )),
                Some(idx) => texts[idx] = Some(text.trim().to_string()),
                None => unmatched.push(label),
            }
        }

        // Pair each missing allow-listed heading with at most one near-miss,
        // so a single misspelt heading yields a single warning.
        for (idx, allowed) in allow_list.iter().enumerate() {
            if texts[idx].is_some() {
                continue;
            }
            match unmatched.iter().position(|found| is_near_miss(allowed, found)) {
                Some(pos) => {
                    let found = unmatched.remove(pos);
                    warnings.push(ParseWarning::new(
                        ParseWarningKind::SubsectionMismatch,
                        Some(region),
                        format!("expected '{}', found '{}'; left empty", allowed, found),
                    ));
                }
                None => warnings.push(ParseWarning::new(
                    ParseWarningKind::MissingSubsection,
                    Some(region),
                    format!("'{}' absent; left empty", allowed),
                )),
            }
        }
        for found in unmatched {
            warnings.push(ParseWarning::new(
                ParseWarningKind::UnmatchedSubsection,
                Some(region),
                format!("dropped sub-heading '{}'", found),
            ));
        }

        let subsections = allow_list
            .iter()
            .zip(texts)
            .map(|(title, text)| Subsection {
                title: (*title).to_string(),
                text: text.unwrap_or_default(),
            })
            .collect();

        let section = RegionSection {
            status: SectionStatus::Parsed,
            body: preamble.trim().to_string(),
            subsections,
        };
        (section, warnings)
    }

    fn match_region(&self, label: &str, expected: &BTreeSet<RegionKey>) -> Option<RegionKey> {
        RegionKey::from_exact(label)
            .filter(|r| expected.contains(r))
            .or_else(|| RegionKey::from_normalized(label).filter(|r| expected.contains(r)))
    }
}
