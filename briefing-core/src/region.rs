//! Canonical region model.
//!
//! Every regional artifact in the pipeline is keyed by [`RegionKey`]. The
//! enum's declaration order *is* the display order: `Ord` is derived, so a
//! `BTreeSet<RegionKey>` or a sort over keys always yields the canonical
//! sequence regardless of the order a model emitted regions in.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the 14 canonical regions, plus the `Unknown` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RegionKey {
    #[serde(rename = "Global")]
    Global,
    #[serde(rename = "China")]
    China,
    #[serde(rename = "East Asia")]
    EastAsia,
    #[serde(rename = "Singapore")]
    Singapore,
    #[serde(rename = "Southeast Asia")]
    SoutheastAsia,
    #[serde(rename = "South Asia")]
    SouthAsia,
    #[serde(rename = "Central Asia")]
    CentralAsia,
    #[serde(rename = "Russia")]
    Russia,
    #[serde(rename = "West Asia (Middle East)")]
    WestAsia,
    #[serde(rename = "Africa")]
    Africa,
    #[serde(rename = "Europe")]
    Europe,
    #[serde(rename = "Latin America & Caribbean")]
    LatinAmerica,
    #[serde(rename = "North America")]
    NorthAmerica,
    #[serde(rename = "Oceania")]
    Oceania,
    /// Catch-all for content that cannot be placed with confidence.
    #[serde(rename = "Unknown")]
    Unknown,
}

/// The 14 canonical regions in display order (no `Unknown`).
pub const CANONICAL_REGIONS: [RegionKey; 14] = [
    RegionKey::Global,
    RegionKey::China,
    RegionKey::EastAsia,
    RegionKey::Singapore,
    RegionKey::SoutheastAsia,
    RegionKey::SouthAsia,
    RegionKey::CentralAsia,
    RegionKey::Russia,
    RegionKey::WestAsia,
    RegionKey::Africa,
    RegionKey::Europe,
    RegionKey::LatinAmerica,
    RegionKey::NorthAmerica,
    RegionKey::Oceania,
];

/// Shorthands a model tends to answer with instead of the canonical name.
const ALIASES: &[(&str, RegionKey)] = &[
    ("west asia", RegionKey::WestAsia),
    ("middle east", RegionKey::WestAsia),
    ("latin america", RegionKey::LatinAmerica),
    ("caribbean", RegionKey::LatinAmerica),
    ("uk", RegionKey::Europe),
    ("eu", RegionKey::Europe),
    ("usa", RegionKey::NorthAmerica),
    ("us", RegionKey::NorthAmerica),
    ("united states", RegionKey::NorthAmerica),
];

impl RegionKey {
    /// Canonical display name; also the exact heading text models must emit.
    pub fn name(self) -> &'static str {
        match self {
            Self::Global => "Global",
            Self::China => "China",
            Self::EastAsia => "East Asia",
            Self::Singapore => "Singapore",
            Self::SoutheastAsia => "Southeast Asia",
            Self::SouthAsia => "South Asia",
            Self::CentralAsia => "Central Asia",
            Self::Russia => "Russia",
            Self::WestAsia => "West Asia (Middle East)",
            Self::Africa => "Africa",
            Self::Europe => "Europe",
            Self::LatinAmerica => "Latin America & Caribbean",
            Self::NorthAmerica => "North America",
            Self::Oceania => "Oceania",
            Self::Unknown => "Unknown",
        }
    }

    /// All 15 keys in canonical order, `Unknown` last.
    pub fn all() -> impl Iterator<Item = RegionKey> {
        CANONICAL_REGIONS
            .into_iter()
            .chain(std::iter::once(RegionKey::Unknown))
    }

    /// Anchor slug used for in-page navigation (`west-asia-middle-east`).
    pub fn slug(self) -> String {
        crate::report::markdown::slugify(self.name())
    }

    /// Exact match against the canonical name.
    pub fn from_exact(label: &str) -> Option<RegionKey> {
        Self::all().find(|r| r.name() == label)
    }

    /// Case-insensitive, whitespace- and emphasis-tolerant match.
    pub fn from_normalized(label: &str) -> Option<RegionKey> {
        let wanted = normalize_label(label);
        if wanted.is_empty() {
            return None;
        }
        Self::all().find(|r| normalize_label(r.name()) == wanted)
    }

    /// Lenient mapping for single-label classifier answers.
    ///
    /// Tries quotes-stripped exact, alias, then normalized matching. Anything
    /// unrecognised is `Unknown`; the classifier never invents a region.
    pub fn categorise(answer: &str) -> RegionKey {
        let cleaned = answer.trim().trim_matches(|c| c == '"' || c == '\'').trim();
        if let Some(region) = Self::from_exact(cleaned) {
            return region;
        }
        let normalized = normalize_label(cleaned);
        if let Some((_, region)) = ALIASES.iter().find(|(alias, _)| *alias == normalized) {
            return *region;
        }
        Self::from_normalized(cleaned).unwrap_or(RegionKey::Unknown)
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The 14 canonical regions as an ordered set.
pub fn canonical_set() -> BTreeSet<RegionKey> {
    CANONICAL_REGIONS.into_iter().collect()
}

/// The 14 canonical regions plus `Unknown`.
pub fn canonical_set_with_unknown() -> BTreeSet<RegionKey> {
    RegionKey::all().collect()
}

/// Lowercase, drop emphasis markers and trailing colons, collapse whitespace.
fn normalize_label(label: &str) -> String {
    let stripped = label
        .trim()
        .trim_matches(|c| c == '*' || c == '_' || c == '`')
        .trim()
        .trim_end_matches(':')
        .trim();
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order_matches_ord() {
        let mut shuffled = vec![
            RegionKey::Oceania,
            RegionKey::Global,
            RegionKey::Unknown,
            RegionKey::WestAsia,
            RegionKey::China,
        ];
        shuffled.sort();
        assert_eq!(
            shuffled,
            vec![
                RegionKey::Global,
                RegionKey::China,
                RegionKey::WestAsia,
                RegionKey::Oceania,
                RegionKey::Unknown,
            ]
        );
    }

    #[test]
    fn test_canonical_set_sizes() {
        assert_eq!(canonical_set().len(), 14);
        assert_eq!(canonical_set_with_unknown().len(), 15);
        assert!(!canonical_set().contains(&RegionKey::Unknown));
    }

    #[test]
    fn test_exact_and_normalized_matching() {
        assert_eq!(
            RegionKey::from_exact("West Asia (Middle East)"),
            Some(RegionKey::WestAsia)
        );
        assert_eq!(RegionKey::from_exact("west asia (middle east)"), None);
        assert_eq!(
            RegionKey::from_normalized("  **latin   america & caribbean** "),
            Some(RegionKey::LatinAmerica)
        );
        assert_eq!(RegionKey::from_normalized("Atlantis"), None);
        assert_eq!(RegionKey::from_normalized(""), None);
    }

    #[test]
    fn test_categorise_aliases_and_fallback() {
        assert_eq!(RegionKey::categorise("\"Middle East\""), RegionKey::WestAsia);
        assert_eq!(RegionKey::categorise("USA"), RegionKey::NorthAmerica);
        assert_eq!(RegionKey::categorise("europe"), RegionKey::Europe);
        assert_eq!(RegionKey::categorise("Antarctica"), RegionKey::Unknown);
    }

    #[test]
    fn test_serde_uses_display_names() {
        let json = serde_json::to_string(&RegionKey::LatinAmerica).unwrap();
        assert_eq!(json, "\"Latin America & Caribbean\"");
        let back: RegionKey = serde_json::from_str("\"West Asia (Middle East)\"").unwrap();
        assert_eq!(back, RegionKey::WestAsia);
    }

    #[test]
    fn test_slug() {
        assert_eq!(RegionKey::WestAsia.slug(), "west-asia-middle-east");
        assert_eq!(RegionKey::LatinAmerica.slug(), "latin-america-caribbean");
    }
}
