//! Context budgeting for reducer calls.
//!
//! Each upstream input is a labelled layer with its own character cap.
//! Layers are truncated (never summarised) before concatenation, so the
//! size of a reducer prompt is bounded by the sum of the caps.

use serde::{Deserialize, Serialize};

/// Marker appended to a layer that was cut.
pub const TRUNCATION_MARKER: &str = "\n[... truncated ...]";

/// One labelled input block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextLayer {
    pub label: String,
    pub text: String,
    /// Maximum characters kept from `text`.
    pub cap_chars: usize,
}

impl ContextLayer {
    pub fn new(label: impl Into<String>, text: impl Into<String>, cap_chars: usize) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
            cap_chars,
        }
    }
}

/// Outcome of [`assemble`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    pub text: String,
    /// Labels of layers that were cut.
    pub truncated: Vec<String>,
}

/// Keep at most `max_chars` characters, cutting on a char boundary.
/// Returns the kept prefix and whether anything was dropped.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}

/// Concatenate layers under `=== LABEL ===` headings, each cut to its cap.
pub fn assemble(layers: &[ContextLayer]) -> AssembledContext {
    let mut blocks = Vec::with_capacity(layers.len());
    let mut truncated = Vec::new();

    for layer in layers {
        let (kept, was_cut) = truncate_chars(&layer.text, layer.cap_chars);
        let mut block = format!("=== {} ===\n{}", layer.label.to_uppercase(), kept);
        if was_cut {
            block.push_str(TRUNCATION_MARKER);
            truncated.push(layer.label.clone());
            tracing::debug!(
                layer = %layer.label,
                cap = layer.cap_chars,
                "Context layer truncated"
            );
        }
        blocks.push(block);
    }

    AssembledContext {
        text: blocks.join("\n\n"),
        truncated,
    }
}
