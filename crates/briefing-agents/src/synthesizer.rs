//! Reducers: fan several upstream artifacts into one regional artifact.
//!
//! Inputs arrive as labelled, individually capped [`ContextLayer`]s. Each
//! reduction is one model call followed by the structured-text parser, so
//! the caller always gets back an artifact covering the expected regions.

use std::collections::BTreeSet;
use std::sync::Arc;

use briefing_core::budget::{assemble, ContextLayer};
use briefing_core::sanitize::sanitize_model_output;
use briefing_core::{
    ParseWarning, RegionKey, RegionSection, RegionalArtifact, SectionSchema, StructuredTextParser,
};

use crate::config::ModelConfig;
use crate::generator::region_list;
use crate::llm::{ModelClient, ModelRequest};
use crate::prompts::{render, TemplateId, NO_DATA_FOUND};

/// Result of a reduction.
#[derive(Debug, Clone)]
pub struct ReduceOutcome {
    pub artifact: RegionalArtifact,
    pub warnings: Vec<ParseWarning>,
    /// Labels of layers cut to their cap.
    pub truncated: Vec<String>,
}

impl ReduceOutcome {
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

pub struct Reducer {
    client: Arc<dyn ModelClient>,
    model: ModelConfig,
}

impl Reducer {
    pub fn new(client: Arc<dyn ModelClient>, model: &ModelConfig) -> Self {
        Self {
            client,
            model: model.clone(),
        }
    }

    /// One call over every layer, parsed against `expected`.
    ///
    /// `params` fill the template; the assembled context is bound to
    /// `{context}`. When every layer is empty the model is not called and
    /// all expected regions get the placeholder.
    pub async fn reduce(
        &self,
        layers: &[ContextLayer],
        template: TemplateId,
        params: &[(&str, &str)],
        expected: &BTreeSet<RegionKey>,
        schema: SectionSchema,
    ) -> ReduceOutcome {
        let context = assemble(layers);
        if layers.iter().all(|l| l.text.trim().is_empty()) {
            tracing::info!(template = %template, "No input for reducer; filling placeholders");
            return ReduceOutcome {
                artifact: RegionalArtifact::placeholders(schema, expected),
                warnings: Vec::new(),
                truncated: Vec::new(),
            };
        }

        let mut all_params = params.to_vec();
        all_params.push(("context", context.text.as_str()));
        let request = ModelRequest::new(template, self.model.model_for(template), render(template, &all_params));

        let outcome = match self.client.invoke(&request).await {
            Ok(text) => {
                let parsed = StructuredTextParser::new(schema).parse(&sanitize_model_output(&text), expected);
                log_warnings(template, &parsed.warnings);
                ReduceOutcome {
                    artifact: parsed.artifact,
                    warnings: parsed.warnings,
                    truncated: context.truncated,
                }
            }
            Err(e) => {
                tracing::warn!(template = %template, error = %e, "Reducer call failed");
                ReduceOutcome {
                    artifact: RegionalArtifact::all_failed(schema, expected, &e.to_string()),
                    warnings: Vec::new(),
                    truncated: context.truncated,
                }
            }
        };

        tracing::info!(
            template = %template,
            regions = outcome.artifact.len(),
            failed = outcome.artifact.failed_count(),
            warnings = outcome.warnings.len(),
            "Reduction complete"
        );
        outcome
    }

    /// The lens section for one region. A `NO_DATA_FOUND` answer yields the
    /// placeholder; a failed call yields a visible failure.
    pub async fn lenses_for_region(
        &self,
        region: RegionKey,
        layers: &[ContextLayer],
    ) -> (RegionSection, Vec<ParseWarning>) {
        let schema = SectionSchema::Lenses;
        let context = assemble(layers);
        let lenses = schema
            .subsections()
            .iter()
            .map(|l| format!("### {}", l))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = render(
            TemplateId::MultiLens,
            &[("region", region.name()), ("lenses", &lenses), ("context", &context.text)],
        );
        let request = ModelRequest::new(TemplateId::MultiLens, self.model.model_for(TemplateId::MultiLens), prompt);

        match self.client.invoke(&request).await {
            Ok(text) if text.contains(NO_DATA_FOUND) => {
                tracing::info!(region = %region, "No lens data for region");
                (RegionSection::placeholder(schema), Vec::new())
            }
            Ok(text) => {
                let (section, warnings) =
                    StructuredTextParser::new(schema).parse_region_body(&sanitize_model_output(&text), region);
                log_warnings(TemplateId::MultiLens, &warnings);
                (section, warnings)
            }
            Err(e) => {
                tracing::warn!(region = %region, error = %e, "Lens call failed");
                (RegionSection::failed(schema, &e.to_string()), Vec::new())
            }
        }
    }

    /// Lens sections for every expected region, one call each, in order.
    /// Calls are sequential so they share the model budget without
    /// competing for it.
    pub async fn multi_lens(&self, layers: &[ContextLayer], expected: &BTreeSet<RegionKey>) -> ReduceOutcome {
        let mut artifact = RegionalArtifact::new(SectionSchema::Lenses);
        let mut warnings = Vec::new();
        for region in expected {
            let (section, region_warnings) = self.lenses_for_region(*region, layers).await;
            artifact.insert(*region, section);
            warnings.extend(region_warnings);
        }
        ReduceOutcome {
            artifact,
            warnings,
            truncated: assemble(layers).truncated,
        }
    }

    /// Regions block for templates that list them.
    pub fn regions_param(expected: &BTreeSet<RegionKey>) -> String {
        region_list(expected.iter().copied())
    }
}

fn log_warnings(template: TemplateId, warnings: &[ParseWarning]) {
    for warning in warnings {
        tracing::warn!(
            template = %template,
            kind = %warning.kind,
            region = warning.region.map(|r| r.name()).unwrap_or("-"),
            detail = %warning.detail,
            "Parse warning"
        );
    }
}
