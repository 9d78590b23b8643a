//! Run configuration loaded from YAML.
//!
//! Every section has defaults so a minimal file only needs `sources`.
//! Loading validates the source list; any violation halts the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use briefing_core::artifact::{SourceDescriptor, SourceFormat, SourceType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::prompts::TemplateId;

/// Env var that overrides `model.base_url`.
pub const MODEL_URL_ENV: &str = "WEEKLY_INTEL_MODEL_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("config validation failed:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// LLM endpoint and call limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// OpenAI-compatible base URL (`.../v1`).
    pub base_url: String,
    /// Name of the env var holding the API key.
    pub api_key_env: String,
    pub default_model: String,
    /// Per-template model override, keyed by template name.
    pub models: BTreeMap<String, String>,
    pub timeout_secs: u64,
    pub max_concurrency: usize,
    /// 0 disables rate limiting.
    pub requests_per_minute: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.poe.com/v1".to_string(),
            api_key_env: "POE_API_KEY".to_string(),
            default_model: "Gemini-2.5-Flash".to_string(),
            models: BTreeMap::new(),
            timeout_secs: 300,
            max_concurrency: 4,
            requests_per_minute: 30,
        }
    }
}

impl ModelConfig {
    pub fn model_for(&self, template: TemplateId) -> &str {
        self.models
            .get(template.name())
            .map(String::as_str)
            .unwrap_or(&self.default_model)
    }
}

/// Content retrieval limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_concurrency: usize,
    /// Optional HTTP service returning a plain-text transcript for
    /// `GET <endpoint>?url=<video url>`.
    pub transcript_endpoint: Option<String>,
    /// Records shorter than this are flagged and skipped by transformers.
    pub min_content_chars: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_concurrency: 8,
            transcript_endpoint: None,
            min_content_chars: 150,
            user_agent: concat!("weekly-intel/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Per-layer character caps for reducer context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub mainstream_chars: usize,
    pub analysis_chars: usize,
    pub materialist_chars: usize,
    pub economic_chars: usize,
    /// Cap on the mainstream narrative as it enters later reducers.
    pub narrative_chars: usize,
    pub briefing_chars: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            mainstream_chars: 1_000_000,
            analysis_chars: 1_000_000,
            materialist_chars: 1_000_000,
            economic_chars: 500_000,
            narrative_chars: 500_000,
            briefing_chars: 1_000_000,
        }
    }
}

/// Immutable snapshot of everything a run needs from the outside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub sources: Vec<SourceDescriptor>,
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
    #[serde(default = "default_input_directory")]
    pub input_directory: PathBuf,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_input_directory() -> PathBuf {
    PathBuf::from("inputs")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            output_directory: default_output_directory(),
            input_directory: default_input_directory(),
            model: ModelConfig::default(),
            fetch: FetchConfig::default(),
            budget: BudgetConfig::default(),
        }
    }
}

impl RunConfig {
    /// Read, apply env overrides, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: RunConfig = serde_yaml::from_str(&raw)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            sources = config.sources.len(),
            "Loaded run configuration"
        );
        Ok(config)
    }

    /// Parse and validate without touching the environment.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(MODEL_URL_ENV).filter(|u| !u.trim().is_empty()) {
            self.model.base_url = url;
        }
    }

    /// API key from the configured env var, if set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.model.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn sources_of(&self, kind: SourceType) -> Vec<SourceDescriptor> {
        self.sources
            .iter()
            .filter(|s| s.source_type == kind)
            .cloned()
            .collect()
    }

    /// Collect every problem rather than stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        for (idx, source) in self.sources.iter().enumerate() {
            let label = if source.name.trim().is_empty() {
                format!("source #{}", idx + 1)
            } else {
                format!("source '{}'", source.name)
            };
            errors.extend(validate_source(source).into_iter().map(|e| format!("{}: {}", label, e)));
        }

        if self.model.max_concurrency == 0 {
            errors.push("model.max_concurrency must be at least 1".to_string());
        }
        if self.fetch.max_concurrency == 0 {
            errors.push("fetch.max_concurrency must be at least 1".to_string());
        }
        if self.model.timeout_secs == 0 || self.fetch.timeout_secs == 0 {
            errors.push("timeouts must be at least 1 second".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

fn is_youtube_host(host: &str) -> bool {
    matches!(
        host.trim_start_matches("www.").trim_start_matches("m."),
        "youtube.com" | "youtu.be"
    )
}

fn validate_source(source: &SourceDescriptor) -> Vec<String> {
    let mut errors = Vec::new();

    if source.name.trim().is_empty() {
        errors.push("name is required".to_string());
    }
    if !(1..=5).contains(&source.rank) {
        errors.push(format!("rank {} is outside 1-5", source.rank));
    }

    match reqwest::Url::parse(&source.url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            let youtube = url.host_str().is_some_and(is_youtube_host);
            if url.host_str().is_none() {
                errors.push(format!("url '{}' has no host", source.url));
            } else if source.format == SourceFormat::Video && !youtube {
                errors.push("video sources must be YouTube URLs".to_string());
            } else if youtube && source.format != SourceFormat::Video {
                errors.push("YouTube URLs must use the video format".to_string());
            }
        }
        Ok(url) => errors.push(format!("url scheme '{}' is not http(s)", url.scheme())),
        Err(e) => errors.push(format!("url '{}' is invalid: {}", source.url, e)),
    }

    errors
}
