//! Degraded results and ordered fallback chains.
//!
//! ```text
//! unit of work
//!   ├─ first tier succeeds          → DegradedResponse { level: Full }
//!   ├─ a later tier succeeds        → DegradedResponse { level: Partial, warnings }
//!   └─ every tier fails             → DegradedResponse { level: Unavailable, warnings }
//! ```
//!
//! The warnings of an `Unavailable` response are the per-attempt errors in
//! order, which is what callers surface as the aggregate failure.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DegradationLevel {
    Full,
    Partial,
    Unavailable,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// A payload wrapped with how it was obtained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradedResponse<T> {
    pub payload: T,
    pub level: DegradationLevel,
    /// Confidence in the payload, 0.0 to 1.0.
    pub confidence: f64,
    /// Tier that produced the payload (`none` when unavailable).
    pub served_by: String,
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> DegradedResponse<T> {
    pub fn full(payload: T, served_by: &str) -> Self {
        Self {
            payload,
            level: DegradationLevel::Full,
            confidence: 1.0,
            served_by: served_by.to_string(),
            warnings: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn partial(payload: T, served_by: &str, confidence: f64, warnings: Vec<String>) -> Self {
        Self {
            payload,
            level: DegradationLevel::Partial,
            confidence: confidence.clamp(0.0, 1.0),
            served_by: served_by.to_string(),
            warnings,
            timestamp: Utc::now(),
        }
    }

    pub fn unavailable(payload: T, warnings: Vec<String>) -> Self {
        Self {
            payload,
            level: DegradationLevel::Unavailable,
            confidence: 0.0,
            served_by: "none".to_string(),
            warnings,
            timestamp: Utc::now(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.level == DegradationLevel::Full
    }

    pub fn is_degraded(&self) -> bool {
        self.level != DegradationLevel::Full
    }

    /// Per-attempt warnings joined into one line.
    pub fn aggregate_warning(&self) -> String {
        self.warnings.join("; ")
    }
}

/// One tier of a [`FallbackChain`].
#[derive(Debug, Clone)]
pub struct FallbackTier<S> {
    pub name: String,
    /// Confidence assigned when this tier serves the result.
    pub confidence: f64,
    pub handler: S,
}

/// Ordered list of strategies tried in sequence, stopping at the first
/// success.
#[derive(Debug, Clone)]
pub struct FallbackChain<S> {
    pub name: String,
    pub tiers: Vec<FallbackTier<S>>,
}

impl<S> FallbackChain<S> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tiers: Vec::new(),
        }
    }

    pub fn add_tier(mut self, name: &str, confidence: f64, handler: S) -> Self {
        self.tiers.push(FallbackTier {
            name: name.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            handler,
        });
        self
    }

    /// Run each tier's handler through `try_fn` until one succeeds.
    pub async fn execute<T, F, Fut>(&self, mut try_fn: F) -> DegradedResponse<Option<T>>
    where
        F: FnMut(&S) -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        let mut warnings = Vec::new();

        for (idx, tier) in self.tiers.iter().enumerate() {
            match try_fn(&tier.handler).await {
                Ok(result) if idx == 0 => return DegradedResponse::full(Some(result), &tier.name),
                Ok(result) => {
                    warnings.push(format!("{}: fell back to '{}'", self.name, tier.name));
                    return DegradedResponse::partial(Some(result), &tier.name, tier.confidence, warnings);
                }
                Err(reason) => {
                    warnings.push(format!("{} '{}' failed: {}", self.name, tier.name, reason));
                }
            }
        }

        if self.tiers.is_empty() {
            warnings.push(format!("{}: no strategies configured", self.name));
        }
        DegradedResponse::unavailable(None, warnings)
    }
}
