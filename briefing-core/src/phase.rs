//! Phase table and per-run phase state machine.
//!
//! The topology is fixed: seven phases, strictly sequential, each consuming
//! artifacts of earlier phases only. [`PhaseTracker`] enforces the legal
//! state edges for every phase and keeps an auditable transition log.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One of the seven pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    GlobalOverview,
    NewsEtl,
    Summarization,
    MaterialistAnalysis,
    GlobalBriefing,
    MultiLensAnalysis,
    FinalAssembly,
}

/// How a phase's artifact is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactEncoding {
    /// One JSON document.
    Json,
    /// One JSON record per line, for bulk per-unit data.
    Lines,
}

impl ArtifactEncoding {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Lines => "jsonl",
        }
    }
}

impl PhaseId {
    pub const ALL: [PhaseId; 7] = [
        PhaseId::GlobalOverview,
        PhaseId::NewsEtl,
        PhaseId::Summarization,
        PhaseId::MaterialistAnalysis,
        PhaseId::GlobalBriefing,
        PhaseId::MultiLensAnalysis,
        PhaseId::FinalAssembly,
    ];

    /// 1-based phase number.
    pub fn number(self) -> u8 {
        match self {
            Self::GlobalOverview => 1,
            Self::NewsEtl => 2,
            Self::Summarization => 3,
            Self::MaterialistAnalysis => 4,
            Self::GlobalBriefing => 5,
            Self::MultiLensAnalysis => 6,
            Self::FinalAssembly => 7,
        }
    }

    pub fn from_number(n: u8) -> Option<PhaseId> {
        Self::ALL.into_iter().find(|p| p.number() == n)
    }

    /// Short name without the number, also used for per-phase report files.
    pub fn stem(self) -> &'static str {
        match self {
            Self::GlobalOverview => "global_overview",
            Self::NewsEtl => "news_etl",
            Self::Summarization => "summarization",
            Self::MaterialistAnalysis => "materialist_analysis",
            Self::GlobalBriefing => "global_briefing",
            Self::MultiLensAnalysis => "multi_lens_analysis",
            Self::FinalAssembly => "final_assembly",
        }
    }

    /// Storage key, e.g. `p5_global_briefing`.
    pub fn slug(self) -> String {
        format!("p{}_{}", self.number(), self.stem())
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::GlobalOverview => "Global Overview",
            Self::NewsEtl => "News ETL",
            Self::Summarization => "Summarization",
            Self::MaterialistAnalysis => "Materialist Analysis",
            Self::GlobalBriefing => "Global Briefing",
            Self::MultiLensAnalysis => "Multi-Lens Analysis",
            Self::FinalAssembly => "Final Assembly",
        }
    }

    /// Upstream phases whose artifacts this phase reads.
    pub fn consumes(self) -> &'static [PhaseId] {
        use PhaseId::*;
        match self {
            GlobalOverview | NewsEtl => &[],
            Summarization => &[NewsEtl],
            MaterialistAnalysis => &[Summarization],
            GlobalBriefing => &[GlobalOverview, Summarization, MaterialistAnalysis],
            MultiLensAnalysis => &[GlobalOverview, GlobalBriefing],
            FinalAssembly => &[GlobalOverview, GlobalBriefing, MultiLensAnalysis, NewsEtl],
        }
    }

    pub fn encoding(self) -> ArtifactEncoding {
        match self {
            Self::NewsEtl | Self::Summarization => ArtifactEncoding::Lines,
            _ => ArtifactEncoding::Json,
        }
    }

    /// Phases strictly before this one.
    pub fn predecessors(self) -> impl Iterator<Item = PhaseId> {
        Self::ALL.into_iter().filter(move |p| *p < self)
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{} {}", self.number(), self.title())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown phase '{0}' (expected 1-7, p<N>, or a phase name)")]
pub struct UnknownPhase(pub String);

impl FromStr for PhaseId {
    type Err = UnknownPhase;

    /// Accepts `3`, `p3`, `summarization` or `p3_summarization`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let digits = lowered.strip_prefix('p').unwrap_or(&lowered);
        if let Ok(n) = digits.parse::<u8>() {
            return Self::from_number(n).ok_or_else(|| UnknownPhase(s.to_string()));
        }
        Self::ALL
            .into_iter()
            .find(|p| p.stem() == lowered || p.slug() == lowered)
            .ok_or_else(|| UnknownPhase(s.to_string()))
    }
}

/// Lifecycle of one phase within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    NotStarted,
    Running,
    Complete,
    Failed,
}

impl PhaseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Legal edges:
/// ```text
/// NotStarted → Running | Complete (restored from checkpoint)
/// Running    → Complete | Failed
/// ```
fn is_legal_transition(from: PhaseState, to: PhaseState) -> bool {
    use PhaseState::*;
    matches!(
        (from, to),
        (NotStarted, Running) | (NotStarted, Complete) | (Running, Complete) | (Running, Failed)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub phase: PhaseId,
    pub from: PhaseState,
    pub to: PhaseState,
    /// Milliseconds since the tracker was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IllegalTransition {
    #[error("illegal transition for {phase}: {from} → {to}")]
    Edge {
        phase: PhaseId,
        from: PhaseState,
        to: PhaseState,
    },
    #[error("{phase} cannot start before {blocking} is complete")]
    OutOfOrder { phase: PhaseId, blocking: PhaseId },
}

/// Per-run state of all seven phases.
pub struct PhaseTracker {
    states: [PhaseState; 7],
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            states: [PhaseState::NotStarted; 7],
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    fn index(phase: PhaseId) -> usize {
        usize::from(phase.number() - 1)
    }

    pub fn state(&self, phase: PhaseId) -> PhaseState {
        self.states[Self::index(phase)]
    }

    /// Move `phase` to `to`.
    ///
    /// A phase may only leave `NotStarted` once every earlier phase is
    /// `Complete`; this is what keeps execution strictly sequential.
    pub fn advance(&mut self, phase: PhaseId, to: PhaseState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        let from = self.state(phase);
        if !is_legal_transition(from, to) {
            return Err(IllegalTransition::Edge { phase, from, to });
        }
        if from == PhaseState::NotStarted {
            if let Some(blocking) = phase
                .predecessors()
                .find(|p| self.state(*p) != PhaseState::Complete)
            {
                return Err(IllegalTransition::OutOfOrder { phase, blocking });
            }
        }

        tracing::debug!(phase = %phase, from = %from, to = %to, "Phase transition");

        self.transitions.push(TransitionRecord {
            phase,
            from,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.states[Self::index(phase)] = to;
        Ok(())
    }

    pub fn start(&mut self, phase: PhaseId) -> Result<(), IllegalTransition> {
        self.advance(phase, PhaseState::Running, None)
    }

    /// Mark a phase complete because its checkpoint already is.
    pub fn restore(&mut self, phase: PhaseId) -> Result<(), IllegalTransition> {
        self.advance(phase, PhaseState::Complete, Some("restored from checkpoint"))
    }

    pub fn complete(&mut self, phase: PhaseId) -> Result<(), IllegalTransition> {
        self.advance(phase, PhaseState::Complete, None)
    }

    pub fn fail(&mut self, phase: PhaseId, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(phase, PhaseState::Failed, Some(reason))
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// One-line history, e.g. `P1:complete P2:complete P3:running ...`.
    pub fn summary(&self) -> String {
        let states: Vec<String> = PhaseId::ALL
            .iter()
            .map(|p| format!("P{}:{}", p.number(), self.state(*p)))
            .collect();
        format!(
            "{} ({}ms, {} transitions)",
            states.join(" "),
            self.created_at.elapsed().as_millis(),
            self.transitions.len()
        )
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_table_consumes_only_earlier_phases() {
        for phase in PhaseId::ALL {
            for upstream in phase.consumes() {
                assert!(upstream < &phase, "{} consumes later {}", phase, upstream);
            }
        }
        assert_eq!(
            PhaseId::FinalAssembly.consumes(),
            &[
                PhaseId::GlobalOverview,
                PhaseId::GlobalBriefing,
                PhaseId::MultiLensAnalysis,
                PhaseId::NewsEtl
            ]
        );
    }

    #[test]
    fn test_slugs() {
        assert_eq!(PhaseId::GlobalOverview.slug(), "p1_global_overview");
        assert_eq!(PhaseId::GlobalBriefing.slug(), "p5_global_briefing");
        assert_eq!(PhaseId::NewsEtl.encoding(), ArtifactEncoding::Lines);
        assert_eq!(PhaseId::FinalAssembly.encoding().extension(), "json");
    }

    #[test]
    fn test_from_str_forms() {
        assert_eq!("3".parse::<PhaseId>().unwrap(), PhaseId::Summarization);
        assert_eq!("P6".parse::<PhaseId>().unwrap(), PhaseId::MultiLensAnalysis);
        assert_eq!("news_etl".parse::<PhaseId>().unwrap(), PhaseId::NewsEtl);
        assert_eq!("p7_final_assembly".parse::<PhaseId>().unwrap(), PhaseId::FinalAssembly);
        assert!("8".parse::<PhaseId>().is_err());
        assert!("lunch".parse::<PhaseId>().is_err());
    }

    #[test]
    fn test_happy_path() {
        let mut tracker = PhaseTracker::new();
        for phase in PhaseId::ALL {
            tracker.start(phase).unwrap();
            tracker.complete(phase).unwrap();
        }
        assert!(PhaseId::ALL.iter().all(|p| tracker.state(*p) == PhaseState::Complete));
        assert_eq!(tracker.transitions().len(), 14);
    }

    #[test]
    fn test_restore_then_run() {
        let mut tracker = PhaseTracker::new();
        tracker.restore(PhaseId::GlobalOverview).unwrap();
        tracker.restore(PhaseId::NewsEtl).unwrap();
        tracker.start(PhaseId::Summarization).unwrap();
        assert_eq!(tracker.state(PhaseId::Summarization), PhaseState::Running);
        assert_eq!(
            tracker.transitions()[0].reason.as_deref(),
            Some("restored from checkpoint")
        );
    }

    #[test]
    fn test_cannot_start_out_of_order() {
        let mut tracker = PhaseTracker::new();
        let err = tracker.start(PhaseId::NewsEtl).unwrap_err();
        assert_eq!(
            err,
            IllegalTransition::OutOfOrder {
                phase: PhaseId::NewsEtl,
                blocking: PhaseId::GlobalOverview
            }
        );
        assert_eq!(tracker.state(PhaseId::NewsEtl), PhaseState::NotStarted);
    }

    #[test]
    fn test_complete_is_terminal() {
        let mut tracker = PhaseTracker::new();
        tracker.start(PhaseId::GlobalOverview).unwrap();
        tracker.complete(PhaseId::GlobalOverview).unwrap();
        assert!(tracker.start(PhaseId::GlobalOverview).is_err());
        assert!(tracker.complete(PhaseId::GlobalOverview).is_err());
    }

    #[test]
    fn test_fail_only_from_running() {
        let mut tracker = PhaseTracker::new();
        assert!(tracker.fail(PhaseId::GlobalOverview, "x").is_err());
        tracker.start(PhaseId::GlobalOverview).unwrap();
        tracker.fail(PhaseId::GlobalOverview, "checkpoint write failed").unwrap();
        assert_eq!(tracker.state(PhaseId::GlobalOverview), PhaseState::Failed);
        assert!(tracker.state(PhaseId::GlobalOverview).is_terminal());
        // A failed predecessor blocks the next phase.
        assert!(tracker.start(PhaseId::NewsEtl).is_err());
    }

    #[test]
    fn test_summary_lists_every_phase() {
        let tracker = PhaseTracker::new();
        let s = tracker.summary();
        assert!(s.starts_with("P1:not_started P2:not_started"));
        assert!(s.contains("P7:not_started"));
    }
}
