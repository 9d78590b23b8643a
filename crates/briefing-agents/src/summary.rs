//! Per-run status reporting.

use briefing_core::{PhaseCheckpoint, PhaseId, PhaseState, RunKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// File name of the summary inside the run directory.
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: PhaseId,
    pub status: PhaseState,
    /// Restored from a complete checkpoint instead of executed.
    pub skipped: bool,
    pub warning_count: usize,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one invocation of the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_key: RunKey,
    pub invocation_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub phases: Vec<PhaseReport>,
    /// Phase 7 reached `complete`. Warnings do not count against this.
    pub successful: bool,
    /// Cancelled before the last phase finished.
    pub aborted: bool,
}

impl RunSummary {
    pub fn new(run_key: RunKey) -> Self {
        Self {
            run_key,
            invocation_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            phases: Vec::new(),
            successful: false,
            aborted: false,
        }
    }

    pub fn record(&mut self, report: PhaseReport) {
        self.phases.push(report);
    }

    /// Pad unreached phases as `not_started` and settle `successful`.
    pub fn finish(&mut self) {
        for phase in PhaseId::ALL {
            if !self.phases.iter().any(|r| r.phase == phase) {
                self.phases.push(PhaseReport {
                    phase,
                    status: PhaseState::NotStarted,
                    skipped: false,
                    warning_count: 0,
                    duration_ms: 0,
                    error: None,
                });
            }
        }
        self.phases.sort_by_key(|r| r.phase);
        self.successful = self
            .phase(PhaseId::FinalAssembly)
            .is_some_and(|r| r.status == PhaseState::Complete);
        self.finished_at = Some(Utc::now());
    }

    pub fn phase(&self, phase: PhaseId) -> Option<&PhaseReport> {
        self.phases.iter().find(|r| r.phase == phase)
    }

    pub fn total_warnings(&self) -> usize {
        self.phases.iter().map(|r| r.warning_count).sum()
    }

    /// Whether any phase actually executed in this invocation.
    pub fn executed_any(&self) -> bool {
        self.phases
            .iter()
            .any(|r| !r.skipped && r.status != PhaseState::NotStarted)
    }

    /// Fixed-width status table.
    pub fn render_table(&self) -> String {
        let mut lines = vec![
            format!("Run {} ({})", self.run_key, self.invocation_id),
            format!("{:<28} {:<12} {:>8} {:>10}", "PHASE", "STATUS", "WARNINGS", "TIME"),
        ];
        for report in &self.phases {
            let status = if report.skipped {
                format!("{} (skip)", report.status)
            } else {
                report.status.to_string()
            };
            lines.push(format!(
                "{:<28} {:<12} {:>8} {:>8}ms",
                report.phase.to_string(),
                status,
                report.warning_count,
                report.duration_ms
            ));
        }
        let verdict = match (self.successful, self.aborted) {
            (true, _) => "SUCCESS",
            (false, true) => "ABORTED",
            (false, false) => "FAILED",
        };
        lines.push(format!("{} with {} warning(s)", verdict, self.total_warnings()));
        lines.join("\n")
    }
}

/// Checkpoint table for `weekly-intel status`.
pub fn render_checkpoint_status(run_key: &RunKey, rows: &[(PhaseId, Option<PhaseCheckpoint>)]) -> String {
    let mut lines = vec![
        format!("Run {}", run_key),
        format!("{:<28} {:<10} {:>8} {:<25}", "PHASE", "STATUS", "WARNINGS", "UPDATED"),
    ];
    for (phase, checkpoint) in rows {
        let line = match checkpoint {
            Some(cp) => format!(
                "{:<28} {:<10} {:>8} {:<25}",
                phase.to_string(),
                cp.status.to_string(),
                cp.warning_count,
                cp.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => format!("{:<28} {:<10} {:>8} {:<25}", phase.to_string(), "-", "-", "-"),
        };
        lines.push(line);
    }
    lines.join("\n")
}
