//! Checkpoint store: durable phase markers and artifacts keyed by run.
//!
//! Layout under the output root:
//!
//! ```text
//! <root>/<run_key>/
//!     checkpoints/<phase>.json      PhaseCheckpoint
//!     artifacts/<phase>.json|jsonl  phase artifact
//!     units/<phase>/<digest>.json   per-unit slots
//!     reports/*.md                  rendered reports
//!     run_summary.json
//! ```
//!
//! The artifact is always written (atomically) before its `complete`
//! checkpoint. A crash in between leaves a `pending` or absent checkpoint,
//! which callers treat as "not done". A `complete` checkpoint whose artifact
//! is missing or fails its digest check is reported as
//! [`CheckpointError::Corrupted`].

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;
use crate::phase::{ArtifactEncoding, PhaseId};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identity of one weekly run, e.g. `W42-2026-10-18`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunKey(String);

impl RunKey {
    /// `W` + week-of-year (Sunday-based) + ISO date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self(format!("W{}", date.format("%U-%Y-%m-%d")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    Complete,
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Durable marker for one (run, phase).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCheckpoint {
    /// Schema version for forward compatibility.
    pub version: u32,
    pub phase_id: PhaseId,
    pub run_key: RunKey,
    pub status: CheckpointStatus,
    /// Artifact path relative to the run directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_bytes: Option<u64>,
    /// blake3 hex digest of the artifact file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_digest: Option<String>,
    #[serde(default)]
    pub warning_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl PhaseCheckpoint {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn is_complete(&self) -> bool {
        self.status == CheckpointStatus::Complete
    }
}

/// Filesystem-backed checkpoint store.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_key: &RunKey) -> PathBuf {
        self.root.join(run_key.as_str())
    }

    fn checkpoint_path(&self, run_key: &RunKey, phase: PhaseId) -> PathBuf {
        self.run_dir(run_key)
            .join("checkpoints")
            .join(format!("{}.json", phase.slug()))
    }

    fn artifact_ref(phase: PhaseId) -> String {
        format!("artifacts/{}.{}", phase.slug(), phase.encoding().extension())
    }

    fn unit_path(&self, run_key: &RunKey, phase: PhaseId, unit_id: &str) -> PathBuf {
        let digest = blake3::hash(unit_id.as_bytes()).to_hex();
        self.run_dir(run_key)
            .join("units")
            .join(phase.slug())
            .join(format!("{}.json", &digest.as_str()[..16]))
    }

    /// Current checkpoint, or `None` if the phase never started.
    pub fn get(&self, run_key: &RunKey, phase: PhaseId) -> Result<Option<PhaseCheckpoint>, CheckpointError> {
        let path = self.checkpoint_path(run_key, phase);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::io(path, e)),
        };
        let checkpoint: PhaseCheckpoint =
            serde_json::from_str(&raw).map_err(|e| CheckpointError::Corrupted {
                phase: phase.slug(),
                reason: format!("unreadable checkpoint: {}", e),
            })?;
        if checkpoint.version > PhaseCheckpoint::CURRENT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: PhaseCheckpoint::CURRENT_VERSION,
                found: checkpoint.version,
            });
        }
        Ok(Some(checkpoint))
    }

    pub fn is_complete(&self, run_key: &RunKey, phase: PhaseId) -> Result<bool, CheckpointError> {
        Ok(self.get(run_key, phase)?.is_some_and(|c| c.is_complete()))
    }

    /// Record that a phase has started.
    pub fn begin(&self, run_key: &RunKey, phase: PhaseId) -> Result<PhaseCheckpoint, CheckpointError> {
        let checkpoint = PhaseCheckpoint {
            version: PhaseCheckpoint::CURRENT_VERSION,
            phase_id: phase,
            run_key: run_key.clone(),
            status: CheckpointStatus::Pending,
            artifact_ref: None,
            artifact_bytes: None,
            artifact_digest: None,
            warning_count: 0,
            updated_at: Utc::now(),
        };
        self.write_checkpoint(&checkpoint)?;
        Ok(checkpoint)
    }

    /// Persist the artifact, then mark the phase complete.
    pub fn put<T: Serialize>(
        &self,
        run_key: &RunKey,
        phase: PhaseId,
        artifact: &T,
        warning_count: usize,
    ) -> Result<PhaseCheckpoint, CheckpointError> {
        let bytes = encode(phase, artifact)?;
        let artifact_ref = Self::artifact_ref(phase);
        write_atomic(&self.run_dir(run_key).join(&artifact_ref), &bytes)?;

        let checkpoint = PhaseCheckpoint {
            version: PhaseCheckpoint::CURRENT_VERSION,
            phase_id: phase,
            run_key: run_key.clone(),
            status: CheckpointStatus::Complete,
            artifact_ref: Some(artifact_ref),
            artifact_bytes: Some(bytes.len() as u64),
            artifact_digest: Some(blake3::hash(&bytes).to_hex().to_string()),
            warning_count,
            updated_at: Utc::now(),
        };
        self.write_checkpoint(&checkpoint)?;

        tracing::debug!(
            run_key = %run_key,
            phase = %phase,
            bytes = bytes.len(),
            "Checkpoint complete"
        );
        Ok(checkpoint)
    }

    /// Load and verify the artifact behind a complete checkpoint.
    pub fn load<T: DeserializeOwned>(&self, run_key: &RunKey, phase: PhaseId) -> Result<T, CheckpointError> {
        let corrupted = |reason: String| CheckpointError::Corrupted {
            phase: phase.slug(),
            reason,
        };

        let checkpoint = self
            .get(run_key, phase)?
            .filter(PhaseCheckpoint::is_complete)
            .ok_or_else(|| CheckpointError::NotComplete { phase: phase.slug() })?;

        let artifact_ref = checkpoint
            .artifact_ref
            .as_deref()
            .ok_or_else(|| corrupted("complete checkpoint has no artifact reference".into()))?;
        let path = self.run_dir(run_key).join(artifact_ref);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(corrupted(format!("artifact {} is missing", artifact_ref)));
            }
            Err(e) => return Err(CheckpointError::io(path, e)),
        };

        if let Some(expected) = checkpoint.artifact_bytes {
            if expected != bytes.len() as u64 {
                return Err(corrupted(format!(
                    "artifact length {} does not match recorded {}",
                    bytes.len(),
                    expected
                )));
            }
        }
        if let Some(expected) = checkpoint.artifact_digest.as_deref() {
            let actual = blake3::hash(&bytes).to_hex();
            if actual.as_str() != expected {
                return Err(corrupted("artifact digest mismatch".into()));
            }
        }

        decode(phase, &bytes).map_err(|e| corrupted(format!("artifact does not deserialize: {}", e)))
    }

    /// Drop only the phase checkpoint. Unit slots survive, so a re-run after
    /// a corrupt artifact reuses finished units.
    pub fn clear_checkpoint(&self, run_key: &RunKey, phase: PhaseId) -> Result<(), CheckpointError> {
        let path = self.checkpoint_path(run_key, phase);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::io(path, e)),
        }
    }

    /// Forget a phase so the next run executes it again. Unit slots are
    /// cleared too.
    pub fn invalidate(&self, run_key: &RunKey, phase: PhaseId) -> Result<(), CheckpointError> {
        self.clear_checkpoint(run_key, phase)?;
        let units = self.run_dir(run_key).join("units").join(phase.slug());
        match fs::remove_dir_all(&units) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CheckpointError::io(units, e)),
        }
        tracing::info!(run_key = %run_key, phase = %phase, "Checkpoint invalidated");
        Ok(())
    }

    /// Persist one unit's output. Each unit id owns its own file, so
    /// concurrent workers never share a slot.
    pub fn put_unit<T: Serialize>(
        &self,
        run_key: &RunKey,
        phase: PhaseId,
        unit_id: &str,
        value: &T,
    ) -> Result<(), CheckpointError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| CheckpointError::Serialize {
            reason: e.to_string(),
        })?;
        write_atomic(&self.unit_path(run_key, phase, unit_id), &bytes)
    }

    /// A previously stored unit. An unreadable slot counts as absent.
    pub fn get_unit<T: DeserializeOwned>(
        &self,
        run_key: &RunKey,
        phase: PhaseId,
        unit_id: &str,
    ) -> Result<Option<T>, CheckpointError> {
        let path = self.unit_path(run_key, phase, unit_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::io(path, e)),
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(unit_id, error = %e, "Discarding unreadable unit slot");
                Ok(None)
            }
        }
    }

    /// Write a rendered markdown report under `reports/`.
    pub fn save_report(&self, run_key: &RunKey, filename: &str, markdown: &str) -> Result<PathBuf, CheckpointError> {
        let path = self.run_dir(run_key).join("reports").join(filename);
        write_atomic(&path, markdown.as_bytes())?;
        Ok(path)
    }

    /// Write an auxiliary JSON document (e.g. the run summary) in the run
    /// directory.
    pub fn write_json<T: Serialize>(&self, run_key: &RunKey, name: &str, value: &T) -> Result<PathBuf, CheckpointError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| CheckpointError::Serialize {
            reason: e.to_string(),
        })?;
        let path = self.run_dir(run_key).join(name);
        write_atomic(&path, &bytes)?;
        Ok(path)
    }

    /// Checkpoint (if any) of every phase, in phase order.
    pub fn status(&self, run_key: &RunKey) -> Result<Vec<(PhaseId, Option<PhaseCheckpoint>)>, CheckpointError> {
        PhaseId::ALL
            .into_iter()
            .map(|phase| Ok((phase, self.get(run_key, phase)?)))
            .collect()
    }

    fn write_checkpoint(&self, checkpoint: &PhaseCheckpoint) -> Result<(), CheckpointError> {
        let bytes = serde_json::to_vec_pretty(checkpoint).map_err(|e| CheckpointError::Serialize {
            reason: e.to_string(),
        })?;
        write_atomic(
            &self.checkpoint_path(&checkpoint.run_key, checkpoint.phase_id),
            &bytes,
        )
    }
}

fn encode<T: Serialize>(phase: PhaseId, artifact: &T) -> Result<Vec<u8>, CheckpointError> {
    let serialize_err = |e: serde_json::Error| CheckpointError::Serialize {
        reason: e.to_string(),
    };
    match phase.encoding() {
        ArtifactEncoding::Json => serde_json::to_vec_pretty(artifact).map_err(serialize_err),
        ArtifactEncoding::Lines => {
            let value = serde_json::to_value(artifact).map_err(serialize_err)?;
            let serde_json::Value::Array(items) = value else {
                return Err(CheckpointError::Serialize {
                    reason: format!("{} is stored one record per line and needs a sequence", phase.slug()),
                });
            };
            let mut out = Vec::new();
            for item in items {
                serde_json::to_writer(&mut out, &item).map_err(serialize_err)?;
                out.push(b'\n');
            }
            Ok(out)
        }
    }
}

fn decode<T: DeserializeOwned>(phase: PhaseId, bytes: &[u8]) -> Result<T, serde_json::Error> {
    match phase.encoding() {
        ArtifactEncoding::Json => serde_json::from_slice(bytes),
        ArtifactEncoding::Lines => {
            let items = bytes
                .split(|b| *b == b'\n')
                .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
                .map(serde_json::from_slice::<serde_json::Value>)
                .collect::<Result<Vec<_>, _>>()?;
            serde_json::from_value(serde_json::Value::Array(items))
        }
    }
}

/// Write to a sibling temp file, fsync, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CheckpointError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| CheckpointError::io(parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(
        ".{}.tmp-{}-{}",
        file_name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let mut file = fs::File::create(&tmp).map_err(|e| CheckpointError::io(&tmp, e))?;
    file.write_all(bytes).map_err(|e| CheckpointError::io(&tmp, e))?;
    file.sync_all().map_err(|e| CheckpointError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| CheckpointError::io(path, e))
}
