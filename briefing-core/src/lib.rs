//! Deterministic core of the weekly intelligence pipeline.
//!
//! Nothing in this crate touches the network. It owns the region model, the
//! phase artifacts, the structured-text parser that turns model prose into
//! region-keyed records, the checkpoint store that makes runs resumable, the
//! phase state machine, and the markdown formatter.

pub mod artifact;
pub mod budget;
pub mod checkpoint;
pub mod error;
pub mod parser;
pub mod phase;
pub mod region;
pub mod report;
pub mod resilience;
pub mod sanitize;

pub use artifact::{RegionSection, RegionalArtifact, SectionSchema, SectionStatus};
pub use checkpoint::{CheckpointStatus, CheckpointStore, PhaseCheckpoint, RunKey};
pub use error::CheckpointError;
pub use parser::{ParseOutcome, ParseWarning, ParseWarningKind, StructuredTextParser};
pub use phase::{PhaseId, PhaseState, PhaseTracker};
pub use region::{canonical_set, canonical_set_with_unknown, RegionKey, CANONICAL_REGIONS};
pub use report::ReportFormatter;
