//! Checkpoint lifecycle under simulated crashes and corruption.

use std::fs;

use briefing_core::artifact::SectionSchema;
use briefing_core::{
    canonical_set, CheckpointError, CheckpointStatus, CheckpointStore, PhaseId, PhaseState,
    PhaseTracker, RegionalArtifact, RunKey,
};
use chrono::NaiveDate;
use tempfile::tempdir;

fn run_key() -> RunKey {
    RunKey::from_date(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap())
}

/// Decide skip-vs-run the way the orchestrator does.
fn should_run(store: &CheckpointStore, phase: PhaseId) -> bool {
    match store.load::<RegionalArtifact>(&run_key(), phase) {
        Ok(_) => false,
        Err(CheckpointError::NotComplete { .. }) => true,
        Err(e) if e.is_corruption() => true,
        Err(e) => panic!("unexpected store error: {}", e),
    }
}

#[test]
fn test_crash_after_artifact_before_checkpoint_reexecutes() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let artifact = RegionalArtifact::placeholders(SectionSchema::Briefing, &canonical_set());

    // First run: phase begins, artifact lands on disk, process dies before
    // the checkpoint flips to complete.
    store.begin(&run_key(), PhaseId::GlobalBriefing).unwrap();
    let artifact_path = store
        .run_dir(&run_key())
        .join("artifacts")
        .join("p5_global_briefing.json");
    fs::create_dir_all(artifact_path.parent().unwrap()).unwrap();
    fs::write(&artifact_path, serde_json::to_vec(&artifact).unwrap()).unwrap();

    let cp = store.get(&run_key(), PhaseId::GlobalBriefing).unwrap().unwrap();
    assert_eq!(cp.status, CheckpointStatus::Pending);
    assert!(should_run(&store, PhaseId::GlobalBriefing));

    // Second run re-executes and completes exactly once.
    store.begin(&run_key(), PhaseId::GlobalBriefing).unwrap();
    let cp = store.put(&run_key(), PhaseId::GlobalBriefing, &artifact, 0).unwrap();
    assert!(cp.is_complete());
    assert!(!should_run(&store, PhaseId::GlobalBriefing));

    let loaded: RegionalArtifact = store.load(&run_key(), PhaseId::GlobalBriefing).unwrap();
    assert_eq!(loaded, artifact);
}

#[test]
fn test_truncated_artifact_behind_complete_checkpoint_is_rerun() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let artifact = RegionalArtifact::placeholders(SectionSchema::Narrative, &canonical_set());
    store.put(&run_key(), PhaseId::MaterialistAnalysis, &artifact, 0).unwrap();

    let path = store
        .run_dir(&run_key())
        .join("artifacts")
        .join("p4_materialist_analysis.json");
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    let err = store
        .load::<RegionalArtifact>(&run_key(), PhaseId::MaterialistAnalysis)
        .unwrap_err();
    assert!(err.is_corruption());
    assert!(should_run(&store, PhaseId::MaterialistAnalysis));
}

#[test]
fn test_resume_restores_completed_prefix() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let artifact = RegionalArtifact::placeholders(SectionSchema::Narrative, &canonical_set());
    store.put(&run_key(), PhaseId::GlobalOverview, &artifact, 0).unwrap();
    store.put(&run_key(), PhaseId::NewsEtl, &Vec::<String>::new(), 0).unwrap();

    let mut tracker = PhaseTracker::new();
    for phase in PhaseId::ALL {
        if store.is_complete(&run_key(), phase).unwrap() {
            tracker.restore(phase).unwrap();
        } else {
            tracker.start(phase).unwrap();
            break;
        }
    }
    assert_eq!(tracker.state(PhaseId::GlobalOverview), PhaseState::Complete);
    assert_eq!(tracker.state(PhaseId::NewsEtl), PhaseState::Complete);
    assert_eq!(tracker.state(PhaseId::Summarization), PhaseState::Running);
    assert_eq!(tracker.state(PhaseId::MaterialistAnalysis), PhaseState::NotStarted);
}

#[test]
fn test_status_lists_all_seven_phases() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    store.begin(&run_key(), PhaseId::GlobalOverview).unwrap();
    let status = store.status(&run_key()).unwrap();
    assert_eq!(status.len(), 7);
    assert_eq!(status[0].1.as_ref().unwrap().status, CheckpointStatus::Pending);
    assert!(status[1..].iter().all(|(_, cp)| cp.is_none()));
}
