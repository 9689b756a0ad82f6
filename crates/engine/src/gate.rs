//! Setup stage accessibility derived from a workflow snapshot.
//!
//! The gate holds no state. Every call evaluates all completeness
//! predicates against the one snapshot it was given, so descriptors never
//! mix stale and fresh data.

use arlo_types::{AuditPhase, SetupStage, StageAccessibility, StageDescriptor, WorkflowState};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("workflow state has not been fetched yet")]
    NotSynced,
    #[error("'{}' is read-only once the audit has launched (phase {phase})", .stage.title())]
    Frozen { stage: SetupStage, phase: AuditPhase },
    #[error("'{}' is locked until the previous stage is complete", .stage.title())]
    Locked { stage: SetupStage },
    #[error("requires phase {required}, current phase is {actual}")]
    WrongPhase { required: AuditPhase, actual: AuditPhase },
}

/// Stage-specific completeness over a single snapshot.
pub fn stage_complete(stage: SetupStage, state: &WorkflowState) -> bool {
    match stage {
        SetupStage::Participants => !state.jurisdictions.is_empty(),
        SetupStage::TargetContests => state.targeted_contests().next().is_some(),
        // Optional: done as soon as there is something to be opportunistic about.
        SetupStage::OpportunisticContests => stage_complete(SetupStage::TargetContests, state),
        SetupStage::AuditSettings => state.settings.is_complete(),
        SetupStage::ReviewAndLaunch => state.phase.at_least(AuditPhase::AuditOngoing),
    }
}

/// Descriptors for `stages`, in order.
///
/// - Before the first fetch every stage is locked.
/// - Once the audit has launched every stage is complete and frozen.
/// - Otherwise a stage is locked unless its predecessor is complete, and
///   complete when its own predicate holds.
pub fn compute_stages(state: &WorkflowState, stages: &[SetupStage]) -> Vec<StageDescriptor> {
    let frozen = state.is_frozen();
    let mut previous_complete = true;

    stages
        .iter()
        .enumerate()
        .map(|(position, &stage)| {
            let accessibility = if !state.is_synced() {
                StageAccessibility::Locked
            } else if frozen {
                StageAccessibility::Complete
            } else if !previous_complete {
                StageAccessibility::Locked
            } else if stage_complete(stage, state) {
                StageAccessibility::Complete
            } else {
                StageAccessibility::Unlocked
            };
            previous_complete = accessibility == StageAccessibility::Complete;

            StageDescriptor {
                stage,
                title: stage.title().to_string(),
                accessibility,
                position,
                frozen: frozen && state.is_synced(),
            }
        })
        .collect()
}

/// Reject an edit to `stage` before any request is made.
pub fn ensure_editable(state: &WorkflowState, stage: SetupStage) -> Result<(), GateError> {
    if !state.is_synced() {
        return Err(GateError::NotSynced);
    }
    if state.is_frozen() {
        return Err(GateError::Frozen { stage, phase: state.phase });
    }
    let descriptors = compute_stages(state, &SetupStage::SEQUENCE);
    match descriptors.iter().find(|descriptor| descriptor.stage == stage) {
        Some(descriptor) if descriptor.accessibility == StageAccessibility::Locked => Err(GateError::Locked { stage }),
        _ => Ok(()),
    }
}

/// Require an exact phase.
pub fn ensure_phase(state: &WorkflowState, required: AuditPhase) -> Result<(), GateError> {
    if !state.is_synced() {
        return Err(GateError::NotSynced);
    }
    if state.phase != required {
        return Err(GateError::WrongPhase {
            required,
            actual: state.phase,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use arlo_types::{Contest, JurisdictionStatus, ManifestStatus};
    use chrono::Utc;

    use super::*;

    fn synced() -> WorkflowState {
        let mut state = WorkflowState::new("e1");
        state.last_synced_at = Some(Utc::now());
        state
    }

    fn with_jurisdiction(mut state: WorkflowState) -> WorkflowState {
        state.jurisdictions.insert(
            "j1".into(),
            JurisdictionStatus {
                id: "j1".into(),
                name: "One".into(),
                manifest: ManifestStatus::Processed,
                current_round: None,
            },
        );
        state
    }

    fn with_contest(mut state: WorkflowState, is_targeted: bool) -> WorkflowState {
        state.contests.insert(
            "c1".into(),
            Contest {
                id: "c1".into(),
                name: "Mayor".into(),
                is_targeted,
                num_winners: 1,
                votes_allowed: 1,
                choices: Vec::new(),
            },
        );
        state
    }

    fn accessibility(state: &WorkflowState) -> Vec<StageAccessibility> {
        compute_stages(state, &SetupStage::SEQUENCE)
            .into_iter()
            .map(|descriptor| descriptor.accessibility)
            .collect()
    }

    fn assert_no_gap_skipping(descriptors: &[StageDescriptor]) {
        for pair in descriptors.windows(2) {
            if pair[1].accessibility != StageAccessibility::Locked {
                assert_eq!(pair[0].accessibility, StageAccessibility::Complete, "{:?}", descriptors);
            }
        }
    }

    #[test]
    fn everything_locked_before_first_fetch() {
        let state = WorkflowState::new("e1");
        assert!(accessibility(&state).iter().all(|a| *a == StageAccessibility::Locked));
        assert_eq!(ensure_editable(&state, SetupStage::Participants), Err(GateError::NotSynced));
    }

    #[test]
    fn first_stage_unlocks_after_fetch() {
        use StageAccessibility::*;
        assert_eq!(accessibility(&synced()), vec![Unlocked, Locked, Locked, Locked, Locked]);
    }

    #[test]
    fn stages_unlock_one_at_a_time() {
        use StageAccessibility::*;
        let state = with_contest(with_jurisdiction(synced()), true);
        assert_eq!(accessibility(&state), vec![Complete, Complete, Complete, Unlocked, Locked]);
    }

    #[test]
    fn completed_stage_behind_incomplete_one_stays_locked() {
        let mut state = with_contest(synced(), true);
        state.settings.random_seed = Some("12345".into());
        state.settings.risk_limit = Some(10);
        let descriptors = compute_stages(&state, &SetupStage::SEQUENCE);
        assert_eq!(descriptors[0].accessibility, StageAccessibility::Unlocked);
        assert!(descriptors[1..].iter().all(|d| d.accessibility == StageAccessibility::Locked));
    }

    #[test]
    fn no_gap_skipping_across_phases_and_data() {
        for phase in [
            AuditPhase::NotStarted,
            AuditPhase::ContestsSelected,
            AuditPhase::SeedSet,
            AuditPhase::AuditOngoing,
            AuditPhase::Complete,
            AuditPhase::Errored,
        ] {
            for has_jurisdiction in [false, true] {
                for targeted in [None, Some(false), Some(true)] {
                    for seed in [None, Some("seed")] {
                        let mut state = synced();
                        state.phase = phase;
                        if has_jurisdiction {
                            state = with_jurisdiction(state);
                        }
                        if let Some(targeted) = targeted {
                            state = with_contest(state, targeted);
                        }
                        state.settings.random_seed = seed.map(str::to_string);
                        state.settings.risk_limit = seed.map(|_| 5);
                        assert_no_gap_skipping(&compute_stages(&state, &SetupStage::SEQUENCE));
                    }
                }
            }
        }
    }

    #[test]
    fn launched_audit_freezes_every_stage() {
        let mut state = synced();
        state.phase = AuditPhase::AuditOngoing;
        let descriptors = compute_stages(&state, &SetupStage::SEQUENCE);
        assert!(descriptors.iter().all(|d| d.accessibility == StageAccessibility::Complete && d.frozen));
        assert!(descriptors.iter().all(|d| !d.is_editable()));
        assert_eq!(
            ensure_editable(&state, SetupStage::TargetContests),
            Err(GateError::Frozen {
                stage: SetupStage::TargetContests,
                phase: AuditPhase::AuditOngoing
            })
        );
    }

    #[test]
    fn locked_stage_rejects_edits() {
        let state = synced();
        assert_eq!(
            ensure_editable(&state, SetupStage::AuditSettings),
            Err(GateError::Locked {
                stage: SetupStage::AuditSettings
            })
        );
        assert_eq!(ensure_editable(&state, SetupStage::Participants), Ok(()));
    }

    #[test]
    fn custom_sequences_keep_their_positions() {
        let state = with_jurisdiction(synced());
        let descriptors = compute_stages(&state, &[SetupStage::Participants, SetupStage::AuditSettings]);
        assert_eq!(descriptors[1].position, 1);
        assert_eq!(descriptors[1].title, "Audit Settings");
        assert_eq!(descriptors[1].accessibility, StageAccessibility::Unlocked);
    }

    #[test]
    fn phase_requirement_is_exact() {
        let mut state = synced();
        state.phase = AuditPhase::Complete;
        assert!(matches!(ensure_phase(&state, AuditPhase::AuditOngoing), Err(GateError::WrongPhase { .. })));
        state.phase = AuditPhase::AuditOngoing;
        assert_eq!(ensure_phase(&state, AuditPhase::AuditOngoing), Ok(()));
    }
}
