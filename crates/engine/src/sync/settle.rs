//! Terminal conditions that stop a poll.
//!
//! A predicate is evaluated against the snapshot after each applied fetch;
//! once it returns `true` the poll ends and emits [`super::SyncEvent::Settled`].

use std::sync::Arc;

use arlo_types::{AuditPhase, WorkflowState};

pub type SettlePredicate = Arc<dyn Fn(&WorkflowState) -> bool + Send + Sync>;

pub fn from_fn<F>(predicate: F) -> SettlePredicate
where
    F: Fn(&WorkflowState) -> bool + Send + Sync + 'static,
{
    Arc::new(predicate)
}

/// Poll until stopped.
pub fn never() -> SettlePredicate {
    Arc::new(|_| false)
}

/// Round `round_num` exists and every jurisdiction in it has finished.
pub fn round_complete(round_num: u32) -> SettlePredicate {
    Arc::new(move |state| state.round(round_num).is_some_and(|round| round.is_complete()))
}

pub fn audit_complete() -> SettlePredicate {
    Arc::new(|state| state.phase == AuditPhase::Complete)
}

/// Every known jurisdiction has a processed manifest.
pub fn manifests_processed() -> SettlePredicate {
    Arc::new(WorkflowState::manifests_processed)
}

/// The board's assignment is loaded and no ballot is left unaudited.
pub fn ballots_audited() -> SettlePredicate {
    Arc::new(|state| {
        state
            .assignment
            .as_ref()
            .is_some_and(|assignment| assignment.ballots.iter().all(|ballot| ballot.status.is_done()))
    })
}
