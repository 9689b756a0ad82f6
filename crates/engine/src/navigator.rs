//! Ordered traversal of an audit board's assigned ballots.
//!
//! The sequence is flattened once per round from the assignment in the
//! canonical state: batches in the order the server assigned them, ballots
//! within a batch by ascending position. Pointer arithmetic is plain index
//! arithmetic over that fixed sequence.
//!
//! Submissions are single-flight per pointer and only dispatched once the
//! board has confirmed the interpretation.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use arlo_api::{ApiRequest, TransportError, endpoints};
use arlo_types::{
    AssignedBallot, AuditBoardScope, BallotAssignment, BallotInterpretation, BallotPointer, FailureKind, SubmissionOutcome, SubmissionRecord,
    WorkflowState,
};
use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::dispatch::{ActionKind, Outcome, Rejection};
use crate::sync::{Resource, SyncEngine};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    #[error("ballot {0} is not in this board's assignment")]
    NotFound(BallotPointer),
    #[error("no ballot after the last one")]
    EndOfSequence,
    #[error("no ballot before the first one")]
    StartOfSequence,
}

#[derive(Debug, Clone, Error)]
pub enum NavigatorError {
    #[error("ballot {0} has not been reviewed")]
    NotReviewed(BallotPointer),
    #[error("a submission for ballot {0} is already in flight")]
    SubmissionInFlight(BallotPointer),
    #[error("ballot {0} is no longer assigned to this board")]
    Stale(BallotPointer),
    #[error("record for {record} does not match ballot {pointer}")]
    RecordMismatch { pointer: BallotPointer, record: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl NavigatorError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            NavigatorError::NotReviewed(_) | NavigatorError::SubmissionInFlight(_) => FailureKind::Gate,
            NavigatorError::Stale(_) => FailureKind::StaleState,
            NavigatorError::RecordMismatch { .. } => FailureKind::Internal,
            NavigatorError::Transport(_) => FailureKind::Transport,
        }
    }
}

/// Result of a submission the server answered.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Recorded. `next` is the following ballot, `None` after the last one.
    Accepted { next: Option<BallotPointer> },
    Rejected(Rejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub audited: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct SequencedBallot {
    ballot_id: String,
    audited_on_server: bool,
}

#[derive(Debug, Default)]
struct NavigatorState {
    round_id: Option<String>,
    sequence: IndexMap<BallotPointer, SequencedBallot>,
    cursor: Option<BallotPointer>,
    records: HashMap<BallotPointer, SubmissionRecord>,
    /// Accepted by the server but not yet reflected in a fetched assignment.
    accepted: HashSet<BallotPointer>,
}

impl NavigatorState {
    fn index_of(&self, pointer: &BallotPointer) -> Result<usize, NavigationError> {
        self.sequence
            .get_index_of(pointer)
            .ok_or_else(|| NavigationError::NotFound(pointer.clone()))
    }

    fn pointer_at(&self, index: usize) -> Option<BallotPointer> {
        self.sequence.get_index(index).map(|(pointer, _)| pointer.clone())
    }

    fn next_of(&self, pointer: &BallotPointer) -> Result<BallotPointer, NavigationError> {
        let index = self.index_of(pointer)?;
        self.pointer_at(index + 1).ok_or(NavigationError::EndOfSequence)
    }

    fn is_audited(&self, pointer: &BallotPointer, ballot: &SequencedBallot) -> bool {
        ballot.audited_on_server || self.accepted.contains(pointer)
    }
}

/// Flatten an assignment into traversal order. Repeated pointers are dropped.
pub fn ordered_ballots(assignment: &BallotAssignment) -> Vec<&AssignedBallot> {
    let mut batches: IndexMap<&str, Vec<&AssignedBallot>> = IndexMap::new();
    for ballot in &assignment.ballots {
        batches.entry(ballot.batch.id.as_str()).or_default().push(ballot);
    }

    let mut seen = HashSet::new();
    let mut ordered = Vec::with_capacity(assignment.ballots.len());
    for (_, mut ballots) in batches {
        ballots.sort_by_key(|ballot| ballot.position);
        for ballot in ballots {
            if seen.insert(ballot.pointer()) {
                ordered.push(ballot);
            } else {
                warn!(ballot = %ballot.id, pointer = %ballot.pointer(), "duplicate ballot in assignment ignored");
            }
        }
    }
    ordered
}

/// Releases the per-pointer submission lock on every exit path, including
/// when the submitting future is dropped.
struct SubmitGuard<'a> {
    in_flight: &'a Mutex<HashSet<BallotPointer>>,
    pointer: BallotPointer,
}

impl<'a> SubmitGuard<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<BallotPointer>>, pointer: &BallotPointer) -> Option<Self> {
        lock(in_flight).insert(pointer.clone()).then(|| Self {
            in_flight,
            pointer: pointer.clone(),
        })
    }
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.pointer);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Walks one audit board through its assigned ballots for the current round.
#[derive(Debug)]
pub struct BallotNavigator {
    scope: AuditBoardScope,
    sync: SyncEngine,
    state: Mutex<NavigatorState>,
    in_flight: Mutex<HashSet<BallotPointer>>,
}

impl BallotNavigator {
    pub fn new(sync: SyncEngine, scope: AuditBoardScope) -> Self {
        Self {
            scope,
            sync,
            state: Mutex::new(NavigatorState::default()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn scope(&self) -> &AuditBoardScope {
        &self.scope
    }

    /// The resource to poll for this board's assignment.
    pub fn resource(&self) -> Resource {
        Resource::BoardBallots(self.scope.clone())
    }

    /// Lock local state after bringing it in line with the latest snapshot.
    fn synced_state(&self) -> MutexGuard<'_, NavigatorState> {
        let snapshot = self.sync.snapshot();
        let mut state = lock(&self.state);
        self.reconcile(&mut state, &snapshot);
        state
    }

    fn reconcile(&self, state: &mut NavigatorState, snapshot: &WorkflowState) {
        let Some(assignment) = snapshot.assignment.as_ref().filter(|a| a.round_id == self.scope.round_id) else {
            // Reset or another round: nothing of the old sequence may resolve.
            if state.round_id.is_some() {
                info!(round = %self.scope.round_id, "assignment withdrawn; ballot sequence cleared");
                *state = NavigatorState::default();
            }
            return;
        };

        if state.round_id.as_deref() != Some(assignment.round_id.as_str()) {
            let sequence: IndexMap<BallotPointer, SequencedBallot> = ordered_ballots(assignment)
                .into_iter()
                .map(|ballot| {
                    (
                        ballot.pointer(),
                        SequencedBallot {
                            ballot_id: ballot.id.clone(),
                            audited_on_server: ballot.status.is_done(),
                        },
                    )
                })
                .collect();
            info!(round = %assignment.round_id, ballots = sequence.len(), "ballot sequence built");
            *state = NavigatorState {
                round_id: Some(assignment.round_id.clone()),
                sequence,
                ..NavigatorState::default()
            };
            return;
        }

        // Same round: order is fixed, only audit status moves.
        for ballot in &assignment.ballots {
            if let Some(entry) = state.sequence.get_mut(&ballot.pointer()) {
                entry.audited_on_server = ballot.status.is_done();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.synced_state().sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `pointer` itself when it is part of the sequence.
    pub fn current_unit(&self, pointer: &BallotPointer) -> Result<BallotPointer, NavigationError> {
        let state = self.synced_state();
        state.index_of(pointer).map(|_| pointer.clone())
    }

    pub fn advance(&self, pointer: &BallotPointer) -> Result<BallotPointer, NavigationError> {
        self.synced_state().next_of(pointer)
    }

    pub fn retreat(&self, pointer: &BallotPointer) -> Result<BallotPointer, NavigationError> {
        let state = self.synced_state();
        match state.index_of(pointer)? {
            0 => Err(NavigationError::StartOfSequence),
            index => state.pointer_at(index - 1).ok_or(NavigationError::StartOfSequence),
        }
    }

    pub fn first_unit(&self) -> Option<BallotPointer> {
        self.synced_state().pointer_at(0)
    }

    /// First ballot not yet audited; the redirect target for stale links.
    pub fn first_unaudited(&self) -> Option<BallotPointer> {
        let state = self.synced_state();
        state
            .sequence
            .iter()
            .find(|(pointer, ballot)| !state.is_audited(pointer, ballot))
            .map(|(pointer, _)| pointer.clone())
    }

    pub fn cursor(&self) -> Option<BallotPointer> {
        self.synced_state().cursor.clone()
    }

    /// Move the cursor to `pointer`.
    pub fn jump_to(&self, pointer: &BallotPointer) -> Result<BallotPointer, NavigationError> {
        let mut state = self.synced_state();
        state.index_of(pointer)?;
        state.cursor = Some(pointer.clone());
        Ok(pointer.clone())
    }

    pub fn progress(&self) -> Progress {
        let state = self.synced_state();
        let audited = state
            .sequence
            .iter()
            .filter(|(pointer, ballot)| state.is_audited(pointer, ballot))
            .count();
        Progress {
            audited,
            total: state.sequence.len(),
        }
    }

    /// Every assigned ballot has been audited.
    pub fn is_complete(&self) -> bool {
        let progress = self.progress();
        progress.total > 0 && progress.audited == progress.total
    }

    /// Start a record for the ballot at `pointer`.
    pub fn begin(&self, pointer: &BallotPointer, interpretation: BallotInterpretation) -> Result<SubmissionRecord, NavigationError> {
        let mut state = self.synced_state();
        let index = state.index_of(pointer)?;
        let ballot_id = state
            .sequence
            .get_index(index)
            .map(|(_, ballot)| ballot.ballot_id.clone())
            .ok_or_else(|| NavigationError::NotFound(pointer.clone()))?;
        let record = SubmissionRecord::new(pointer.clone(), ballot_id, interpretation);
        state.records.insert(pointer.clone(), record.clone());
        Ok(record)
    }

    /// The locally held record for `pointer`, if any.
    pub fn record(&self, pointer: &BallotPointer) -> Option<SubmissionRecord> {
        self.synced_state().records.get(pointer).cloned()
    }

    /// Submit a confirmed record.
    ///
    /// - Unreviewed records are rejected without a request.
    /// - A second submission for a pointer already in flight is rejected.
    /// - On acceptance the record is dropped and the cursor moves to the next
    ///   ballot, if it was still on this one.
    /// - On rejection the record is marked failed and the cursor stays.
    /// - On a transport failure the record stays pending for a retry.
    pub async fn submit(&self, pointer: &BallotPointer, mut record: SubmissionRecord) -> Result<SubmitOutcome, NavigatorError> {
        if !record.reviewed {
            return Err(NavigatorError::NotReviewed(pointer.clone()));
        }
        if &record.pointer != pointer {
            return Err(NavigatorError::RecordMismatch {
                pointer: pointer.clone(),
                record: record.pointer.to_string(),
            });
        }

        let ballot_id = self.synced_state().sequence.get(pointer).map(|ballot| ballot.ballot_id.clone());
        let Some(ballot_id) = ballot_id else {
            warn!(%pointer, "submission for a ballot outside the assignment; resyncing");
            self.sync.resync(self.resource());
            return Err(NavigatorError::Stale(pointer.clone()));
        };
        if record.ballot_id != ballot_id {
            return Err(NavigatorError::RecordMismatch {
                pointer: pointer.clone(),
                record: record.ballot_id,
            });
        }

        let Some(_guard) = SubmitGuard::acquire(&self.in_flight, pointer) else {
            debug!(%pointer, "submission already in flight");
            return Err(NavigatorError::SubmissionInFlight(pointer.clone()));
        };

        record.outcome = Some(SubmissionOutcome::Pending);
        lock(&self.state).records.insert(pointer.clone(), record.clone());

        let request = ApiRequest::post(endpoints::board_ballot(&self.scope, &ballot_id), record.wire_body());
        let outcome = self
            .sync
            .dispatcher()
            .perform::<Value>(ActionKind::SubmitBallot, request)
            .await?;

        match outcome {
            Outcome::Ok(_) => {
                let next = {
                    let mut state = lock(&self.state);
                    state.records.remove(pointer);
                    state.accepted.insert(pointer.clone());
                    let next = state.next_of(pointer).ok();
                    if state.cursor.is_none() || state.cursor.as_ref() == Some(pointer) {
                        state.cursor = Some(next.clone().unwrap_or_else(|| pointer.clone()));
                    }
                    next
                };
                info!(%pointer, ballot = %ballot_id, "ballot submitted");
                self.sync.resync(self.resource());
                Ok(SubmitOutcome::Accepted { next })
            }
            Outcome::Fail(rejection) => {
                if let Some(stored) = lock(&self.state).records.get_mut(pointer) {
                    stored.outcome = Some(SubmissionOutcome::Failed);
                }
                Ok(SubmitOutcome::Rejected(rejection))
            }
        }
    }
}
