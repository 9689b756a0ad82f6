//! Polling and ownership of the canonical workflow state.
//!
//! [`SyncEngine`] is the single writer of [`WorkflowState`]. Each resource
//! is fetched single-flight: a poll tick or refresh that arrives while a
//! fetch for the same resource is outstanding is dropped. Successful fetches
//! replace that resource's portion of the state wholesale and publish a new
//! snapshot on a `watch` channel, so readers never observe a partial update.
//!
//! Every resource carries a generation counter. A fetch records the
//! generation when it is issued and is only applied if the counter is
//! unchanged at apply time; [`SyncEngine::stop`] and
//! [`SyncEngine::apply_reset`] bump it, so late responses are discarded.

mod documents;
pub mod settle;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arlo_api::{ApiRequest, TransportError, endpoints};
use arlo_types::{AuditBoardScope, BallotAssignment, FailureKind, PhaseTransition, WorkflowState};
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::{ActionDispatcher, ActionKind, Rejection};
use documents::{AuditStatusDocument, BoardBallotsDocument, ContestsDocument, JurisdictionsDocument, RoundsDocument, WireDocument};
pub use settle::SettlePredicate;

/// Shortest period a poll will tick at.
const MIN_TICK: Duration = Duration::from_millis(1);

/// A server resource that owns one portion of the workflow state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    AuditStatus,
    Rounds,
    Jurisdictions,
    Contests,
    /// Ballots assigned to one audit board.
    BoardBallots(AuditBoardScope),
}

impl Resource {
    /// Key used for single-flight and generation tracking.
    pub fn key(&self) -> String {
        match self {
            Resource::AuditStatus => "audit-status".into(),
            Resource::Rounds => "rounds".into(),
            Resource::Jurisdictions => "jurisdictions".into(),
            Resource::Contests => "contests".into(),
            Resource::BoardBallots(scope) => format!("ballots:{scope}"),
        }
    }

    fn action_kind(&self) -> ActionKind {
        match self {
            Resource::AuditStatus => ActionKind::FetchAuditStatus,
            Resource::Rounds => ActionKind::FetchRounds,
            Resource::Jurisdictions => ActionKind::FetchJurisdictions,
            Resource::Contests => ActionKind::FetchContests,
            Resource::BoardBallots(_) => ActionKind::FetchBallots,
        }
    }

    fn request(&self, election_id: &str) -> ApiRequest {
        let path = match self {
            Resource::AuditStatus => endpoints::audit_status(election_id),
            Resource::Rounds => endpoints::rounds(election_id),
            Resource::Jurisdictions => endpoints::jurisdictions(election_id),
            Resource::Contests => endpoints::contests(election_id),
            Resource::BoardBallots(scope) => endpoints::board_ballots(scope),
        };
        ApiRequest::get(path)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// What happened to a single fetch that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// The response replaced the resource's portion of the state.
    Applied,
    /// Another fetch for the resource was already in flight.
    Skipped,
    /// The response arrived after a stop or reset and was dropped.
    Discarded,
}

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error("stale {resource}: {message}")]
    Stale { resource: String, message: String },
}

impl SyncError {
    pub fn stale(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stale {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SyncError::Transport(_) => FailureKind::Transport,
            SyncError::Rejected(rejection) => rejection.failure_kind(),
            SyncError::Stale { .. } => FailureKind::StaleState,
        }
    }
}

/// Sync lifecycle events, published for logging and UI hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Applied { resource: String, generation: u64 },
    Skipped { resource: String },
    Discarded { resource: String, generation: u64 },
    Failed { resource: String, kind: FailureKind, message: String },
    Stale { resource: String, message: String },
    Settled { resource: String },
    Stopped { resource: String },
}

/// Handle for a running poll. Pass it to [`SyncEngine::stop`] to end it.
#[derive(Debug)]
pub struct PollHandle {
    resource: String,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// True once stopped or settled.
    pub fn is_finished(&self) -> bool {
        self.token.is_cancelled() || self.task.is_finished()
    }

    /// Wait for the poll task to exit.
    pub async fn join(self) {
        if let Err(error) = self.task.await {
            warn!(resource = %self.resource, %error, "poll task ended abnormally");
        }
    }
}

struct SyncInner {
    election_id: String,
    dispatcher: ActionDispatcher,
    state_tx: watch::Sender<Arc<WorkflowState>>,
    generations: Mutex<HashMap<String, u64>>,
    in_flight: Mutex<HashSet<String>>,
    event_tx: broadcast::Sender<SyncEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases a single-flight reservation on every exit path.
struct Reservation<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    key: String,
}

impl<'a> Reservation<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<String>>, key: &str) -> Option<Self> {
        lock(in_flight).insert(key.to_string()).then(|| Self {
            in_flight,
            key: key.to_string(),
        })
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.key);
    }
}

/// Owns the canonical [`WorkflowState`] for one election.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<SyncInner>,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine").field("election_id", &self.inner.election_id).finish()
    }
}

impl SyncEngine {
    pub fn new(election_id: impl Into<String>, dispatcher: ActionDispatcher) -> Self {
        let election_id = election_id.into();
        let (state_tx, _rx) = watch::channel(Arc::new(WorkflowState::new(election_id.clone())));
        let (event_tx, _rx) = broadcast::channel(128);
        Self {
            inner: Arc::new(SyncInner {
                election_id,
                dispatcher,
                state_tx,
                generations: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
                event_tx,
            }),
        }
    }

    pub fn election_id(&self) -> &str {
        &self.inner.election_id
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.inner.dispatcher
    }

    /// The latest complete snapshot.
    pub fn snapshot(&self) -> Arc<WorkflowState> {
        self.inner.state_tx.borrow().clone()
    }

    /// Receiver notified on every state replacement.
    pub fn subscribe(&self) -> watch::Receiver<Arc<WorkflowState>> {
        self.inner.state_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Fetch `resource` now, then every `interval` until settled or stopped.
    pub fn start(&self, resource: Resource, interval: Duration, settle: SettlePredicate) -> PollHandle {
        let key = resource.key();
        let token = CancellationToken::new();
        info!(resource = %key, interval_ms = interval.as_millis() as u64, "polling started");

        let engine = self.clone();
        let poll_token = token.clone();
        let task = tokio::spawn(async move { engine.run_poll(resource, interval.max(MIN_TICK), settle, poll_token).await });

        PollHandle { resource: key, token, task }
    }

    /// Stop a poll. Safe to call at any time and more than once.
    ///
    /// Any fetch for the resource still in flight is discarded when it resolves.
    pub fn stop(&self, handle: &PollHandle) {
        let generation = self.bump_generation(&handle.resource);
        handle.token.cancel();
        info!(resource = %handle.resource, generation, "polling stopped");
    }

    /// One fetch of `resource`, subject to the same single-flight rule as polls.
    pub async fn refresh(&self, resource: &Resource) -> Result<SyncStatus, SyncError> {
        let key = resource.key();
        let Some(_reservation) = Reservation::acquire(&self.inner.in_flight, &key) else {
            debug!(resource = %key, "fetch already in flight; dropping");
            self.emit(SyncEvent::Skipped { resource: key });
            return Ok(SyncStatus::Skipped);
        };
        let generation = self.current_generation(&key);

        let result = self.fetch_and_apply(resource, &key, generation).await;
        match &result {
            Err(SyncError::Stale { message, .. }) => {
                warn!(resource = %key, %message, "stale response; resyncing");
                self.emit(SyncEvent::Stale {
                    resource: key.clone(),
                    message: message.clone(),
                });
                self.resync_dependents(resource);
            }
            Err(error) => {
                self.emit(SyncEvent::Failed {
                    resource: key.clone(),
                    kind: error.failure_kind(),
                    message: error.to_string(),
                });
            }
            Ok(_) => {}
        }
        result
    }

    /// Refresh `resource` in the background. Failures are logged.
    pub fn resync(&self, resource: Resource) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(error) = engine.refresh(&resource).await {
                debug!(resource = %resource, %error, "background resync failed");
            }
        });
    }

    /// Clear round-dependent state after an administrative reset.
    ///
    /// Every in-flight fetch is invalidated so pre-reset data cannot be
    /// re-applied.
    pub fn apply_reset(&self) {
        let mut generations = lock(&self.inner.generations);
        for generation in generations.values_mut() {
            *generation += 1;
        }
        let mut next = (**self.inner.state_tx.borrow()).clone();
        next.reset();
        self.inner.state_tx.send_replace(Arc::new(next));
        drop(generations);
        info!(election = %self.inner.election_id, "workflow reset applied");
    }

    async fn run_poll(self, resource: Resource, interval: Duration, settle: SettlePredicate, token: CancellationToken) {
        let key = resource.key();
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.refresh(&resource).await {
                Ok(SyncStatus::Applied) if !token.is_cancelled() => {
                    if settle(&self.snapshot()) {
                        info!(resource = %key, "resource settled");
                        self.emit(SyncEvent::Settled { resource: key });
                        return;
                    }
                }
                Ok(_) => {}
                Err(error) => debug!(resource = %key, %error, "poll fetch failed"),
            }
        }

        self.emit(SyncEvent::Stopped { resource: key });
    }

    async fn fetch_and_apply(&self, resource: &Resource, key: &str, generation: u64) -> Result<SyncStatus, SyncError> {
        match resource {
            Resource::AuditStatus => {
                let document: AuditStatusDocument = self.fetch(resource).await?;
                self.apply(key, generation, |state| merge_audit_status(state, document))
            }
            Resource::Rounds => {
                let document: RoundsDocument = self.fetch(resource).await?;
                self.apply(key, generation, |state| {
                    state.rounds = document.rounds;
                    Ok(Merged::Replaced)
                })
            }
            Resource::Jurisdictions => {
                let document: JurisdictionsDocument = self.fetch(resource).await?;
                self.apply(key, generation, |state| {
                    state.jurisdictions = document.into_map();
                    Ok(Merged::Replaced)
                })
            }
            Resource::Contests => {
                let document: ContestsDocument = self.fetch(resource).await?;
                self.apply(key, generation, |state| {
                    state.contests = document.into_map();
                    Ok(Merged::Replaced)
                })
            }
            Resource::BoardBallots(scope) => {
                let document: BoardBallotsDocument = self.fetch(resource).await?;
                if document.round_id != scope.round_id {
                    return Err(SyncError::stale(
                        key,
                        format!("assignment is for round '{}', expected '{}'", document.round_id, scope.round_id),
                    ));
                }
                self.apply(key, generation, |state| {
                    state.assignment = Some(BallotAssignment {
                        round_id: document.round_id,
                        ballots: document.ballots,
                    });
                    Ok(Merged::Replaced)
                })
            }
        }
    }

    async fn fetch<T: WireDocument>(&self, resource: &Resource) -> Result<T, SyncError> {
        let request = resource.request(&self.inner.election_id);
        let outcome = self
            .inner
            .dispatcher
            .perform_validated(resource.action_kind(), request, |document: &T| document.validate())
            .await?;
        Ok(outcome.into_result()?)
    }

    /// Apply `merge` to a copy of the state and publish it, if `generation` is still current.
    fn apply<F>(&self, key: &str, generation: u64, merge: F) -> Result<SyncStatus, SyncError>
    where
        F: FnOnce(&mut WorkflowState) -> Result<Merged, String>,
    {
        let mut generations = lock(&self.inner.generations);
        if generations.get(key).copied().unwrap_or_default() != generation {
            drop(generations);
            debug!(resource = %key, generation, "late response discarded");
            self.emit(SyncEvent::Discarded {
                resource: key.to_string(),
                generation,
            });
            return Ok(SyncStatus::Discarded);
        }

        let mut next = (**self.inner.state_tx.borrow()).clone();
        let merged = merge(&mut next).map_err(|message| SyncError::stale(key, message))?;
        if merged == Merged::Reset {
            // Fetches issued before the reset must not repopulate cleared data.
            for (other, other_generation) in generations.iter_mut() {
                if other != key {
                    *other_generation += 1;
                }
            }
        }
        next.last_synced_at = Some(Utc::now());
        self.inner.state_tx.send_replace(Arc::new(next));
        drop(generations);

        debug!(resource = %key, generation, "state applied");
        self.emit(SyncEvent::Applied {
            resource: key.to_string(),
            generation,
        });
        Ok(SyncStatus::Applied)
    }

    fn resync_dependents(&self, resource: &Resource) {
        for dependent in [Resource::Rounds, Resource::Jurisdictions] {
            if &dependent != resource {
                self.resync(dependent);
            }
        }
    }

    fn current_generation(&self, key: &str) -> u64 {
        *lock(&self.inner.generations).entry(key.to_string()).or_insert(0)
    }

    fn bump_generation(&self, key: &str) -> u64 {
        let mut generations = lock(&self.inner.generations);
        let generation = generations.entry(key.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.inner.event_tx.send(event);
    }
}

/// Effect of a merge on the state beyond the resource's own portion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Merged {
    Replaced,
    /// The server reset the audit; round-dependent data was cleared.
    Reset,
}

fn merge_audit_status(state: &mut WorkflowState, document: AuditStatusDocument) -> Result<Merged, String> {
    if let Some(election_id) = &document.election_id
        && election_id != &state.election_id
    {
        return Err(format!("status is for election '{election_id}'"));
    }
    let merged = match state.phase.transition(document.phase) {
        PhaseTransition::Regress => {
            return Err(format!("phase moved back from {} to {}", state.phase, document.phase));
        }
        PhaseTransition::Reset => {
            info!(from = %state.phase, "server reset the audit");
            state.reset();
            Merged::Reset
        }
        PhaseTransition::Advance => {
            info!(from = %state.phase, to = %document.phase, "audit phase advanced");
            Merged::Replaced
        }
        PhaseTransition::Stay => Merged::Replaced,
    };
    state.settings = document.settings();
    state.phase = document.phase;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use arlo_types::{AuditPhase, ManifestStatus};
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::test_support::{ScriptedTransport, Step, ballots_doc, jurisdictions_doc, rounds_doc, status_doc};

    const STATUS: &str = "/election/e1/audit/status";
    const ROUNDS: &str = "/election/e1/round";

    fn engine_with(transport: &Arc<ScriptedTransport>) -> SyncEngine {
        SyncEngine::new("e1", ActionDispatcher::new(transport.clone()))
    }

    #[tokio::test]
    async fn refresh_replaces_resource_portion_and_notifies() {
        let transport = ScriptedTransport::new();
        transport.on_get(ROUNDS, Step::json(200, rounds_doc(&[(1, 10, 4)])));
        let engine = engine_with(&transport);
        let mut rx = engine.subscribe();
        assert!(!engine.snapshot().is_synced());

        let status = engine.refresh(&Resource::Rounds).await.expect("refresh");

        assert_eq!(status, SyncStatus::Applied);
        assert!(rx.has_changed().expect("sender alive"));
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.rounds.len(), 1);
        assert_eq!(snapshot.rounds[0].totals().num_ballots_audited, 4);
        assert!(snapshot.is_synced());
    }

    #[tokio::test]
    async fn malformed_body_leaves_prior_state_untouched() {
        let transport = ScriptedTransport::new();
        transport.on_get(ROUNDS, Step::json(200, rounds_doc(&[(1, 10, 4)])));
        transport.on_get(ROUNDS, Step::json(200, rounds_doc(&[(1, 10, 4), (3, 1, 0)])));
        let engine = engine_with(&transport);
        engine.refresh(&Resource::Rounds).await.expect("first refresh");
        let before = engine.snapshot();

        let error = engine.refresh(&Resource::Rounds).await.expect_err("gap in rounds");

        assert_eq!(error.failure_kind(), FailureKind::Internal);
        assert_eq!(*engine.snapshot(), *before);
    }

    #[tokio::test]
    async fn concurrent_refresh_is_dropped_while_one_is_in_flight() {
        let transport = ScriptedTransport::new();
        let gate = Arc::new(Notify::new());
        transport.on_get(ROUNDS, Step::gated(&gate, 200, rounds_doc(&[(1, 2, 0)])));
        transport.on_get(ROUNDS, Step::json(200, rounds_doc(&[(1, 2, 0)])));
        let engine = engine_with(&transport);

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.refresh(&Resource::Rounds).await }
        });
        tokio::task::yield_now().await;
        while transport.calls_to(ROUNDS) == 0 {
            tokio::task::yield_now().await;
        }

        let second = engine.refresh(&Resource::Rounds).await.expect("second");
        assert_eq!(second, SyncStatus::Skipped);

        gate.notify_one();
        assert_eq!(first.await.expect("join").expect("first"), SyncStatus::Applied);
        assert_eq!(transport.calls_to(ROUNDS), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_timer_never_overlaps_fetches() {
        let transport = ScriptedTransport::new();
        transport.on_get(STATUS, Step::delayed(Duration::from_millis(50), 200, status_doc("SEED_SET")));
        let engine = engine_with(&transport);

        let handle = engine.start(Resource::AuditStatus, Duration::from_millis(1), settle::never());
        time::sleep(Duration::from_millis(500)).await;
        engine.stop(&handle);
        handle.join().await;

        assert_eq!(transport.high_water(), 1);
        assert!(transport.calls_to(STATUS) >= 5);
        assert!(transport.calls_to(STATUS) <= 11);
    }

    #[tokio::test(start_paused = true)]
    async fn response_after_stop_is_discarded() {
        let transport = ScriptedTransport::new();
        let gate = Arc::new(Notify::new());
        transport.on_get(STATUS, Step::gated(&gate, 200, status_doc("AUDIT_ONGOING")));
        let engine = engine_with(&transport);
        let mut events = engine.events();

        let handle = engine.start(Resource::AuditStatus, Duration::from_secs(5), settle::never());
        while transport.calls_to(STATUS) == 0 {
            tokio::task::yield_now().await;
        }
        engine.stop(&handle);
        gate.notify_one();
        handle.join().await;

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.phase, AuditPhase::NotStarted);
        assert!(!snapshot.is_synced());

        let mut saw_discard = false;
        while let Ok(event) = events.try_recv() {
            saw_discard |= matches!(event, SyncEvent::Discarded { .. });
        }
        assert!(saw_discard);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_stops_once_settled() {
        let transport = ScriptedTransport::new();
        transport.on_get(ROUNDS, Step::json(200, rounds_doc(&[(1, 10, 6)])));
        transport.on_get(ROUNDS, Step::json(200, rounds_doc(&[(1, 10, 10)])));
        let engine = engine_with(&transport);
        let mut events = engine.events();

        let handle = engine.start(Resource::Rounds, Duration::from_secs(1), settle::round_complete(1));
        handle.join().await;

        assert_eq!(transport.calls_to(ROUNDS), 2);
        assert!(engine.snapshot().rounds[0].is_complete());
        let mut settled = false;
        while let Ok(event) = events.try_recv() {
            settled |= matches!(event, SyncEvent::Settled { .. });
        }
        assert!(settled);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_next_tick_prevents_further_fetches() {
        let transport = ScriptedTransport::new();
        transport.on_get(STATUS, Step::json(200, status_doc("SEED_SET")));
        let engine = engine_with(&transport);

        let handle = engine.start(Resource::AuditStatus, Duration::from_secs(2), settle::never());
        time::sleep(Duration::from_millis(100)).await;
        engine.stop(&handle);
        engine.stop(&handle);
        time::sleep(Duration::from_secs(10)).await;

        assert_eq!(transport.calls_to(STATUS), 1);
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn phase_regression_is_stale_and_not_applied() {
        let transport = ScriptedTransport::new();
        transport.on_get(STATUS, Step::json(200, status_doc("AUDIT_ONGOING")));
        transport.on_get(STATUS, Step::json(200, status_doc("SEED_SET")));
        let engine = engine_with(&transport);

        engine.refresh(&Resource::AuditStatus).await.expect("first");
        let error = engine.refresh(&Resource::AuditStatus).await.expect_err("regress");

        assert_eq!(error.failure_kind(), FailureKind::StaleState);
        assert_eq!(engine.snapshot().phase, AuditPhase::AuditOngoing);
    }

    #[tokio::test]
    async fn server_reset_clears_rounds_and_jurisdiction_progress() {
        let transport = ScriptedTransport::new();
        transport.on_get(STATUS, Step::json(200, status_doc("COMPLETE")));
        transport.on_get(STATUS, Step::json(200, status_doc("NOT_STARTED")));
        transport.on_get(ROUNDS, Step::json(200, rounds_doc(&[(1, 10, 10)])));
        transport.on_get(
            "/election/e1/jurisdiction",
            Step::json(
                200,
                json!({"jurisdictions": [{
                    "id": "j1", "name": "One",
                    "ballotManifest": {"processing": {"status": "PROCESSED"}},
                    "currentRoundStatus": {"numBallotsSampled": 10, "numBallotsAudited": 10}
                }]}),
            ),
        );
        let engine = engine_with(&transport);
        engine.refresh(&Resource::AuditStatus).await.expect("status");
        engine.refresh(&Resource::Rounds).await.expect("rounds");
        engine.refresh(&Resource::Jurisdictions).await.expect("jurisdictions");

        engine.refresh(&Resource::AuditStatus).await.expect("reset status");

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.phase, AuditPhase::NotStarted);
        assert!(snapshot.rounds.is_empty());
        assert!(snapshot.jurisdictions.values().all(|j| j.current_round.is_none()));
        assert_eq!(snapshot.jurisdictions["j1"].manifest, ManifestStatus::Processed);
    }

    #[tokio::test]
    async fn local_reset_invalidates_in_flight_fetches() {
        let transport = ScriptedTransport::new();
        let gate = Arc::new(Notify::new());
        transport.on_get(ROUNDS, Step::json(200, rounds_doc(&[(1, 4, 4)])));
        transport.on_get(ROUNDS, Step::gated(&gate, 200, rounds_doc(&[(1, 4, 4)])));
        let engine = engine_with(&transport);
        engine.refresh(&Resource::Rounds).await.expect("initial");

        let pending = tokio::spawn({
            let engine = engine.clone();
            async move { engine.refresh(&Resource::Rounds).await }
        });
        while transport.calls_to(ROUNDS) < 2 {
            tokio::task::yield_now().await;
        }
        engine.apply_reset();
        gate.notify_one();

        assert_eq!(pending.await.expect("join").expect("refresh"), SyncStatus::Discarded);
        assert!(engine.snapshot().rounds.is_empty());
    }

    #[tokio::test]
    async fn server_reset_invalidates_fetches_issued_before_it() {
        let transport = ScriptedTransport::new();
        let gate = Arc::new(Notify::new());
        transport.on_get(STATUS, Step::json(200, status_doc("COMPLETE")));
        transport.on_get(STATUS, Step::json(200, status_doc("NOT_STARTED")));
        transport.on_get(ROUNDS, Step::json(200, rounds_doc(&[(1, 4, 4)])));
        transport.on_get(ROUNDS, Step::gated(&gate, 200, rounds_doc(&[(1, 4, 4)])));
        transport.on_get(ROUNDS, Step::json(200, json!({"rounds": []})));
        let engine = engine_with(&transport);
        engine.refresh(&Resource::AuditStatus).await.expect("status");
        engine.refresh(&Resource::Rounds).await.expect("rounds");

        let late_rounds = tokio::spawn({
            let engine = engine.clone();
            async move { engine.refresh(&Resource::Rounds).await }
        });
        while transport.calls_to(ROUNDS) < 2 {
            tokio::task::yield_now().await;
        }
        engine.refresh(&Resource::AuditStatus).await.expect("reset status");
        gate.notify_one();

        assert_eq!(late_rounds.await.expect("join").expect("refresh"), SyncStatus::Discarded);
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.phase, AuditPhase::NotStarted);
        assert!(snapshot.rounds.is_empty());

        assert_eq!(engine.refresh(&Resource::Rounds).await.expect("after reset"), SyncStatus::Applied);
        assert!(engine.snapshot().rounds.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn huge_round_counts_settle_without_overflow() {
        let transport = ScriptedTransport::new();
        transport.on_get(
            ROUNDS,
            Step::json(
                200,
                json!({"rounds": [{
                    "id": "round-1", "roundNum": 1, "startedAt": "2026-03-01T12:00:00Z", "endedAt": null,
                    "jurisdictions": {
                        "j1": {"numBallotsSampled": 4000000000u64, "numBallotsAudited": 4000000000u64},
                        "j2": {"numBallotsSampled": 4000000000u64, "numBallotsAudited": 4000000000u64}
                    }
                }]}),
            ),
        );
        let engine = engine_with(&transport);

        let handle = engine.start(Resource::Rounds, Duration::from_secs(1), settle::round_complete(1));
        handle.join().await;

        assert_eq!(transport.calls_to(ROUNDS), 1);
        assert_eq!(engine.snapshot().rounds[0].totals().num_ballots_sampled, 8_000_000_000);
    }

    #[tokio::test]
    async fn ballots_for_another_round_are_stale() {
        let scope = AuditBoardScope {
            election_id: "e1".into(),
            jurisdiction_id: "j1".into(),
            round_id: "round-2".into(),
            audit_board_id: "b1".into(),
        };
        let resource = Resource::BoardBallots(scope.clone());
        let transport = ScriptedTransport::new();
        transport.on_get(
            &endpoints::board_ballots(&scope),
            Step::json(200, ballots_doc("round-1", &[("ballot-1", "batch-1", 1)])),
        );
        let engine = engine_with(&transport);

        let error = engine.refresh(&resource).await.expect_err("stale");

        assert!(matches!(error, SyncError::Stale { .. }));
        assert!(engine.snapshot().assignment.is_none());
    }

    #[tokio::test]
    async fn transport_failure_is_retryable_and_reported() {
        let transport = ScriptedTransport::new();
        transport.on_get(
            "/election/e1/contest",
            Step::Error(TransportError::connect("GET", "/election/e1/contest", "connection refused")),
        );
        let engine = engine_with(&transport);
        let mut events = engine.events();

        let error = engine.refresh(&Resource::Contests).await.expect_err("offline");

        assert!(error.failure_kind().is_retryable());
        assert!(matches!(
            events.try_recv(),
            Ok(SyncEvent::Failed {
                kind: FailureKind::Transport,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn jurisdictions_decode_into_keyed_map() {
        let transport = ScriptedTransport::new();
        transport.on_get("/election/e1/jurisdiction", Step::json(200, jurisdictions_doc(&["j1", "j2"])));
        let engine = engine_with(&transport);

        engine.refresh(&Resource::Jurisdictions).await.expect("refresh");

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.jurisdictions.keys().collect::<Vec<_>>(), vec!["j1", "j2"]);
        assert!(snapshot.manifests_processed());
    }
}
