//! Stage-affecting mutations.
//!
//! Each action checks the stage gate (or the required phase) against the
//! current snapshot first, so a disallowed edit never reaches the server.
//! Accepted actions refresh the resources they affect.

use arlo_api::{ApiRequest, TransportError, endpoints};
use arlo_types::{AuditBoardScope, AuditPhase, Contest, FailureKind, SetupStage};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, warn};

use crate::dispatch::{ActionDispatcher, ActionKind, Rejection};
use crate::gate::{self, GateError};
use crate::sync::{Resource, SyncEngine, SyncStatus};

/// Largest risk limit offered for an audit, in percent.
pub const MAX_RISK_LIMIT: u8 = 20;
/// Audit boards are staffed by at most two people.
pub const MAX_BOARD_MEMBERS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditBoardMember {
    pub name: String,
    #[serde(default)]
    pub affiliation: Option<String>,
}

impl AuditBoardMember {
    pub fn new(name: impl Into<String>, affiliation: Option<&str>) -> Self {
        Self {
            name: name.into(),
            affiliation: affiliation.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ActionError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ActionError::Gate(_) => FailureKind::Gate,
            ActionError::Invalid(_) => FailureKind::Validation,
            ActionError::Rejected(rejection) => rejection.failure_kind(),
            ActionError::Transport(_) => FailureKind::Transport,
        }
    }
}

/// Administrator and audit board mutations for one election.
#[derive(Debug, Clone)]
pub struct AuditActions {
    sync: SyncEngine,
}

impl AuditActions {
    pub fn new(sync: SyncEngine) -> Self {
        Self { sync }
    }

    fn dispatcher(&self) -> &ActionDispatcher {
        self.sync.dispatcher()
    }

    fn election_id(&self) -> &str {
        self.sync.election_id()
    }

    /// Mark exactly `contest_ids` as targeted; every other contest becomes opportunistic.
    pub async fn select_contests(&self, contest_ids: &[&str]) -> Result<(), ActionError> {
        let snapshot = self.sync.snapshot();
        gate::ensure_editable(&snapshot, SetupStage::TargetContests)?;
        if contest_ids.is_empty() {
            return Err(ActionError::invalid("select at least one contest to target"));
        }
        if let Some(unknown) = contest_ids.iter().find(|id| !snapshot.contests.contains_key(**id)) {
            return Err(ActionError::invalid(format!("unknown contest '{unknown}'")));
        }

        let contests: Vec<Contest> = snapshot
            .contests
            .values()
            .map(|contest| Contest {
                is_targeted: contest_ids.contains(&contest.id.as_str()),
                ..contest.clone()
            })
            .collect();
        let request = ApiRequest::post(endpoints::contests(self.election_id()), json!({ "contests": contests }));
        self.run(ActionKind::SelectContests, request).await?;

        info!(targeted = contest_ids.len(), "contests selected");
        self.refresh_all(&[Resource::Contests, Resource::AuditStatus]).await;
        Ok(())
    }

    pub async fn set_random_seed(&self, random_seed: &str, risk_limit: u8) -> Result<(), ActionError> {
        let snapshot = self.sync.snapshot();
        gate::ensure_editable(&snapshot, SetupStage::AuditSettings)?;
        let random_seed = random_seed.trim();
        if random_seed.is_empty() {
            return Err(ActionError::invalid("random seed must not be empty"));
        }
        if !(1..=MAX_RISK_LIMIT).contains(&risk_limit) {
            return Err(ActionError::invalid(format!("risk limit must be between 1 and {MAX_RISK_LIMIT} percent")));
        }

        let request = ApiRequest::post(
            endpoints::settings(self.election_id()),
            json!({ "randomSeed": random_seed, "riskLimit": risk_limit }),
        );
        self.run(ActionKind::SetRandomSeed, request).await?;

        info!(risk_limit, "audit settings saved");
        self.refresh_all(&[Resource::AuditStatus]).await;
        Ok(())
    }

    /// Publish ballots for `round_num`. Round 1 launches the audit and needs a sample size.
    pub async fn start_round(&self, round_num: u32, sample_size: Option<u32>) -> Result<(), ActionError> {
        let snapshot = self.sync.snapshot();
        if round_num == 1 {
            gate::ensure_editable(&snapshot, SetupStage::ReviewAndLaunch)?;
        } else {
            gate::ensure_phase(&snapshot, AuditPhase::AuditOngoing)?;
        }

        let expected = snapshot.rounds.len() as u32 + 1;
        if round_num != expected {
            return Err(ActionError::invalid(format!("the next round number must be {expected}")));
        }
        if let Some(previous) = snapshot.current_round()
            && !previous.is_complete()
        {
            return Err(ActionError::invalid(format!("round {} is not complete", previous.round_num)));
        }
        if round_num == 1 && sample_size.is_none() {
            return Err(ActionError::invalid("the first round needs a sample size"));
        }

        let mut body = json!({ "roundNum": round_num });
        if let Some(sample_size) = sample_size {
            body["sampleSize"] = json!(sample_size);
        }
        self.run(ActionKind::StartRound, ApiRequest::post(endpoints::rounds(self.election_id()), body))
            .await?;

        info!(round_num, "round started");
        self.refresh_all(&[Resource::AuditStatus, Resource::Rounds, Resource::Jurisdictions])
            .await;
        Ok(())
    }

    /// Clear the audit back to `NotStarted`. Allowed in any phase.
    pub async fn reset_audit(&self) -> Result<(), ActionError> {
        let request = ApiRequest::post(endpoints::audit_reset(self.election_id()), json!({}));
        self.run(ActionKind::ResetAudit, request).await?;

        self.sync.apply_reset();
        self.refresh_all(&[Resource::AuditStatus, Resource::Rounds, Resource::Jurisdictions, Resource::Contests])
            .await;
        Ok(())
    }

    pub async fn sign_in_audit_board(&self, scope: &AuditBoardScope, members: &[AuditBoardMember]) -> Result<(), ActionError> {
        gate::ensure_phase(&self.sync.snapshot(), AuditPhase::AuditOngoing)?;
        if members.is_empty() || members.len() > MAX_BOARD_MEMBERS {
            return Err(ActionError::invalid(format!("an audit board has 1 to {MAX_BOARD_MEMBERS} members")));
        }
        if members.iter().any(|member| member.name.trim().is_empty()) {
            return Err(ActionError::invalid("every member needs a name"));
        }

        let body = serde_json::to_value(members).map_err(|error| ActionError::invalid(error.to_string()))?;
        self.run(ActionKind::SignInAuditBoard, ApiRequest::post(endpoints::board_members(scope), body))
            .await?;

        info!(board = %scope.audit_board_id, members = members.len(), "audit board signed in");
        self.refresh_all(&[Resource::BoardBallots(scope.clone())]).await;
        Ok(())
    }

    async fn run(&self, kind: ActionKind, request: ApiRequest) -> Result<Value, ActionError> {
        let outcome = self.dispatcher().perform::<Value>(kind, request).await?;
        Ok(outcome.into_result()?)
    }

    async fn refresh_all(&self, resources: &[Resource]) {
        for resource in resources {
            match self.sync.refresh(resource).await {
                Ok(SyncStatus::Applied) | Ok(SyncStatus::Skipped) => {}
                Ok(SyncStatus::Discarded) => warn!(%resource, "refresh after action was discarded"),
                Err(error) => warn!(%resource, %error, "refresh after action failed"),
            }
        }
    }
}
