//! Canonical workflow snapshot for one election.
//!
//! A [`WorkflowState`] is the only place server-derived audit data lives on
//! the client. The sync engine replaces its portions wholesale on every
//! successful fetch; views and the stage gate read it and never mutate it.

pub mod validation;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use validation::{WorkflowValidationError, validate_jurisdiction_ids, validate_round_progress, validate_rounds};

use crate::ballot::BallotAssignment;

/// Lifecycle phase of an audit as reported by the server.
///
/// The non-error phases are totally ordered. `Errored` sits outside that
/// order: it can be entered from any phase and is only left by a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditPhase {
    #[default]
    NotStarted,
    ContestsSelected,
    SeedSet,
    AuditOngoing,
    Complete,
    Errored,
}

/// How an observed phase relates to the one currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTransition {
    /// Same phase; nothing to do.
    Stay,
    /// Forward along the phase order, or into `Errored`.
    Advance,
    /// Back to `NotStarted`, either local or server initiated.
    Reset,
    /// Backwards without a reset. Never applied.
    Regress,
}

impl AuditPhase {
    fn rank(self) -> Option<u8> {
        match self {
            AuditPhase::NotStarted => Some(0),
            AuditPhase::ContestsSelected => Some(1),
            AuditPhase::SeedSet => Some(2),
            AuditPhase::AuditOngoing => Some(3),
            AuditPhase::Complete => Some(4),
            AuditPhase::Errored => None,
        }
    }

    /// Classify the move from `self` to `next`.
    pub fn transition(self, next: AuditPhase) -> PhaseTransition {
        if self == next {
            return PhaseTransition::Stay;
        }
        if next == AuditPhase::NotStarted {
            return PhaseTransition::Reset;
        }
        if next == AuditPhase::Errored {
            return PhaseTransition::Advance;
        }
        match (self.rank(), next.rank()) {
            (Some(current), Some(observed)) if observed > current => PhaseTransition::Advance,
            _ => PhaseTransition::Regress,
        }
    }

    /// Setup configuration is read-only once sampling has begun.
    pub fn is_frozen(self) -> bool {
        matches!(self, AuditPhase::AuditOngoing | AuditPhase::Complete)
    }

    /// True for phases at or past `other` in the phase order. `Errored` is never at or past anything.
    pub fn at_least(self, other: AuditPhase) -> bool {
        match (self.rank(), other.rank()) {
            (Some(current), Some(required)) => current >= required,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuditPhase::NotStarted => "NOT_STARTED",
            AuditPhase::ContestsSelected => "CONTESTS_SELECTED",
            AuditPhase::SeedSet => "SEED_SET",
            AuditPhase::AuditOngoing => "AUDIT_ONGOING",
            AuditPhase::Complete => "COMPLETE",
            AuditPhase::Errored => "ERRORED",
        }
    }
}

impl std::fmt::Display for AuditPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a round, derived from ballot counts rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStatus {
    NotStarted,
    InProgress,
    Complete,
}

/// Per-jurisdiction ballot counts for one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundProgress {
    pub num_ballots_sampled: u32,
    pub num_ballots_audited: u32,
}

impl RoundProgress {
    pub fn new(num_ballots_sampled: u32, num_ballots_audited: u32) -> Self {
        Self {
            num_ballots_sampled,
            num_ballots_audited,
        }
    }

    /// A jurisdiction with nothing sampled has nothing left to do.
    pub fn status(&self) -> RoundStatus {
        if self.num_ballots_audited >= self.num_ballots_sampled {
            RoundStatus::Complete
        } else if self.num_ballots_audited == 0 {
            RoundStatus::NotStarted
        } else {
            RoundStatus::InProgress
        }
    }

    pub fn remaining(&self) -> u32 {
        self.num_ballots_sampled.saturating_sub(self.num_ballots_audited)
    }
}

/// Ballot counts summed over a round's jurisdictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundTotals {
    pub num_ballots_sampled: u64,
    pub num_ballots_audited: u64,
}

/// One sampling round. Round numbers start at 1 and are contiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub id: String,
    pub round_num: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Progress keyed by jurisdiction id, in server order.
    #[serde(default)]
    pub jurisdictions: IndexMap<String, RoundProgress>,
}

impl Round {
    pub fn progress_for(&self, jurisdiction_id: &str) -> Option<&RoundProgress> {
        self.jurisdictions.get(jurisdiction_id)
    }

    /// Totals across every participating jurisdiction.
    pub fn totals(&self) -> RoundTotals {
        self.jurisdictions.values().fold(RoundTotals::default(), |acc, progress| RoundTotals {
            num_ballots_sampled: acc.num_ballots_sampled + u64::from(progress.num_ballots_sampled),
            num_ballots_audited: acc.num_ballots_audited + u64::from(progress.num_ballots_audited),
        })
    }

    /// Complete once every jurisdiction is, or the server has ended the round.
    pub fn status(&self) -> RoundStatus {
        if self.ended_at.is_some() {
            return RoundStatus::Complete;
        }
        if self.jurisdictions.is_empty() {
            return RoundStatus::NotStarted;
        }
        if self.jurisdictions.values().all(|progress| progress.status() == RoundStatus::Complete) {
            RoundStatus::Complete
        } else if self.jurisdictions.values().all(|progress| progress.num_ballots_audited == 0) {
            RoundStatus::NotStarted
        } else {
            RoundStatus::InProgress
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status() == RoundStatus::Complete
    }
}

/// Processing state of an uploaded ballot manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManifestStatus {
    /// Nothing uploaded yet.
    #[default]
    None,
    #[serde(alias = "READY_TO_PROCESS")]
    Processing,
    Processed,
    Errored,
}

/// A participating jurisdiction and its view of the current round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JurisdictionStatus {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub manifest: ManifestStatus,
    /// `None` until a round involving this jurisdiction exists.
    #[serde(default)]
    pub current_round: Option<RoundProgress>,
}

impl JurisdictionStatus {
    pub fn round_status(&self) -> Option<RoundStatus> {
        self.current_round.as_ref().map(RoundProgress::status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestChoice {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub num_votes: u64,
}

/// A contest on the ballot. Targeted contests drive sample sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_targeted: bool,
    #[serde(default = "default_one")]
    pub num_winners: u32,
    #[serde(default = "default_one")]
    pub votes_allowed: u32,
    #[serde(default)]
    pub choices: Vec<ContestChoice>,
}

fn default_one() -> u32 {
    1
}

impl Contest {
    pub fn choice(&self, choice_id: &str) -> Option<&ContestChoice> {
        self.choices.iter().find(|choice| choice.id == choice_id)
    }
}

/// Audit-wide settings captured during setup.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSettings {
    pub random_seed: Option<String>,
    /// Risk limit as a whole percentage (1..=20 in the server UI).
    pub risk_limit: Option<u8>,
    pub online: Option<bool>,
}

impl AuditSettings {
    pub fn is_complete(&self) -> bool {
        self.random_seed.as_deref().is_some_and(|seed| !seed.trim().is_empty()) && self.risk_limit.is_some()
    }
}

/// Client-side mirror of the server's audit workflow for one election.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub election_id: String,
    pub phase: AuditPhase,
    #[serde(default)]
    pub settings: AuditSettings,
    /// Rounds ordered by round number.
    #[serde(default)]
    pub rounds: Vec<Round>,
    #[serde(default)]
    pub jurisdictions: IndexMap<String, JurisdictionStatus>,
    #[serde(default)]
    pub contests: IndexMap<String, Contest>,
    /// Ballots assigned to the audit board this client is acting as, if any.
    #[serde(default)]
    pub assignment: Option<BallotAssignment>,
    /// Set on the first successful fetch; `None` means nothing is known yet.
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    pub fn new(election_id: impl Into<String>) -> Self {
        Self {
            election_id: election_id.into(),
            ..Self::default()
        }
    }

    pub fn is_synced(&self) -> bool {
        self.last_synced_at.is_some()
    }

    pub fn current_round(&self) -> Option<&Round> {
        self.rounds.last()
    }

    pub fn round(&self, round_num: u32) -> Option<&Round> {
        self.rounds.iter().find(|round| round.round_num == round_num)
    }

    pub fn targeted_contests(&self) -> impl Iterator<Item = &Contest> {
        self.contests.values().filter(|contest| contest.is_targeted)
    }

    pub fn is_frozen(&self) -> bool {
        self.phase.is_frozen()
    }

    /// Every jurisdiction has a processed manifest. False with no jurisdictions.
    pub fn manifests_processed(&self) -> bool {
        !self.jurisdictions.is_empty() && self.jurisdictions.values().all(|j| j.manifest == ManifestStatus::Processed)
    }

    /// Return to `NotStarted` and drop everything that depends on rounds.
    ///
    /// Jurisdictions and contests are kept; the next fetch reconciles them.
    pub fn reset(&mut self) {
        self.phase = AuditPhase::NotStarted;
        self.rounds.clear();
        self.assignment = None;
        for jurisdiction in self.jurisdictions.values_mut() {
            jurisdiction.current_round = None;
        }
    }
}
