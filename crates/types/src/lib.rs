//! Shared data model for the Arlo audit sync client.
//!
//! Everything in this crate is plain data: the canonical [`WorkflowState`]
//! snapshot produced by the sync engine, the setup stage descriptors derived
//! from it, and the ballot-level types used while an audit board walks its
//! assigned sample. No I/O happens here.

pub mod ballot;
pub mod stage;
pub mod workflow;

use std::{error::Error, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub use ballot::{
    AssignedBallot, AuditBoardScope, BallotAssignment, BallotInterpretation, BallotPointer, BallotStatus, BatchRef, SubmissionOutcome,
    SubmissionRecord,
};
pub use stage::{SetupStage, StageAccessibility, StageDescriptor};
pub use workflow::{
    AuditPhase, AuditSettings, Contest, ContestChoice, JurisdictionStatus, ManifestStatus, PhaseTransition, Round, RoundProgress,
    RoundStatus, RoundTotals, WorkflowState,
};

/// Classification of a failed operation.
///
/// Every failure surfaced by the client maps onto exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The request never produced a server decision (timeout, refused, reset).
    Transport,
    /// The server evaluated the request and refused it.
    Validation,
    /// The local snapshot disagrees with the server in a way that cannot be applied.
    StaleState,
    /// Rejected locally before any request was made.
    Gate,
    /// Malformed data or a broken local invariant.
    Internal,
}

impl FailureKind {
    /// Only transport failures are worth retrying without user input.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Transport)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Transport => "transport",
            FailureKind::Validation => "validation",
            FailureKind::StaleState => "stale_state",
            FailureKind::Gate => "gate",
            FailureKind::Internal => "internal",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAuditPhaseError(String);

impl fmt::Display for ParseAuditPhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown audit phase '{}'", self.0)
    }
}

impl Error for ParseAuditPhaseError {}

impl FromStr for AuditPhase {
    type Err = ParseAuditPhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "NOT_STARTED" => Ok(AuditPhase::NotStarted),
            "CONTESTS_SELECTED" => Ok(AuditPhase::ContestsSelected),
            "SEED_SET" => Ok(AuditPhase::SeedSet),
            "AUDIT_ONGOING" => Ok(AuditPhase::AuditOngoing),
            "COMPLETE" => Ok(AuditPhase::Complete),
            "ERRORED" => Ok(AuditPhase::Errored),
            _ => Err(ParseAuditPhaseError(s.to_string())),
        }
    }
}
