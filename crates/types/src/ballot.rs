//! Ballot-level types used by an audit board while recording interpretations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies the audit board whose ballots are being worked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditBoardScope {
    pub election_id: String,
    pub jurisdiction_id: String,
    pub round_id: String,
    pub audit_board_id: String,
}

impl fmt::Display for AuditBoardScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.election_id, self.jurisdiction_id, self.round_id, self.audit_board_id)
    }
}

/// Address of a physical ballot: its batch plus its position in that batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotPointer {
    pub batch_id: String,
    pub position: u32,
}

impl BallotPointer {
    pub fn new(batch_id: impl Into<String>, position: u32) -> Self {
        Self {
            batch_id: batch_id.into(),
            position,
        }
    }
}

impl fmt::Display for BallotPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.batch_id, self.position)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tabulator: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BallotStatus {
    #[default]
    NotAudited,
    Audited,
    NotFound,
}

impl BallotStatus {
    pub fn is_done(self) -> bool {
        !matches!(self, BallotStatus::NotAudited)
    }
}

/// A ballot the server sampled for this board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedBallot {
    pub id: String,
    pub batch: BatchRef,
    pub position: u32,
    #[serde(default)]
    pub status: BallotStatus,
}

impl AssignedBallot {
    pub fn pointer(&self) -> BallotPointer {
        BallotPointer::new(self.batch.id.clone(), self.position)
    }
}

/// Ballots assigned to one board for one round, in server order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotAssignment {
    pub round_id: String,
    pub ballots: Vec<AssignedBallot>,
}

impl BallotAssignment {
    pub fn find(&self, pointer: &BallotPointer) -> Option<&AssignedBallot> {
        self.ballots
            .iter()
            .find(|ballot| ballot.batch.id == pointer.batch_id && ballot.position == pointer.position)
    }
}

/// What the board recorded for a ballot.
///
/// Serializes to the body the ballot endpoint expects, e.g.
/// `{"interpretation":"VOTE","choiceIds":["c1"]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "interpretation", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BallotInterpretation {
    Vote {
        #[serde(rename = "choiceIds")]
        choice_ids: Vec<String>,
    },
    Blank,
    CantAgree,
    /// The physical ballot could not be located.
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionOutcome {
    Pending,
    Ok,
    Failed,
}

/// A locally recorded interpretation awaiting confirmation and submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub pointer: BallotPointer,
    pub ballot_id: String,
    pub interpretation: BallotInterpretation,
    #[serde(default)]
    pub comment: Option<String>,
    /// Set once the board has confirmed the interpretation on the review screen.
    #[serde(default)]
    pub reviewed: bool,
    /// `None` until a submission has been attempted.
    #[serde(default)]
    pub outcome: Option<SubmissionOutcome>,
}

impl SubmissionRecord {
    pub fn new(pointer: BallotPointer, ballot_id: impl Into<String>, interpretation: BallotInterpretation) -> Self {
        Self {
            pointer,
            ballot_id: ballot_id.into(),
            interpretation,
            comment: None,
            reviewed: false,
            outcome: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Mark the record as confirmed by the board.
    pub fn confirm(&mut self) {
        self.reviewed = true;
    }

    /// Request body for the ballot endpoint.
    pub fn wire_body(&self) -> serde_json::Value {
        let mut body = serde_json::to_value(&self.interpretation).unwrap_or_else(|_| serde_json::json!({}));
        if let (Some(comment), Some(object)) = (self.comment.as_ref(), body.as_object_mut()) {
            object.insert("comment".into(), serde_json::Value::String(comment.clone()));
        }
        body
    }
}
