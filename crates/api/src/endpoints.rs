//! Path builders for the audit server's REST endpoints.
//!
//! Every identifier is percent-encoded as a single path segment, so ids
//! containing `/` or spaces cannot escape their position in the path.

use arlo_types::AuditBoardScope;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

/// Characters escaped inside a path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn segment(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT).to_string()
}

fn election(election_id: &str) -> String {
    format!("/election/{}", segment(election_id))
}

pub fn audit_status(election_id: &str) -> String {
    format!("{}/audit/status", election(election_id))
}

pub fn audit_reset(election_id: &str) -> String {
    format!("{}/audit/reset", election(election_id))
}

pub fn rounds(election_id: &str) -> String {
    format!("{}/round", election(election_id))
}

pub fn jurisdictions(election_id: &str) -> String {
    format!("{}/jurisdiction", election(election_id))
}

pub fn contests(election_id: &str) -> String {
    format!("{}/contest", election(election_id))
}

pub fn settings(election_id: &str) -> String {
    format!("{}/settings", election(election_id))
}

fn audit_board(scope: &AuditBoardScope) -> String {
    format!(
        "{}/jurisdiction/{}/round/{}/audit-board/{}",
        election(&scope.election_id),
        segment(&scope.jurisdiction_id),
        segment(&scope.round_id),
        segment(&scope.audit_board_id)
    )
}

pub fn board_ballots(scope: &AuditBoardScope) -> String {
    format!("{}/ballots", audit_board(scope))
}

pub fn board_ballot(scope: &AuditBoardScope, ballot_id: &str) -> String {
    format!("{}/ballots/{}", audit_board(scope), segment(ballot_id))
}

pub fn board_members(scope: &AuditBoardScope) -> String {
    format!("{}/members", audit_board(scope))
}
