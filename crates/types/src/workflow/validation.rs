//! Structural checks applied to decoded server payloads.
//!
//! A payload that fails these checks is never merged into the canonical
//! state. The sync engine reports it as an internal failure and keeps the
//! previous snapshot.

use std::collections::HashSet;

use thiserror::Error;

use super::{Round, RoundProgress};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowValidationError {
    #[error("round numbers must start at 1 and be contiguous: expected {expected}, found {found}")]
    RoundNumbering { expected: u32, found: u32 },
    #[error("round {round_num} for jurisdiction '{jurisdiction_id}' audited {audited} of {sampled} ballots")]
    AuditedExceedsSampled {
        round_num: u32,
        jurisdiction_id: String,
        audited: u32,
        sampled: u32,
    },
    #[error("duplicate jurisdiction id '{0}'")]
    DuplicateJurisdiction(String),
    #[error("ballot counts invalid: audited {audited} of {sampled}")]
    ProgressOutOfRange { audited: u32, sampled: u32 },
}

/// Rounds must be ordered `1..=n` with no gaps and sane counts.
pub fn validate_rounds(rounds: &[Round]) -> Result<(), WorkflowValidationError> {
    for (index, round) in rounds.iter().enumerate() {
        let expected = index as u32 + 1;
        if round.round_num != expected {
            return Err(WorkflowValidationError::RoundNumbering {
                expected,
                found: round.round_num,
            });
        }
        for (jurisdiction_id, progress) in &round.jurisdictions {
            if progress.num_ballots_audited > progress.num_ballots_sampled {
                return Err(WorkflowValidationError::AuditedExceedsSampled {
                    round_num: round.round_num,
                    jurisdiction_id: jurisdiction_id.clone(),
                    audited: progress.num_ballots_audited,
                    sampled: progress.num_ballots_sampled,
                });
            }
        }
    }
    Ok(())
}

pub fn validate_round_progress(progress: &RoundProgress) -> Result<(), WorkflowValidationError> {
    if progress.num_ballots_audited > progress.num_ballots_sampled {
        return Err(WorkflowValidationError::ProgressOutOfRange {
            audited: progress.num_ballots_audited,
            sampled: progress.num_ballots_sampled,
        });
    }
    Ok(())
}

pub fn validate_jurisdiction_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Result<(), WorkflowValidationError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(WorkflowValidationError::DuplicateJurisdiction(id.to_string()));
        }
    }
    Ok(())
}
