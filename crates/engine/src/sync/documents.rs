//! Response documents for each polled resource.
//!
//! Decoding is followed by a structural check; a document that fails it is
//! reported as a `Fail` outcome and never reaches the canonical state.

use arlo_types::workflow::{validate_jurisdiction_ids, validate_round_progress, validate_rounds};
use arlo_types::{AssignedBallot, AuditPhase, AuditSettings, Contest, JurisdictionStatus, ManifestStatus, Round, RoundProgress};
use indexmap::IndexMap;
use serde::Deserialize;
use serde::de::DeserializeOwned;

pub(crate) trait WireDocument: DeserializeOwned {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuditStatusDocument {
    #[serde(default)]
    pub election_id: Option<String>,
    pub phase: AuditPhase,
    #[serde(default)]
    pub random_seed: Option<String>,
    #[serde(default)]
    pub risk_limit: Option<u8>,
    #[serde(default)]
    pub online: Option<bool>,
}

impl AuditStatusDocument {
    pub fn settings(&self) -> AuditSettings {
        AuditSettings {
            random_seed: self.random_seed.clone(),
            risk_limit: self.risk_limit,
            online: self.online,
        }
    }
}

impl WireDocument for AuditStatusDocument {}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RoundsDocument {
    pub rounds: Vec<Round>,
}

impl WireDocument for RoundsDocument {
    fn validate(&self) -> Result<(), String> {
        validate_rounds(&self.rounds).map_err(|error| error.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ProcessingEntry {
    status: ManifestStatus,
}

#[derive(Debug, Clone, Deserialize)]
struct BallotManifestEntry {
    #[serde(default)]
    processing: Option<ProcessingEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JurisdictionEntry {
    id: String,
    name: String,
    #[serde(default)]
    ballot_manifest: Option<BallotManifestEntry>,
    #[serde(default)]
    current_round_status: Option<RoundProgress>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct JurisdictionsDocument {
    jurisdictions: Vec<JurisdictionEntry>,
}

impl JurisdictionsDocument {
    pub fn into_map(self) -> IndexMap<String, JurisdictionStatus> {
        self.jurisdictions
            .into_iter()
            .map(|entry| {
                let manifest = entry
                    .ballot_manifest
                    .and_then(|manifest| manifest.processing)
                    .map(|processing| processing.status)
                    .unwrap_or_default();
                let status = JurisdictionStatus {
                    id: entry.id.clone(),
                    name: entry.name,
                    manifest,
                    current_round: entry.current_round_status,
                };
                (entry.id, status)
            })
            .collect()
    }
}

impl WireDocument for JurisdictionsDocument {
    fn validate(&self) -> Result<(), String> {
        validate_jurisdiction_ids(self.jurisdictions.iter().map(|entry| entry.id.as_str())).map_err(|error| error.to_string())?;
        for entry in &self.jurisdictions {
            if let Some(progress) = &entry.current_round_status {
                validate_round_progress(progress).map_err(|error| format!("jurisdiction '{}': {error}", entry.id))?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ContestsDocument {
    contests: Vec<Contest>,
}

impl ContestsDocument {
    pub fn into_map(self) -> IndexMap<String, Contest> {
        self.contests.into_iter().map(|contest| (contest.id.clone(), contest)).collect()
    }
}

impl WireDocument for ContestsDocument {
    fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for contest in &self.contests {
            if !seen.insert(contest.id.as_str()) {
                return Err(format!("duplicate contest id '{}'", contest.id));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BoardBallotsDocument {
    pub round_id: String,
    pub ballots: Vec<AssignedBallot>,
}

impl WireDocument for BoardBallotsDocument {}
