use serde::{Deserialize, Serialize};

/// Steps of the administrator's audit setup, in presentation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SetupStage {
    Participants,
    TargetContests,
    OpportunisticContests,
    AuditSettings,
    ReviewAndLaunch,
}

impl SetupStage {
    /// The standard setup sequence.
    pub const SEQUENCE: [SetupStage; 5] = [
        SetupStage::Participants,
        SetupStage::TargetContests,
        SetupStage::OpportunisticContests,
        SetupStage::AuditSettings,
        SetupStage::ReviewAndLaunch,
    ];

    pub fn title(self) -> &'static str {
        match self {
            SetupStage::Participants => "Participants",
            SetupStage::TargetContests => "Target Contests",
            SetupStage::OpportunisticContests => "Opportunistic Contests",
            SetupStage::AuditSettings => "Audit Settings",
            SetupStage::ReviewAndLaunch => "Review & Launch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageAccessibility {
    Locked,
    Unlocked,
    Complete,
}

/// Derived view of one setup stage. Recomputed from state, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDescriptor {
    pub stage: SetupStage,
    pub title: String,
    pub accessibility: StageAccessibility,
    /// Zero-based position within the sequence it was computed for.
    pub position: usize,
    /// Visible but read-only because the audit has launched.
    pub frozen: bool,
}

impl StageDescriptor {
    pub fn is_editable(&self) -> bool {
        !self.frozen && self.accessibility != StageAccessibility::Locked
    }
}
