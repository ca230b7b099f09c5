//! Campaign lifecycle transition table

use courier_storage::models::CampaignStatus;

/// An operation that moves a campaign between statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CampaignAction {
    /// Operator start, or the supervisor promoting a due schedule
    Start,
    Schedule,
    Pause,
    Resume,
    Cancel,
    /// The worker ran out of recipients
    Complete,
}

impl CampaignAction {
    /// Status reached by applying `self` to `from`, if the transition exists
    pub fn apply(self, from: CampaignStatus) -> Option<CampaignStatus> {
        use CampaignAction::*;
        use CampaignStatus::*;

        match (from, self) {
            (Draft, Start) | (Scheduled, Start) => Some(Sending),
            (Draft, Schedule) | (Scheduled, Schedule) => Some(Scheduled),
            (Sending, Pause) => Some(Paused),
            (Paused, Resume) => Some(Sending),
            (Scheduled, Cancel) | (Sending, Cancel) | (Paused, Cancel) => Some(Cancelled),
            (Sending, Complete) => Some(Completed),
            (Draft, _) | (Scheduled, _) | (Sending, _) | (Paused, _) => None,
            (Completed, _) | (Cancelled, _) => None,
        }
    }

    /// Every status the action may be applied to; the compare-and-set guard
    pub fn sources(self) -> Vec<CampaignStatus> {
        CampaignStatus::ALL
            .into_iter()
            .filter(|status| self.apply(*status).is_some())
            .collect()
    }

    /// Status the action leads to
    pub fn target(self) -> CampaignStatus {
        match self {
            CampaignAction::Start | CampaignAction::Resume => CampaignStatus::Sending,
            CampaignAction::Schedule => CampaignStatus::Scheduled,
            CampaignAction::Pause => CampaignStatus::Paused,
            CampaignAction::Cancel => CampaignStatus::Cancelled,
            CampaignAction::Complete => CampaignStatus::Completed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CampaignAction::Start => "start",
            CampaignAction::Schedule => "schedule",
            CampaignAction::Pause => "pause",
            CampaignAction::Resume => "resume",
            CampaignAction::Cancel => "cancel",
            CampaignAction::Complete => "complete",
        }
    }
}

impl std::fmt::Display for CampaignAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
