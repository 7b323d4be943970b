//! The phase decision, in one place.

use url::Url;

use super::{DegradeReason, Phase};
use crate::attribution::AttributionRecord;
use crate::storage::{AppMode, PersistedAppState};

/// What the engine should do with a freshly dispatched attribution record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseDecision {
    /// Show the native experience.
    Degrade(DegradeReason),
    /// First launch of an organic install: wait out the grace delay, then
    /// look up organic attribution and fetch remote config.
    AwaitOrganicGrace,
    /// A temporary destination arrived before any durable one: show it.
    RestoreTemporary(Url),
    /// Ask the remote config endpoint for a destination.
    FetchConfig,
}

impl PhaseDecision {
    /// Phase the engine sits in right after acting on this decision.
    pub fn phase(&self) -> Phase {
        match self {
            PhaseDecision::Degrade(_) => Phase::Degraded,
            PhaseDecision::RestoreTemporary(_) => Phase::Active,
            PhaseDecision::AwaitOrganicGrace | PhaseDecision::FetchConfig => Phase::Pending,
        }
    }
}

/// Decide the next step from attribution and persisted state.
///
/// Rules, first match wins:
/// 1. empty attribution degrades
/// 2. legacy mode degrades
/// 3. first launch + organic install waits for the grace delay
/// 4. temporary destination without a durable one is restored
/// 5. otherwise remote config is fetched
pub fn decide_phase(record: &AttributionRecord, state: &PersistedAppState) -> PhaseDecision {
    if record.is_empty() {
        return PhaseDecision::Degrade(DegradeReason::EmptyAttribution);
    }

    if state.mode == Some(AppMode::Legacy) {
        return PhaseDecision::Degrade(DegradeReason::LegacyMode);
    }

    if state.is_first_run() && record.is_organic() {
        return PhaseDecision::AwaitOrganicGrace;
    }

    if let (Some(temp), None) = (&state.temp_destination_url, &state.destination_url) {
        return PhaseDecision::RestoreTemporary(temp.clone());
    }

    PhaseDecision::FetchConfig
}
