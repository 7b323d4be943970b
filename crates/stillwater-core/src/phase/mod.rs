//! Phase resolution: decides whether the native experience or a remote
//! destination is shown.
//!
//! ## Layers
//!
//! - [`decide_phase`]: pure decision over attribution + persisted state
//! - [`PhaseMachine`]: synchronous state machine applying one [`Input`] at a time
//! - [`Gateway`]: tokio task that owns the machine, runs timers and fetches,
//!   and publishes a [`GatewayView`]
//!
//! ## State Transitions
//!
//! ```text
//! Pending -> Active -> Offline -> Active
//!    |          |
//!    +----------+--> Degraded (terminal for the session)
//! ```

mod decision;
mod driver;
mod machine;
mod prompt_policy;

pub use decision::{decide_phase, PhaseDecision};
pub use driver::{Gateway, GatewayHandle, GatewayServices};
pub use machine::{Command, Input, MachineSettings, PhaseMachine, TimerKind};
pub use prompt_policy::PromptPolicy;

use serde::{Deserialize, Serialize};
use url::Url;

/// Top-level mode of the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Still resolving.
    Pending,
    /// Destination URL is live and shown.
    Active,
    /// Native experience.
    Degraded,
    /// Connectivity lost while a destination was active.
    Offline,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Active => "active",
            Phase::Degraded => "degraded",
            Phase::Offline => "offline",
        }
    }
}

/// Why the engine fell back to the native experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeReason {
    EmptyAttribution,
    LegacyMode,
    BuildGuard,
    AttributionUnavailable,
    ConfigUnavailable,
    ConnectivityLost,
}

/// Result of a notification consent prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentOutcome {
    /// System authorization granted.
    Granted,
    /// System authorization refused.
    Denied,
    /// User dismissed the prompt without answering.
    Skipped,
}

/// What the presentation layer reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayView {
    pub phase: Phase,
    pub destination: Option<Url>,
    /// The UI should show the notification consent screen.
    pub consent_requested: bool,
}

impl Default for GatewayView {
    fn default() -> Self {
        Self {
            phase: Phase::Pending,
            destination: None,
            consent_requested: false,
        }
    }
}
