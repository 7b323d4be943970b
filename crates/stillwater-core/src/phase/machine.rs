//! Phase state machine.
//!
//! The machine is synchronous and owns no threads or timers. The caller
//! feeds it one [`Input`] at a time together with the current wall-clock
//! time, then drains the queued [`Command`]s (start a timer, fetch config,
//! ...) and feeds their results back as further inputs.
//!
//! ## Usage
//!
//! ```ignore
//! let mut machine = PhaseMachine::new(store, MachineSettings::default());
//! machine.handle(Input::Launched, Utc::now())?;
//! for command in machine.drain_commands() {
//!     // run it, then feed the result back
//! }
//! ```

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use url::Url;

use super::decision::{decide_phase, PhaseDecision};
use super::prompt_policy::PromptPolicy;
use super::{ConsentOutcome, DegradeReason, GatewayView, Phase};
use crate::attribution::{AttributionRecord, DeepLinkPayload};
use crate::error::{AttributionFetchError, ConfigFetchError, CoreError};
use crate::push::extract_destination;
use crate::storage::{AppMode, GatewayConfig, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Waiting for the second attribution event before dispatching.
    MergeWait,
    /// Organic first launch: delay before the organic lookup.
    OrganicGrace,
    /// Build is not yet allowed to leave the native experience.
    BuildGuard,
}

/// Everything that can happen to the engine.
#[derive(Debug)]
pub enum Input {
    /// Process start.
    Launched,
    ConversionDataReceived(AttributionRecord),
    ConversionDataFailed,
    DeepLinkResolved(DeepLinkPayload),
    ConnectivityChanged { connected: bool },
    ConsentResolved(ConsentOutcome),
    /// Raw push notification payload.
    PushReceived(Value),
    PushTokenReceived(String),
    Suspended,
    Resumed,
    TimerFired(TimerKind),
    AttributionFetched(Result<AttributionRecord, AttributionFetchError>),
    ConfigFetched {
        ticket: u64,
        result: Result<Url, ConfigFetchError>,
    },
}

/// Side effects requested by the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartTimer { timer: TimerKind, after: Duration },
    CancelTimer(TimerKind),
    /// Look up organic attribution for this install.
    FetchAttribution,
    /// Ask remote config for a destination. The result must come back
    /// as [`Input::ConfigFetched`] with the same ticket.
    FetchConfig {
        ticket: u64,
        attribution: AttributionRecord,
        push_token: Option<String>,
    },
    RegisterForPush,
}

/// Delays and policies driving the machine.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineSettings {
    pub merge_wait: Duration,
    pub organic_grace: Duration,
    pub build_guard_delay: Duration,
    pub prompt_policy: PromptPolicy,
    /// Before this instant the native experience is forced.
    pub not_before: Option<DateTime<Utc>>,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

impl MachineSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            merge_wait: config.timing.merge_wait(),
            organic_grace: config.timing.organic_grace(),
            build_guard_delay: config.timing.build_guard_delay(),
            prompt_policy: PromptPolicy::new(config.timing.prompt_cooldown()),
            not_before: config.rollout.not_before,
        }
    }
}

/// How this session reached its evaluation, if it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    /// No attribution event dispatched yet.
    Waiting,
    /// Attribution dispatched during this session.
    Attributed,
    /// Attribution was dispatched on a previous launch.
    Relaunched,
}

pub struct PhaseMachine {
    store: StateStore,
    settings: MachineSettings,
    phase: Phase,
    destination: Option<Url>,
    consent_requested: bool,
    resolution: Resolution,

    conversion: Option<AttributionRecord>,
    deep_link: Option<DeepLinkPayload>,
    /// Record the current evaluation runs on.
    attribution: AttributionRecord,

    armed: HashSet<TimerKind>,
    attribution_in_flight: bool,
    config_in_flight: Option<u64>,
    next_ticket: u64,

    outbox: Vec<Command>,
}

impl PhaseMachine {
    pub fn new(store: StateStore, settings: MachineSettings) -> Self {
        Self {
            store,
            settings,
            phase: Phase::Pending,
            destination: None,
            consent_requested: false,
            resolution: Resolution::Waiting,
            conversion: None,
            deep_link: None,
            attribution: AttributionRecord::new(),
            armed: HashSet::new(),
            attribution_in_flight: false,
            config_in_flight: None,
            next_ticket: 0,
            outbox: Vec::new(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn view(&self) -> GatewayView {
        GatewayView {
            phase: self.phase,
            destination: match self.phase {
                Phase::Degraded => None,
                _ => self.destination.clone(),
            },
            consent_requested: self.consent_requested,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Take every command queued since the last drain.
    pub fn drain_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.outbox)
    }

    // ── Input handling ───────────────────────────────────────────────

    /// Apply one input.
    ///
    /// # Errors
    /// Returns an error if persisting state fails. The machine keeps its
    /// in-memory state in that case.
    pub fn handle(&mut self, input: Input, now: DateTime<Utc>) -> Result<(), CoreError> {
        if self.phase == Phase::Degraded {
            if let Input::PushTokenReceived(token) = input {
                self.store.set_push_token(&token)?;
            } else {
                tracing::debug!("degraded, ignoring input");
            }
            return Ok(());
        }

        match input {
            Input::Launched => self.on_launched(now),
            Input::ConversionDataReceived(info) => self.on_conversion(info, now),
            Input::ConversionDataFailed => {
                tracing::warn!("conversion data unavailable, treating as empty");
                self.on_conversion(AttributionRecord::new(), now)
            }
            Input::DeepLinkResolved(payload) => self.on_deep_link(payload, now),
            Input::ConnectivityChanged { connected } => self.on_connectivity(connected),
            Input::ConsentResolved(outcome) => self.on_consent(outcome, now),
            Input::PushReceived(payload) => self.on_push(&payload),
            Input::PushTokenReceived(token) => Ok(self.store.set_push_token(&token)?),
            Input::Suspended => {
                if let Some(ticket) = self.config_in_flight.take() {
                    tracing::debug!(ticket, "suspended, abandoning config fetch");
                }
                Ok(())
            }
            Input::Resumed => self.on_resumed(now),
            Input::TimerFired(kind) => self.on_timer(kind, now),
            Input::AttributionFetched(result) => self.on_attribution_fetched(result, now),
            Input::ConfigFetched { ticket, result } => self.on_config_fetched(ticket, result, now),
        }
    }

    fn on_launched(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        let state = self.store.load()?;
        if !state.attribution_dispatched {
            tracing::debug!("waiting for attribution events");
            return Ok(());
        }

        // The record was consumed on the launch that dispatched it, so the
        // empty-attribution rule does not apply here. Only the persisted
        // mode decides between the native fallback and a config refresh.
        self.resolution = Resolution::Relaunched;
        if self.guard_blocks(now) {
            return Ok(());
        }
        if state.mode == Some(AppMode::Legacy) {
            return self.degrade(DegradeReason::LegacyMode);
        }
        self.request_config()
    }

    fn on_conversion(&mut self, info: AttributionRecord, now: DateTime<Utc>) -> Result<(), CoreError> {
        if self.store.attribution_dispatched()? {
            tracing::debug!("attribution already dispatched, ignoring conversion data");
            return Ok(());
        }

        if let Some(deep_link) = &self.deep_link {
            let merged = info.merged_with(deep_link);
            self.cancel_timer(TimerKind::MergeWait);
            return self.dispatch(merged, now);
        }

        self.conversion = Some(info);
        self.arm_timer(TimerKind::MergeWait, self.settings.merge_wait);
        Ok(())
    }

    fn on_deep_link(&mut self, payload: DeepLinkPayload, now: DateTime<Utc>) -> Result<(), CoreError> {
        if self.store.attribution_dispatched()? {
            tracing::debug!("attribution already dispatched, ignoring deep link");
            return Ok(());
        }

        self.deep_link = Some(payload.clone());
        if let Some(conversion) = self.conversion.take() {
            self.cancel_timer(TimerKind::MergeWait);
            return self.dispatch(conversion.merged_with(&payload), now);
        }

        self.arm_timer(TimerKind::MergeWait, self.settings.merge_wait);
        Ok(())
    }

    fn on_timer(&mut self, kind: TimerKind, now: DateTime<Utc>) -> Result<(), CoreError> {
        if !self.armed.remove(&kind) {
            tracing::debug!(?kind, "stale timer");
            return Ok(());
        }

        match kind {
            TimerKind::MergeWait => {
                if self.store.attribution_dispatched()? {
                    return Ok(());
                }
                let record = match (self.conversion.take(), &self.deep_link) {
                    (Some(conversion), Some(deep_link)) => conversion.merged_with(deep_link),
                    (Some(conversion), None) => conversion,
                    (None, Some(deep_link)) => deep_link.clone(),
                    (None, None) => return Ok(()),
                };
                self.dispatch(record, now)
            }
            TimerKind::OrganicGrace => {
                if !self.attribution_in_flight {
                    self.attribution_in_flight = true;
                    self.outbox.push(Command::FetchAttribution);
                }
                Ok(())
            }
            TimerKind::BuildGuard => self.degrade(DegradeReason::BuildGuard),
        }
    }

    fn on_attribution_fetched(
        &mut self,
        result: Result<AttributionRecord, AttributionFetchError>,
        _now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if !self.attribution_in_flight {
            tracing::debug!("unexpected attribution result");
            return Ok(());
        }
        self.attribution_in_flight = false;

        match result {
            Ok(mut record) => {
                if let Some(deep_link) = &self.deep_link {
                    record.fill_missing_from(deep_link);
                }
                tracing::info!(keys = record.len(), "organic attribution resolved");
                self.attribution = record;
                self.request_config()
            }
            Err(e) => {
                tracing::warn!("organic attribution lookup failed: {e}");
                self.degrade(DegradeReason::AttributionUnavailable)
            }
        }
    }

    fn on_config_fetched(
        &mut self,
        ticket: u64,
        result: Result<Url, ConfigFetchError>,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if self.config_in_flight != Some(ticket) {
            tracing::debug!(ticket, "discarding stale config result");
            return Ok(());
        }
        self.config_in_flight = None;

        match result {
            Ok(url) => {
                self.store.record_config_success(&url)?;
                let state = self.store.load()?;
                self.destination = Some(url);
                if self.settings.prompt_policy.should_prompt(&state, now) {
                    tracing::info!("destination resolved, requesting notification consent");
                    self.consent_requested = true;
                    Ok(())
                } else {
                    self.go_live()
                }
            }
            Err(e) => {
                tracing::warn!("remote config fetch failed: {e}");
                match self.store.destination_url()? {
                    Some(cached) => {
                        self.destination = Some(cached);
                        self.go_live()
                    }
                    None => self.degrade(DegradeReason::ConfigUnavailable),
                }
            }
        }
    }

    fn on_consent(&mut self, outcome: ConsentOutcome, now: DateTime<Utc>) -> Result<(), CoreError> {
        if !self.consent_requested {
            tracing::debug!(?outcome, "no consent prompt pending");
            return Ok(());
        }

        match outcome {
            ConsentOutcome::Granted => {
                self.store.set_notifications_outcome(true)?;
                self.outbox.push(Command::RegisterForPush);
            }
            ConsentOutcome::Denied => self.store.set_notifications_outcome(false)?,
            ConsentOutcome::Skipped => self.store.set_last_prompt_at(now)?,
        }
        self.consent_requested = false;

        if self.destination.is_some() {
            self.go_live()
        } else {
            self.request_config()
        }
    }

    fn on_connectivity(&mut self, connected: bool) -> Result<(), CoreError> {
        if connected {
            if self.phase == Phase::Offline {
                if self.destination.is_none() {
                    self.destination = self.store.destination_url()?;
                }
                if self.destination.is_some() {
                    self.set_phase(Phase::Active);
                }
            }
            return Ok(());
        }

        if self.store.mode()? == Some(AppMode::Active) {
            if let Some(ticket) = self.config_in_flight.take() {
                tracing::debug!(ticket, "offline, abandoning config fetch");
            }
            self.set_phase(Phase::Offline);
            Ok(())
        } else {
            self.degrade(DegradeReason::ConnectivityLost)
        }
    }

    fn on_push(&mut self, payload: &Value) -> Result<(), CoreError> {
        let Some(url) = extract_destination(payload) else {
            tracing::debug!("push without destination");
            return Ok(());
        };

        self.store.set_temp_destination_url(&url)?;
        if self.phase == Phase::Active {
            self.store.take_temp_destination_url()?;
            self.destination = Some(url);
            tracing::info!("opening push destination");
        }
        Ok(())
    }

    fn on_resumed(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        let idle = self.phase == Phase::Pending
            && self.config_in_flight.is_none()
            && !self.attribution_in_flight
            && !self.consent_requested
            && self.armed.is_empty();
        if !idle {
            return Ok(());
        }

        match self.resolution {
            Resolution::Waiting => Ok(()),
            Resolution::Attributed => self.determine_phase(now),
            Resolution::Relaunched => self.request_config(),
        }
    }

    // ── Transitions ──────────────────────────────────────────────────

    fn dispatch(&mut self, record: AttributionRecord, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.store.mark_attribution_dispatched()?;
        self.conversion = None;
        self.resolution = Resolution::Attributed;
        tracing::info!(keys = record.len(), organic = record.is_organic(), "attribution dispatched");
        self.attribution = record;
        self.determine_phase(now)
    }

    fn determine_phase(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        if self.guard_blocks(now) {
            return Ok(());
        }

        let state = self.store.load()?;
        match decide_phase(&self.attribution, &state) {
            PhaseDecision::Degrade(reason) => self.degrade(reason),
            PhaseDecision::AwaitOrganicGrace => {
                if !self.attribution_in_flight {
                    self.arm_timer(TimerKind::OrganicGrace, self.settings.organic_grace);
                }
                Ok(())
            }
            PhaseDecision::RestoreTemporary(url) => {
                self.store.take_temp_destination_url()?;
                self.destination = Some(url);
                self.go_live()
            }
            PhaseDecision::FetchConfig => self.request_config(),
        }
    }

    /// Arms the build guard if the rollout date is still ahead.
    fn guard_blocks(&mut self, now: DateTime<Utc>) -> bool {
        match self.settings.not_before {
            Some(not_before) if now < not_before => {
                tracing::info!(%not_before, "build not yet released");
                if !self.armed.contains(&TimerKind::BuildGuard) {
                    self.arm_timer(TimerKind::BuildGuard, self.settings.build_guard_delay);
                }
                true
            }
            _ => false,
        }
    }

    fn request_config(&mut self) -> Result<(), CoreError> {
        if let Some(ticket) = self.config_in_flight {
            tracing::debug!(ticket, "config fetch already in flight");
            return Ok(());
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.config_in_flight = Some(ticket);
        self.outbox.push(Command::FetchConfig {
            ticket,
            attribution: self.attribution.clone(),
            push_token: self.store.push_token()?,
        });
        Ok(())
    }

    /// Offline holds until connectivity returns; the destination is kept
    /// for the reconnect.
    fn go_live(&mut self) -> Result<(), CoreError> {
        self.consent_requested = false;
        if self.phase == Phase::Offline {
            tracing::debug!("offline, deferring activation");
            return Ok(());
        }
        self.set_phase(Phase::Active);
        Ok(())
    }

    fn degrade(&mut self, reason: DegradeReason) -> Result<(), CoreError> {
        self.store.switch_to_legacy()?;
        tracing::warn!(?reason, "falling back to native experience");

        let armed: Vec<TimerKind> = self.armed.iter().copied().collect();
        for kind in armed {
            self.cancel_timer(kind);
        }
        self.config_in_flight = None;
        self.attribution_in_flight = false;
        self.consent_requested = false;
        self.destination = None;
        self.set_phase(Phase::Degraded);
        Ok(())
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::info!(from = self.phase.as_str(), to = phase.as_str(), "phase changed");
            self.phase = phase;
        }
    }

    fn arm_timer(&mut self, timer: TimerKind, after: Duration) {
        self.armed.insert(timer);
        self.outbox.push(Command::StartTimer { timer, after });
    }

    fn cancel_timer(&mut self, timer: TimerKind) {
        if self.armed.remove(&timer) {
            self.outbox.push(Command::CancelTimer(timer));
        }
    }
}
