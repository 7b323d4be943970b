use std::sync::Arc;
use std::time::Duration;

use clap::{Subcommand, ValueEnum};
use serde_json::{json, Value};
use stillwater_core::capabilities::{StaticIdentity, StaticPushToken};
use stillwater_core::phase::MachineSettings;
use stillwater_core::storage::get_or_create_device_id;
use stillwater_core::{
    decide_phase, AttributionRecord, ConsentOutcome, DeviceContext, Gateway, GatewayConfig,
    GatewayServices, GatewayView, HttpAttributionClient, HttpConfigClient, Phase, PhaseDecision,
    PhaseMachine, StateStore,
};

#[derive(Clone, Copy, ValueEnum)]
pub enum ConsentArg {
    Grant,
    Deny,
    Skip,
}

impl From<ConsentArg> for ConsentOutcome {
    fn from(arg: ConsentArg) -> Self {
        match arg {
            ConsentArg::Grant => ConsentOutcome::Granted,
            ConsentArg::Deny => ConsentOutcome::Denied,
            ConsentArg::Skip => ConsentOutcome::Skipped,
        }
    }
}

#[derive(Subcommand)]
pub enum GatewayAction {
    /// Evaluate the phase decision against stored state
    Decide {
        /// Attribution record as a JSON object
        #[arg(long)]
        attribution: String,
    },
    /// Run the engine against the configured endpoints
    Run {
        /// Conversion data as a JSON object
        #[arg(long)]
        conversion: Option<String>,
        /// Deep-link payload as a JSON object
        #[arg(long)]
        deep_link: Option<String>,
        /// Push payload as JSON
        #[arg(long)]
        push: Option<String>,
        /// Answer to give if a consent prompt is requested
        #[arg(long, value_enum)]
        consent: Option<ConsentArg>,
        /// Start with connectivity lost
        #[arg(long)]
        offline: bool,
        /// Give up after this many seconds
        #[arg(long, default_value = "30")]
        wait_secs: u64,
    },
}

pub fn run(action: GatewayAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        GatewayAction::Decide { attribution } => {
            let record = AttributionRecord::from_value(parse_json("attribution", &attribution)?);
            let state = StateStore::open()?.load()?;
            let decision = decide_phase(&record, &state);
            println!("{}", serde_json::to_string_pretty(&decision_json(&decision))?);
        }
        GatewayAction::Run {
            conversion,
            deep_link,
            push,
            consent,
            offline,
            wait_secs,
        } => {
            let events = Events {
                conversion: conversion.map(|s| parse_json("conversion", &s)).transpose()?,
                deep_link: deep_link.map(|s| parse_json("deep-link", &s)).transpose()?,
                push: push.map(|s| parse_json("push", &s)).transpose()?,
                consent: consent.map(ConsentOutcome::from),
                offline,
            };
            let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
            runtime.block_on(run_engine(events, Duration::from_secs(wait_secs)))?;
        }
    }
    Ok(())
}

struct Events {
    conversion: Option<Value>,
    deep_link: Option<Value>,
    push: Option<Value>,
    consent: Option<ConsentOutcome>,
    offline: bool,
}

async fn run_engine(events: Events, wait: Duration) -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::load()?;
    let timeout = Duration::from_secs(config.http.timeout_secs);
    let language = std::env::var("LANG").ok();

    let services = GatewayServices {
        attribution: Arc::new(HttpAttributionClient::new(config.attribution.clone(), timeout)?),
        config: Arc::new(HttpConfigClient::new(&config.remote_config.endpoint, timeout)?),
        identity: Arc::new(StaticIdentity(get_or_create_device_id()?)),
        push_tokens: Arc::new(StaticPushToken(None)),
        device: DeviceContext::from_config(&config, language.as_deref()),
    };
    let machine = PhaseMachine::new(StateStore::open()?, MachineSettings::from_config(&config));
    let (handle, task) = Gateway::spawn(machine, services);
    let mut views = handle.subscribe();

    if events.offline {
        handle.connectivity_changed(false);
    }
    if let Some(payload) = events.push {
        handle.push_received(payload);
    }
    if let Some(payload) = events.deep_link {
        handle.deep_link_resolved(AttributionRecord::from_value(payload));
    }
    if let Some(info) = events.conversion {
        handle.conversion_data_received(AttributionRecord::from_value(info));
    }

    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let view = views.borrow_and_update().clone();
        print_view(&view)?;
        if view.consent_requested {
            match events.consent {
                Some(outcome) => handle.consent_resolved(outcome),
                None => break,
            }
        } else if view.phase != Phase::Pending {
            break;
        }

        match tokio::time::timeout_at(deadline, views.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break,
            Err(_) => {
                tracing::info!("wait elapsed before the gateway settled");
                break;
            }
        }
    }

    handle.shutdown();
    task.await?;
    Ok(())
}

fn print_view(view: &GatewayView) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string(view)?);
    Ok(())
}

fn parse_json(what: &str, raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid {what} JSON: {e}"))
}

fn decision_json(decision: &PhaseDecision) -> Value {
    let mut body = match decision {
        PhaseDecision::Degrade(reason) => json!({"decision": "degrade", "reason": reason}),
        PhaseDecision::AwaitOrganicGrace => json!({"decision": "await_organic_grace"}),
        PhaseDecision::RestoreTemporary(url) => {
            json!({"decision": "restore_temporary", "url": url.as_str()})
        }
        PhaseDecision::FetchConfig => json!({"decision": "fetch_config"}),
    };
    body["phase"] = json!(decision.phase());
    body
}
