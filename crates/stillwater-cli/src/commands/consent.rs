use chrono::Utc;
use clap::Subcommand;
use serde_json::json;
use stillwater_core::{GatewayConfig, PromptPolicy, StateStore};

#[derive(Subcommand)]
pub enum ConsentAction {
    /// Show whether a notification prompt is allowed right now
    Check,
    /// Record granted system authorization
    Grant,
    /// Record refused system authorization
    Deny,
    /// Record a dismissed prompt (starts the cooldown)
    Skip,
}

pub fn run(action: ConsentAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = StateStore::open()?;
    match action {
        ConsentAction::Check => {
            let config = GatewayConfig::load()?;
            let policy = PromptPolicy::new(config.timing.prompt_cooldown());
            let state = store.load()?;
            let report = json!({
                "should_prompt": policy.should_prompt(&state, Utc::now()),
                "accepted": state.notifications_accepted,
                "system_denied": state.notifications_system_denied,
                "last_prompt_at": state.last_notification_prompt_at,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        ConsentAction::Grant => {
            store.set_notifications_outcome(true)?;
            println!("notifications granted");
        }
        ConsentAction::Deny => {
            store.set_notifications_outcome(false)?;
            println!("notifications denied");
        }
        ConsentAction::Skip => {
            store.set_last_prompt_at(Utc::now())?;
            println!("prompt skipped");
        }
    }
    Ok(())
}
