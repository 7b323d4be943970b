use clap::Subcommand;
use stillwater_core::StateStore;
use url::Url;

#[derive(Subcommand)]
pub enum StateAction {
    /// Print every persisted field as JSON
    Show,
    /// Forget everything (next launch is a first launch)
    Reset,
    /// Store a temporary destination, as a push notification would
    SetTempUrl {
        /// Absolute URL
        url: String,
    },
}

pub fn run(action: StateAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = StateStore::open()?;
    match action {
        StateAction::Show => {
            let state = store.load()?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        StateAction::Reset => {
            store.reset()?;
            println!("state reset");
        }
        StateAction::SetTempUrl { url } => {
            let url = Url::parse(&url).map_err(|e| format!("invalid url '{url}': {e}"))?;
            store.set_temp_destination_url(&url)?;
            println!("ok");
        }
    }
    Ok(())
}
