use clap::Subcommand;
use stillwater_core::storage::{CookiePersistence, StoredCookie};
use stillwater_core::StateStore;

#[derive(Subcommand)]
pub enum CookiesAction {
    /// List persisted cookies as JSON
    List {
        /// Only cookies that have not expired
        #[arg(long)]
        live: bool,
    },
    /// Drop the persisted cookie jar
    Clear,
}

pub fn run(action: CookiesAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = StateStore::open()?;
    match action {
        CookiesAction::List { live } => {
            let jar = store.load_cookie_jar()?;
            let cookies: Vec<&StoredCookie> = if live {
                jar.live_cookies(chrono::Utc::now()).collect()
            } else {
                jar.cookies().collect()
            };
            println!("{}", serde_json::to_string_pretty(&cookies)?);
        }
        CookiesAction::Clear => {
            store.clear_cookie_jar()?;
            println!("cookies cleared");
        }
    }
    Ok(())
}
