mod config;
pub mod cookie_jar;
pub mod device_id;
pub mod migrations;
pub mod state_store;

pub use config::{
    AttributionSettings, BrowserConfig, GatewayConfig, HttpConfig, RemoteConfigSettings,
    RolloutConfig, TimingConfig,
};
pub use cookie_jar::{CookieJar, CookiePersistence, StoredCookie};
pub use device_id::{get_or_create_device_id, get_or_create_device_id_at, DeviceIdError};
pub use state_store::{AppMode, PersistedAppState, StateStore};

use std::path::PathBuf;

/// Returns `~/.config/stillwater[-dev]/` based on STILLWATER_ENV.
///
/// Set STILLWATER_ENV=dev to use the development data directory, or
/// STILLWATER_DATA_DIR to point somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the data directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    if let Ok(explicit) = std::env::var("STILLWATER_DATA_DIR") {
        let dir = PathBuf::from(explicit);
        std::fs::create_dir_all(&dir)?;
        return Ok(dir);
    }

    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("STILLWATER_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("stillwater-dev")
    } else {
        base_dir.join("stillwater")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
