//! SQLite-backed persistent app state.
//!
//! Provides durable storage for:
//! - First-run flag and gateway mode
//! - Durable and temporary destination URLs
//! - Notification consent fields and last prompt timestamp
//! - Push token and the one-time attribution-dispatched flag
//!
//! Everything lives in a single `kv` table. Multi-field updates run inside a
//! transaction so a crash never leaves a half-applied transition behind.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{data_dir, migrations};
use crate::error::StorageError;

pub(crate) const KEY_HAS_LAUNCHED: &str = "has_launched_before";
pub(crate) const KEY_MODE: &str = "app_mode";
pub(crate) const KEY_DESTINATION: &str = "destination_url";
pub(crate) const KEY_TEMP_DESTINATION: &str = "temp_destination_url";
pub(crate) const KEY_ACCEPTED: &str = "notifications_accepted";
pub(crate) const KEY_DENIED: &str = "notifications_system_denied";
pub(crate) const KEY_LAST_PROMPT: &str = "last_notification_prompt_at";
pub(crate) const KEY_PUSH_TOKEN: &str = "push_token";
pub(crate) const KEY_DISPATCHED: &str = "attribution_dispatched";

/// Persisted gateway mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppMode {
    /// A destination URL was obtained and is live.
    Active,
    /// Permanently show the native experience.
    Legacy,
}

impl AppMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppMode::Active => "active",
            AppMode::Legacy => "legacy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Some(AppMode::Active),
            "legacy" => Some(AppMode::Legacy),
            _ => None,
        }
    }
}

/// Snapshot of every durable field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedAppState {
    pub has_launched_before: bool,
    pub mode: Option<AppMode>,
    pub destination_url: Option<Url>,
    pub temp_destination_url: Option<Url>,
    pub notifications_accepted: bool,
    pub notifications_system_denied: bool,
    pub last_notification_prompt_at: Option<DateTime<Utc>>,
    pub push_token: Option<String>,
    pub attribution_dispatched: bool,
}

impl PersistedAppState {
    pub fn is_first_run(&self) -> bool {
        !self.has_launched_before
    }
}

/// Durable key-value store for gateway state.
pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    /// Open the store at `<data_dir>/stillwater.db`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StorageError> {
        let path = data_dir()?.join("stillwater.db");
        Self::open_at(&path)
    }

    /// Open the store at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(|source| StorageError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (tests and dry runs).
    pub fn open_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        migrations::migrate(&conn).map_err(|e| StorageError::MigrationFailed(e.to_string()))?;
        Ok(Self { conn })
    }

    // ── Raw kv access ────────────────────────────────────────────────

    pub fn kv_get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(kv_get_on(&self.conn, key)?)
    }

    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        Ok(kv_set_on(&self.conn, key, value)?)
    }

    pub fn kv_delete(&self, key: &str) -> Result<(), StorageError> {
        self.conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn get_bool(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.kv_get(key)?.is_some_and(|v| v == "true"))
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), StorageError> {
        self.kv_set(key, if value { "true" } else { "false" })
    }

    fn get_url(&self, key: &str) -> Result<Option<Url>, StorageError> {
        Ok(self.kv_get(key)?.and_then(|raw| match Url::parse(&raw) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(key, "ignoring unparseable stored URL: {e}");
                None
            }
        }))
    }

    // ── Typed state ──────────────────────────────────────────────────

    /// Read every durable field at once.
    pub fn load(&self) -> Result<PersistedAppState, StorageError> {
        Ok(PersistedAppState {
            has_launched_before: self.get_bool(KEY_HAS_LAUNCHED)?,
            mode: self.mode()?,
            destination_url: self.destination_url()?,
            temp_destination_url: self.temp_destination_url()?,
            notifications_accepted: self.get_bool(KEY_ACCEPTED)?,
            notifications_system_denied: self.get_bool(KEY_DENIED)?,
            last_notification_prompt_at: self.last_prompt_at()?,
            push_token: self.push_token()?,
            attribution_dispatched: self.attribution_dispatched()?,
        })
    }

    pub fn is_first_run(&self) -> Result<bool, StorageError> {
        Ok(!self.get_bool(KEY_HAS_LAUNCHED)?)
    }

    pub fn set_has_launched(&self) -> Result<(), StorageError> {
        self.set_bool(KEY_HAS_LAUNCHED, true)
    }

    pub fn mode(&self) -> Result<Option<AppMode>, StorageError> {
        Ok(self.kv_get(KEY_MODE)?.as_deref().and_then(AppMode::parse))
    }

    pub fn set_mode(&self, mode: AppMode) -> Result<(), StorageError> {
        self.kv_set(KEY_MODE, mode.as_str())
    }

    pub fn destination_url(&self) -> Result<Option<Url>, StorageError> {
        self.get_url(KEY_DESTINATION)
    }

    pub fn temp_destination_url(&self) -> Result<Option<Url>, StorageError> {
        self.get_url(KEY_TEMP_DESTINATION)
    }

    pub fn set_temp_destination_url(&self, url: &Url) -> Result<(), StorageError> {
        self.kv_set(KEY_TEMP_DESTINATION, url.as_str())
    }

    /// Read and remove the temporary destination in one step.
    pub fn take_temp_destination_url(&self) -> Result<Option<Url>, StorageError> {
        let url = self.temp_destination_url()?;
        self.kv_delete(KEY_TEMP_DESTINATION)?;
        Ok(url)
    }

    pub fn push_token(&self) -> Result<Option<String>, StorageError> {
        Ok(self.kv_get(KEY_PUSH_TOKEN)?.filter(|t| !t.is_empty()))
    }

    pub fn set_push_token(&self, token: &str) -> Result<(), StorageError> {
        self.kv_set(KEY_PUSH_TOKEN, token)
    }

    pub fn attribution_dispatched(&self) -> Result<bool, StorageError> {
        self.get_bool(KEY_DISPATCHED)
    }

    pub fn mark_attribution_dispatched(&self) -> Result<(), StorageError> {
        self.set_bool(KEY_DISPATCHED, true)
    }

    pub fn last_prompt_at(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        match self.kv_get(KEY_LAST_PROMPT)? {
            None => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| StorageError::CorruptValue {
                    key: KEY_LAST_PROMPT.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    pub fn set_last_prompt_at(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.kv_set(KEY_LAST_PROMPT, &at.to_rfc3339())
    }

    /// Persist the system notification authorization outcome.
    pub fn set_notifications_outcome(&self, granted: bool) -> Result<(), StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        kv_set_on(&tx, KEY_ACCEPTED, bool_str(granted))?;
        if !granted {
            kv_set_on(&tx, KEY_DENIED, "true")?;
        }
        tx.commit()?;
        Ok(())
    }

    /// A remote config fetch succeeded: remember the URL and go active.
    pub fn record_config_success(&self, url: &Url) -> Result<(), StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        kv_set_on(&tx, KEY_DESTINATION, url.as_str())?;
        kv_set_on(&tx, KEY_MODE, AppMode::Active.as_str())?;
        kv_set_on(&tx, KEY_HAS_LAUNCHED, "true")?;
        tx.commit()?;
        Ok(())
    }

    /// Fall back to the native experience for good.
    pub fn switch_to_legacy(&self) -> Result<(), StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        kv_set_on(&tx, KEY_MODE, AppMode::Legacy.as_str())?;
        kv_set_on(&tx, KEY_HAS_LAUNCHED, "true")?;
        tx.commit()?;
        Ok(())
    }

    /// Wipe every persisted key.
    pub fn reset(&self) -> Result<(), StorageError> {
        self.conn.execute("DELETE FROM kv", [])?;
        Ok(())
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn kv_get_on(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
        row.get::<_, String>(0)
    })
    .optional()
}

fn kv_set_on(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
        params![key, value, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_has_defaults() {
        let store = StateStore::open_memory().unwrap();
        let state = store.load().unwrap();
        assert_eq!(state, PersistedAppState::default());
        assert!(state.is_first_run());
        assert!(store.is_first_run().unwrap());
    }

    #[test]
    fn kv_roundtrip() {
        let store = StateStore::open_memory().unwrap();
        assert!(store.kv_get("test").unwrap().is_none());
        store.kv_set("test", "hello").unwrap();
        assert_eq!(store.kv_get("test").unwrap().unwrap(), "hello");
        store.kv_delete("test").unwrap();
        assert!(store.kv_get("test").unwrap().is_none());
    }

    #[test]
    fn config_success_sets_url_mode_and_launch_flag() {
        let store = StateStore::open_memory().unwrap();
        let url = Url::parse("https://example.com/landing").unwrap();
        store.record_config_success(&url).unwrap();

        let state = store.load().unwrap();
        assert_eq!(state.destination_url, Some(url));
        assert_eq!(state.mode, Some(AppMode::Active));
        assert!(state.has_launched_before);
    }

    #[test]
    fn switch_to_legacy_keeps_destination() {
        let store = StateStore::open_memory().unwrap();
        let url = Url::parse("https://example.com/").unwrap();
        store.record_config_success(&url).unwrap();
        store.switch_to_legacy().unwrap();

        let state = store.load().unwrap();
        assert_eq!(state.mode, Some(AppMode::Legacy));
        assert_eq!(state.destination_url, Some(url));
    }

    #[test]
    fn denied_notifications_mark_system_denied() {
        let store = StateStore::open_memory().unwrap();
        store.set_notifications_outcome(false).unwrap();
        let state = store.load().unwrap();
        assert!(!state.notifications_accepted);
        assert!(state.notifications_system_denied);

        let store = StateStore::open_memory().unwrap();
        store.set_notifications_outcome(true).unwrap();
        let state = store.load().unwrap();
        assert!(state.notifications_accepted);
        assert!(!state.notifications_system_denied);
    }

    #[test]
    fn temp_destination_is_consumed_once() {
        let store = StateStore::open_memory().unwrap();
        let url = Url::parse("https://push.example/offer").unwrap();
        store.set_temp_destination_url(&url).unwrap();
        assert_eq!(store.take_temp_destination_url().unwrap(), Some(url));
        assert_eq!(store.take_temp_destination_url().unwrap(), None);
    }

    #[test]
    fn unparseable_url_reads_as_none() {
        let store = StateStore::open_memory().unwrap();
        store.kv_set(KEY_DESTINATION, "not a url").unwrap();
        assert_eq!(store.destination_url().unwrap(), None);
    }

    #[test]
    fn corrupt_prompt_timestamp_is_reported() {
        let store = StateStore::open_memory().unwrap();
        store.kv_set(KEY_LAST_PROMPT, "yesterday").unwrap();
        assert!(matches!(
            store.last_prompt_at(),
            Err(StorageError::CorruptValue { .. })
        ));
    }

    #[test]
    fn state_survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let store = StateStore::open_at(&path).unwrap();
            store.mark_attribution_dispatched().unwrap();
            store.set_push_token("tok-1").unwrap();
        }
        let store = StateStore::open_at(&path).unwrap();
        assert!(store.attribution_dispatched().unwrap());
        assert_eq!(store.push_token().unwrap().as_deref(), Some("tok-1"));
    }
}
