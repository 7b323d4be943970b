//! Persisted snapshot of the browser session's cookie jar.
//!
//! Layout is domain -> cookie name -> cookie properties, stored as JSON under
//! a single kv key. A fresh browser surface is seeded from this snapshot
//! before its first load.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state_store::StateStore;
use crate::error::StorageError;

pub(crate) const KEY_COOKIE_JAR: &str = "cookie_jar";

/// Properties of one cookie, as captured from a surface's cookie store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub same_site: Option<String>,
}

fn default_path() -> String {
    "/".into()
}

impl StoredCookie {
    pub fn new(name: &str, value: &str, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: default_path(),
            expires: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }
}

/// domain -> name -> cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieJar {
    domains: BTreeMap<String, BTreeMap<String, StoredCookie>>,
}

impl CookieJar {
    /// Build a snapshot from a surface's full cookie list.
    ///
    /// A later cookie with the same domain and name replaces an earlier one.
    pub fn capture<'a, I>(cookies: I) -> Self
    where
        I: IntoIterator<Item = &'a StoredCookie>,
    {
        let mut jar = Self::default();
        for cookie in cookies {
            jar.insert(cookie.clone());
        }
        jar
    }

    pub fn insert(&mut self, cookie: StoredCookie) {
        self.domains
            .entry(cookie.domain.clone())
            .or_default()
            .insert(cookie.name.clone(), cookie);
    }

    pub fn get(&self, domain: &str, name: &str) -> Option<&StoredCookie> {
        self.domains.get(domain)?.get(name)
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.domains.keys().map(String::as_str)
    }

    /// Every cookie, flattened across domains.
    pub fn cookies(&self) -> impl Iterator<Item = &StoredCookie> {
        self.domains.values().flat_map(|by_name| by_name.values())
    }

    /// Cookies that have not expired at `now`.
    pub fn live_cookies(&self, now: DateTime<Utc>) -> impl Iterator<Item = &StoredCookie> {
        self.cookies().filter(move |c| !c.is_expired(now))
    }

    pub fn len(&self) -> usize {
        self.domains.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where the browser session keeps its cookie snapshot.
pub trait CookiePersistence {
    fn load_cookie_jar(&self) -> Result<CookieJar, StorageError>;
    fn save_cookie_jar(&mut self, jar: &CookieJar) -> Result<(), StorageError>;
}

impl CookiePersistence for StateStore {
    fn load_cookie_jar(&self) -> Result<CookieJar, StorageError> {
        match self.kv_get(KEY_COOKIE_JAR)? {
            None => Ok(CookieJar::default()),
            Some(raw) => serde_json::from_str(&raw).map_err(|e| StorageError::CorruptValue {
                key: KEY_COOKIE_JAR.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn save_cookie_jar(&mut self, jar: &CookieJar) -> Result<(), StorageError> {
        let raw = serde_json::to_string(jar).map_err(|e| StorageError::CorruptValue {
            key: KEY_COOKIE_JAR.to_string(),
            message: e.to_string(),
        })?;
        self.kv_set(KEY_COOKIE_JAR, &raw)
    }
}

impl StateStore {
    /// Drop the persisted cookie snapshot.
    pub fn clear_cookie_jar(&self) -> Result<(), StorageError> {
        self.kv_delete(KEY_COOKIE_JAR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn capture_groups_by_domain_and_name() {
        let cookies = vec![
            StoredCookie::new("sid", "1", "a.example"),
            StoredCookie::new("theme", "dark", "a.example"),
            StoredCookie::new("sid", "2", "b.example"),
            StoredCookie::new("sid", "3", "a.example"),
        ];
        let jar = CookieJar::capture(&cookies);
        assert_eq!(jar.len(), 3);
        assert_eq!(jar.get("a.example", "sid").unwrap().value, "3");
        assert_eq!(jar.domains().collect::<Vec<_>>(), vec!["a.example", "b.example"]);
    }

    #[test]
    fn serialized_layout_is_domain_then_name() {
        let jar = CookieJar::capture(&[StoredCookie::new("sid", "1", "a.example")]);
        let json = serde_json::to_value(&jar).unwrap();
        assert_eq!(json["a.example"]["sid"]["value"], "1");
    }

    #[test]
    fn live_cookies_skip_expired() {
        let now = Utc::now();
        let mut stale = StoredCookie::new("old", "x", "a.example");
        stale.expires = Some(now - Duration::hours(1));
        let mut fresh = StoredCookie::new("new", "y", "a.example");
        fresh.expires = Some(now + Duration::hours(1));
        let jar = CookieJar::capture(&[stale, fresh]);
        let names: Vec<_> = jar.live_cookies(now).map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["new"]);
    }

    #[test]
    fn state_store_persists_jar() {
        let mut store = StateStore::open_memory().unwrap();
        assert!(store.load_cookie_jar().unwrap().is_empty());

        let jar = CookieJar::capture(&[StoredCookie::new("sid", "1", "a.example")]);
        store.save_cookie_jar(&jar).unwrap();
        assert_eq!(store.load_cookie_jar().unwrap(), jar);

        store.clear_cookie_jar().unwrap();
        assert!(store.load_cookie_jar().unwrap().is_empty());
    }
}
