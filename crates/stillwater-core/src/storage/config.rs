//! TOML-based gateway configuration.
//!
//! Stores:
//! - Attribution endpoint credentials (app id, dev key)
//! - Remote config endpoint and the static device context sent with it
//! - Engine timings (merge window, grace delay, prompt cooldown)
//! - Rollout cutoff for the build-validity guard
//! - Browser session limits and trust policy
//!
//! Configuration is stored at `<data_dir>/config.toml`.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::browser::ServerTrustPolicy;
use crate::error::ConfigError;

/// Identity endpoint used for organic-install attribution lookups.
pub const DEFAULT_ATTRIBUTION_ENDPOINT: &str = "https://gcdsdk.appsflyer.com/install_data/v4.0/";

/// Attribution endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionSettings {
    #[serde(default = "default_attribution_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub dev_key: String,
}

/// Remote config endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfigSettings {
    /// Empty disables the fetch; every attempt then falls back.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub bundle_id: String,
    /// Defaults to `id<app_id>` when empty.
    #[serde(default)]
    pub store_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default = "default_os")]
    pub os: String,
}

/// Engine timings, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_merge_wait")]
    pub merge_wait_secs: u64,
    #[serde(default = "default_organic_grace")]
    pub organic_grace_secs: u64,
    #[serde(default = "default_build_guard_delay")]
    pub build_guard_delay_secs: u64,
    #[serde(default = "default_prompt_cooldown")]
    pub prompt_cooldown_secs: u64,
}

/// Build-validity guard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolloutConfig {
    /// Before this instant the engine always degrades. `None` disables the guard.
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
}

/// Browser session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    #[serde(default)]
    pub trust_policy: ServerTrustPolicy,
}

/// HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Gateway configuration.
///
/// Serialized to/from TOML at `<data_dir>/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub attribution: AttributionSettings,
    #[serde(default)]
    pub remote_config: RemoteConfigSettings,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub rollout: RolloutConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

// Default functions
fn default_attribution_endpoint() -> String {
    DEFAULT_ATTRIBUTION_ENDPOINT.into()
}
fn default_os() -> String {
    "iOS".into()
}
fn default_merge_wait() -> u64 {
    10
}
fn default_organic_grace() -> u64 {
    5
}
fn default_build_guard_delay() -> u64 {
    1
}
fn default_prompt_cooldown() -> u64 {
    259_200
}
fn default_max_redirects() -> u32 {
    70
}
fn default_timeout() -> u64 {
    30
}

impl Default for AttributionSettings {
    fn default() -> Self {
        Self {
            endpoint: default_attribution_endpoint(),
            app_id: String::new(),
            dev_key: String::new(),
        }
    }
}

impl Default for RemoteConfigSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bundle_id: String::new(),
            store_id: String::new(),
            project_id: String::new(),
            os: default_os(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            merge_wait_secs: default_merge_wait(),
            organic_grace_secs: default_organic_grace(),
            build_guard_delay_secs: default_build_guard_delay(),
            prompt_cooldown_secs: default_prompt_cooldown(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            max_redirects: default_max_redirects(),
            trust_policy: ServerTrustPolicy::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

impl TimingConfig {
    pub fn merge_wait(&self) -> Duration {
        Duration::from_secs(self.merge_wait_secs)
    }

    pub fn organic_grace(&self) -> Duration {
        Duration::from_secs(self.organic_grace_secs)
    }

    pub fn build_guard_delay(&self) -> Duration {
        Duration::from_secs(self.build_guard_delay_secs)
    }

    pub fn prompt_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.prompt_cooldown_secs as i64)
    }
}

impl RemoteConfigSettings {
    /// Store id sent with config requests.
    pub fn effective_store_id(&self, app_id: &str) -> String {
        if self.store_id.is_empty() {
            format!("id{app_id}")
        } else {
            self.store_id.clone()
        }
    }
}

impl GatewayConfig {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().map_or(true, |p| p.is_empty()) {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => value
                        .parse::<u64>()
                        .map(|n| serde_json::Value::Number(n.into()))
                        .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?,
                    serde_json::Value::Null if value.is_empty() || value == "none" => {
                        serde_json::Value::Null
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    fn path() -> Result<PathBuf, ConfigError> {
        data_dir()
            .map(|dir| dir.join("config.toml"))
            .map_err(|e| ConfigError::LoadFailed {
                path: PathBuf::from("config.toml"),
                message: e.to_string(),
            })
    }

    /// Load from disk or write and return the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_toml(&content).map_err(|e| match e {
                ConfigError::InvalidValue { message, .. } => ConfigError::LoadFailed {
                    path: path.clone(),
                    message,
                },
                other => other,
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
        }
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("using default gateway config: {e}");
            Self::default()
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::InvalidValue {
            key: "<root>".into(),
            message: e.to_string(),
        })
    }

    /// Persist to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, content).map_err(|e| ConfigError::SaveFailed {
            path,
            message: e.to_string(),
        })
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Set a config value by key and save. Returns error if key is unknown.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.apply(key, value)?;
        self.save()
    }
}
