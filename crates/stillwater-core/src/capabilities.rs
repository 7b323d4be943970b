//! Narrow capability traits for platform SDK handles.
//!
//! The engine never reaches for a global SDK singleton; the host injects
//! these instead, and tests inject fixed values.

use serde::{Deserialize, Serialize};

use crate::storage::GatewayConfig;

/// Supplies the attribution provider's id for this install.
pub trait AttributionIdentity: Send + Sync {
    fn attribution_uid(&self) -> String;
}

/// Supplies the messaging token when none has been persisted yet.
pub trait PushTokenProvider: Send + Sync {
    fn push_token(&self) -> Option<String>;

    /// Called once notifications are granted.
    fn register_for_push(&self) {}
}

/// Identity backed by a fixed string (device id file, SDK value captured at launch).
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub String);

impl AttributionIdentity for StaticIdentity {
    fn attribution_uid(&self) -> String {
        self.0.clone()
    }
}

/// Push token provider with a fixed answer.
#[derive(Debug, Clone, Default)]
pub struct StaticPushToken(pub Option<String>);

impl PushTokenProvider for StaticPushToken {
    fn push_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Static device context sent with every remote config request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceContext {
    pub os: String,
    pub bundle_id: String,
    pub project_id: Option<String>,
    pub store_id: String,
    pub locale: String,
}

impl DeviceContext {
    pub fn from_config(config: &GatewayConfig, preferred_language: Option<&str>) -> Self {
        let remote = &config.remote_config;
        Self {
            os: remote.os.clone(),
            bundle_id: remote.bundle_id.clone(),
            project_id: Some(remote.project_id.clone()).filter(|p| !p.is_empty()),
            store_id: remote.effective_store_id(&config.attribution.app_id),
            locale: locale_code(preferred_language),
        }
    }
}

/// Two-letter upper-case language code, `EN` when unknown.
///
/// Accepts tags like `de-AT`, `pt_BR.UTF-8` or `fr`.
pub fn locale_code(preferred_language: Option<&str>) -> String {
    preferred_language
        .map(str::trim)
        .filter(|tag| tag.len() >= 2 && tag.is_char_boundary(2))
        .map(|tag| tag[..2].to_uppercase())
        .filter(|code| code.chars().all(|c| c.is_ascii_alphabetic()))
        .unwrap_or_else(|| "EN".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locale_code_takes_language_prefix() {
        assert_eq!(locale_code(Some("de-AT")), "DE");
        assert_eq!(locale_code(Some("pt_BR.UTF-8")), "PT");
        assert_eq!(locale_code(Some("fr")), "FR");
    }

    #[test]
    fn locale_code_defaults_to_en() {
        assert_eq!(locale_code(None), "EN");
        assert_eq!(locale_code(Some("")), "EN");
        assert_eq!(locale_code(Some("C")), "EN");
        assert_eq!(locale_code(Some("42")), "EN");
    }

    #[test]
    fn device_context_derives_store_id_and_project() {
        let mut config = GatewayConfig::default();
        config.attribution.app_id = "555".into();
        config.remote_config.bundle_id = "com.example.stillwater".into();
        let ctx = DeviceContext::from_config(&config, Some("en-US"));
        assert_eq!(ctx.store_id, "id555");
        assert_eq!(ctx.project_id, None);
        assert_eq!(ctx.locale, "EN");
        assert_eq!(ctx.os, "iOS");
    }
}
