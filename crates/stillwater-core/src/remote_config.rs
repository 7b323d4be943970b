//! Remote config client: exchanges attribution + device context for a
//! destination URL.
//!
//! The server answers `{"ok": true, "url": "<destination>"}`. Any other
//! shape, a non-200 status, or a transport failure is a fetch failure.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use crate::attribution::AttributionRecord;
use crate::capabilities::DeviceContext;
use crate::error::ConfigFetchError;

/// Body of a remote config request.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigRequest {
    pub attribution: AttributionRecord,
    pub device: DeviceContext,
    pub attribution_uid: String,
    pub push_token: Option<String>,
}

impl ConfigRequest {
    /// Attribution fields plus device context. Device keys overwrite any
    /// attribution key with the same name.
    pub fn to_json(&self) -> Value {
        let mut body: Map<String, Value> = self.attribution.as_map().clone();
        body.insert("os".into(), Value::String(self.device.os.clone()));
        body.insert("af_id".into(), Value::String(self.attribution_uid.clone()));
        body.insert("bundle_id".into(), Value::String(self.device.bundle_id.clone()));
        body.insert(
            "firebase_project_id".into(),
            self.device
                .project_id
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        body.insert("store_id".into(), Value::String(self.device.store_id.clone()));
        body.insert(
            "push_token".into(),
            self.push_token.clone().map(Value::String).unwrap_or(Value::Null),
        );
        body.insert("locale".into(), Value::String(self.device.locale.clone()));
        Value::Object(body)
    }
}

#[derive(Debug, Deserialize)]
struct ConfigResponse {
    ok: bool,
    #[serde(default)]
    url: Option<String>,
}

/// Validate a response body.
pub fn parse_config_response(body: &str) -> Result<Url, ConfigFetchError> {
    let resp: ConfigResponse =
        serde_json::from_str(body).map_err(|e| ConfigFetchError::InvalidBody(e.to_string()))?;
    if !resp.ok {
        return Err(ConfigFetchError::Rejected);
    }
    let raw = resp
        .url
        .ok_or_else(|| ConfigFetchError::InvalidBody("missing url".into()))?;
    Url::parse(&raw).map_err(|_| ConfigFetchError::InvalidUrl(raw))
}

/// Anything that can answer a config request.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch_destination(&self, request: ConfigRequest) -> Result<Url, ConfigFetchError>;
}

/// reqwest-backed remote config client.
pub struct HttpConfigClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpConfigClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ConfigFetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl ConfigSource for HttpConfigClient {
    async fn fetch_destination(&self, request: ConfigRequest) -> Result<Url, ConfigFetchError> {
        if self.endpoint.is_empty() {
            return Err(ConfigFetchError::NotConfigured);
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request.to_json())
            .send()
            .await?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(ConfigFetchError::Status(status.as_u16()));
        }

        let body = resp.text().await?;
        parse_config_response(&body)
    }
}
