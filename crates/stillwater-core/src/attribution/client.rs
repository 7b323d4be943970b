//! Organic-install attribution lookups against the identity endpoint.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::record::AttributionRecord;
use crate::error::AttributionFetchError;
use crate::storage::AttributionSettings;

/// Anything that can resolve attribution data for a device.
#[async_trait]
pub trait AttributionSource: Send + Sync {
    async fn fetch_organic(
        &self,
        device_id: &str,
    ) -> Result<AttributionRecord, AttributionFetchError>;
}

/// Builds `GET {endpoint}id{app_id}?devkey=..&device_id=..`.
#[derive(Debug, Clone, Default)]
pub struct AttributionRequest {
    endpoint: String,
    app_id: String,
    dev_key: String,
    device_id: String,
}

impl AttributionRequest {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ..Self::default()
        }
    }

    pub fn app_id(mut self, app_id: &str) -> Self {
        self.app_id = app_id.to_string();
        self
    }

    pub fn dev_key(mut self, dev_key: &str) -> Self {
        self.dev_key = dev_key.to_string();
        self
    }

    pub fn device_id(mut self, device_id: &str) -> Self {
        self.device_id = device_id.to_string();
        self
    }

    /// All three parameters are required.
    pub fn url(&self) -> Result<Url, AttributionFetchError> {
        if self.app_id.is_empty() {
            return Err(AttributionFetchError::MissingParameter("app id"));
        }
        if self.dev_key.is_empty() {
            return Err(AttributionFetchError::MissingParameter("dev key"));
        }
        if self.device_id.is_empty() {
            return Err(AttributionFetchError::MissingParameter("device id"));
        }

        let mut base = self.endpoint.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let mut url = Url::parse(&format!("{base}id{}", self.app_id))
            .map_err(|_| AttributionFetchError::MissingParameter("valid endpoint"))?;
        url.query_pairs_mut()
            .append_pair("devkey", &self.dev_key)
            .append_pair("device_id", &self.device_id);
        Ok(url)
    }
}

/// reqwest-backed attribution client.
pub struct HttpAttributionClient {
    client: reqwest::Client,
    settings: AttributionSettings,
}

impl HttpAttributionClient {
    pub fn new(settings: AttributionSettings, timeout: Duration) -> Result<Self, AttributionFetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, settings })
    }

    fn request(&self, device_id: &str) -> AttributionRequest {
        AttributionRequest::new(&self.settings.endpoint)
            .app_id(&self.settings.app_id)
            .dev_key(&self.settings.dev_key)
            .device_id(device_id)
    }
}

#[async_trait]
impl AttributionSource for HttpAttributionClient {
    async fn fetch_organic(
        &self,
        device_id: &str,
    ) -> Result<AttributionRecord, AttributionFetchError> {
        let url = self.request(device_id).url()?;
        tracing::debug!(host = url.host_str().unwrap_or_default(), "fetching organic attribution");

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(AttributionFetchError::Status(status.as_u16()));
        }

        let body = resp.text().await?;
        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(serde_json::Value::Object(map)) => Ok(AttributionRecord::from(map)),
            Ok(other) => Err(AttributionFetchError::InvalidBody(format!(
                "expected object, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(AttributionFetchError::InvalidBody(e.to_string())),
        }
    }
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
