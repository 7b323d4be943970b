//! Push notification payload handling.

use serde_json::Value;
use url::Url;

/// Destination URL carried by a push payload.
///
/// Looks at `url` first, then `data.url`. Unparseable URLs are ignored.
pub fn extract_destination(payload: &Value) -> Option<Url> {
    let raw = payload
        .get("url")
        .and_then(Value::as_str)
        .or_else(|| payload.get("data")?.get("url")?.as_str())?;

    match Url::parse(raw.trim()) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::debug!("ignoring push url {raw:?}: {e}");
            None
        }
    }
}
