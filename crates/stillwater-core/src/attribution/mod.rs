//! Install attribution: records, merging, and the identity endpoint client.

pub mod client;
pub mod record;

pub use client::{AttributionRequest, AttributionSource, HttpAttributionClient};
pub use record::{AttributionRecord, DeepLinkPayload, ORGANIC_STATUS, STATUS_KEY};
