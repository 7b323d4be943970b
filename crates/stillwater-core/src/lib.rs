//! # Stillwater Core Library
//!
//! Launch gateway for a native app that may hand its screen over to a
//! remotely configured web destination. The library decides, once per
//! launch, whether the native experience or the destination is shown, and
//! supervises the web surfaces while the destination is live. The CLI binary
//! drives the same library for inspection and testing.
//!
//! ## Architecture
//!
//! - **Phase Resolution**: merges attribution events, applies the decision
//!   rules, and talks to the attribution and remote config endpoints
//! - **Storage**: SQLite key-value state and TOML configuration
//! - **Browser**: primary surface, child overlays, redirect and navigation policy
//!
//! ## Key Components
//!
//! - [`PhaseMachine`]: synchronous phase state machine
//! - [`Gateway`]: tokio driver publishing [`GatewayView`]
//! - [`StateStore`]: persisted app state
//! - [`GatewayConfig`]: application configuration management
//! - [`BrowserSession`]: destination surface supervisor

pub mod attribution;
pub mod browser;
pub mod capabilities;
pub mod error;
pub mod phase;
pub mod push;
pub mod remote_config;
pub mod storage;

pub use attribution::{AttributionRecord, AttributionSource, DeepLinkPayload, HttpAttributionClient};
pub use browser::{BrowserSession, ServerTrustPolicy, SurfaceHost, SurfaceId, WebSurface};
pub use capabilities::{AttributionIdentity, DeviceContext, PushTokenProvider};
pub use error::{
    AttributionFetchError, ConfigError, ConfigFetchError, CoreError, StorageError, SurfaceError,
};
pub use phase::{
    decide_phase, ConsentOutcome, DegradeReason, Gateway, GatewayHandle, GatewayServices,
    GatewayView, Phase, PhaseDecision, PhaseMachine, PromptPolicy,
};
pub use remote_config::{ConfigRequest, ConfigSource, HttpConfigClient};
pub use storage::{AppMode, CookieJar, GatewayConfig, PersistedAppState, StateStore};
