//! Abstractions over the platform web view.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SurfaceError;
use crate::storage::StoredCookie;

/// Identifies a surface within one [`super::BrowserSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub(crate) u64);

impl SurfaceId {
    /// The primary surface always has id 0.
    pub const PRIMARY: SurfaceId = SurfaceId(0);

    pub fn is_primary(&self) -> bool {
        *self == Self::PRIMARY
    }
}

/// Configuration every surface is created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceSettings {
    pub javascript_enabled: bool,
    pub javascript_can_open_windows: bool,
    pub inline_media_playback: bool,
    pub media_requires_user_action: bool,
    pub back_forward_gestures: bool,
    /// Pinch zoom is locked at 1.0 when false.
    pub zoom_enabled: bool,
    pub bounces: bool,
}

impl Default for SurfaceSettings {
    fn default() -> Self {
        Self {
            javascript_enabled: true,
            javascript_can_open_windows: true,
            inline_media_playback: true,
            media_requires_user_action: false,
            back_forward_gestures: true,
            zoom_enabled: false,
            bounces: false,
        }
    }
}

/// One platform web view.
pub trait WebSurface {
    fn load(&mut self, url: &Url);
    fn stop_loading(&mut self);
    fn can_go_back(&self) -> bool;
    fn go_back(&mut self);
    fn current_url(&self) -> Option<Url>;
    fn evaluate_script(&mut self, script: &str) -> Result<(), SurfaceError>;
    /// Every cookie visible to this surface's data store.
    fn cookies(&self) -> Vec<StoredCookie>;
    fn set_cookie(&mut self, cookie: &StoredCookie);
}

/// Platform glue that creates surfaces and talks to the OS.
pub trait SurfaceHost {
    type Surface: WebSurface;

    fn create_primary(&mut self, settings: &SurfaceSettings) -> Self::Surface;
    /// Create an overlay surface pinned to the primary's bounds.
    fn create_child(&mut self, settings: &SurfaceSettings) -> Self::Surface;
    fn close_child(&mut self, surface: Self::Surface);
    /// Hand a URL the session won't load to the operating system.
    fn open_external(&mut self, url: &Url);
}

/// How TLS server-trust challenges are answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerTrustPolicy {
    /// Let the platform evaluate the certificate chain.
    #[default]
    SystemDefault,
    /// Accept any presented server certificate.
    AcceptAny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    PerformDefaultHandling,
    UseServerTrust,
}

impl ServerTrustPolicy {
    pub fn decide(&self, host: &str) -> TrustDecision {
        match self {
            ServerTrustPolicy::SystemDefault => TrustDecision::PerformDefaultHandling,
            ServerTrustPolicy::AcceptAny => {
                tracing::warn!(host, "accepting server certificate without validation");
                TrustDecision::UseServerTrust
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerTrustPolicy::SystemDefault => "system_default",
            ServerTrustPolicy::AcceptAny => "accept_any",
        }
    }
}
