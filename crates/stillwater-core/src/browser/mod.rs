//! Browser session supervision for the destination URL.

mod navigation;
mod redirect;
mod supervisor;
mod surface;

pub use navigation::{decide_navigation, NavigationDecision, IN_SURFACE_SCHEMES};
pub use redirect::{RedirectGuard, RedirectVerdict, DEFAULT_MAX_REDIRECTS};
pub use supervisor::{
    BrowserSession, ChildRequest, FailureOutcome, NavigationError, VIEWPORT_LOCK_SCRIPT,
};
pub use surface::{
    ServerTrustPolicy, SurfaceHost, SurfaceId, SurfaceSettings, TrustDecision, WebSurface,
};
