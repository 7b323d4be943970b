//! Navigation policy: what loads in-surface and what goes to the OS.

use url::Url;

/// Schemes loaded inside the surface.
pub const IN_SURFACE_SCHEMES: [&str; 7] =
    ["http", "https", "about", "blob", "data", "javascript", "file"];

/// Targets loaded inside the surface whatever their scheme parses as.
const IN_SURFACE_PREFIXES: [&str; 3] = ["srcdoc", "about:blank", "about:srcdoc"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    Allow,
    /// Cancel in-surface and open with the OS.
    OpenExternally(Url),
    Cancel,
}

/// Decide how a navigation request is handled.
///
/// Requests without a URL are allowed.
pub fn decide_navigation(target: Option<&str>) -> NavigationDecision {
    let Some(raw) = target.map(str::trim) else {
        return NavigationDecision::Allow;
    };
    let lower = raw.to_ascii_lowercase();

    if IN_SURFACE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return NavigationDecision::Allow;
    }

    match Url::parse(raw) {
        Ok(url) if IN_SURFACE_SCHEMES.contains(&url.scheme()) => NavigationDecision::Allow,
        Ok(url) => NavigationDecision::OpenExternally(url),
        Err(e) => {
            tracing::debug!("cancelling unparseable navigation {raw:?}: {e}");
            NavigationDecision::Cancel
        }
    }
}
