//! Browser session: one primary surface plus a stack of child overlays.
//!
//! The session owns both the surfaces and the navigation policy. The host
//! forwards every platform callback (navigation started, redirect, load
//! finished, failure, popup request, trust challenge) to the matching method
//! here.

use chrono::Utc;
use indoc::indoc;
use url::Url;

use super::navigation::{decide_navigation, NavigationDecision};
use super::redirect::{RedirectGuard, RedirectVerdict};
use super::surface::{ServerTrustPolicy, SurfaceHost, SurfaceId, SurfaceSettings, TrustDecision, WebSurface};
use crate::error::StorageError;
use crate::storage::{BrowserConfig, CookieJar, CookiePersistence};

/// Injected after each load: locks the viewport and disables pinch zoom.
pub const VIEWPORT_LOCK_SCRIPT: &str = indoc! {"
    (function() {
        const vp = document.createElement('meta');
        vp.name = 'viewport';
        vp.content = 'width=device-width, initial-scale=1.0, maximum-scale=1.0, user-scalable=no';
        document.head.appendChild(vp);

        const rules = document.createElement('style');
        rules.textContent = 'body { touch-action: pan-x pan-y; } input, textarea { font-size: 16px !important; }';
        document.head.appendChild(rules);

        document.addEventListener('gesturestart', e => e.preventDefault());
        document.addEventListener('gesturechange', e => e.preventDefault());
    })();
"};

/// A surface requested by page content (`window.open`, `target=_blank`).
#[derive(Debug, Clone, Default)]
pub struct ChildRequest {
    pub url: Option<String>,
    /// The request names a frame that already exists.
    pub targets_existing_frame: bool,
}

/// Provisional navigation failures the session reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationError {
    TooManyRedirects,
    NotConnected,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Reloaded the last known good URL.
    Recovered,
    /// The host should report lost connectivity to the gateway.
    ConnectivityLost,
    Ignored,
}

struct Slot<S> {
    id: SurfaceId,
    surface: S,
    guard: RedirectGuard,
}

pub struct BrowserSession<H: SurfaceHost, P: CookiePersistence> {
    host: H,
    persistence: P,
    settings: SurfaceSettings,
    trust_policy: ServerTrustPolicy,
    max_redirects: u32,
    primary: Slot<H::Surface>,
    children: Vec<Slot<H::Surface>>,
    next_id: u64,
    cookies_restored: bool,
}

impl<H: SurfaceHost, P: CookiePersistence> BrowserSession<H, P> {
    pub fn new(mut host: H, persistence: P, config: &BrowserConfig) -> Self {
        let settings = SurfaceSettings::default();
        let primary = Slot {
            id: SurfaceId::PRIMARY,
            surface: host.create_primary(&settings),
            guard: RedirectGuard::new(config.max_redirects),
        };
        if config.trust_policy == ServerTrustPolicy::AcceptAny {
            tracing::warn!("browser session accepts any server certificate");
        }
        Self {
            host,
            persistence,
            settings,
            trust_policy: config.trust_policy,
            max_redirects: config.max_redirects,
            primary,
            children: Vec::new(),
            next_id: 1,
            cookies_restored: false,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    pub fn primary(&self) -> &H::Surface {
        &self.primary.surface
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&H::Surface> {
        self.slot(id).map(|s| &s.surface)
    }

    pub fn child_ids(&self) -> Vec<SurfaceId> {
        self.children.iter().map(|s| s.id).collect()
    }

    pub fn redirect_count(&self, id: SurfaceId) -> Option<u32> {
        self.slot(id).map(|s| s.guard.count())
    }

    pub fn last_known_good(&self, id: SurfaceId) -> Option<&Url> {
        self.slot(id).and_then(|s| s.guard.last_known_good())
    }

    fn slot(&self, id: SurfaceId) -> Option<&Slot<H::Surface>> {
        if id.is_primary() {
            Some(&self.primary)
        } else {
            self.children.iter().find(|s| s.id == id)
        }
    }

    fn slot_mut(&mut self, id: SurfaceId) -> Option<&mut Slot<H::Surface>> {
        if id.is_primary() {
            Some(&mut self.primary)
        } else {
            self.children.iter_mut().find(|s| s.id == id)
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Load the destination into the primary surface.
    ///
    /// The persisted cookie jar is restored before the first load.
    pub fn open(&mut self, url: &Url) -> Result<(), StorageError> {
        if !self.cookies_restored {
            let jar = self.persistence.load_cookie_jar()?;
            let mut restored = 0;
            for cookie in jar.live_cookies(Utc::now()) {
                self.primary.surface.set_cookie(cookie);
                restored += 1;
            }
            tracing::debug!(restored, "restored cookie jar");
            self.cookies_restored = true;
        }

        self.primary.guard.reset();
        self.primary.surface.load(url);
        Ok(())
    }

    /// Create an overlay for a page-initiated window.
    pub fn spawn_child(&mut self, request: &ChildRequest) -> Option<SurfaceId> {
        if request.targets_existing_frame {
            return None;
        }

        let id = SurfaceId(self.next_id);
        self.next_id += 1;
        let mut surface = self.host.create_child(&self.settings);

        match request.url.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() && raw != "about:blank" => match Url::parse(raw) {
                Ok(url) => surface.load(&url),
                Err(e) => tracing::debug!("child surface left blank, bad url {raw:?}: {e}"),
            },
            _ => {}
        }

        self.children.push(Slot {
            id,
            surface,
            guard: RedirectGuard::new(self.max_redirects),
        });
        tracing::debug!(children = self.children.len(), "child surface opened");
        Some(id)
    }

    /// Close the top child (optionally loading `reload` into the primary),
    /// otherwise go back in the primary's history.
    ///
    /// Returns false when there was nothing to go back to.
    pub fn go_back(&mut self, reload: Option<&Url>) -> bool {
        if let Some(child) = self.children.pop() {
            self.host.close_child(child.surface);
            if let Some(url) = reload {
                self.primary.guard.reset();
                self.primary.surface.load(url);
            }
            return true;
        }

        if self.primary.surface.can_go_back() {
            self.primary.surface.go_back();
            return true;
        }
        false
    }

    /// Left-edge swipe on a surface.
    pub fn edge_swipe(&mut self, id: SurfaceId) -> bool {
        let is_top = self.children.last().map(|s| s.id) == Some(id);
        let Some(slot) = self.slot_mut(id) else {
            return false;
        };

        if slot.surface.can_go_back() {
            slot.surface.go_back();
            true
        } else if is_top {
            self.go_back(None)
        } else {
            false
        }
    }

    // ── Navigation callbacks ─────────────────────────────────────────

    pub fn navigation_started(&mut self, id: SurfaceId) {
        if let Some(slot) = self.slot_mut(id) {
            slot.guard.reset();
        }
    }

    /// A server redirect arrived for a provisional navigation.
    ///
    /// Primary-surface cookies are persisted after every tolerated redirect.
    pub fn server_redirect(&mut self, id: SurfaceId) -> Result<RedirectVerdict, StorageError> {
        let Some(slot) = self.slot_mut(id) else {
            return Ok(RedirectVerdict::Continue);
        };

        let current = slot.surface.current_url();
        let verdict = slot.guard.record_redirect(current);
        if let RedirectVerdict::Abort { reload } = &verdict {
            slot.surface.stop_loading();
            if let Some(url) = reload {
                slot.surface.load(url);
            }
            return Ok(verdict);
        }

        if id.is_primary() {
            self.persist_cookies()?;
        }
        Ok(verdict)
    }

    pub fn load_finished(&mut self, id: SurfaceId) {
        let Some(slot) = self.slot_mut(id) else {
            return;
        };
        slot.guard.reset();
        if let Err(e) = slot.surface.evaluate_script(VIEWPORT_LOCK_SCRIPT) {
            tracing::warn!("viewport script failed: {e}");
        }
    }

    pub fn navigation_failed(&mut self, id: SurfaceId, error: &NavigationError) -> FailureOutcome {
        match error {
            NavigationError::TooManyRedirects => {
                let Some(slot) = self.slot_mut(id) else {
                    return FailureOutcome::Ignored;
                };
                match slot.guard.last_known_good().cloned() {
                    Some(url) => {
                        slot.surface.load(&url);
                        FailureOutcome::Recovered
                    }
                    None => FailureOutcome::Ignored,
                }
            }
            NavigationError::NotConnected => FailureOutcome::ConnectivityLost,
            NavigationError::Other(message) => {
                tracing::debug!("navigation failed: {message}");
                FailureOutcome::Ignored
            }
        }
    }

    /// Policy decision for a navigation action. External targets are
    /// handed to the host before cancelling.
    pub fn navigation_action(&mut self, id: SurfaceId, target: Option<&str>) -> NavigationDecision {
        let decision = decide_navigation(target);
        match &decision {
            NavigationDecision::Allow => {
                if let (Some(url), Some(slot)) = (target.and_then(|t| Url::parse(t).ok()), self.slot_mut(id)) {
                    slot.guard.set_last_known_good(url);
                }
            }
            NavigationDecision::OpenExternally(url) => self.host.open_external(url),
            NavigationDecision::Cancel => {}
        }
        decision
    }

    pub fn server_trust_challenge(&self, host: &str) -> TrustDecision {
        self.trust_policy.decide(host)
    }

    fn persist_cookies(&mut self) -> Result<(), StorageError> {
        let cookies = self.primary.surface.cookies();
        let jar = CookieJar::capture(&cookies);
        self.persistence.save_cookie_jar(&jar)
    }
}
