//! Redirect storm protection.

use url::Url;

/// Server redirects tolerated within one navigation.
pub const DEFAULT_MAX_REDIRECTS: u32 = 70;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectVerdict {
    Continue,
    /// Stop loading and go back to the last good URL, if any.
    Abort { reload: Option<Url> },
}

/// Counts server redirects for one surface.
#[derive(Debug, Clone)]
pub struct RedirectGuard {
    max: u32,
    count: u32,
    last_known_good: Option<Url>,
}

impl Default for RedirectGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REDIRECTS)
    }
}

impl RedirectGuard {
    pub fn new(max: u32) -> Self {
        Self {
            max,
            count: 0,
            last_known_good: None,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn last_known_good(&self) -> Option<&Url> {
        self.last_known_good.as_ref()
    }

    pub fn set_last_known_good(&mut self, url: Url) {
        self.last_known_good = Some(url);
    }

    /// New navigation or finished load.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Record one redirect. `current` is the surface URL after it.
    pub fn record_redirect(&mut self, current: Option<Url>) -> RedirectVerdict {
        self.count += 1;
        if self.count > self.max {
            tracing::warn!(count = self.count, "redirect limit exceeded");
            return RedirectVerdict::Abort {
                reload: self.last_known_good.clone(),
            };
        }
        if let Some(url) = current {
            self.last_known_good = Some(url);
        }
        RedirectVerdict::Continue
    }
}
