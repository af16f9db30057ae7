use crate::Quality;

/// A request to bring a project's metadata into a defined state.
///
/// Requests are plain values; the builder methods consume and return `self`.
///
/// ```
/// use nova_reload::{Quality, ReloadRequest};
///
/// let request = ReloadRequest::refresh()
///     .min_quality(Quality::Resolved)
///     .offline()
///     .reason("Computing classpath");
/// assert!(request.requires_consistency());
/// assert!(request.is_offline());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadRequest {
    min_quality: Quality,
    consistent: bool,
    force_reload: bool,
    save_modifications: bool,
    offline: bool,
    grant_trust: bool,
    reason: Option<String>,
}

impl ReloadRequest {
    fn new(min_quality: Quality, force_reload: bool, consistent: bool) -> Self {
        Self {
            min_quality,
            consistent,
            force_reload,
            save_modifications: false,
            offline: false,
            grant_trust: false,
            reason: None,
        }
    }

    /// Loads the project to [`Quality::Simple`]; stale metadata is acceptable.
    ///
    /// This should be the default for read operations.
    pub fn load() -> Self {
        Self::new(Quality::Simple, false, false)
    }

    /// Refreshes the project if its files changed since the last load. Fails on unsaved files.
    pub fn refresh() -> Self {
        Self::new(Quality::Simple, false, true)
    }

    /// Reloads the project unconditionally.
    pub fn reload() -> Self {
        Self::new(Quality::Simple, true, true)
    }

    pub fn min_quality(mut self, quality: Quality) -> Self {
        self.min_quality = quality;
        self
    }

    /// Whether the metadata must match files and editor buffers. With `false`, stale data
    /// that satisfies the quality level is returned as-is.
    pub fn consistent(mut self, consistent: bool) -> Self {
        self.consistent = consistent;
        self
    }

    pub fn force_reload(mut self) -> Self {
        self.force_reload = true;
        self
    }

    /// Save modified project files before reloading instead of failing with `OutOfSync`.
    pub fn save_modifications(mut self) -> Self {
        self.save_modifications = true;
        self
    }

    /// Forbid network access; providers that need to download fail with `Offline`.
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn online(mut self) -> Self {
        self.offline = false;
        self
    }

    /// Allow providers to run the project's build system even if it is not yet trusted.
    pub fn grant_trust(mut self) -> Self {
        self.grant_trust = true;
        self
    }

    /// Human-readable reason, shown in logs and progress reporting.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub(crate) fn with_default_reason(self, reason: impl FnOnce() -> String) -> Self {
        if self.reason.is_some() {
            self
        } else {
            let reason = reason();
            self.reason(reason)
        }
    }

    pub fn required_quality(&self) -> Quality {
        self.min_quality
    }

    pub fn requires_consistency(&self) -> bool {
        self.consistent
    }

    pub fn is_force_reload(&self) -> bool {
        self.force_reload
    }

    pub fn is_save_modifications(&self) -> bool {
        self.save_modifications
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn is_grant_trust(&self) -> bool {
        self.grant_trust
    }

    pub fn reload_reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Returns `true` if a reload started for `self` also delivers everything `next` asks for.
    ///
    /// Every guarantee of `self` must be equal or stronger. Offline mode is a restriction
    /// rather than a guarantee, so it must match exactly. The reason is ignored.
    pub fn satisfies(&self, next: &ReloadRequest) -> bool {
        if self.min_quality.is_worse_than(next.min_quality) {
            return false;
        }
        if next.consistent && !self.consistent {
            return false;
        }
        if next.force_reload && !self.force_reload {
            return false;
        }
        if next.save_modifications && !self.save_modifications {
            return false;
        }
        if next.grant_trust && !self.grant_trust {
            return false;
        }
        self.offline == next.offline
    }
}

impl Default for ReloadRequest {
    fn default() -> Self {
        Self::load()
    }
}
