use std::fmt;

use serde::{Deserialize, Serialize};

/// Confidence level of loaded project metadata.
///
/// Levels are totally ordered from [`Quality::None`] (nothing loaded) to
/// [`Quality::Consistent`]. Aggregating several providers takes the *meet*
/// (minimum) of their levels: a project is only as trustworthy as its weakest
/// part.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    schemars::JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum Quality {
    /// Metadata has not been loaded yet. Requesting this level always succeeds.
    None,
    /// Heuristic data; the project is not trusted to run its build system.
    Untrusted,
    /// Heuristic data.
    Fallback,
    /// Plugins or artifacts needed to interpret the project are missing.
    Incomplete,
    /// Metadata is partial and unreliable.
    Broken,
    /// Core structure is known, dependency information may be missing.
    Simple,
    /// Settings and parameters are loaded; external artifacts may be missing.
    Loaded,
    /// Metadata was complete when produced; references are resolved locally.
    Resolved,
    /// Resolved, and consistent with on-disk files and editor buffers.
    Consistent,
}

impl Quality {
    pub const ALL: [Quality; 9] = [
        Quality::None,
        Quality::Untrusted,
        Quality::Fallback,
        Quality::Incomplete,
        Quality::Broken,
        Quality::Simple,
        Quality::Loaded,
        Quality::Resolved,
        Quality::Consistent,
    ];

    /// Returns `true` if `self` is the same or better than `other`.
    pub fn is_at_least(self, other: Quality) -> bool {
        self >= other
    }

    /// Returns `true` if `self` does not meet `other`.
    pub fn is_worse_than(self, other: Quality) -> bool {
        self < other
    }

    /// Lattice meet.
    pub fn meet(self, other: Quality) -> Quality {
        self.min(other)
    }

    /// Meet over a set of levels; an empty set yields [`Quality::None`].
    pub fn meet_all(levels: impl IntoIterator<Item = Quality>) -> Quality {
        levels.into_iter().min().unwrap_or(Quality::None)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::None => "none",
            Quality::Untrusted => "untrusted",
            Quality::Fallback => "fallback",
            Quality::Incomplete => "incomplete",
            Quality::Broken => "broken",
            Quality::Simple => "simple",
            Quality::Loaded => "loaded",
            Quality::Resolved => "resolved",
            Quality::Consistent => "consistent",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
