use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::{PartState, Quality};

/// Fold of several provider records into project-level values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    /// Meet of all part qualities; [`Quality::None`] without parts.
    pub quality: Quality,
    /// Oldest part timestamp. `None` if any part has an unknown timestamp or there are no parts.
    pub timestamp: Option<SystemTime>,
    /// Union of all loaded files.
    pub files: BTreeSet<PathBuf>,
    pub valid: bool,
    pub parts: usize,
}

impl Aggregate {
    pub fn of<'a>(parts: impl IntoIterator<Item = &'a PartState>) -> Self {
        let mut quality: Option<Quality> = None;
        let mut timestamp: Option<Option<SystemTime>> = None;
        let mut files = BTreeSet::new();
        let mut valid = true;
        let mut count = 0;

        for part in parts {
            count += 1;
            quality = Some(quality.map_or(part.quality, |q| q.meet(part.quality)));
            timestamp = Some(match (timestamp, part.timestamp) {
                (None, ts) => ts,
                (Some(Some(current)), Some(ts)) => Some(current.min(ts)),
                _ => None,
            });
            files.extend(part.files.iter().cloned());
            valid &= part.valid;
        }

        Self {
            quality: quality.unwrap_or(Quality::None),
            timestamp: timestamp.flatten(),
            files,
            valid,
            parts: count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts == 0
    }
}
