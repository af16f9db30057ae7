use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::Mutex;

/// Access to on-disk timestamps and unsaved editor buffers.
///
/// The engine only asks three questions about a file: when it was last written, whether an
/// editor holds unsaved changes for it, and how to save those changes.
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Modification time of the file on disk, or `None` if the file does not exist.
    fn last_modified(&self, path: &Path) -> Option<SystemTime>;

    /// Returns `true` if the file has unsaved modifications.
    fn is_modified(&self, path: &Path) -> bool;

    /// Writes pending modifications of `path` to disk.
    fn save(&self, path: &Path) -> io::Result<()>;
}

/// Local file system plus an in-memory overlay of unsaved editor text.
#[derive(Debug, Default)]
pub struct LocalDocuments {
    overlay: Mutex<HashMap<PathBuf, String>>,
}

impl LocalDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records unsaved text for `path`, replacing any previous edit.
    pub fn edit(&self, path: impl Into<PathBuf>, text: impl Into<String>) {
        self.overlay.lock().insert(path.into(), text.into());
    }

    /// Drops unsaved text for `path`. Returns `true` if there was any.
    pub fn discard(&self, path: &Path) -> bool {
        self.overlay.lock().remove(path).is_some()
    }

    /// Unsaved text for `path`, if any.
    pub fn text(&self, path: &Path) -> Option<String> {
        self.overlay.lock().get(path).cloned()
    }

    pub fn modified_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<_> = self.overlay.lock().keys().cloned().collect();
        files.sort();
        files
    }
}

impl DocumentStore for LocalDocuments {
    fn last_modified(&self, path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
    }

    fn is_modified(&self, path: &Path) -> bool {
        self.overlay.lock().contains_key(path)
    }

    fn save(&self, path: &Path) -> io::Result<()> {
        let Some(text) = self.text(path) else {
            return Ok(());
        };
        std::fs::write(path, text.as_bytes())?;

        // Keep edits made while the file was being written.
        let mut overlay = self.overlay.lock();
        if overlay.get(path).is_some_and(|current| *current == text) {
            overlay.remove(path);
        }
        Ok(())
    }
}
