use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::MavenReloadConfig;

const SKIPPED_DIRS: &[&str] = &[".git", "target", "build", ".gradle", ".nova", ".idea"];

/// Collects the files Maven reads to build the project model under `root`.
///
/// This covers every `pom.xml`, the wrapper scripts, and the `.mvn` settings. Output and VCS
/// directories are skipped.
pub fn collect_build_files(root: &Path) -> io::Result<BTreeSet<PathBuf>> {
    let mut out = BTreeSet::new();
    collect_rec(root, &mut out)?;
    Ok(out)
}

fn collect_rec(dir: &Path, out: &mut BTreeSet<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if entry.file_type()?.is_dir() {
            if name == ".mvn" {
                for file in [
                    path.join("maven.config"),
                    path.join("jvm.config"),
                    path.join("extensions.xml"),
                    path.join("wrapper").join("maven-wrapper.properties"),
                ] {
                    if file.is_file() {
                        out.insert(file);
                    }
                }
                continue;
            }
            if SKIPPED_DIRS.contains(&name.as_ref()) {
                continue;
            }
            collect_rec(&path, out)?;
            continue;
        }

        if name == "pom.xml" || name == "mvnw" || name == "mvnw.cmd" {
            out.insert(path);
        }
    }
    Ok(())
}

/// The Maven executable to run for `root`: the wrapper when preferred and present, else the
/// configured path.
pub fn mvn_executable(config: &MavenReloadConfig, root: &Path) -> PathBuf {
    if config.prefer_wrapper {
        let wrapper = root.join(if cfg!(windows) { "mvnw.cmd" } else { "mvnw" });
        if wrapper.exists() {
            return wrapper;
        }
    }
    config.mvn_path.clone()
}

/// Returns `true` if every file exists and none was modified after `loaded`.
pub(crate) fn unchanged_since(files: &BTreeSet<PathBuf>, loaded: SystemTime) -> bool {
    files.iter().all(|file| {
        std::fs::metadata(file)
            .and_then(|meta| meta.modified())
            .map(|mtime| mtime <= loaded)
            .unwrap_or(false)
    })
}

/// Maven messages reported when plugins or dependencies cannot be obtained.
const UNRESOLVED_MARKERS: &[&str] = &[
    "Could not resolve dependencies",
    "Could not find artifact",
    "Could not transfer artifact",
    "Non-resolvable parent POM",
    "Non-resolvable import POM",
    "could not be resolved",
    "Cannot access central",
];

/// Returns `true` if a failed build only failed because artifacts are missing locally.
pub(crate) fn is_unresolved_failure(output: &str) -> bool {
    UNRESOLVED_MARKERS
        .iter()
        .any(|marker| output.contains(marker))
}
