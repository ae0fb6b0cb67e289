//! Filesystem traversal for the library root.
//!
//! The reconciler needs the complete listing up front (deletion
//! detection compares it against the catalog), so this walks eagerly
//! instead of streaming. Paths come back sorted for deterministic runs.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Supported audio extensions (case-insensitive).
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "m4a", "opus"];

/// Check whether a path looks like an audio file we handle.
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            AUDIO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Recursively collect all audio files under `root`.
///
/// Unreadable directory entries are skipped silently; a missing root
/// yields an empty listing rather than an error, matching how an empty
/// library behaves.
pub fn collect_audio_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_audio_file(p))
        .collect();
    files.sort();
    files
}

/// Make a path relative to the library root, as a forward-slash string.
///
/// Returns `None` for paths outside the root.
pub fn relative_to_root(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}
