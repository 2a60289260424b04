pub mod filename;

use crate::SUPPORTED_EXTENSIONS;
use crate::batch::BatchSample;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Category for samples sitting directly in the samples root.
pub const DEFAULT_CATEGORY: &str = "default";

/// Whether `path` has one of the supported audio extensions (case-insensitive).
pub fn is_audio_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

/// Recursively collect audio files under `root`, sorted by path.
///
/// Unreadable directory entries are skipped with a warning.
pub fn collect_audio_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("Skipping unreadable entry: {e}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_audio_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Collect labelled query samples under `root`.
///
/// The expected label is the normalized track key of the file name; the
/// category is the first directory below `root`, or [`DEFAULT_CATEGORY`].
pub fn discover_samples(root: &Path) -> Vec<BatchSample> {
    collect_audio_files(root)
        .into_iter()
        .map(|path| {
            let category = path
                .strip_prefix(root)
                .ok()
                .and_then(|rel| {
                    let mut parts = rel.components();
                    let first = parts.next()?;
                    // a lone component is the file itself
                    parts.next()?;
                    first.as_os_str().to_str().map(str::to_string)
                })
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            BatchSample {
                expected: filename::normalize_track_key(&file_name),
                category,
                path,
            }
        })
        .collect()
}
