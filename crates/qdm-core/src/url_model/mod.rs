//! Destination file naming.
//!
//! A download lands in its queue's directory under the last path segment of
//! its URL, sanitized for Linux. Names already taken by other downloads of
//! the same queue, or by anything already in the directory, get a ` (n)`
//! suffix before the extension.

mod sanitize;
mod segment;

pub use sanitize::sanitize_filename;
pub use segment::last_path_segment;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// File name used when the URL has no usable path segment.
pub const DEFAULT_FILENAME: &str = "download.bin";

/// Safe file name for `url`.
pub fn derive_filename(url: &str) -> String {
    last_path_segment(url)
        .map(|s| sanitize_filename(&s))
        .filter(|s| !s.is_empty() && s != "." && s != "..")
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string())
}

/// Destination for `url` inside `dir`, avoiding every path in `taken` and
/// every name that exists on disk (dangling symlinks included).
pub fn destination_path<'a>(
    dir: &Path,
    url: &str,
    taken: impl IntoIterator<Item = &'a Path>,
) -> PathBuf {
    let taken: HashSet<&Path> = taken.into_iter().collect();
    let is_free =
        |candidate: &Path| !taken.contains(candidate) && candidate.symlink_metadata().is_err();
    let name = derive_filename(url);
    let first = dir.join(&name);
    if is_free(&first) {
        return first;
    }

    let as_path = Path::new(&name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.clone());
    let ext = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1u32..)
        .map(|n| dir.join(format!("{stem} ({n}){ext}")))
        .find(|candidate| is_free(candidate))
        .unwrap_or(first)
}
