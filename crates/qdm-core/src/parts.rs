//! Part-file naming, discovery and residue cleanup.
//!
//! Part `i` of a download to `dest` lives at `<dest>.part<i>`, next to the
//! destination, where `i = start / chunk_size`.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Suffix between the destination file name and the part index.
pub const PART_SUFFIX: &str = ".part";

/// Deterministic path of part `index` for destination `dest`.
pub fn part_path(dest: &Path, index: usize) -> PathBuf {
    let mut name: OsString = dest.as_os_str().to_owned();
    name.push(format!("{PART_SUFFIX}{index}"));
    PathBuf::from(name)
}

/// Parse the index out of a part file name belonging to `dest_name`.
fn parse_index(dest_name: &str, file_name: &str) -> Option<usize> {
    let digits = file_name.strip_prefix(dest_name)?.strip_prefix(PART_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Every part file present for `dest`, keyed by part index.
///
/// A missing parent directory yields an empty map.
pub fn list_part_files(dest: &Path) -> Result<BTreeMap<usize, PathBuf>> {
    let mut found = BTreeMap::new();
    let Some(dest_name) = dest.file_name().and_then(|n| n.to_str()) else {
        return Ok(found);
    };
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(found),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to list {}", dir.display()));
        }
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(index) = name.to_str().and_then(|n| parse_index(dest_name, n)) {
            found.insert(index, entry.path());
        }
    }
    Ok(found)
}

/// On-disk size of part `index`, or None if it does not exist.
pub fn part_size(dest: &Path, index: usize) -> Option<u64> {
    fs::metadata(part_path(dest, index)).ok().map(|m| m.len())
}

/// Remove every part file of `dest`. Returns how many were removed.
pub fn cleanup_parts(dest: &Path) -> Result<usize> {
    let parts = list_part_files(dest)?;
    let mut removed = 0;
    for path in parts.values() {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to remove {}", path.display()));
            }
        }
    }
    if removed > 0 {
        tracing::debug!(path = %dest.display(), removed, "removed part files");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_path_appends_index() {
        let p = part_path(Path::new("/tmp/dl/file.iso"), 7);
        assert_eq!(p, PathBuf::from("/tmp/dl/file.iso.part7"));
    }

    #[test]
    fn parse_index_accepts_only_own_parts() {
        assert_eq!(parse_index("a.bin", "a.bin.part0"), Some(0));
        assert_eq!(parse_index("a.bin", "a.bin.part12"), Some(12));
        assert_eq!(parse_index("a.bin", "a.bin.part"), None);
        assert_eq!(parse_index("a.bin", "a.bin.part1x"), None);
        assert_eq!(parse_index("a.bin", "b.bin.part1"), None);
        assert_eq!(parse_index("a.bin", "a.bin"), None);
    }

    #[test]
    fn list_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        for i in [0usize, 2, 10] {
            fs::write(part_path(&dest, i), b"x").unwrap();
        }
        fs::write(dir.path().join("other.bin.part1"), b"y").unwrap();
        fs::write(&dest, b"final").unwrap();

        let listed = list_part_files(&dest).unwrap();
        assert_eq!(listed.keys().copied().collect::<Vec<_>>(), vec![0, 2, 10]);
        assert_eq!(part_size(&dest, 2), Some(1));
        assert_eq!(part_size(&dest, 1), None);

        assert_eq!(cleanup_parts(&dest).unwrap(), 3);
        assert!(list_part_files(&dest).unwrap().is_empty());
        assert!(dir.path().join("other.bin.part1").exists());
        assert!(dest.exists());
    }

    #[test]
    fn missing_directory_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nope").join("file.bin");
        assert!(list_part_files(&dest).unwrap().is_empty());
        assert_eq!(cleanup_parts(&dest).unwrap(), 0);
    }
}
