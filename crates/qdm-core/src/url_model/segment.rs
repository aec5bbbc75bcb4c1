//! Last path segment of a URL.

/// Last non-empty path segment of `url`, or None when the URL does not parse
/// or its path is the root.
pub fn last_path_segment(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}
