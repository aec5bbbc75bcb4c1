//! Linux-safe file names.

const NAME_MAX: usize = 255;

/// Make `name` safe as a single Linux path component.
///
/// Separators, NUL and control characters become `_` (runs collapse to one),
/// leading and trailing dots, spaces and underscores are trimmed, and the
/// result is cut to 255 bytes on a char boundary.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let unsafe_char = matches!(c, '/' | '\\' | '\0') || c.is_control();
        if unsafe_char {
            if !out.ends_with('_') {
                out.push('_');
            }
        } else {
            out.push(c);
        }
    }

    let trimmed = out.trim_matches(|c: char| matches!(c, ' ' | '.' | '_'));
    let mut end = trimmed.len().min(NAME_MAX);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_separators_and_controls() {
        assert_eq!(sanitize_filename("a/b\\c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_filename("x\u{0}\u{7}y"), "x_y");
    }

    #[test]
    fn keeps_inner_spaces_trims_edges() {
        assert_eq!(sanitize_filename("  ..my file.txt.. "), "my file.txt");
    }

    #[test]
    fn truncates_on_char_boundary() {
        let long = "é".repeat(200);
        let out = sanitize_filename(&long);
        assert!(out.len() <= NAME_MAX);
        assert!(out.chars().all(|c| c == 'é'));
    }
}
