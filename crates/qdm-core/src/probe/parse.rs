//! Parse HTTP response header lines into a ProbeResult.

use super::ProbeResult;

pub(crate) fn parse_headers(lines: &[String]) -> ProbeResult {
    let mut content_length = None;
    let mut accept_ranges = false;

    for line in lines {
        let Some((name, value)) = line.trim().split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            if let Ok(n) = value.parse::<u64>() {
                content_length = Some(n);
            }
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            accept_ranges = value.eq_ignore_ascii_case("bytes");
        }
    }

    ProbeResult {
        content_length,
        accept_ranges,
    }
}
