//! SDP helpers.

const SETUP_ATTRIBUTE: &str = "a=setup:";
const SETUP_ACTIVE: &str = "a=setup:active";

/// Force the DTLS role of every media section to `active`.
///
/// The calling provider only accepts answers in which this side initiates the
/// DTLS handshake. Engines commonly answer with `actpass` (or `passive`), so
/// every `a=setup:` line is rewritten. Line endings are preserved.
pub fn force_active_dtls_role(sdp: &str) -> String {
    let mut rewritten = String::with_capacity(sdp.len());

    for line in sdp.split_inclusive('\n') {
        let (content, ending) = split_line_ending(line);
        if content.starts_with(SETUP_ATTRIBUTE) {
            rewritten.push_str(SETUP_ACTIVE);
        } else {
            rewritten.push_str(content);
        }
        rewritten.push_str(ending);
    }

    rewritten
}

/// Whether any media section still offers a non-active DTLS role.
pub fn has_non_active_setup(sdp: &str) -> bool {
    sdp.lines()
        .map(str::trim_end)
        .any(|line| line.starts_with(SETUP_ATTRIBUTE) && line != SETUP_ACTIVE)
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(content) = line.strip_suffix("\r\n") {
        (content, "\r\n")
    } else if let Some(content) = line.strip_suffix('\n') {
        (content, "\n")
    } else {
        (line, "")
    }
}
