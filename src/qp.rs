//! Quoted-printable normalization and URL extraction from message bodies.
//!
//! Mail in transit arrives with soft line breaks (a trailing `=` before the
//! newline) and a handful of `=XX` escapes splattered through any URL long
//! enough to wrap. The helpers here undo exactly the escapes that matter for
//! URL recovery (`=0A`, `=20`, `=3D`); they are not a general RFC 2045
//! decoder, and bodies in other transfer encodings are left alone.

use regex::Regex;

/// Joins quoted-printable soft line breaks: a trailing `=` at end of line is a
/// continuation marker, so the `=` and the following newline are removed.
///
/// Idempotent: once the breaks are gone there is nothing left to join.
pub fn join_soft_breaks(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(pos) = rest.find('=') {
        let (head, tail) = rest.split_at(pos);
        out.push_str(head);
        if let Some(stripped) = tail.strip_prefix("=\r\n") {
            rest = stripped;
        } else if let Some(stripped) = tail.strip_prefix("=\n") {
            rest = stripped;
        } else {
            out.push('=');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Decodes the URL-relevant quoted-printable escapes: `=0A` is dropped,
/// `=20` becomes a space, `=3D` becomes `=`.
pub fn decode_url_escapes(body: &str) -> String {
    body.replace("=0A", "")
        .replace("=0a", "")
        .replace("=20", " ")
        .replace("=3D", "=")
        .replace("=3d", "=")
}

// characters that can follow the prefix in a bare (unbracketed) URL
const BARE_TAIL: &str = r#"[^\s<>"']*"#;

/// Finds the first URL starting with `prefix` in a raw message body.
///
/// The body is soft-break-joined and escape-decoded first, then scanned in
/// priority order: the URL enclosed in angle brackets, then inside an
/// `href="..."` attribute, then a bare run of URL characters. Trailing `=`
/// artifacts and whitespace are trimmed from the match.
pub fn extract_url(body: &str, prefix: &str) -> Option<String> {
    let normalized = decode_url_escapes(&join_soft_breaks(body));
    let escaped = regex::escape(prefix);

    // the prefix is caller input, so these cannot be compiled up front
    let angle = Regex::new(&format!(r"<({}[^>]*)>", escaped)).ok()?;
    let href = Regex::new(&format!(r#"href="({}[^"]*)""#, escaped)).ok()?;
    let bare = Regex::new(&format!("({}{})", escaped, BARE_TAIL)).ok()?;

    for pattern in [&angle, &href, &bare] {
        if let Some(cap) = pattern.captures(&normalized) {
            let url = cap.get(1).map(|m| m.as_str()).unwrap_or("");
            // an angle-bracketed match may still contain the space left by a
            // soft break that split mid-URL; close it up
            let url: String = url.chars().filter(|c| !c.is_whitespace()).collect();
            return Some(url.trim_end_matches('=').to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_breaks_crlf() {
        assert_eq!(join_soft_breaks("Hello=\r\nWorld"), "HelloWorld");
    }

    #[test]
    fn soft_breaks_lf() {
        assert_eq!(join_soft_breaks("Hello=\nWorld"), "HelloWorld");
    }

    #[test]
    fn hard_breaks_survive() {
        assert_eq!(join_soft_breaks("Hello\r\nWorld"), "Hello\r\nWorld");
    }

    #[test]
    fn equals_without_break_survives() {
        assert_eq!(join_soft_breaks("a=b"), "a=b");
    }

    #[test]
    fn joining_is_idempotent() {
        let body = "line one=\r\nstill line one\r\nline two=\ntail";
        let once = join_soft_breaks(body);
        let twice = join_soft_breaks(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn url_escapes() {
        assert_eq!(decode_url_escapes("a=3Db=20c=0Ad"), "a=b cd");
    }

    #[test]
    fn angle_bracket_match_wins() {
        let body = "ignore href=\"https://d.com/verify/zzz\" but <https://d.com/verify/abc>";
        assert_eq!(
            extract_url(body, "https://d.com/verify/").as_deref(),
            Some("https://d.com/verify/abc")
        );
    }

    #[test]
    fn href_match_beats_bare() {
        let body = "bare https://d.com/verify/zzz and href=\"https://d.com/verify/abc\"";
        assert_eq!(
            extract_url(body, "https://d.com/verify/").as_deref(),
            Some("https://d.com/verify/abc")
        );
    }

    #[test]
    fn bare_match() {
        let body = "Please visit https://d.com/verify/abc123 to continue";
        assert_eq!(
            extract_url(body, "https://d.com/verify/").as_deref(),
            Some("https://d.com/verify/abc123")
        );
    }

    #[test]
    fn soft_broken_url_is_rejoined() {
        // soft break inside the angle brackets, with the stray space the
        // break left behind
        let body = "Please visit <https://domain.com/verify/abc123=\r\n def>";
        assert_eq!(
            extract_url(body, "https://domain.com/verify/").as_deref(),
            Some("https://domain.com/verify/abc123def")
        );
    }

    #[test]
    fn no_match_is_none() {
        assert_eq!(extract_url("nothing here", "https://d.com/verify/"), None);
    }

    #[test]
    fn trailing_equals_trimmed() {
        let body = "https://d.com/verify/abc=";
        assert_eq!(
            extract_url(body, "https://d.com/verify/").as_deref(),
            Some("https://d.com/verify/abc")
        );
    }

    #[test]
    fn quote_delimited_bare_url() {
        let body = "token: \"https://d.com/verify/abc\" end";
        assert_eq!(
            extract_url(body, "https://d.com/verify/").as_deref(),
            Some("https://d.com/verify/abc")
        );
    }
}
