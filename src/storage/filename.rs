//! Filesystem-safe names for topics and artifacts.

use sha2::{Digest, Sha256};
use url::Url;

use crate::models::Candidate;

/// Upper bound on a sanitized name, in bytes.
pub const MAX_NAME_BYTES: usize = 100;

/// Name used when sanitizing leaves nothing.
pub const FALLBACK_NAME: &str = "image";

/// Make `name` safe to use as one path component.
///
/// Replaces `<>:"/\|?*` with `_`, drops control characters, trims dots and
/// spaces from both ends and truncates to [`MAX_NAME_BYTES`] without
/// splitting a character.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .filter(|c| !is_control(*c))
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            _ => c,
        })
        .collect();

    let trimmed = trim_dots_spaces(&replaced);
    let truncated = trim_dots_spaces(truncate_utf8(trimmed, MAX_NAME_BYTES));
    if truncated.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        truncated.to_string()
    }
}

fn is_control(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{1f}' | '\u{7f}'..='\u{9f}')
}

fn trim_dots_spaces(s: &str) -> &str {
    s.trim_matches(|c| c == '.' || c == ' ')
}

/// Longest prefix of `s` that fits in `max_bytes` and ends on a char boundary.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// The human-readable part of an artifact's file name.
///
/// Tries, in order: attribution, the URL's file stem, the title, and
/// finally a short hash of the URL.
pub fn identifying_token(candidate: &Candidate) -> String {
    let from_attribution = candidate.attribution.as_deref().and_then(non_blank);
    let from_url = url_file_stem(&candidate.url);
    let from_title = candidate.title.as_deref().and_then(non_blank);

    let raw = from_attribution
        .map(String::from)
        .or(from_url)
        .or_else(|| from_title.map(String::from))
        .unwrap_or_else(|| url_digest(&candidate.url));
    sanitize_filename(&raw)
}

fn non_blank(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

fn url_file_stem(url: &str) -> Option<String> {
    if url.starts_with("data:") {
        return None;
    }
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    let stem = match decoded.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem.to_string(),
        _ => decoded,
    };
    non_blank(&stem).map(String::from)
}

fn url_digest(url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    digest[..16].to_string()
}
