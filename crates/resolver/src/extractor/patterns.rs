use std::sync::LazyLock;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use regex::Regex;
use url::Url;

use crate::model::UnresolvedReason;

/// A literal HLS playlist URL anywhere in a document.
pub static DIRECT_M3U8: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>]+\.m3u8[^\s"'<>]*"#).unwrap());

/// `atob('...')` and `window.atob("...")` wrapping a base64 literal.
pub static ATOB_PAYLOAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:window\.)?atob\(\s*['"]([A-Za-z0-9+/=]+)['"]\s*\)"#).unwrap()
});

/// Quoted strings that look like base64 and are long enough to hold a URL.
pub static BASE64_BLOB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']([A-Za-z0-9+/=]{40,200})["']"#).unwrap());

// Embed players emit both padded and unpadded payloads.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[inline]
pub fn capture_group_1<'a>(re: &Regex, input: &'a str) -> Option<&'a str> {
    re.captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// First match of `re`: capture group 1 when the pattern has one, the whole
/// match otherwise.
pub fn first_match<'a>(re: &Regex, input: &'a str) -> Option<&'a str> {
    let caps = re.captures(input)?;
    caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str())
}

/// First literal playlist URL in `body` that parses as an http(s) URL.
/// `&amp;` entities in query strings are unescaped.
pub fn find_direct_playlist(body: &str) -> Option<String> {
    DIRECT_M3U8
        .find_iter(body)
        .find_map(|m| as_stream_url(&m.as_str().replace("&amp;", "&")))
        .map(|url| url.to_string())
}

/// Parse `text` as an absolute http(s) URL.
pub fn as_stream_url(text: &str) -> Option<Url> {
    let url = Url::parse(text.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Decode a base64 payload whose plaintext is the stream URL itself.
pub fn decode_payload(encoded: &str) -> Result<String, UnresolvedReason> {
    let bytes = LENIENT_BASE64
        .decode(encoded.trim())
        .map_err(|e| UnresolvedReason::InvalidBase64(e.to_string()))?;
    let text = String::from_utf8(bytes).map_err(|_| UnresolvedReason::InvalidUtf8)?;
    let text = text.trim();

    as_stream_url(text)
        .map(|url| url.to_string())
        .ok_or_else(|| UnresolvedReason::NotAStreamUrl(truncate(text, 80)))
}

/// Scan quoted base64 strings for one that decodes to a playlist URL.
pub fn find_blob_playlist(body: &str) -> Option<String> {
    BASE64_BLOB
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| LENIENT_BASE64.decode(m.as_str()).ok())
        .filter_map(|bytes| String::from_utf8(bytes).ok())
        .filter(|text| text.contains(".m3u8"))
        .find_map(|text| as_stream_url(&text).map(|url| url.to_string()))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
