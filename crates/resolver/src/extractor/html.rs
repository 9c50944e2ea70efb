//! HTML-level lookups. `scraper::Html` is not `Send`, so every document is
//! parsed and dropped inside one synchronous call.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

use crate::model::UnresolvedReason;

static SOURCE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("source[type]").unwrap());

const HLS_MIME_TYPES: &[&str] = &["application/x-mpegurl", "application/vnd.apple.mpegurl"];

/// Resolve `candidate` (absolute, relative or protocol-relative) against `base`.
pub fn join_url(base: &str, candidate: &str) -> Option<Url> {
    let base = Url::parse(base).ok()?;
    base.join(candidate.trim()).ok()
}

/// `src` of the first frame element matching `selector`.
///
/// Falls back to `data-src` for lazily loaded frames.
pub fn find_frame_source(body: &str, selector: &Selector) -> Result<String, UnresolvedReason> {
    let document = Html::parse_document(body);
    let mut saw_frame = false;

    for element in document.select(selector) {
        saw_frame = true;
        let src = element
            .value()
            .attr("src")
            .or_else(|| element.value().attr("data-src"))
            .map(str::trim)
            .filter(|src| !src.is_empty());
        if let Some(src) = src {
            return Ok(src.to_string());
        }
    }

    Err(if saw_frame {
        UnresolvedReason::MissingFrameSource
    } else {
        UnresolvedReason::NoFrame
    })
}

/// `src` of the first `<source>` element carrying an HLS MIME type.
pub fn find_hls_source(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    document
        .select(&SOURCE_SELECTOR)
        .filter(|element| {
            element.value().attr("type").is_some_and(|mime| {
                HLS_MIME_TYPES
                    .iter()
                    .any(|hls| mime.trim().eq_ignore_ascii_case(hls))
            })
        })
        .find_map(|element| {
            element
                .value()
                .attr("src")
                .map(str::trim)
                .filter(|src| !src.is_empty())
                .map(ToOwned::to_owned)
        })
}
