use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use scraper::Selector;
use tracing::debug;

use super::html::{find_frame_source, find_hls_source, join_url};
use super::patterns::{
    ATOB_PAYLOAD, capture_group_1, decode_payload, find_blob_playlist, find_direct_playlist,
    first_match,
};
use crate::error::{FetchError, ResolverError};
use crate::fetch::{DEFAULT_TIMEOUT, FetchRequest, FetchResponse, Fetcher};
use crate::model::{Resolution, ResolvedStream, ResolvedVia, UnresolvedReason};

const DEFAULT_FRAME_SELECTOR: &str = "iframe";

#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    pub timeout: Duration,
    /// CSS selector for the embed element; `iframe` when unset.
    pub frame_selector: Option<String>,
    /// Extra page patterns tried after the built-in ones.
    pub direct_patterns: Vec<Regex>,
    pub scan_base64_blobs: bool,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            frame_selector: None,
            direct_patterns: Vec::new(),
            scan_base64_blobs: false,
        }
    }
}

/// Turns an event reference into a playable stream URL.
///
/// The chain is: event page, direct URL on the page, embedded frame, payload
/// inside the frame. Each hop is a single GET; retries belong to the
/// [`Fetcher`] handed in.
pub struct StreamExtractor {
    fetcher: Arc<dyn Fetcher>,
    options: ExtractorOptions,
    frame_selector: Selector,
}

impl StreamExtractor {
    pub fn new(fetcher: Arc<dyn Fetcher>, options: ExtractorOptions) -> Result<Self, ResolverError> {
        let raw = options
            .frame_selector
            .as_deref()
            .unwrap_or(DEFAULT_FRAME_SELECTOR);
        let frame_selector = Selector::parse(raw)
            .map_err(|e| ResolverError::config(format!("invalid frame selector {raw:?}: {e}")))?;

        Ok(Self {
            fetcher,
            options,
            frame_selector,
        })
    }

    /// Resolve one event reference. Never fails: every outcome is a
    /// [`Resolution`].
    pub async fn resolve(&self, reference: &str) -> Resolution {
        let resolution = Resolution::from(self.try_resolve(reference).await);
        match &resolution {
            Resolution::Resolved(stream) => {
                debug!(reference, url = %stream.url, via = ?stream.via, "Resolved stream");
            }
            Resolution::Unresolved(reason) => {
                debug!(reference, reason = %reason, "Stream not resolved");
            }
        }
        resolution
    }

    async fn try_resolve(&self, reference: &str) -> Result<ResolvedStream, UnresolvedReason> {
        let page = self.fetch_body(FetchRequest::get(reference, self.options.timeout)).await?;

        if let Some(url) = self.scan_page(&page) {
            return Ok(ResolvedStream {
                url,
                via: ResolvedVia::DirectPage,
            });
        }

        let src = find_frame_source(&page.body, &self.frame_selector)?;
        let frame_url = join_url(&page.final_url, &src)
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or_else(|| UnresolvedReason::InvalidFrameUrl(src.clone()))?;
        debug!(reference, frame = %frame_url, "Following embedded frame");

        let frame = self
            .fetch_body(
                FetchRequest::get(frame_url.as_str(), self.options.timeout)
                    .with_referer(page.final_url.as_str()),
            )
            .await?;

        self.scan_frame(&frame)
    }

    /// Direct playlist URL on the event page, in precedence order.
    fn scan_page(&self, page: &FetchResponse) -> Option<String> {
        if let Some(url) = find_direct_playlist(&page.body) {
            return Some(url);
        }

        if let Some(src) = find_hls_source(&page.body)
            && let Some(url) = join_url(&page.final_url, &src)
        {
            return Some(url.to_string());
        }

        self.options.direct_patterns.iter().find_map(|re| {
            let found = first_match(re, &page.body)?;
            join_url(&page.final_url, found).map(|url| url.to_string())
        })
    }

    fn scan_frame(&self, frame: &FetchResponse) -> Result<ResolvedStream, UnresolvedReason> {
        if let Some(encoded) = capture_group_1(&ATOB_PAYLOAD, &frame.body) {
            return decode_payload(encoded).map(|url| ResolvedStream {
                url,
                via: ResolvedVia::FramePayload,
            });
        }

        if let Some(url) = find_direct_playlist(&frame.body) {
            return Ok(ResolvedStream {
                url,
                via: ResolvedVia::FrameDirect,
            });
        }

        if self.options.scan_base64_blobs
            && let Some(url) = find_blob_playlist(&frame.body)
        {
            return Ok(ResolvedStream {
                url,
                via: ResolvedVia::FrameBlob,
            });
        }

        Err(UnresolvedReason::NoPayload)
    }

    async fn fetch_body(&self, request: FetchRequest) -> Result<FetchResponse, UnresolvedReason> {
        let response = match self.fetcher.fetch(&request).await {
            Ok(response) => response,
            Err(FetchError::Status(status)) => {
                return Err(UnresolvedReason::Status {
                    url: request.url,
                    status,
                });
            }
            Err(e) => {
                return Err(UnresolvedReason::Fetch {
                    url: request.url,
                    error: e.to_string(),
                });
            }
        };

        if !response.is_success() {
            return Err(UnresolvedReason::Status {
                url: request.url,
                status: response.status,
            });
        }
        if response.body.trim().is_empty() {
            return Err(UnresolvedReason::EmptyBody { url: request.url });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RouteFetcher;

    const EVENT: &str = "https://events.example/game/42";
    const FRAME: &str = "https://embed.example/player/42";

    fn extractor(fetcher: Arc<RouteFetcher>, options: ExtractorOptions) -> StreamExtractor {
        StreamExtractor::new(fetcher, options).unwrap()
    }

    fn frame_page() -> String {
        format!(r#"<html><body><iframe src="{FRAME}"></iframe></body></html>"#)
    }

    #[tokio::test]
    async fn direct_url_on_page_skips_frame() {
        let body = format!(
            r#"<script>var s = "https://cdn.example/live/a.m3u8";</script><iframe src="{FRAME}"></iframe>"#
        );
        let fetcher = Arc::new(RouteFetcher::new().page(EVENT, &body));
        let resolution = extractor(fetcher.clone(), ExtractorOptions::default())
            .resolve(EVENT)
            .await;

        assert_eq!(
            resolution,
            Resolution::Resolved(ResolvedStream {
                url: "https://cdn.example/live/a.m3u8".to_string(),
                via: ResolvedVia::DirectPage,
            })
        );
        assert_eq!(fetcher.calls_to(FRAME), 0);
    }

    #[tokio::test]
    async fn malformed_page_match_falls_through_to_frame() {
        let body = format!(
            r#"<script>var s = "http://[::1/live.m3u8";</script><iframe src="{FRAME}"></iframe>"#
        );
        let frame = r#"<video src="https://cdn.example/hls/b.m3u8?a=1&amp;b=2"></video>"#;
        let fetcher = Arc::new(RouteFetcher::new().page(EVENT, &body).page(FRAME, frame));
        let resolution = extractor(fetcher.clone(), ExtractorOptions::default())
            .resolve(EVENT)
            .await;

        assert_eq!(
            resolution,
            Resolution::Resolved(ResolvedStream {
                url: "https://cdn.example/hls/b.m3u8?a=1&b=2".to_string(),
                via: ResolvedVia::FrameDirect,
            })
        );
        assert_eq!(fetcher.calls_to(FRAME), 1);
    }

    #[tokio::test]
    async fn decodes_frame_payload() {
        let frame = r#"<script>player.load(window.atob('aHR0cHM6Ly9leGFtcGxlLmNvbS9zdHJlYW0ubTN1OA=='));</script>"#;
        let fetcher = Arc::new(RouteFetcher::new().page(EVENT, &frame_page()).page(FRAME, frame));
        let resolution = extractor(fetcher.clone(), ExtractorOptions::default())
            .resolve(EVENT)
            .await;

        assert_eq!(resolution.url(), Some("https://example.com/stream.m3u8"));
        let frame_request = fetcher
            .requests()
            .into_iter()
            .find(|request| request.url == FRAME)
            .unwrap();
        assert_eq!(frame_request.referer.as_deref(), Some(EVENT));
    }

    #[tokio::test]
    async fn page_without_frame_is_unresolved() {
        let fetcher = Arc::new(RouteFetcher::new().page(EVENT, "<html><p>soon</p></html>"));
        let resolution = extractor(fetcher, ExtractorOptions::default())
            .resolve(EVENT)
            .await;
        assert_eq!(resolution, Resolution::Unresolved(UnresolvedReason::NoFrame));
    }

    #[tokio::test]
    async fn http_failures_are_unresolved() {
        let fetcher = Arc::new(RouteFetcher::new().page(EVENT, &frame_page()));
        let resolution = extractor(fetcher, ExtractorOptions::default())
            .resolve(EVENT)
            .await;
        assert_eq!(
            resolution,
            Resolution::Unresolved(UnresolvedReason::Status {
                url: FRAME.to_string(),
                status: 404,
            })
        );

        let fetcher = Arc::new(RouteFetcher::new().timeout(EVENT));
        let resolution = extractor(fetcher, ExtractorOptions::default())
            .resolve(EVENT)
            .await;
        assert!(matches!(
            resolution,
            Resolution::Unresolved(UnresolvedReason::Fetch { .. })
        ));
    }

    #[tokio::test]
    async fn empty_page_is_unresolved() {
        let fetcher = Arc::new(RouteFetcher::new().page(EVENT, "  \n"));
        let resolution = extractor(fetcher, ExtractorOptions::default())
            .resolve(EVENT)
            .await;
        assert_eq!(
            resolution,
            Resolution::Unresolved(UnresolvedReason::EmptyBody {
                url: EVENT.to_string()
            })
        );
    }

    #[tokio::test]
    async fn relative_frame_is_joined_against_page() {
        let page = r#"<iframe src="/embed/42"></iframe>"#;
        let frame = r#"<video src="https://cdn.example/hls/42.m3u8?token=abc"></video>"#;
        let fetcher = Arc::new(
            RouteFetcher::new()
                .page(EVENT, page)
                .page("https://events.example/embed/42", frame),
        );
        let resolution = extractor(fetcher, ExtractorOptions::default())
            .resolve(EVENT)
            .await;

        assert_eq!(
            resolution,
            Resolution::Resolved(ResolvedStream {
                url: "https://cdn.example/hls/42.m3u8?token=abc".to_string(),
                via: ResolvedVia::FrameDirect,
            })
        );
    }

    #[tokio::test]
    async fn frame_without_payload_is_unresolved() {
        let fetcher = Arc::new(
            RouteFetcher::new()
                .page(EVENT, &frame_page())
                .page(FRAME, "<html>offline</html>"),
        );
        let resolution = extractor(fetcher, ExtractorOptions::default())
            .resolve(EVENT)
            .await;
        assert_eq!(resolution, Resolution::Unresolved(UnresolvedReason::NoPayload));
    }

    #[tokio::test]
    async fn configured_pattern_resolves_relative_match() {
        let page = r#"<script>jwplayer().setup({ file: "/hls/main/playlist" });</script>"#;
        let options = ExtractorOptions {
            direct_patterns: vec![Regex::new(r#"file:\s*"([^"]+)""#).unwrap()],
            ..Default::default()
        };
        let fetcher = Arc::new(RouteFetcher::new().page(EVENT, page));
        let resolution = extractor(fetcher, options).resolve(EVENT).await;
        assert_eq!(resolution.url(), Some("https://events.example/hls/main/playlist"));
    }

    #[tokio::test]
    async fn blob_scan_only_when_enabled() {
        let frame = r#"var cfg = {k: "aHR0cHM6Ly9jZG4uZXhhbXBsZS5jb20vbGl2ZS9jaGFubmVsLW9uZS9pbmRleC5tM3U4"};"#;
        let fetcher = Arc::new(RouteFetcher::new().page(EVENT, &frame_page()).page(FRAME, frame));

        let off = extractor(fetcher.clone(), ExtractorOptions::default())
            .resolve(EVENT)
            .await;
        assert_eq!(off, Resolution::Unresolved(UnresolvedReason::NoPayload));

        let options = ExtractorOptions {
            scan_base64_blobs: true,
            ..Default::default()
        };
        let on = extractor(fetcher, options).resolve(EVENT).await;
        assert_eq!(
            on,
            Resolution::Resolved(ResolvedStream {
                url: "https://cdn.example.com/live/channel-one/index.m3u8".to_string(),
                via: ResolvedVia::FrameBlob,
            })
        );
    }

    #[test]
    fn invalid_selector_is_configuration_error() {
        let options = ExtractorOptions {
            frame_selector: Some("iframe[".to_string()),
            ..Default::default()
        };
        let result = StreamExtractor::new(Arc::new(RouteFetcher::new()), options);
        assert!(matches!(result, Err(ResolverError::Configuration(_))));
    }
}
