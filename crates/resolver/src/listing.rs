//! Listing sources: where candidate events come from.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ResolverError, Result};
use crate::extractor::html::join_url;
use crate::fetch::{DEFAULT_TIMEOUT, FetchRequest, Fetcher};
use crate::model::{CandidateEvent, event_key};

pub const DEFAULT_CATEGORY: &str = "Events";

/// Produces the candidate events for one run.
///
/// Any error aborts the run: an unreachable listing must never look like
/// "everything is already resolved".
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn discover(&self) -> Result<Vec<CandidateEvent>>;
}

#[async_trait]
impl<L: ListingSource + ?Sized> ListingSource for Arc<L> {
    async fn discover(&self) -> Result<Vec<CandidateEvent>> {
        (**self).discover().await
    }
}

/// A fixed list of candidates.
#[derive(Debug, Clone, Default)]
pub struct StaticListing {
    events: Vec<CandidateEvent>,
}

impl StaticListing {
    pub fn new(events: Vec<CandidateEvent>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl ListingSource for StaticListing {
    async fn discover(&self) -> Result<Vec<CandidateEvent>> {
        Ok(self.events.clone())
    }
}

/// Candidates read from a JSON array on disk, typically written by a
/// site-specific scraper.
#[derive(Debug, Clone)]
pub struct JsonListing {
    path: PathBuf,
}

impl JsonListing {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ListingSource for JsonListing {
    async fn discover(&self) -> Result<Vec<CandidateEvent>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ResolverError::discovery(format!("reading {}: {e}", self.path.display()))
        })?;
        let events: Vec<CandidateEvent> = serde_json::from_str(&content).map_err(|e| {
            ResolverError::discovery(format!("parsing {}: {e}", self.path.display()))
        })?;
        info!(path = %self.path.display(), events = events.len(), "Loaded listing");
        Ok(events)
    }
}

/// Selectors for [`AnchorListing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRules {
    /// Listing page URL.
    pub url: String,
    /// Selects one anchor per event.
    pub selector: String,
    /// Looked up inside the anchor's parent element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_selector: Option<String>,
    /// Source tag appended to every key.
    pub tag: String,
    /// Looked up inside the anchor's parent element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_selector: Option<String>,
}

/// Selector-driven HTML listing.
pub struct AnchorListing {
    fetcher: Arc<dyn Fetcher>,
    rules: AnchorRules,
    anchor: Selector,
    category: Option<Selector>,
    schedule: Option<Selector>,
    timeout: Duration,
}

fn parse_selector(raw: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|e| ResolverError::config(format!("invalid selector {raw:?}: {e}")))
}

impl AnchorListing {
    pub fn new(fetcher: Arc<dyn Fetcher>, rules: AnchorRules) -> Result<Self> {
        let anchor = parse_selector(&rules.selector)?;
        let category = rules.category_selector.as_deref().map(parse_selector).transpose()?;
        let schedule = rules.schedule_selector.as_deref().map(parse_selector).transpose()?;

        Ok(Self {
            fetcher,
            rules,
            anchor,
            category,
            schedule,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn extract(&self, body: &str, page_url: &str) -> Vec<CandidateEvent> {
        let document = Html::parse_document(body);
        let mut seen = HashSet::new();
        let mut events = Vec::new();

        for anchor in document.select(&self.anchor) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Some(url) = join_url(page_url, href)
                .filter(|url| matches!(url.scheme(), "http" | "https"))
            else {
                continue;
            };
            if !seen.insert(url.to_string()) {
                continue;
            }

            let name = Some(collapsed_text(anchor))
                .filter(|name| !name.is_empty())
                .or_else(|| anchor.value().attr("title").map(|t| t.trim().to_string()))
                .filter(|name| !name.is_empty());
            let Some(name) = name else {
                debug!(href, "Skipping anchor without a name");
                continue;
            };

            let container = anchor.parent().and_then(ElementRef::wrap).unwrap_or(anchor);
            let category = self
                .category
                .as_ref()
                .and_then(|selector| first_text(container, selector))
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
            let schedule = self
                .schedule
                .as_ref()
                .and_then(|selector| first_text(container, selector));

            let mut event = CandidateEvent::new(event_key(&category, &name, &self.rules.tag), url)
                .with_metadata("category", category);
            if let Some(schedule) = schedule {
                event = event.with_schedule_hint(schedule);
            }
            events.push(event);
        }

        events
    }
}

fn collapsed_text(element: ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

fn first_text(container: ElementRef<'_>, selector: &Selector) -> Option<String> {
    container
        .select(selector)
        .map(collapsed_text)
        .find(|text| !text.is_empty())
}

#[async_trait]
impl ListingSource for AnchorListing {
    async fn discover(&self) -> Result<Vec<CandidateEvent>> {
        let request = FetchRequest::get(self.rules.url.as_str(), self.timeout);
        let response = self
            .fetcher
            .fetch(&request)
            .await
            .map_err(|e| ResolverError::discovery(format!("{}: {e}", self.rules.url)))?;
        if !response.is_success() {
            return Err(ResolverError::discovery(format!(
                "{} returned HTTP {}",
                self.rules.url, response.status
            )));
        }

        let events = self.extract(&response.body, &response.final_url);
        info!(url = %self.rules.url, events = events.len(), "Discovered events");
        Ok(events)
    }
}
