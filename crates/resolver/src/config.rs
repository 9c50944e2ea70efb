//! Serializable configuration and the builders that turn it into live
//! components.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::cache::TtlCache;
use crate::error::{ResolverError, Result};
use crate::extractor::{ExtractorOptions, StreamExtractor};
use crate::fetch::{Fetcher, HttpFetcher, RetryingFetcher};
use crate::listing::{AnchorListing, AnchorRules, JsonListing, ListingSource};
use crate::orchestrator::Orchestrator;
use crate::retry::RetryPolicy;
use crate::runner::{DEFAULT_MAX_CONCURRENCY, TaskRunner};
use crate::schedule::{ActivityWindow, DEFAULT_LIVE_KEYWORDS};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub cache: CacheConfig,
    pub runner: RunnerConfig,
    pub http: HttpConfig,
    pub retry: RetryConfig,
    pub extractor: ExtractorConfig,
    pub window: WindowConfig,
    /// Attached to every new record unless the listing supplies the key.
    pub metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing: Option<ListingConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: PathBuf,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("evres-cache.json"),
            ttl_secs: 3 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub max_concurrency: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_timeout_secs: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            task_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            user_agent: None,
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 5000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_selector: Option<String>,
    pub direct_patterns: Vec<String>,
    pub scan_base64_blobs: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub upcoming_minutes: u64,
    pub live_keywords: Vec<String>,
    pub started_grace_minutes: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            upcoming_minutes: 180,
            live_keywords: DEFAULT_LIVE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            started_grace_minutes: 0,
        }
    }
}

/// Where candidates come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingConfig {
    Json { path: PathBuf },
    Anchors(AnchorRules),
}

impl ResolverConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    /// HTTP fetcher with the configured headers, wrapped in the retry policy.
    pub fn build_fetcher(&self, token: &CancellationToken) -> Result<Arc<dyn Fetcher>> {
        let mut http = HttpFetcher::with_default_client()
            .map_err(|e| ResolverError::config(format!("http client: {e}")))?;
        if let Some(user_agent) = &self.http.user_agent {
            http.set_user_agent(user_agent);
        }
        for (name, value) in &self.http.headers {
            http.add_header(name, value);
        }

        Ok(Arc::new(RetryingFetcher::new(
            Arc::new(http),
            self.retry.policy(),
            token.clone(),
        )))
    }

    pub fn extractor_options(&self) -> Result<ExtractorOptions> {
        let direct_patterns = self
            .extractor
            .direct_patterns
            .iter()
            .map(|raw| {
                Regex::new(raw)
                    .map_err(|e| ResolverError::config(format!("invalid pattern {raw:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ExtractorOptions {
            timeout: self.http_timeout(),
            frame_selector: self.extractor.frame_selector.clone(),
            direct_patterns,
            scan_base64_blobs: self.extractor.scan_base64_blobs,
        })
    }

    pub fn build_extractor(&self, fetcher: Arc<dyn Fetcher>) -> Result<StreamExtractor> {
        StreamExtractor::new(fetcher, self.extractor_options()?)
    }

    pub fn build_cache(&self) -> TtlCache {
        TtlCache::with_ttl(&self.cache.path, Duration::from_secs(self.cache.ttl_secs))
    }

    pub fn build_runner(&self) -> TaskRunner {
        let runner = TaskRunner::new(self.runner.max_concurrency);
        match self.runner.task_timeout_secs {
            Some(secs) => runner.with_task_timeout(Duration::from_secs(secs)),
            None => runner,
        }
    }

    pub fn build_window(&self) -> ActivityWindow {
        let minutes = |value: u64| Duration::from_secs(value.saturating_mul(60));
        ActivityWindow::new(minutes(self.window.upcoming_minutes))
            .with_live_keywords(self.window.live_keywords.iter().cloned())
            .with_started_grace(minutes(self.window.started_grace_minutes))
    }

    pub fn build_listing(&self, fetcher: Arc<dyn Fetcher>) -> Result<Arc<dyn ListingSource>> {
        match &self.listing {
            Some(ListingConfig::Json { path }) => Ok(Arc::new(JsonListing::new(path))),
            Some(ListingConfig::Anchors(rules)) => Ok(Arc::new(
                AnchorListing::new(fetcher, rules.clone())?.with_timeout(self.http_timeout()),
            )),
            None => Err(ResolverError::config("no listing source configured")),
        }
    }

    /// Wire every component into an [`Orchestrator`]. `token` also stops
    /// in-progress retry back-off.
    pub fn build_orchestrator(&self, token: &CancellationToken) -> Result<Orchestrator> {
        let fetcher = self.build_fetcher(token)?;
        let listing = self.build_listing(fetcher.clone())?;
        let extractor = self.build_extractor(fetcher)?;

        Ok(Orchestrator::new(
            listing,
            Arc::new(extractor),
            self.build_cache(),
            self.build_runner(),
            self.build_window(),
        )
        .with_default_metadata(self.metadata.clone()))
    }
}
