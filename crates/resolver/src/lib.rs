pub mod cache;
pub mod config;
pub mod error;
pub mod extractor;
pub mod fetch;
pub mod listing;
pub mod model;
pub mod orchestrator;
pub mod retry;
pub mod runner;
pub mod schedule;

#[cfg(test)]
mod testing;

pub use cache::{DEFAULT_TTL, TtlCache};
pub use config::{ListingConfig, ResolverConfig};
pub use error::{FetchError, ResolverError, Result};
pub use extractor::{ExtractorOptions, StreamExtractor};
pub use fetch::{FetchRequest, FetchResponse, Fetcher, HttpFetcher, RetryingFetcher};
pub use listing::{AnchorListing, AnchorRules, JsonListing, ListingSource, StaticListing};
pub use model::{
    CacheRecord, CandidateEvent, Resolution, ResolvedStream, ResolvedVia, UnresolvedReason,
    WorkingSet, event_key,
};
pub use orchestrator::{Orchestrator, RunReport};
pub use retry::RetryPolicy;
pub use runner::{TaskOutcome, TaskReport, TaskRunner};
pub use schedule::{ActivityWindow, WindowDecision};
