//! Activity-window filter over free-text schedule hints.
//!
//! Hints come straight from listing pages, so anything that cannot be
//! understood is admitted rather than dropped.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

pub const DEFAULT_UPCOMING_WINDOW: Duration = Duration::from_secs(180 * 60);

pub const DEFAULT_LIVE_KEYWORDS: &[&str] = &[
    "live",
    "in progress",
    "now playing",
    "playing now",
    "on air",
    "started",
];

static RELATIVE_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bin\s+(?:(\d+)\s*(?:hours|hour|hrs|hr|h))?\s*(?:(\d+)\s*(?:minutes|minute|mins|min|m)\b)?",
    )
    .unwrap()
});

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Classification of one schedule hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDecision {
    Live,
    /// Starts within the upcoming window.
    StartsIn { minutes: u64 },
    /// Starts, but beyond the upcoming window.
    Distant { minutes: u64 },
    /// A timestamp that has not elapsed yet.
    Scheduled(DateTime<Utc>),
    Elapsed(DateTime<Utc>),
    /// Missing or unparseable.
    Unrecognized,
}

impl WindowDecision {
    pub fn in_scope(&self) -> bool {
        !matches!(self, WindowDecision::Distant { .. } | WindowDecision::Elapsed(_))
    }
}

#[derive(Debug, Clone)]
pub struct ActivityWindow {
    upcoming_window: Duration,
    live_keywords: Vec<String>,
    started_grace: Duration,
}

impl Default for ActivityWindow {
    fn default() -> Self {
        Self::new(DEFAULT_UPCOMING_WINDOW)
    }
}

impl ActivityWindow {
    pub fn new(upcoming_window: Duration) -> Self {
        Self {
            upcoming_window,
            live_keywords: DEFAULT_LIVE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            started_grace: Duration::ZERO,
        }
    }

    /// Replace the live keyword list. Keywords match case-insensitively on
    /// word boundaries.
    pub fn with_live_keywords<S: Into<String>>(mut self, keywords: impl IntoIterator<Item = S>) -> Self {
        self.live_keywords = keywords
            .into_iter()
            .map(|k| k.into().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        self
    }

    /// Keep timestamped events in scope for `grace` after their start.
    pub fn with_started_grace(mut self, grace: Duration) -> Self {
        self.started_grace = grace;
        self
    }

    pub fn classify(&self, hint: Option<&str>, now: DateTime<Utc>) -> WindowDecision {
        let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) else {
            return WindowDecision::Unrecognized;
        };

        let lowered = hint.to_lowercase();
        if self
            .live_keywords
            .iter()
            .any(|keyword| contains_word(&lowered, keyword))
        {
            return WindowDecision::Live;
        }

        if let Some(minutes) = relative_minutes(hint) {
            return if minutes.saturating_mul(60) <= self.upcoming_window.as_secs() {
                WindowDecision::StartsIn { minutes }
            } else {
                WindowDecision::Distant { minutes }
            };
        }

        if let Some(start) = parse_timestamp(hint) {
            let grace = chrono::Duration::from_std(self.started_grace)
                .unwrap_or(chrono::Duration::MAX);
            let still_on = start
                .checked_add_signed(grace)
                .is_none_or(|until| until > now);
            return if still_on {
                WindowDecision::Scheduled(start)
            } else {
                WindowDecision::Elapsed(start)
            };
        }

        WindowDecision::Unrecognized
    }

    pub fn is_in_scope(&self, hint: Option<&str>, now: DateTime<Utc>) -> bool {
        self.classify(hint, now).in_scope()
    }
}

fn contains_word(haystack: &str, word: &str) -> bool {
    let is_word_char = |c: char| c.is_alphanumeric() || c == '_';
    haystack.match_indices(word).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + word.len()..].chars().next();
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

fn relative_minutes(hint: &str) -> Option<u64> {
    RELATIVE_START.captures_iter(hint).find_map(|caps| {
        let hours = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok());
        let minutes = caps.get(2).and_then(|m| m.as_str().parse::<u64>().ok());
        if hours.is_none() && minutes.is_none() {
            return None;
        }
        Some(hours.unwrap_or(0).saturating_mul(60).saturating_add(minutes.unwrap_or(0)))
    })
}

fn parse_timestamp(hint: &str) -> Option<DateTime<Utc>> {
    if hint.bytes().all(|b| b.is_ascii_digit()) {
        let value: i64 = hint.parse().ok()?;
        return match hint.len() {
            10 => Utc.timestamp_opt(value, 0).single(),
            13 => Utc.timestamp_millis_opt(value).single(),
            _ => None,
        };
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(hint) {
        return Some(ts.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(hint, format).ok())
        .map(|naive| naive.and_utc())
}
