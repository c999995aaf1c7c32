//! Engine configuration
//!
//! One configuration surface supplied at construction: remote URL, time
//! zone, offset-hours correction, retention depth, and the display policy
//! constants. Nothing here is reloaded mid-session.

use chrono_tz::Tz;
use std::path::PathBuf;
use thiserror::Error;

/// Default number of rows in the live (non-full-day) schedule window
pub const DEFAULT_LIVE_WINDOW_ROWS: usize = 5;

/// Default description-trim threshold, in characters
pub const DEFAULT_TRIM_LEN: usize = 65;

/// Default highlight token attached to the currently-airing row
pub const DEFAULT_HIGHLIGHT: &str = "indigo";

/// Errors raised while building a [`GuideConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The retention-day count was negative
    #[error("cached days must not be negative, got {0}")]
    NegativeRetention(i64),

    /// The time-zone name was not recognized
    #[error("unknown time zone: '{0}'")]
    UnknownTimezone(String),
}

/// Construction-time configuration for the guide engine
#[derive(Debug, Clone)]
pub struct GuideConfig {
    /// Remote archive URL; empty means operate from the cached local copy
    pub source_url: String,
    /// Zone used as the wall-clock pivot for all queries
    pub timezone: Tz,
    /// Hour correction applied to feed timestamps (time-zone/DST skew)
    pub offset_hours: f64,
    /// Days of history kept by the retention window
    pub cached_days: u32,
    /// Color token carried on the currently-airing row
    pub highlight: String,
    /// Row cap for the live schedule window
    pub live_window_rows: usize,
    /// Trim threshold for past/future descriptions
    pub trim_len: usize,
    /// Override for the cache directory; `None` uses the per-user default
    pub cache_dir: Option<PathBuf>,
}

impl GuideConfig {
    /// Builds a configuration, failing fast on invalid values
    ///
    /// A negative `cached_days` is a construction-time error, never
    /// silently clamped.
    pub fn new(
        source_url: impl Into<String>,
        timezone: &str,
        offset_hours: f64,
        cached_days: i64,
    ) -> Result<Self, ConfigError> {
        if cached_days < 0 {
            return Err(ConfigError::NegativeRetention(cached_days));
        }
        let tz: Tz = timezone
            .parse()
            .map_err(|_| ConfigError::UnknownTimezone(timezone.to_string()))?;
        Ok(GuideConfig {
            source_url: source_url.into(),
            timezone: tz,
            offset_hours,
            cached_days: cached_days as u32,
            highlight: DEFAULT_HIGHLIGHT.to_string(),
            live_window_rows: DEFAULT_LIVE_WINDOW_ROWS,
            trim_len: DEFAULT_TRIM_LEN,
            cache_dir: None,
        })
    }

    /// Overrides the highlight token
    pub fn with_highlight(mut self, token: impl Into<String>) -> Self {
        self.highlight = token.into();
        self
    }

    /// Overrides the cache directory (useful for tests)
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }

    /// Overrides the live-window row cap and trim threshold
    pub fn with_display_limits(mut self, live_window_rows: usize, trim_len: usize) -> Self {
        self.live_window_rows = live_window_rows;
        self.trim_len = trim_len;
        self
    }
}
