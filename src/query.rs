//! Guide queries
//!
//! The four read shapes used by a UI layer: live window ("what's on next"),
//! full-day schedule, cross-channel overview of currently-airing programs,
//! and the timeshift candidate list. All of them pivot on the current
//! wall-clock time in the configured zone; rows are classified as past,
//! current, or upcoming relative to that pivot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::config::GuideConfig;
use crate::store::GuideStore;
use crate::timestamp::{day_bounds, to_datetime, GuideTime};

/// Slack in minutes on the overview's "started by now" bound; the feed has
/// minute granularity
const OVERVIEW_EPSILON_MINUTES: i64 = 1;

/// Placeholder title rendered when a query matches nothing
const NOT_AVAILABLE: &str = "n/a";

/// A query result that may still be waiting on the first refresh
///
/// The engine is Stale until the refresh+merge pipeline completes once;
/// queries issued before that return `Loading` instead of blocking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuideResponse<T> {
    /// The store has not been loaded this session yet
    Loading,
    /// Store-backed rows
    Ready(T),
}

/// Time-relative classification of a schedule row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowClass {
    /// Already over (`stop <= now`)
    Past,
    /// Airing right now (`start <= now < stop`)
    Current,
    /// Not started yet
    Upcoming,
    /// Placeholder row for an empty result
    Unavailable,
}

/// One presentation-ready schedule row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuideRow {
    /// Raw start timestamp, kept for callers that need it back
    pub start: GuideTime,
    /// `hh:mm` display prefix
    pub time: String,
    /// Program title, possibly trimmed for past/upcoming rows
    pub title: String,
    /// Past/current/upcoming classification
    pub class: RowClass,
    /// Color token for the currently-airing row, from configuration
    pub highlight: Option<String>,
}

impl GuideRow {
    fn placeholder() -> Self {
        GuideRow {
            start: GuideTime::MIN,
            time: String::new(),
            title: NOT_AVAILABLE.to_string(),
            class: RowClass::Unavailable,
            highlight: None,
        }
    }
}

/// One row of the cross-channel overview
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverviewRow {
    /// Channel identifier
    pub channel: String,
    /// Display name supplied by the caller's name map
    pub name: String,
    /// `hh:mm` start display
    pub time: String,
    /// Program title
    pub title: String,
    /// Raw start timestamp
    pub start: GuideTime,
    /// Raw stop timestamp
    pub stop: GuideTime,
}

/// One replayable-program candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeshiftEntry {
    /// Raw start timestamp; callers derive the relative replay offset from it
    pub start: GuideTime,
    /// `hh:mm` start display
    pub time: String,
    /// Trimmed program title
    pub title: String,
}

impl TimeshiftEntry {
    /// Seconds elapsed since the program started, for a relative replay URL
    ///
    /// Returns `None` when the start timestamp does not resolve to an
    /// unambiguous instant in the zone.
    pub fn replay_offset_secs(&self, tz: Tz) -> Option<i64> {
        self.replay_offset_secs_at(Utc::now().with_timezone(&tz))
    }

    /// [`Self::replay_offset_secs`] with an explicit wall-clock pivot
    pub fn replay_offset_secs_at(&self, now: DateTime<Tz>) -> Option<i64> {
        let started = to_datetime(self.start, now.timezone())?;
        Some((now - started).num_seconds())
    }
}

/// Read-only query layer over the store
///
/// Reads the last-committed store state; never talks to the remote source
/// or the decoder.
#[derive(Clone)]
pub struct GuideQueryEngine {
    store: Arc<GuideStore>,
    config: GuideConfig,
}

impl GuideQueryEngine {
    pub fn new(store: Arc<GuideStore>, config: GuideConfig) -> Self {
        GuideQueryEngine { store, config }
    }

    fn now(&self) -> GuideTime {
        GuideTime::now_in(self.config.timezone)
    }

    /// Schedule rows for one channel: live window or full day
    pub fn schedule(&self, date: u32, channel: &str, full_day: bool) -> Vec<GuideRow> {
        self.schedule_at(self.now(), date, channel, full_day)
    }

    /// [`Self::schedule`] with an explicit wall-clock pivot
    pub fn schedule_at(
        &self,
        now: GuideTime,
        date: u32,
        channel: &str,
        full_day: bool,
    ) -> Vec<GuideRow> {
        let rows = if full_day {
            self.full_day_rows(now, date, channel)
        } else {
            self.live_window_rows(now, channel)
        };
        if rows.is_empty() {
            vec![GuideRow::placeholder()]
        } else {
            rows
        }
    }

    /// Up to `live_window_rows` soonest programs still running or ahead;
    /// the first one already started is the current row
    fn live_window_rows(&self, now: GuideTime, channel: &str) -> Vec<GuideRow> {
        let mut current_marked = false;
        self.store
            .channel_programs(channel)
            .into_iter()
            .filter(|record| record.stop > now)
            .take(self.config.live_window_rows)
            .map(|record| {
                let class = if !current_marked && record.start <= now {
                    current_marked = true;
                    RowClass::Current
                } else {
                    RowClass::Upcoming
                };
                self.row(record.start, record.description, class, false)
            })
            .collect()
    }

    /// Every program overlapping `[date 000000, date 235900)`, classified
    /// past/current/upcoming; only the current row keeps its full description
    fn full_day_rows(&self, now: GuideTime, date: u32, channel: &str) -> Vec<GuideRow> {
        let (begin, end) = day_bounds(date);
        self.store
            .channel_programs(channel)
            .into_iter()
            .filter(|record| record.stop > begin && record.start < end)
            .map(|record| {
                let class = if record.stop <= now {
                    RowClass::Past
                } else if record.start <= now {
                    RowClass::Current
                } else {
                    RowClass::Upcoming
                };
                let trim = class != RowClass::Current;
                self.row(record.start, record.description, class, trim)
            })
            .collect()
    }

    /// Currently-airing programs across every channel present in `names`
    ///
    /// Channels without a display name are silently excluded — this is how
    /// unselected channels are filtered from the summary. Rows are ordered
    /// by start descending, then stop ascending.
    pub fn overview(&self, names: &HashMap<String, String>) -> Vec<OverviewRow> {
        self.overview_at(self.now(), names)
    }

    /// [`Self::overview`] with an explicit wall-clock pivot
    pub fn overview_at(&self, now: GuideTime, names: &HashMap<String, String>) -> Vec<OverviewRow> {
        let started_by = now
            .checked_add_minutes(OVERVIEW_EPSILON_MINUTES)
            .unwrap_or(now);
        let mut rows: Vec<OverviewRow> = self
            .store
            .all_programs()
            .into_iter()
            .filter(|record| record.start < started_by && record.stop > now)
            .filter_map(|record| {
                let name = names.get(&record.channel)?.clone();
                Some(OverviewRow {
                    time: record.start.hhmm(),
                    title: record.description,
                    channel: record.channel,
                    name,
                    start: record.start,
                    stop: record.stop,
                })
            })
            .collect();
        rows.sort_by(|a, b| b.start.cmp(&a.start).then(a.stop.cmp(&b.stop)));
        rows
    }

    /// Already-airing-or-aired programs on `date` that are still replayable
    pub fn timeshift_list(&self, date: u32, channel: &str) -> Vec<TimeshiftEntry> {
        self.timeshift_list_at(self.now(), date, channel)
    }

    /// [`Self::timeshift_list`] with an explicit wall-clock pivot
    pub fn timeshift_list_at(
        &self,
        now: GuideTime,
        date: u32,
        channel: &str,
    ) -> Vec<TimeshiftEntry> {
        let (begin, end) = day_bounds(date);
        self.store
            .channel_programs(channel)
            .into_iter()
            .filter(|record| record.stop > begin && record.start < end)
            .filter(|record| record.stop > now && record.start < now)
            .map(|record| TimeshiftEntry {
                start: record.start,
                time: record.start.hhmm(),
                title: trim_description(&record.description, self.config.trim_len),
            })
            .collect()
    }

    /// The single nearest program still running or ahead, as a compact
    /// "now playing" label
    pub fn current_program(&self, channel: &str) -> Option<GuideRow> {
        self.current_program_at(self.now(), channel)
    }

    /// [`Self::current_program`] with an explicit wall-clock pivot
    pub fn current_program_at(&self, now: GuideTime, channel: &str) -> Option<GuideRow> {
        self.store
            .channel_programs(channel)
            .into_iter()
            .find(|record| record.stop > now)
            .map(|record| {
                let class = if record.start <= now {
                    RowClass::Current
                } else {
                    RowClass::Upcoming
                };
                self.row(record.start, record.description, class, false)
            })
    }

    fn row(&self, start: GuideTime, title: String, class: RowClass, trim: bool) -> GuideRow {
        let title = if trim {
            trim_description(&title, self.config.trim_len)
        } else {
            title
        };
        let highlight = (class == RowClass::Current).then(|| self.config.highlight.clone());
        GuideRow {
            start,
            time: start.hhmm(),
            title,
            class,
            highlight,
        }
    }
}

/// Trims a description to roughly `limit` characters
///
/// Cuts at the last sentence boundary (`.`) at or before the limit; without
/// one, at the last whitespace before the limit; a hard cut only when even
/// that is impossible.
pub fn trim_description(description: &str, limit: usize) -> String {
    let chars: Vec<char> = description.chars().collect();
    if chars.len() <= limit {
        return description.to_string();
    }
    let window = &chars[..limit];
    if let Some(pos) = window.iter().rposition(|&c| c == '.') {
        return window[..=pos].iter().collect();
    }
    if let Some(pos) = window.iter().rposition(|c| c.is_whitespace()) {
        return window[..pos].iter().collect();
    }
    window.iter().collect()
}
