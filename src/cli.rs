//! Command-line interface parsing
//!
//! Thin front-end over the engine: global configuration flags plus one
//! subcommand per query shape. This is glue for exercising the cache, not a
//! UI layer.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{ConfigError, GuideConfig};

/// IPTV program guide cache and query tool
#[derive(Parser, Debug)]
#[command(name = "teleguide")]
#[command(about = "Caches a JTV schedule archive and answers guide queries")]
#[command(version)]
pub struct Cli {
    /// Remote archive URL; omit to work from the cached local copy
    #[arg(long, default_value = "")]
    pub url: String,

    /// Time zone used as the wall-clock pivot for queries
    #[arg(long, default_value = "UTC")]
    pub timezone: String,

    /// Hour correction for time-zone/DST skew in the source feed
    #[arg(long, default_value_t = 0.0)]
    pub offset_hours: f64,

    /// Days of schedule history to retain
    #[arg(long, default_value_t = 7, allow_hyphen_values = true)]
    pub cached_days: i64,

    /// Cache directory override (default: per-user cache path)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// What's airing now across the channels in a name-map file
    Overview {
        /// JSON file mapping channel ids to display names
        #[arg(long)]
        channels: PathBuf,
    },
    /// Schedule for one channel: next few programs, or a whole day
    Schedule {
        /// Channel identifier
        channel: String,
        /// Day to show, as YYYYMMDD (default: today)
        #[arg(long)]
        date: Option<u32>,
        /// Show the whole day instead of the live window
        #[arg(long)]
        full_day: bool,
    },
    /// Already-aired programs on a channel that are still replayable
    Timeshift {
        /// Channel identifier
        channel: String,
        /// Day to show, as YYYYMMDD (default: today)
        #[arg(long)]
        date: Option<u32>,
    },
    /// Compact "now playing" label for one channel
    Now {
        /// Channel identifier
        channel: String,
    },
}

impl Cli {
    /// Builds the engine configuration from the global flags
    ///
    /// Fails fast on a negative retention count or an unknown time zone.
    pub fn to_config(&self) -> Result<GuideConfig, ConfigError> {
        let mut config = GuideConfig::new(
            self.url.clone(),
            &self.timezone,
            self.offset_hours,
            self.cached_days,
        )?;
        if let Some(dir) = &self.cache_dir {
            config = config.with_cache_dir(dir.clone());
        }
        Ok(config)
    }
}
