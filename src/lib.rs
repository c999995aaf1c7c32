//! teleguide — IPTV program guide cache engine
//!
//! Fetches a JTV schedule archive from a remote source, maintains a local
//! persisted cache with a bounded retention window, and answers the
//! time-indexed queries a channel browser needs: live window, full day,
//! cross-channel overview, and timeshift candidates.

pub mod cli;
pub mod config;
pub mod engine;
pub mod jtv;
pub mod query;
pub mod remote;
pub mod store;
pub mod timestamp;

pub use config::{ConfigError, GuideConfig};
pub use engine::{EngineError, GuideEngine, RefreshMessage};
pub use query::{GuideResponse, GuideRow, OverviewRow, RowClass, TimeshiftEntry};
pub use store::{GuideStore, ProgramRecord};
pub use timestamp::{GuideTime, RetentionWindow};
