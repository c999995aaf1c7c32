//! Guide engine lifecycle and refresh pipeline
//!
//! One engine instance owns one store handle for its whole life. On
//! construction it records whether the store is dirty (interrupted prior
//! write) or uninitialized with an archive already on disk (first-run
//! bootstrap); a later `start_refresh` runs the fetch → decode → evict →
//! merge pipeline on a background task and reports progress over a channel.
//! Queries stay on the caller's thread and read last-committed store state,
//! so they are never blocked by an in-flight refresh.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::GuideConfig;
use crate::jtv;
use crate::query::{GuideQueryEngine, GuideResponse, GuideRow, OverviewRow, TimeshiftEntry};
use crate::remote::RemoteSource;
use crate::store::{default_cache_dir, GuideStore, StoreError};
use crate::timestamp::{today_in, RetentionWindow};

/// Errors raised while constructing the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The store could not be opened
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The HTTP client could not be built
    #[error("http client setup failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Progress messages emitted by a running refresh pipeline
#[derive(Debug, Clone)]
pub enum RefreshMessage {
    /// The pipeline has started
    Started,
    /// The store was repopulated from a decoded archive
    GuideUpdated { inserted: usize, evicted: usize },
    /// The archive could not be decoded; the store keeps its previous state
    Failed(String),
    /// The pipeline is done; `changed` reports whether a download happened
    Completed { changed: bool },
}

/// The EPG cache engine
///
/// Two operational states: Stale (store not yet loaded this session —
/// queries answer `Loading`) and Ready (queries return store-backed rows).
/// The transition happens once, when the first refresh pipeline completes.
pub struct GuideEngine {
    config: GuideConfig,
    store: Arc<GuideStore>,
    source: RemoteSource,
    query: GuideQueryEngine,
    ready: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    /// Dirty store found at open: the next pipeline resets before reloading
    force_reset: Arc<AtomicBool>,
    /// Uninitialized store with an archive on disk: load without a download
    bootstrap: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GuideEngine {
    /// Opens the engine: store handle, remote source, freshness flags
    ///
    /// The cache directory (configured or per-user default) is created if
    /// absent. The engine starts Stale; call [`Self::start_refresh`] to run
    /// the pipeline.
    pub fn open(config: GuideConfig) -> Result<Self, EngineError> {
        let dir = match &config.cache_dir {
            Some(dir) => dir.clone(),
            None => default_cache_dir()?,
        };
        let store = Arc::new(GuideStore::open(&dir)?);
        let source = RemoteSource::new(&dir)?;

        let force_reset = store.is_dirty();
        let bootstrap = store.was_uninitialized() && source.archive_path().exists();
        if force_reset {
            info!("dirty store detected, next refresh will reload in full");
        }
        if bootstrap {
            info!("uninitialized store with archive present, will bootstrap");
        }

        let query = GuideQueryEngine::new(Arc::clone(&store), config.clone());
        Ok(GuideEngine {
            config,
            store,
            source,
            query,
            ready: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicBool::new(false)),
            force_reset: Arc::new(AtomicBool::new(force_reset)),
            bootstrap: Arc::new(AtomicBool::new(bootstrap)),
            task: Mutex::new(None),
        })
    }

    /// Spawns the refresh pipeline on the tokio runtime
    ///
    /// Returns a receiver for progress messages, or `None` when a pipeline
    /// is already in flight — overlapping triggers are coalesced, never
    /// queued.
    pub fn start_refresh(&self) -> Option<mpsc::Receiver<RefreshMessage>> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("refresh already in flight, coalescing trigger");
            return None;
        }

        let (tx, rx) = mpsc::channel(8);
        let store = Arc::clone(&self.store);
        let source = self.source.clone();
        let config = self.config.clone();
        let ready = Arc::clone(&self.ready);
        let in_flight = Arc::clone(&self.in_flight);
        let force_reset = Arc::clone(&self.force_reset);
        let bootstrap = Arc::clone(&self.bootstrap);

        let handle = tokio::spawn(run_pipeline(
            store,
            source,
            config,
            ready,
            in_flight,
            force_reset,
            bootstrap,
            tx,
        ));
        let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(handle);
        Some(rx)
    }

    /// True once the first refresh pipeline has completed
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Schedule query (live window or full day); `Loading` while Stale
    pub fn schedule(&self, date: u32, channel: &str, full_day: bool) -> GuideResponse<Vec<GuideRow>> {
        if !self.is_ready() {
            return GuideResponse::Loading;
        }
        GuideResponse::Ready(self.query.schedule(date, channel, full_day))
    }

    /// Cross-channel overview of currently-airing programs
    pub fn overview(&self, names: &HashMap<String, String>) -> GuideResponse<Vec<OverviewRow>> {
        if !self.is_ready() {
            return GuideResponse::Loading;
        }
        GuideResponse::Ready(self.query.overview(names))
    }

    /// Replayable-program candidates for one channel and day
    pub fn timeshift_list(&self, date: u32, channel: &str) -> GuideResponse<Vec<TimeshiftEntry>> {
        if !self.is_ready() {
            return GuideResponse::Loading;
        }
        GuideResponse::Ready(self.query.timeshift_list(date, channel))
    }

    /// Compact "now playing" label for one channel
    pub fn current_program(&self, channel: &str) -> GuideResponse<Option<GuideRow>> {
        if !self.is_ready() {
            return GuideResponse::Loading;
        }
        GuideResponse::Ready(self.query.current_program(channel))
    }

    /// Waits for any in-flight pipeline, then releases the store handle
    ///
    /// The wait is bounded: every network call in the pipeline carries a
    /// timeout. Closing while a refresh runs must not pull the store out
    /// from under it.
    pub async fn close(self) {
        let handle = {
            let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!("refresh task ended abnormally: {}", err);
            }
        }
        drop(self.query);
        if let Ok(store) = Arc::try_unwrap(self.store) {
            store.close();
        }
    }
}

/// The refresh-and-reload unit of work
///
/// Fetch (conditional) → decide whether a load is due (fresh download,
/// dirty store, or first-run bootstrap) → evict → decode → merge → flush.
#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    store: Arc<GuideStore>,
    source: RemoteSource,
    config: GuideConfig,
    ready: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    force_reset: Arc<AtomicBool>,
    bootstrap: Arc<AtomicBool>,
    tx: mpsc::Sender<RefreshMessage>,
) {
    let _ = tx.send(RefreshMessage::Started).await;

    let changed = source.refresh(&config.source_url).await;
    let reset = force_reset.swap(false, Ordering::SeqCst);
    let bootstrap = bootstrap.swap(false, Ordering::SeqCst);

    if changed || reset || bootstrap {
        if reset {
            store.reset();
        }
        let window = RetentionWindow::compute(today_in(config.timezone), config.cached_days);
        let evicted = store.evict_outside_retention(&window);

        match jtv::decode_archive(source.archive_path(), config.offset_hours) {
            Ok(records) => {
                let inserted = store.merge_insert(records, window.lower);
                info!("guide load: {} inserted, {} evicted", inserted, evicted);
                if let Err(err) = store.flush() {
                    warn!("store flush failed: {}", err);
                }
                let _ = tx.send(RefreshMessage::GuideUpdated { inserted, evicted }).await;
            }
            Err(err) => {
                warn!("archive decode failed: {}", err);
                let _ = tx.send(RefreshMessage::Failed(err.to_string())).await;
            }
        }
    } else {
        debug!("store is current, no reload needed");
    }

    ready.store(true, Ordering::SeqCst);
    // Clear the in-flight flag before reporting completion, so a caller
    // reacting to Completed can trigger the next refresh immediately.
    in_flight.store(false, Ordering::SeqCst);
    let _ = tx.send(RefreshMessage::Completed { changed }).await;
}
