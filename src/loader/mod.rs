//! # Loading collaborators
//!
//! Fetching is done elsewhere; this module holds the metadata the core
//! reasons about ([`Level`], [`LevelDetails`], [`Fragment`], [`LoadStats`])
//! and the [`Loader`] interface an HTTP stack implements.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use url::Url;

pub mod fragment;
pub mod level;
pub mod level_helper;
pub mod stats;

pub use fragment::{ElementaryStreamInfo, Fragment, PlaylistType};
pub use level::{Level, LevelDetails, LoadedTotals};
pub use stats::{LoadStats, LoadTiming, ParseTiming};

/// Load progress shared between a loader, which writes it, and the ABR
/// monitor, which polls it.
pub type SharedLoadStats = Arc<Mutex<LoadStats>>;

/// What to fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderContext {
    pub url: Url,
    pub range_start: Option<u64>,
    pub range_end: Option<u64>,
    /// Report partial data through [`LoaderCallbacks::on_progress`].
    pub progress_data: bool,
}

impl LoaderContext {
    pub fn for_fragment(frag: &Fragment) -> Option<Self> {
        let url = frag.url.clone()?;
        let (range_start, range_end) = match frag.byte_range {
            Some((offset, length)) => (Some(offset), Some(offset + length)),
            None => (None, None),
        };
        Some(Self {
            url,
            range_start,
            range_end,
            progress_data: true,
        })
    }
}

/// Retry and timeout policy handed to a loader.
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    pub max_retry: u32,
    pub timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Smallest chunk reported through `on_progress`.
    pub high_water_mark: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_retry: 6,
            timeout_ms: 20_000,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 64_000,
            high_water_mark: 16 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoaderResponse {
    pub url: Url,
    pub data: Bytes,
}

/// Transport failure with its HTTP-like status code.
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderError {
    pub code: u16,
    pub text: String,
}

/// Completion notifications of one load. Exactly one of `on_success`,
/// `on_error`, `on_timeout` or `on_abort` ends it.
pub trait LoaderCallbacks: Send {
    fn on_success(&mut self, response: LoaderResponse, stats: &LoadStats);

    fn on_error(&mut self, error: LoaderError, stats: &LoadStats);

    fn on_timeout(&mut self, stats: &LoadStats);

    fn on_abort(&mut self, _stats: &LoadStats) {}

    fn on_progress(&mut self, _stats: &LoadStats, _data: Bytes) {}
}

/// An HTTP-like fetcher.
pub trait Loader: Send + Sync {
    fn load(&self, context: LoaderContext, config: LoaderConfig, callbacks: Box<dyn LoaderCallbacks>);

    /// Cancels the current load; its stats get `aborted` set.
    fn abort(&self);

    fn stats(&self) -> SharedLoadStats;
}
