use std::ops::ControlFlow;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::events::{self, EventSender, HlsEvent};
use crate::loader::{LoadStats, Loader};

/// Runs `check` on the loader's stats every `interval_ms` until the load
/// completes or `check` stops.
///
/// When `check` breaks with an event the loader is aborted before the event
/// is emitted. Returns whether the load was abandoned.
///
/// ```rust,no_run
/// # async fn run(loader: &dyn hlsio::loader::Loader, events: &hlsio::events::EventSender,
/// #              abr: &mut hlsio::abr::AbrController, levels: &[hlsio::loader::Level]) {
/// use hlsio::abr::{watch_fragment_load, AbrContext};
///
/// let start = tokio::time::Instant::now();
/// let ctx = AbrContext::new(levels, None);
/// watch_fragment_load(loader, 100, events, |stats| {
///     abr.poll_abandon(&ctx, stats, start.elapsed().as_secs_f64() * 1000.0)
/// })
/// .await;
/// # }
/// ```
pub async fn watch_fragment_load<F>(loader: &dyn Loader, interval_ms: u64, events: &EventSender, mut check: F) -> bool
where
    F: FnMut(&LoadStats) -> ControlFlow<Option<HlsEvent>>,
{
    let shared = loader.stats();
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        // copy out so the loader is not blocked while the rules run
        let stats = shared.lock().clone();
        if stats.is_complete() {
            return false;
        }
        match check(&stats) {
            ControlFlow::Continue(()) => {}
            ControlFlow::Break(None) => return false,
            ControlFlow::Break(Some(event)) => {
                log::debug!("[abr] abandoning load after {} bytes", stats.loaded);
                loader.abort();
                events::emit(events, event);
                return true;
            }
        }
    }
}
