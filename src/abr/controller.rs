use std::ops::ControlFlow;

use super::ewma::EwmaBandwidthEstimator;
use crate::buffer::{buffer_info, TimeRanges};
use crate::config::{AbrConfig, HlsConfig};
use crate::events::{ErrorDetails, HlsEvent};
use crate::loader::{Fragment, Level, LevelDetails, LoadStats, PlaylistType};
use crate::media::MediaElement;

/// Playback state sampled from the media element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaSnapshot {
    pub position: f64,
    pub playback_rate: f64,
    pub paused: bool,
    pub has_data: bool,
    pub buffered: TimeRanges,
}

impl MediaSnapshot {
    pub fn from_element(media: &dyn MediaElement) -> Self {
        Self {
            position: media.current_time(),
            playback_rate: media.playback_rate(),
            paused: media.paused(),
            has_data: media.has_data(),
            buffered: media.buffered(),
        }
    }
}

/// What level selection looks at besides the controller's own state.
#[derive(Debug, Clone, Copy)]
pub struct AbrContext<'a> {
    pub levels: &'a [Level],
    pub media: Option<&'a MediaSnapshot>,
    pub auto_level_enabled: bool,
    /// Highest level automatic selection may pick.
    pub auto_level_capping: Option<usize>,
}

impl<'a> AbrContext<'a> {
    pub fn new(levels: &'a [Level], media: Option<&'a MediaSnapshot>) -> Self {
        Self {
            levels,
            media,
            auto_level_enabled: true,
            auto_level_capping: None,
        }
    }

    /// First level whose bitrate reaches `min_auto_bitrate`.
    pub fn min_auto_level(&self, min_auto_bitrate: u64) -> usize {
        self.levels
            .iter()
            .position(|level| level.bitrate >= min_auto_bitrate)
            .unwrap_or(0)
    }

    pub fn max_auto_level(&self) -> usize {
        let last = self.levels.len().saturating_sub(1);
        self.auto_level_capping.map_or(last, |cap| cap.min(last))
    }
}

/// Picks the level of the next main fragment from the bandwidth estimate
/// and the buffer left, and aborts loads that would stall playback.
#[derive(Debug)]
pub struct AbrController {
    config: AbrConfig,
    max_buffer_hole: f64,
    last_loaded_frag_level: usize,
    /// Level forced after an emergency abort or by the caller.
    next_auto_level: Option<usize>,
    bw_estimator: EwmaBandwidthEstimator,
    frag_current: Option<Fragment>,
    /// Seconds the bitrate test load took, 0 without one.
    bitrate_test_delay: f64,
    timer_armed: bool,
}

impl AbrController {
    pub fn new(config: &HlsConfig) -> Self {
        let abr = config.abr.clone();
        let bw_estimator = EwmaBandwidthEstimator::new(abr.ewma_slow_vod, abr.ewma_fast_vod, abr.ewma_default_estimate);
        Self {
            config: abr,
            max_buffer_hole: config.max_buffer_hole,
            last_loaded_frag_level: 0,
            next_auto_level: None,
            bw_estimator,
            frag_current: None,
            bitrate_test_delay: 0.0,
            timer_armed: false,
        }
    }

    pub fn bw_estimator(&self) -> &EwmaBandwidthEstimator {
        &self.bw_estimator
    }

    /// Whether a main fragment load is being watched for abandonment.
    pub fn is_armed(&self) -> bool {
        self.timer_armed
    }

    /// Period of the abandon check while a load is watched.
    pub fn abandon_check_interval_ms(&self) -> u64 {
        self.config.abandon_check_interval_ms
    }

    pub fn set_next_auto_level(&mut self, level: Option<usize>) {
        self.next_auto_level = level;
    }

    /// Starts watching a main fragment load. Returns whether the abandon
    /// check should run for it.
    pub fn on_frag_loading(&mut self, frag: &Fragment) -> bool {
        if frag.kind == PlaylistType::Main && !self.timer_armed {
            self.frag_current = Some(frag.clone());
            self.timer_armed = true;
        }
        self.timer_armed
    }

    pub fn on_level_loaded(&mut self, details: &LevelDetails) {
        if details.live {
            self.bw_estimator
                .update(self.config.ewma_slow_live, self.config.ewma_fast_live);
        } else {
            self.bw_estimator
                .update(self.config.ewma_slow_vod, self.config.ewma_fast_vod);
        }
    }

    pub fn on_frag_loaded(&mut self, frag: &mut Fragment, levels: &mut [Level]) {
        if frag.kind != PlaylistType::Main {
            return;
        }
        self.timer_armed = false;
        self.last_loaded_frag_level = frag.level;
        self.next_auto_level = None;

        if self.config.max_with_real_bitrate {
            if let Some(level) = levels.get_mut(frag.level) {
                level.record_loaded(frag.stats.loaded, frag.duration);
            }
        }
        // a bitrate test is never buffered, sample it now
        if frag.bitrate_test {
            let delay_ms = self.sample(frag);
            self.bitrate_test_delay = delay_ms / 1000.0;
        }
    }

    pub fn on_frag_buffered(&mut self, frag: &mut Fragment) {
        if frag.stats.aborted || frag.kind != PlaylistType::Main || frag.bitrate_test {
            return;
        }
        self.sample(frag);
        self.bitrate_test_delay = 0.0;
    }

    /// Feeds the load of `frag` to the estimator, measured up to the end of
    /// parsing so that late media attachment does not skew it.
    fn sample(&mut self, frag: &mut Fragment) -> f64 {
        let stats = &mut frag.stats;
        let processing_ms = stats.parsing.end - stats.loading.start;
        self.bw_estimator.sample(processing_ms, stats.loaded);
        stats.bw_estimate = self.bw_estimator.estimate();
        processing_ms
    }

    pub fn on_error(&mut self, details: ErrorDetails) {
        if matches!(details, ErrorDetails::FragLoadError | ErrorDetails::FragLoadTimeout) {
            self.timer_armed = false;
        }
    }

    /// Bitrate used for `level`: its measured bitrate when that is higher
    /// and `max_with_real_bitrate` is set.
    pub fn with_real_bitrate(&self, level: &Level) -> f64 {
        if self.config.max_with_real_bitrate {
            level.real_bitrate.max(level.bitrate) as f64
        } else {
            level.bitrate as f64
        }
    }

    /// Level for the next main fragment.
    pub fn next_auto_level(&self, ctx: &AbrContext<'_>) -> usize {
        if let Some(forced) = self.next_auto_level {
            if !self.bw_estimator.can_estimate() {
                return forced;
            }
        }
        let auto = self.next_abr_auto_level(ctx);
        self.next_auto_level.map_or(auto, |forced| forced.min(auto))
    }

    fn next_abr_auto_level(&self, ctx: &AbrContext<'_>) -> usize {
        let current_frag_duration = self.frag_current.as_ref().map_or(0.0, |f| f.duration);
        let (position, playback_rate) = match ctx.media {
            Some(media) if media.playback_rate != 0.0 => (media.position, media.playback_rate.abs()),
            Some(media) => (media.position, 1.0),
            None => (0.0, 1.0),
        };
        let empty = TimeRanges::new();
        let buffered = ctx.media.map_or(&empty, |media| &media.buffered);
        let avg_bw = self.bw_estimator.estimate();
        let buffer_starvation_delay =
            (buffer_info(buffered, position, self.max_buffer_hole).end - position) / playback_rate;

        let min_auto_level = ctx.min_auto_level(self.config.min_auto_bitrate);
        let max_auto_level = ctx.max_auto_level();
        let scan = |max_fetch_duration: f64, bw_factor: f64, bw_up_factor: f64| {
            self.find_best_level(
                ctx.levels,
                current_frag_duration,
                avg_bw,
                min_auto_level,
                max_auto_level,
                max_fetch_duration,
                bw_factor,
                bw_up_factor,
            )
        };

        if let Some(level) = scan(
            buffer_starvation_delay,
            self.config.bandwidth_factor,
            self.config.bandwidth_up_factor,
        ) {
            return level;
        }

        log::trace!("[abr] rebuffering expected, looking for the level minimizing it");
        let mut max_starvation_delay = if current_frag_duration > 0.0 {
            current_frag_duration.min(self.config.max_starvation_delay)
        } else {
            self.config.max_starvation_delay
        };
        let (mut bw_factor, mut bw_up_factor) = (self.config.bandwidth_factor, self.config.bandwidth_up_factor);
        if buffer_starvation_delay == 0.0 && self.bitrate_test_delay > 0.0 {
            let max_loading_delay = if current_frag_duration > 0.0 {
                current_frag_duration.min(self.config.max_loading_delay)
            } else {
                self.config.max_loading_delay
            };
            max_starvation_delay = max_loading_delay - self.bitrate_test_delay;
            log::trace!(
                "[abr] bitrate test took {} ms, first fragment fetch budget {} ms",
                (1000.0 * self.bitrate_test_delay).round(),
                (1000.0 * max_starvation_delay).round()
            );
            // no safety margin after a bitrate test
            bw_factor = 1.0;
            bw_up_factor = 1.0;
        }

        scan(buffer_starvation_delay + max_starvation_delay, bw_factor, bw_up_factor).unwrap_or(0)
    }

    /// Highest level in `[min_auto_level, max_auto_level]` the adjusted
    /// bandwidth sustains within `max_fetch_duration`.
    #[allow(clippy::too_many_arguments)]
    pub fn find_best_level(
        &self,
        levels: &[Level],
        current_frag_duration: f64,
        current_bw: f64,
        min_auto_level: usize,
        max_auto_level: usize,
        max_fetch_duration: f64,
        bw_factor: f64,
        bw_up_factor: f64,
    ) -> Option<usize> {
        for i in (min_auto_level..=max_auto_level).rev() {
            let Some(level) = levels.get(i) else {
                continue;
            };
            let (avg_duration, live) = match &level.details {
                Some(details) => (details.average_fragment_duration(), details.live),
                None => (current_frag_duration, false),
            };

            // switching up needs more margin than staying
            let adjusted_bw = if i <= self.last_loaded_frag_level {
                bw_factor * current_bw
            } else {
                bw_up_factor * current_bw
            };
            let bitrate = self.with_real_bitrate(level);
            let fetch_duration = bitrate * avg_duration / adjusted_bw;

            log::trace!(
                "[abr] level {}: adjusted bw {}, bitrate {}, avg duration {}, max fetch {}, fetch {}",
                i,
                adjusted_bw.round(),
                bitrate,
                avg_duration,
                max_fetch_duration,
                fetch_duration
            );
            // live streams skip the fetch check near the edge, except right
            // after a bitrate test
            if adjusted_bw > bitrate
                && (fetch_duration == 0.0
                    || !fetch_duration.is_finite()
                    || (live && self.bitrate_test_delay == 0.0)
                    || fetch_duration < max_fetch_duration)
            {
                return Some(i);
            }
        }
        None
    }

    /// Decides whether the watched load must be abandoned, at `now_ms` on
    /// the clock `stats` was timed with.
    ///
    /// On abort the next level is forced, the partial load is sampled and
    /// the returned event must be acted upon by aborting the loader.
    pub fn abandon_rules_check(&mut self, ctx: &AbrContext<'_>, stats: &LoadStats, now_ms: f64) -> Option<HlsEvent> {
        if !self.timer_armed {
            return None;
        }
        let frag = self.frag_current.as_ref()?;

        if stats.aborted {
            log::warn!("[abr] fragment load aborted, disarming abandon rules");
            self.timer_armed = false;
            self.next_auto_level = None;
            return None;
        }

        let media = ctx.media?;
        if !ctx.auto_level_enabled || media.paused || media.playback_rate == 0.0 || !media.has_data {
            return None;
        }

        let request_delay = now_ms - stats.loading.start;
        let playback_rate = media.playback_rate.abs();
        // measure a stable rate: wait until part of the fragment should have loaded
        if request_delay <= self.config.abandon_min_progress * 1000.0 * frag.duration / playback_rate {
            return None;
        }

        let level = ctx.levels.get(frag.level)?;
        let expected_len = if stats.total > 0 {
            stats.total as f64
        } else {
            (stats.loaded as f64).max((frag.duration * self.with_real_bitrate(level) / 8.0).round())
        };
        let load_rate = if stats.bw_estimate > 0.0 {
            stats.bw_estimate / 8.0
        } else {
            stats.loaded as f64 * 1000.0 / request_delay
        }
        .max(1.0);
        let frag_loaded_delay = (expected_len - stats.loaded as f64) / load_rate;

        let position = media.position;
        let buffer_starvation_delay =
            (buffer_info(&media.buffered, position, self.max_buffer_hole).end - position) / playback_rate;

        if buffer_starvation_delay >= self.config.abandon_buffer_fragments * frag.duration / playback_rate
            || frag_loaded_delay <= buffer_starvation_delay
        {
            return None;
        }

        let min_auto_level = ctx.min_auto_level(self.config.min_auto_bitrate);
        let mut next_loaded_delay = f64::INFINITY;
        let mut next_load_level = None;
        for candidate in (min_auto_level..frag.level).rev() {
            let Some(lower) = ctx.levels.get(candidate) else {
                continue;
            };
            next_loaded_delay = frag.duration * self.with_real_bitrate(lower)
                / (8.0 * self.config.abandon_conservative_factor * load_rate);
            next_load_level = Some(candidate);
            if next_loaded_delay < buffer_starvation_delay {
                break;
            }
        }

        let next_load_level = next_load_level?;
        if next_loaded_delay >= frag_loaded_delay {
            return None;
        }

        let bw_estimate = self.bw_estimator.estimate();
        log::warn!(
            "[abr] fragment {} of level {} is loading too slowly and will cause an underbuffer; \
             aborting and switching to level {}. bw estimate {:.3} Kb/s, current fragment needs {:.3} s, \
             next fragment {:.3} s, underbuffer in {:.3} s",
            frag.sn,
            frag.level,
            next_load_level,
            bw_estimate / 1024.0,
            frag_loaded_delay,
            next_loaded_delay,
            buffer_starvation_delay
        );

        let frag = frag.clone();
        self.next_auto_level = Some(next_load_level);
        self.bw_estimator.sample(request_delay, stats.loaded);
        self.timer_armed = false;
        Some(HlsEvent::FragLoadEmergencyAborted {
            frag,
            stats: stats.clone(),
            next_load_level,
        })
    }

    /// One tick of the abandon timer: keep watching, stop, or stop with an
    /// abort to carry out.
    pub fn poll_abandon(&mut self, ctx: &AbrContext<'_>, stats: &LoadStats, now_ms: f64) -> ControlFlow<Option<HlsEvent>> {
        if stats.is_complete() {
            self.timer_armed = false;
        }
        match self.abandon_rules_check(ctx, stats, now_ms) {
            Some(event) => ControlFlow::Break(Some(event)),
            None if self.timer_armed => ControlFlow::Continue(()),
            None => ControlFlow::Break(None),
        }
    }
}
