use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;

use super::helper::TimeRanges;
use super::queue::{BufferOperation, BufferOperationQueue, Dispatch, SinkState};
use super::sink::{MediaSink, MediaSource, SinkError, SinkKind};
use crate::config::BufferConfig;
use crate::events::{self, ErrorData, ErrorDetails, ErrorType, EventSender, HlsEvent};
use crate::loader::{Fragment, LevelDetails, PlaylistType};
use crate::media::MediaElement;
use crate::remux::{InitTrack, TrackSet};
use crate::transmux::{ChunkMetadata, ChunkTiming};

const DEFAULT_TARGET_DURATION: f64 = 10.0;

/// Remuxed bytes headed for one sink.
#[derive(Debug, Clone)]
pub struct BufferSegment {
    pub parent: PlaylistType,
    pub kind: SinkKind,
    pub data: Bytes,
    pub chunk_meta: ChunkMetadata,
}

struct SinkEntry {
    sink: Box<dyn MediaSink>,
    ended: bool,
}

/// State buffer operations act on.
pub struct BufferContext {
    sinks: BTreeMap<SinkKind, SinkEntry>,
    media_source: Option<Box<dyn MediaSource>>,
    media: Option<Arc<dyn MediaElement>>,
    events: EventSender,
    config: BufferConfig,
    append_error: u32,
    /// Last duration written to the media source.
    ms_duration: Option<f64>,
    /// Duration wanted from the last level update.
    level_duration: Option<f64>,
    level_target_duration: f64,
    live: bool,
}

impl SinkState for BufferContext {
    fn has_sink(&self, kind: SinkKind) -> bool {
        self.sinks.contains_key(&kind)
    }

    fn is_updating(&self, kind: SinkKind) -> bool {
        self.sinks.get(&kind).is_some_and(|entry| entry.sink.updating())
    }
}

impl BufferContext {
    fn time_ranges(&self) -> BTreeMap<SinkKind, TimeRanges> {
        self.sinks
            .iter()
            .map(|(kind, entry)| (*kind, entry.sink.buffered()))
            .collect()
    }

    fn emit(&self, event: HlsEvent) {
        events::emit(&self.events, event);
    }

    fn end_stream(&mut self) {
        let Some(source) = self.media_source.as_mut().filter(|source| source.is_open()) else {
            return;
        };
        log::info!("[buffer-controller] signaling end of stream");
        source.end_of_stream();
    }

    /// Writes the level duration to the media source. Only ever grows it,
    /// so switching levels cannot cut off buffered media.
    fn update_media_duration(&mut self) {
        let Some(level_duration) = self.level_duration else {
            return;
        };
        let Some(media) = self.media.as_ref().filter(|media| media.has_data()) else {
            return;
        };
        let media_duration = media.duration();
        let Some(source) = self.media_source.as_mut().filter(|source| source.is_open()) else {
            return;
        };

        let ms_duration = *self.ms_duration.get_or_insert_with(|| source.duration());
        if self.live && self.config.live_duration_infinity {
            log::info!("[buffer-controller] media source duration set to infinity");
            source.set_duration(f64::INFINITY);
            self.ms_duration = Some(f64::INFINITY);
        } else if (level_duration > ms_duration && level_duration > media_duration) || !media_duration.is_finite() {
            log::info!("[buffer-controller] updating media source duration to {:.3}", level_duration);
            source.set_duration(level_duration);
            self.ms_duration = Some(level_duration);
        }
    }
}

/// Feeds remuxed segments to the sinks through a per-sink operation queue.
///
/// The host forwards sink completion with [`BufferController::on_sink_update_end`]
/// and sink errors with [`BufferController::on_sink_error`].
pub struct BufferController {
    queue: BufferOperationQueue<BufferContext>,
    ctx: BufferContext,
    pending_tracks: BTreeMap<SinkKind, InitTrack>,
    codec_events_expected: usize,
}

impl BufferController {
    pub fn new(config: BufferConfig, events: EventSender) -> Self {
        Self {
            queue: BufferOperationQueue::new(),
            ctx: BufferContext {
                sinks: BTreeMap::new(),
                media_source: None,
                media: None,
                events,
                config,
                append_error: 0,
                ms_duration: None,
                level_duration: None,
                level_target_duration: DEFAULT_TARGET_DURATION,
                live: false,
            },
            pending_tracks: BTreeMap::new(),
            codec_events_expected: 0,
        }
    }

    /// Expects one codec announcement per stream controller.
    pub fn on_manifest_parsed(&mut self, alt_audio: bool) {
        self.codec_events_expected = if alt_audio { 2 } else { 1 };
        log::debug!("[buffer-controller] {} codec event(s) expected", self.codec_events_expected);
    }

    /// Attaches an opened media source. Pending tracks get their sinks now.
    pub fn attach_media(&mut self, media_source: Box<dyn MediaSource>, media: Arc<dyn MediaElement>) {
        self.ctx.media_source = Some(media_source);
        self.ctx.media = Some(media);
        self.check_pending_tracks();
    }

    pub fn detach_media(&mut self) {
        if let Some(source) = self.ctx.media_source.as_mut().filter(|source| source.is_open()) {
            source.end_of_stream();
        }
        self.ctx.media_source = None;
        self.ctx.media = None;
        self.ctx.ms_duration = None;
        self.pending_tracks.clear();
        self.on_buffer_reset();
    }

    /// Drops all sinks and queued operations.
    pub fn on_buffer_reset(&mut self) {
        self.ctx.sinks.clear();
        self.queue = BufferOperationQueue::new();
    }

    pub fn on_buffer_codecs(&mut self, tracks: TrackSet) {
        if !self.ctx.sinks.is_empty() {
            return;
        }
        for (kind, track) in tracks.iter() {
            self.pending_tracks.insert(kind, track.clone());
        }
        self.codec_events_expected = self.codec_events_expected.saturating_sub(1);
        self.check_pending_tracks();
    }

    /// Sinks are created together: once every expected codec event arrived,
    /// or two tracks are known.
    fn check_pending_tracks(&mut self) {
        if !self.ctx.media_source.as_ref().is_some_and(|source| source.is_open()) {
            return;
        }
        let pending = self.pending_tracks.len();
        if (pending > 0 && self.codec_events_expected == 0) || pending >= 2 {
            let tracks = std::mem::take(&mut self.pending_tracks);
            self.create_sinks(tracks);
            let kinds: Vec<SinkKind> = self.ctx.sinks.keys().copied().collect();
            for kind in kinds {
                self.queue.execute_next(kind, &mut self.ctx);
            }
        }
    }

    fn create_sinks(&mut self, tracks: BTreeMap<SinkKind, InitTrack>) {
        let Some(source) = self.ctx.media_source.as_mut() else {
            return;
        };
        let mut created = BTreeMap::new();
        for (kind, track) in tracks {
            if self.ctx.sinks.contains_key(&kind) {
                continue;
            }
            let mime_type = track.mime_type();
            log::info!("[buffer-controller] creating {} sink ({})", kind, mime_type);
            match source.add_sink(kind, &mime_type) {
                Ok(sink) => {
                    self.ctx.sinks.insert(kind, SinkEntry { sink, ended: false });
                    created.insert(kind, mime_type);
                }
                Err(e) => {
                    log::error!("[buffer-controller] failed to add {} sink: {}", mime_type, e);
                    events::emit(
                        &self.ctx.events,
                        HlsEvent::Error(ErrorData::new(
                            ErrorType::MediaError,
                            ErrorDetails::BufferAddCodecError,
                            true,
                            format!("{}: {}", mime_type, e),
                        )),
                    );
                }
            }
        }
        self.ctx.emit(HlsEvent::BufferCreated { tracks: created });
    }

    pub fn on_buffer_appending(&mut self, segment: BufferSegment) {
        let BufferSegment {
            parent,
            kind,
            data,
            chunk_meta,
        } = segment;
        let timing = Arc::new(Mutex::new(ChunkTiming {
            start: Some(Instant::now()),
            ..Default::default()
        }));
        let execute_timing = Arc::clone(&timing);
        let mut chunk_meta = Some(chunk_meta);

        let operation = BufferOperation::new("append", move |ctx: &mut BufferContext| {
            let Some(entry) = ctx.sinks.get_mut(&kind) else {
                log::warn!("[buffer-controller] appending to the {} sink, but it does not exist", kind);
                return Ok(Dispatch::Cycle);
            };
            execute_timing.lock().execute_start = Some(Instant::now());
            entry.ended = false;
            entry.sink.append_buffer(data.clone())?;
            Ok(Dispatch::Started)
        })
        .with_on_complete(move |ctx: &mut BufferContext| {
            let now = Instant::now();
            let mut timing = *timing.lock();
            timing.execute_end = Some(now);
            timing.end = Some(now);
            ctx.append_error = 0;
            if let Some(mut chunk_meta) = chunk_meta.take() {
                chunk_meta.buffering.insert(kind, timing);
                ctx.emit(HlsEvent::BufferAppended {
                    parent,
                    kind,
                    time_ranges: ctx.time_ranges(),
                    chunk_meta,
                });
            }
        })
        .with_on_error(move |ctx: &mut BufferContext, error: &SinkError| {
            log::error!("[buffer-controller] error appending to the {} sink: {}", kind, error);
            let (details, fatal) = if error.is_quota_exceeded() {
                (ErrorDetails::BufferFullError, false)
            } else {
                ctx.append_error += 1;
                let fatal = ctx.append_error > ctx.config.append_error_max_retry;
                if fatal {
                    log::error!(
                        "[buffer-controller] failed {} times to append to the {} sink",
                        ctx.config.append_error_max_retry,
                        kind
                    );
                }
                (ErrorDetails::BufferAppendError, fatal)
            };
            ctx.emit(HlsEvent::Error(
                ErrorData::new(ErrorType::MediaError, details, fatal, error.to_string()).with_parent(parent),
            ));
        });

        self.queue.append(operation, kind, &mut self.ctx);
    }

    /// Removes `[start, end)` from one sink, or from every sink.
    pub fn on_buffer_flushing(&mut self, start: f64, end: f64, kind: Option<SinkKind>) {
        let kinds: Vec<SinkKind> = match kind {
            Some(kind) => vec![kind],
            None => self.ctx.sinks.keys().copied().collect(),
        };
        for kind in kinds {
            let operation = BufferOperation::new("remove", move |ctx: &mut BufferContext| {
                let Some(media_duration) = ctx.media.as_ref().map(|media| media.duration()) else {
                    log::warn!("[buffer-controller] removing from the {} sink, but no media is attached", kind);
                    return Ok(Dispatch::Cycle);
                };
                let Some(entry) = ctx.sinks.get_mut(&kind) else {
                    log::warn!("[buffer-controller] removing from the {} sink, but it does not exist", kind);
                    return Ok(Dispatch::Cycle);
                };
                let remove_start = start.max(0.0);
                let remove_end = if media_duration.is_nan() { end } else { end.min(media_duration) };
                if remove_end > remove_start {
                    log::debug!(
                        "[buffer-controller] removing [{:.3}, {:.3}] from the {} sink",
                        remove_start,
                        remove_end,
                        kind
                    );
                    entry.sink.remove(remove_start, remove_end)?;
                    Ok(Dispatch::Started)
                } else {
                    Ok(Dispatch::Cycle)
                }
            })
            .with_on_complete(move |ctx: &mut BufferContext| ctx.emit(HlsEvent::BufferFlushed { kind }))
            .with_on_error(move |_: &mut BufferContext, error: &SinkError| {
                log::warn!("[buffer-controller] failed to remove from the {} sink: {}", kind, error);
            });
            self.queue.append(operation, kind, &mut self.ctx);
        }
    }

    /// Once every sink holding `frag` has drained up to this point, emits
    /// `FragBuffered`. Then trims the live back buffer.
    pub fn on_frag_parsed(&mut self, frag: &Fragment) {
        let kinds = self.sinks_for(frag);
        if kinds.is_empty() {
            log::warn!("[buffer-controller] fragment {} has no elementary stream with a sink", frag.sn);
        }
        log::debug!("[buffer-controller] all chunks of fragment {} received, blocking {:?}", frag.sn, kinds);

        let frag = frag.clone();
        self.queue.append_blockers(
            &kinds,
            move |ctx: &mut BufferContext| ctx.emit(HlsEvent::FragBuffered { frag }),
            &mut self.ctx,
        );
        self.flush_live_back_buffer();
    }

    /// Marks the sinks ended, then signals end of stream once they drained.
    pub fn on_buffer_eos(&mut self, kind: Option<SinkKind>) {
        for (sink_kind, entry) in self.ctx.sinks.iter_mut() {
            if kind.map_or(true, |k| k == *sink_kind) && !entry.ended {
                entry.ended = true;
                log::info!("[buffer-controller] {} sink now EOS", sink_kind);
            }
        }
        if !self.ctx.sinks.values().all(|entry| entry.ended) {
            return;
        }
        let kinds = self.sink_kinds();
        self.queue
            .append_blockers(&kinds, BufferContext::end_stream, &mut self.ctx);
    }

    pub fn on_level_updated(&mut self, details: &LevelDetails) {
        let Some(first) = details.fragments.first() else {
            return;
        };
        self.ctx.level_duration = Some(details.total_duration + first.start);
        self.ctx.level_target_duration = details
            .average_target_duration
            .filter(|d| *d > 0.0)
            .or(Some(details.target_duration).filter(|d| *d > 0.0))
            .unwrap_or(DEFAULT_TARGET_DURATION);
        self.ctx.live = details.live;

        log::debug!("[buffer-controller] duration update required");
        let kinds = self.sink_kinds();
        self.queue
            .append_blockers(&kinds, BufferContext::update_media_duration, &mut self.ctx);
    }

    /// Flushes the back buffer of a live stream, keeping at least one
    /// target duration behind the playhead.
    pub fn flush_live_back_buffer(&mut self) {
        if !self.ctx.live {
            return;
        }
        let Some(media) = self.ctx.media.as_ref() else {
            return;
        };
        let Some(back_buffer) = self.ctx.config.live_back_buffer_length.filter(|l| l.is_finite() && *l >= 0.0) else {
            return;
        };

        let target = media.current_time() - back_buffer.max(self.ctx.level_target_duration);
        let kinds: Vec<SinkKind> = self
            .ctx
            .sinks
            .iter()
            .filter(|(_, entry)| entry.sink.buffered().start(0).is_some_and(|start| target > start))
            .map(|(kind, _)| *kind)
            .collect();
        for kind in kinds {
            log::debug!("[buffer-controller] flushing {} back buffer up to {:.3}", kind, target);
            self.on_buffer_flushing(0.0, target, Some(kind));
        }
    }

    /// The sink finished an append or remove, successfully or not.
    pub fn on_sink_update_end(&mut self, kind: SinkKind) {
        match self.queue.current_mut(kind) {
            Some(operation) => operation.complete(&mut self.ctx),
            None => log::warn!("[buffer-controller] {} sink update ended with no operation queued", kind),
        }
        self.queue.shift_and_execute_next(kind, &mut self.ctx);
    }

    /// The sink failed asynchronously. Completion still follows and moves
    /// the queue on.
    pub fn on_sink_error(&mut self, kind: SinkKind, error: SinkError) {
        log::error!("[buffer-controller] {} sink error: {}", kind, error);
        self.ctx.emit(HlsEvent::Error(ErrorData::new(
            ErrorType::MediaError,
            ErrorDetails::BufferAppendingError,
            false,
            error.to_string(),
        )));
        if let Some(operation) = self.queue.current_mut(kind) {
            operation.fail(&mut self.ctx, &error);
        }
    }

    pub fn sink_kinds(&self) -> Vec<SinkKind> {
        self.ctx.sinks.keys().copied().collect()
    }

    pub fn buffered(&self, kind: SinkKind) -> Option<TimeRanges> {
        self.ctx.sinks.get(&kind).map(|entry| entry.sink.buffered())
    }

    pub fn append_errors(&self) -> u32 {
        self.ctx.append_error
    }

    pub fn queued(&self, kind: SinkKind) -> usize {
        self.queue.len(kind)
    }

    /// Sinks a fragment's elementary streams were appended to. A muxed sink
    /// takes both.
    fn sinks_for(&self, frag: &Fragment) -> Vec<SinkKind> {
        if self.ctx.sinks.contains_key(&SinkKind::AudioVideo) {
            return vec![SinkKind::AudioVideo];
        }
        [SinkKind::Audio, SinkKind::Video]
            .into_iter()
            .filter(|kind| frag.has_stream(*kind) && self.ctx.sinks.contains_key(kind))
            .collect()
    }
}
