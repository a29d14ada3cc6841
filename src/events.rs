//! # Pipeline events
//!
//! Components report to each other through [`HlsEvent`]s sent on an
//! injected [`EventSender`]. Nothing is global: whoever creates a component
//! hands it the sender and drains the matching receiver.
//!
//! ```rust
//! use hlsio::events::{self, ErrorData, ErrorDetails, ErrorType, HlsEvent};
//!
//! let (tx, mut rx) = events::channel();
//! events::emit(&tx, HlsEvent::Error(ErrorData::new(
//!     ErrorType::MuxError,
//!     ErrorDetails::RemuxAllocError,
//!     false,
//!     "fail allocating video mdat",
//! )));
//! assert!(matches!(rx.try_recv(), Ok(HlsEvent::Error(e)) if !e.fatal));
//! ```

use std::collections::BTreeMap;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::buffer::{SinkKind, TimeRanges};
use crate::loader::{Fragment, LoadStats, PlaylistType};
use crate::remux::{RemuxedTrack, TimedMetadata, TimedUserdata, TrackSet};
use crate::transmux::{ChunkMetadata, FragmentKey};

pub type EventSender = mpsc::UnboundedSender<HlsEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<HlsEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Sends `event`, logging instead of failing when nobody listens any more.
pub fn emit(events: &EventSender, event: HlsEvent) {
    if let Err(e) = events.send(event) {
        log::debug!("[events] receiver dropped, discarding {:?}", e.0.name());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    NetworkError,
    MediaError,
    MuxError,
    OtherError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDetails {
    FragLoadError,
    FragLoadTimeout,
    FragDecryptError,
    /// No demuxer accepted the bytes, or demuxing failed.
    FragParsingError,
    RemuxAllocError,
    BufferAddCodecError,
    BufferAppendError,
    BufferAppendingError,
    BufferFullError,
    InternalException,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorData {
    pub kind: ErrorType,
    pub details: ErrorDetails,
    pub fatal: bool,
    pub reason: String,
    /// Size of a failed allocation.
    pub bytes: Option<usize>,
    pub frag: Option<FragmentKey>,
    pub parent: Option<PlaylistType>,
}

impl ErrorData {
    pub fn new(kind: ErrorType, details: ErrorDetails, fatal: bool, reason: impl Into<String>) -> Self {
        Self {
            kind,
            details,
            fatal,
            reason: reason.into(),
            bytes: None,
            frag: None,
            parent: None,
        }
    }

    pub fn with_bytes(mut self, bytes: usize) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub fn with_frag(mut self, frag: FragmentKey) -> Self {
        self.frag = Some(frag);
        self
    }

    pub fn with_parent(mut self, parent: PlaylistType) -> Self {
        self.parent = Some(parent);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HlsEvent {
    /// A whole-segment AES-128 decryption finished.
    FragDecrypted {
        frag: FragmentKey,
        start: Instant,
        end: Instant,
    },
    FragParsingInitSegment {
        frag: FragmentKey,
        tracks: TrackSet,
    },
    InitPtsFound {
        frag: FragmentKey,
        init_pts: i64,
    },
    FragParsingData {
        frag: FragmentKey,
        data: RemuxedTrack,
    },
    FragParsingMetadata {
        frag: FragmentKey,
        samples: Vec<TimedMetadata>,
    },
    FragParsingUserdata {
        frag: FragmentKey,
        samples: Vec<TimedUserdata>,
    },
    /// All output of one chunk was emitted.
    FragParsed {
        frag: FragmentKey,
        chunk_meta: ChunkMetadata,
    },
    /// The ABR controller gave up on a load; the caller aborts the loader.
    FragLoadEmergencyAborted {
        frag: Fragment,
        stats: LoadStats,
        next_load_level: usize,
    },
    BufferCreated {
        tracks: BTreeMap<SinkKind, String>,
    },
    BufferAppended {
        parent: PlaylistType,
        kind: SinkKind,
        time_ranges: BTreeMap<SinkKind, TimeRanges>,
        chunk_meta: ChunkMetadata,
    },
    BufferFlushed {
        kind: SinkKind,
    },
    /// Every sink holding the fragment finished its appends.
    FragBuffered {
        frag: Fragment,
    },
    Error(ErrorData),
}

impl HlsEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HlsEvent::FragDecrypted { .. } => "fragDecrypted",
            HlsEvent::FragParsingInitSegment { .. } => "fragParsingInitSegment",
            HlsEvent::InitPtsFound { .. } => "initPtsFound",
            HlsEvent::FragParsingData { .. } => "fragParsingData",
            HlsEvent::FragParsingMetadata { .. } => "fragParsingMetadata",
            HlsEvent::FragParsingUserdata { .. } => "fragParsingUserdata",
            HlsEvent::FragParsed { .. } => "fragParsed",
            HlsEvent::FragLoadEmergencyAborted { .. } => "fragLoadEmergencyAborted",
            HlsEvent::BufferCreated { .. } => "bufferCreated",
            HlsEvent::BufferAppended { .. } => "bufferAppended",
            HlsEvent::BufferFlushed { .. } => "bufferFlushed",
            HlsEvent::FragBuffered { .. } => "fragBuffered",
            HlsEvent::Error(_) => "error",
        }
    }
}
