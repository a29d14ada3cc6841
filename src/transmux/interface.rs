use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use super::decrypt::{DecryptData, Decrypter};
use super::session::{ChunkMetadata, FragmentKey, TransmuxConfig, TransmuxState};
use super::transmuxer::{Transmuxer, TransmuxerResult};
use crate::config::HlsConfig;
use crate::events::{self, ErrorData, ErrorDetails, ErrorType, EventSender, HlsEvent};
use crate::loader::{Fragment, PlaylistType};
use crate::{HlsError, Result};

const WORKER_QUEUE_DEPTH: usize = 32;

/// Messages understood by a transmuxer, inline or on the worker task.
pub enum TransmuxCommand {
    Configure(TransmuxConfig),
    Push {
        data: Bytes,
        decrypt: Option<DecryptData>,
        chunk_meta: ChunkMetadata,
        state: TransmuxState,
        reply: oneshot::Sender<Result<TransmuxerResult>>,
    },
    Flush {
        chunk_meta: ChunkMetadata,
        reply: oneshot::Sender<Result<TransmuxerResult>>,
    },
    Abort {
        reply: oneshot::Sender<()>,
    },
}

impl TransmuxCommand {
    /// Runs the command against `transmuxer` and answers on its reply channel.
    async fn execute(self, transmuxer: &mut Transmuxer) {
        match self {
            TransmuxCommand::Configure(config) => transmuxer.configure(config),
            TransmuxCommand::Push {
                data,
                decrypt,
                chunk_meta,
                state,
                reply,
            } => {
                let result = transmuxer.push(data, decrypt.as_ref(), chunk_meta, state).await;
                let _ = reply.send(result);
            }
            TransmuxCommand::Flush { chunk_meta, reply } => {
                let _ = reply.send(transmuxer.flush(chunk_meta));
            }
            TransmuxCommand::Abort { reply } => {
                transmuxer.abort();
                let _ = reply.send(());
            }
        }
    }
}

enum Backend {
    Inline(Box<Transmuxer>),
    Worker(mpsc::Sender<TransmuxCommand>),
}

async fn run_worker(mut transmuxer: Transmuxer, mut commands: mpsc::Receiver<TransmuxCommand>) {
    log::debug!("[transmuxer-worker] started");
    while let Some(command) = commands.recv().await {
        command.execute(&mut transmuxer).await;
    }
    log::debug!("[transmuxer-worker] command channel closed, exiting");
}

/// Front of the transmux pipeline for one playlist type.
///
/// Tracks which fragment came last to derive the [`TransmuxState`] of every
/// chunk, and turns transmux results into [`HlsEvent`]s. With
/// `enable_worker` the [`Transmuxer`] runs on its own tokio task.
pub struct TransmuxerInterface {
    backend: Backend,
    events: EventSender,
    parent: PlaylistType,
    last_frag: Option<FragmentKey>,
    force_non_contiguous: bool,
}

impl TransmuxerInterface {
    pub fn new(
        config: &HlsConfig,
        events: EventSender,
        decrypter: Option<Arc<dyn Decrypter>>,
        parent: PlaylistType,
    ) -> Self {
        let transmuxer = Transmuxer::new(config.clone(), events.clone(), decrypter);
        let backend = match (config.enable_worker, Handle::try_current()) {
            (true, Ok(handle)) => {
                let (tx, rx) = mpsc::channel(WORKER_QUEUE_DEPTH);
                handle.spawn(run_worker(transmuxer, rx));
                Backend::Worker(tx)
            }
            (true, Err(_)) => {
                log::warn!("[transmuxer] no tokio runtime to spawn the worker on, transmuxing inline");
                Backend::Inline(Box::new(transmuxer))
            }
            (false, _) => Backend::Inline(Box::new(transmuxer)),
        };

        Self {
            backend,
            events,
            parent,
            last_frag: None,
            force_non_contiguous: false,
        }
    }

    pub fn is_worker(&self) -> bool {
        matches!(self.backend, Backend::Worker(_))
    }

    /// Transmuxes one chunk of `frag` and emits its output as events.
    ///
    /// The first chunk of a fragment reconfigures the muxers with
    /// `transmux_config`; later chunks of the same fragment continue it.
    pub async fn push(
        &mut self,
        data: Bytes,
        decrypt: Option<&DecryptData>,
        frag: &Fragment,
        transmux_config: TransmuxConfig,
        chunk_meta: ChunkMetadata,
        accurate_time_offset: bool,
    ) -> Result<()> {
        let key = frag.key();
        let mut state = if self.last_frag == Some(key) {
            TransmuxState::continuation(frag.start, accurate_time_offset)
        } else {
            let state = TransmuxState::for_fragment(self.last_frag, key, frag.start, accurate_time_offset);
            log::debug!(
                "[transmuxer] fragment {} of level {}: discontinuity {}, track switch {}, contiguous {}",
                key.sn,
                key.level,
                state.discontinuity,
                state.track_switch,
                state.contiguous
            );
            self.send(TransmuxCommand::Configure(transmux_config)).await?;
            state
        };
        if std::mem::take(&mut self.force_non_contiguous) {
            state.contiguous = false;
        }
        self.last_frag = Some(key);

        let (reply, response) = oneshot::channel();
        self.send(TransmuxCommand::Push {
            data,
            decrypt: decrypt.cloned(),
            chunk_meta,
            state,
            reply,
        })
        .await?;
        let result = self.receive(response).await?;
        self.handle_result(key, result)
    }

    /// Flushes what the demuxer still holds for `chunk_meta`'s fragment.
    pub async fn flush(&mut self, chunk_meta: ChunkMetadata) -> Result<()> {
        let key = chunk_meta.key();
        let (reply, response) = oneshot::channel();
        self.send(TransmuxCommand::Flush { chunk_meta, reply }).await?;
        let result = self.receive(response).await?;
        self.handle_result(key, result)
    }

    /// Discards partial data. The next fragment starts a new timeline
    /// segment even when its sequence number follows on.
    pub async fn abort(&mut self) -> Result<()> {
        self.force_non_contiguous = true;
        let (reply, response) = oneshot::channel();
        self.send(TransmuxCommand::Abort { reply }).await?;
        self.receive(response).await
    }

    async fn send(&mut self, command: TransmuxCommand) -> Result<()> {
        match &mut self.backend {
            Backend::Inline(transmuxer) => {
                command.execute(transmuxer).await;
                Ok(())
            }
            Backend::Worker(commands) => {
                if commands.send(command).await.is_err() {
                    return Err(self.worker_gone());
                }
                Ok(())
            }
        }
    }

    async fn receive<T>(&self, response: oneshot::Receiver<T>) -> Result<T> {
        match response.await {
            Ok(value) => Ok(value),
            Err(_) => Err(self.worker_gone()),
        }
    }

    fn worker_gone(&self) -> HlsError {
        log::error!("[transmuxer] worker stopped responding");
        events::emit(
            &self.events,
            HlsEvent::Error(
                ErrorData::new(ErrorType::OtherError, ErrorDetails::InternalException, true, "transmuxer worker exited")
                    .with_parent(self.parent),
            ),
        );
        HlsError::Channel("transmuxer worker exited".into())
    }

    fn handle_result(&self, frag: FragmentKey, result: Result<TransmuxerResult>) -> Result<()> {
        let TransmuxerResult {
            remux_result,
            chunk_meta,
        } = match result {
            Ok(result) => result,
            Err(e) => {
                // decrypt failures were already reported by the transmuxer
                if !matches!(e, HlsError::Decrypt(_)) {
                    log::warn!("[transmuxer] fragment {} failed to transmux: {}", frag.sn, e);
                    events::emit(
                        &self.events,
                        HlsEvent::Error(
                            ErrorData::new(ErrorType::MediaError, ErrorDetails::FragParsingError, false, e.to_string())
                                .with_frag(frag)
                                .with_parent(self.parent),
                        ),
                    );
                }
                return Err(e);
            }
        };

        if let Some(init) = remux_result.init_segment {
            if !init.tracks.is_empty() {
                events::emit(&self.events, HlsEvent::FragParsingInitSegment { frag, tracks: init.tracks });
            }
            if let Some(init_pts) = init.init_pts {
                events::emit(&self.events, HlsEvent::InitPtsFound { frag, init_pts });
            }
        }
        for data in [remux_result.audio, remux_result.video].into_iter().flatten() {
            events::emit(&self.events, HlsEvent::FragParsingData { frag, data });
        }
        if let Some(samples) = remux_result.id3.filter(|s| !s.is_empty()) {
            events::emit(&self.events, HlsEvent::FragParsingMetadata { frag, samples });
        }
        if let Some(samples) = remux_result.text.filter(|s| !s.is_empty()) {
            events::emit(&self.events, HlsEvent::FragParsingUserdata { frag, samples });
        }
        events::emit(&self.events, HlsEvent::FragParsed { frag, chunk_meta });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventReceiver;
    use pretty_assertions::assert_eq;

    fn adts_frames(count: usize) -> Bytes {
        let frame = [0xFF, 0xF1, 0x50, 0x80, 0x01, 0x7F, 0xFC, 1, 2, 3, 4];
        frame.iter().copied().cycle().take(frame.len() * count).collect()
    }

    fn interface(enable_worker: bool) -> (TransmuxerInterface, EventReceiver) {
        let config = HlsConfig {
            enable_worker,
            ..HlsConfig::default()
        };
        let (tx, rx) = events::channel();
        (TransmuxerInterface::new(&config, tx, None, PlaylistType::Main), rx)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        names
    }

    async fn push_fragment(interface: &mut TransmuxerInterface, frag: &Fragment) {
        let meta = ChunkMetadata::new(frag.key(), 0, 88);
        interface
            .push(adts_frames(8), None, frag, TransmuxConfig::default(), meta, true)
            .await
            .unwrap();
    }

    async fn events_in_order(enable_worker: bool) {
        let (mut interface, mut rx) = interface(enable_worker);
        assert_eq!(interface.is_worker(), enable_worker);

        let frag = Fragment::new(PlaylistType::Main, 0, 1, 0, 0.0, 0.2);
        push_fragment(&mut interface, &frag).await;
        interface.flush(ChunkMetadata::new(frag.key(), 1, 0)).await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                "fragParsingInitSegment",
                "initPtsFound",
                "fragParsingData",
                "fragParsed",
                "fragParsed",
            ]
        );
    }

    #[tokio::test]
    async fn test_inline_events_in_order() {
        events_in_order(false).await;
    }

    #[tokio::test]
    async fn test_worker_events_in_order() {
        events_in_order(true).await;
    }

    #[test]
    fn test_worker_falls_back_inline_without_runtime() {
        let (interface, _rx) = interface(true);
        assert!(!interface.is_worker());
    }

    #[tokio::test]
    async fn test_abort_is_idempotent() {
        let (mut interface, mut rx) = interface(true);
        let frag = Fragment::new(PlaylistType::Main, 0, 1, 0, 0.0, 0.2);
        push_fragment(&mut interface, &frag).await;

        interface.abort().await.unwrap();
        interface.abort().await.unwrap();
        assert!(interface.force_non_contiguous);

        let next = Fragment::new(PlaylistType::Main, 0, 2, 0, 0.2, 0.2);
        drain(&mut rx);
        push_fragment(&mut interface, &next).await;
        assert!(!interface.force_non_contiguous);
        assert_eq!(drain(&mut rx), vec!["fragParsingData", "fragParsed"]);
    }
}
