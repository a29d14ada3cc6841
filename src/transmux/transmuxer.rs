use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use super::decrypt::{DecryptData, Decrypter, EncryptionMethod};
use super::session::{ChunkMetadata, FragmentKey, TransmuxConfig, TransmuxState};
use crate::config::HlsConfig;
use crate::events::{self, ErrorData, ErrorDetails, ErrorType, EventSender, HlsEvent};
use crate::format::DemuxerKind;
use crate::remux::{MP4Remuxer, PassThroughRemuxer, RemuxerKind, RemuxerResult};
use crate::{HlsError, Result};

/// Bytes of an unrecognised fragment quoted in the parsing error.
const PROBE_ERROR_PREFIX_LEN: usize = 16;

/// Output of one push or flush.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmuxerResult {
    pub remux_result: RemuxerResult,
    pub chunk_meta: ChunkMetadata,
}

impl TransmuxerResult {
    fn empty(chunk_meta: ChunkMetadata) -> Self {
        Self {
            remux_result: RemuxerResult::default(),
            chunk_meta,
        }
    }
}

/// Runs probe, decryption, demuxing and remuxing for a stream of chunks.
///
/// Muxers are picked by probing the first chunk and kept until a
/// discontinuity or track switch brings data their probe rejects.
pub struct Transmuxer {
    config: HlsConfig,
    events: EventSender,
    decrypter: Option<Arc<dyn Decrypter>>,
    transmux_config: TransmuxConfig,
    state: TransmuxState,
    demuxer: Option<DemuxerKind>,
    remuxer: Option<RemuxerKind>,
}

impl Transmuxer {
    pub fn new(config: HlsConfig, events: EventSender, decrypter: Option<Arc<dyn Decrypter>>) -> Self {
        Self {
            config,
            events,
            decrypter,
            transmux_config: TransmuxConfig::default(),
            state: TransmuxState::continuation(0.0, false),
            demuxer: None,
            remuxer: None,
        }
    }

    /// Sets codecs, init segment and duration for the next fragment.
    pub fn configure(&mut self, transmux_config: TransmuxConfig) {
        self.transmux_config = transmux_config;
    }

    pub fn demuxer_name(&self) -> Option<&'static str> {
        self.demuxer.as_ref().map(DemuxerKind::name)
    }

    pub async fn push(
        &mut self,
        mut data: Bytes,
        decrypt: Option<&DecryptData>,
        mut chunk_meta: ChunkMetadata,
        state: TransmuxState,
    ) -> Result<TransmuxerResult> {
        chunk_meta.transmuxing.start = Some(Instant::now());
        self.state = state;
        let key = chunk_meta.key();

        if data.is_empty() {
            log::debug!("[transmuxer] empty chunk {} of fragment {}", chunk_meta.id, key.sn);
            chunk_meta.transmuxing.end = Some(Instant::now());
            return Ok(TransmuxerResult::empty(chunk_meta));
        }

        let mut decrypt = decrypt.cloned();
        if let Some(aes) = decrypt.as_ref().filter(|d| d.encryption_type(&data) == EncryptionMethod::Aes128) {
            data = self.decrypt_segment(data, aes, key).await?;
            decrypt = None;
        }

        let reset_muxers = state.discontinuity || state.track_switch;
        let Some(created) = self.configure_muxers(&data, reset_muxers) else {
            self.report_unknown_format(key, &data);
            chunk_meta.transmuxing.end = Some(Instant::now());
            return Ok(TransmuxerResult::empty(chunk_meta));
        };

        if reset_muxers || created {
            self.reset_init_segment();
        }
        if state.discontinuity || created {
            self.reset_initial_timestamp(self.transmux_config.default_init_pts);
        }
        if !state.contiguous {
            self.reset_contiguity();
        }

        chunk_meta.transmuxing.execute_start = Some(Instant::now());
        let remux_result = self.transmux(data, decrypt.as_ref(), state).await?;
        let now = Instant::now();
        chunk_meta.transmuxing.execute_end = Some(now);
        chunk_meta.transmuxing.end = Some(now);

        Ok(TransmuxerResult {
            remux_result,
            chunk_meta,
        })
    }

    /// Emits whatever the demuxer still buffers for the current fragment.
    pub fn flush(&mut self, mut chunk_meta: ChunkMetadata) -> Result<TransmuxerResult> {
        chunk_meta.transmuxing.start = Some(Instant::now());
        let state = self.state;
        let (Some(demuxer), Some(remuxer)) = (self.demuxer.as_mut(), self.remuxer.as_mut()) else {
            chunk_meta.transmuxing.end = Some(Instant::now());
            return Ok(TransmuxerResult::empty(chunk_meta));
        };

        chunk_meta.transmuxing.execute_start = Some(Instant::now());
        let demuxed = demuxer.flush(state.time_offset)?;
        let remux_result = remuxer.flush(
            demuxed.audio,
            demuxed.video,
            demuxed.id3,
            demuxed.text,
            state.time_offset,
            state.accurate_time_offset,
        );
        let now = Instant::now();
        chunk_meta.transmuxing.execute_end = Some(now);
        chunk_meta.transmuxing.end = Some(now);

        Ok(TransmuxerResult {
            remux_result,
            chunk_meta,
        })
    }

    /// Drops partial data held by the demuxer.
    pub fn abort(&mut self) {
        if let Some(demuxer) = self.demuxer.as_mut() {
            demuxer.reset_contiguity();
        }
    }

    async fn decrypt_segment(&self, data: Bytes, decrypt: &DecryptData, key: FragmentKey) -> Result<Bytes> {
        let outcome = match (self.decrypter.as_ref(), decrypt.key_iv()) {
            (Some(decrypter), Some((aes_key, iv))) => {
                let start = Instant::now();
                decrypter.decrypt(data, aes_key, iv).await.map(|plain| (plain, start))
            }
            (None, _) => Err(HlsError::Decrypt("no decrypter configured for AES-128".into())),
            (_, None) => Err(HlsError::Decrypt("AES-128 key or IV missing".into())),
        };

        match outcome {
            Ok((plain, start)) => {
                events::emit(
                    &self.events,
                    HlsEvent::FragDecrypted {
                        frag: key,
                        start,
                        end: Instant::now(),
                    },
                );
                Ok(plain)
            }
            Err(e) => {
                log::error!("[transmuxer] decrypting fragment {} failed: {}", key.sn, e);
                events::emit(
                    &self.events,
                    HlsEvent::Error(
                        ErrorData::new(ErrorType::MediaError, ErrorDetails::FragDecryptError, true, e.to_string())
                            .with_frag(key),
                    ),
                );
                Err(e)
            }
        }
    }

    /// Keeps the current muxers when they still fit, else probes for new
    /// ones. Returns whether new muxers were created, `None` when nothing
    /// accepts `data`.
    fn configure_muxers(&mut self, data: &[u8], reset_muxers: bool) -> Option<bool> {
        let needs_probe = match &self.demuxer {
            None => true,
            Some(demuxer) => reset_muxers && !demuxer.matches(data),
        };
        if !needs_probe {
            return Some(false);
        }

        let demuxer = DemuxerKind::probe(data)?;
        let remuxer = if demuxer.is_passthrough() {
            RemuxerKind::Passthrough(PassThroughRemuxer::new())
        } else {
            RemuxerKind::Mp4(MP4Remuxer::new(&self.config, self.events.clone()))
        };
        log::info!("[transmuxer] using {} demuxer with {:?}", demuxer.name(), remuxer);
        self.demuxer = Some(demuxer);
        self.remuxer = Some(remuxer);
        Some(true)
    }

    fn report_unknown_format(&self, key: FragmentKey, data: &[u8]) {
        let prefix: String = data
            .iter()
            .take(PROBE_ERROR_PREFIX_LEN)
            .map(|b| format!("{:02x}", b))
            .collect();
        log::error!(
            "[transmuxer] no demuxer matched fragment {} of level {}, first bytes {}",
            key.sn,
            key.level,
            prefix
        );
        events::emit(
            &self.events,
            HlsEvent::Error(
                ErrorData::new(
                    ErrorType::MediaError,
                    ErrorDetails::FragParsingError,
                    true,
                    format!("failed to find demuxer by probing fragment data, first bytes: {}", prefix),
                )
                .with_frag(key),
            ),
        );
    }

    fn reset_init_segment(&mut self) {
        let TransmuxConfig {
            audio_codec,
            video_codec,
            init_segment,
            duration,
            ..
        } = &self.transmux_config;
        if let Some(demuxer) = self.demuxer.as_mut() {
            demuxer.reset_init_segment(audio_codec.as_deref(), video_codec.as_deref(), *duration);
        }
        if let Some(remuxer) = self.remuxer.as_mut() {
            remuxer.reset_init_segment(init_segment.clone(), audio_codec.as_deref(), video_codec.as_deref());
        }
    }

    fn reset_initial_timestamp(&mut self, default_init_pts: Option<i64>) {
        if let Some(demuxer) = self.demuxer.as_mut() {
            demuxer.reset_timestamp(default_init_pts);
        }
        if let Some(remuxer) = self.remuxer.as_mut() {
            remuxer.reset_timestamp(default_init_pts);
        }
    }

    fn reset_contiguity(&mut self) {
        if let Some(demuxer) = self.demuxer.as_mut() {
            demuxer.reset_contiguity();
        }
        if let Some(remuxer) = self.remuxer.as_mut() {
            remuxer.reset_next_timestamp();
        }
    }

    async fn transmux(&mut self, data: Bytes, decrypt: Option<&DecryptData>, state: TransmuxState) -> Result<RemuxerResult> {
        let (Some(demuxer), Some(remuxer)) = (self.demuxer.as_mut(), self.remuxer.as_mut()) else {
            return Ok(RemuxerResult::default());
        };

        let sample_aes = decrypt.filter(|d| d.encryption_type(&data) == EncryptionMethod::SampleAes);
        let demuxed = match sample_aes {
            Some(decrypt) => {
                let decrypter = self
                    .decrypter
                    .as_deref()
                    .ok_or_else(|| HlsError::Decrypt("no decrypter configured for SAMPLE-AES".into()))?;
                demuxer
                    .demux_sample_aes(data, decrypt, decrypter, state.time_offset, state.contiguous)
                    .await?
            }
            None => demuxer.demux(data, state.time_offset, state.contiguous)?,
        };

        Ok(remuxer.remux(
            demuxed.audio,
            demuxed.video,
            demuxed.id3,
            demuxed.text,
            state.time_offset,
            state.contiguous,
            state.accurate_time_offset,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventReceiver;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// XOR "cipher" standing in for AES.
    struct XorDecrypter;

    #[async_trait]
    impl Decrypter for XorDecrypter {
        async fn decrypt(&self, data: Bytes, key: &[u8; 16], _iv: &[u8; 16]) -> Result<Bytes> {
            Ok(data.iter().map(|b| b ^ key[0]).collect())
        }
    }

    const KEY: FragmentKey = FragmentKey { level: 0, sn: 1, cc: 0 };

    fn adts_frames(count: usize) -> Vec<u8> {
        let frame = [0xFF, 0xF1, 0x50, 0x80, 0x01, 0x7F, 0xFC, 1, 2, 3, 4];
        frame.iter().copied().cycle().take(frame.len() * count).collect()
    }

    fn transmuxer() -> (Transmuxer, EventReceiver) {
        let (tx, rx) = events::channel();
        let transmuxer = Transmuxer::new(HlsConfig::default(), tx, Some(Arc::new(XorDecrypter)));
        (transmuxer, rx)
    }

    fn first_chunk() -> (ChunkMetadata, TransmuxState) {
        (ChunkMetadata::new(KEY, 0, 0), TransmuxState::for_fragment(None, KEY, 0.0, true))
    }

    #[test]
    fn test_unknown_format_is_fatal() {
        let (mut transmuxer, mut rx) = transmuxer();
        let (meta, state) = first_chunk();
        let result = tokio_test::block_on(transmuxer.push(Bytes::from_static(b"#EXTM3U\nnot media"), None, meta, state))
            .unwrap();

        assert!(result.remux_result.is_empty());
        match rx.try_recv() {
            Ok(HlsEvent::Error(error)) => {
                assert_eq!(error.details, ErrorDetails::FragParsingError);
                assert!(error.fatal);
                assert_eq!(error.frag, Some(KEY));
                assert!(error.reason.ends_with("234558544d33550a6e6f74206d656469"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_aes128_segment_decrypted_then_demuxed() {
        let (mut transmuxer, mut rx) = transmuxer();
        let key = [0x5A; 16];
        let encrypted: Bytes = adts_frames(8).iter().map(|b| b ^ key[0]).collect();
        let decrypt = DecryptData::new(EncryptionMethod::Aes128, key, [0; 16]);

        let (meta, state) = first_chunk();
        let result = tokio_test::block_on(transmuxer.push(encrypted, Some(&decrypt), meta, state)).unwrap();

        assert!(matches!(rx.try_recv(), Ok(HlsEvent::FragDecrypted { frag, .. }) if frag == KEY));
        assert_eq!(transmuxer.demuxer_name(), Some("aac"));
        let init = result.remux_result.init_segment.expect("init segment");
        assert_eq!(init.tracks.audio.map(|t| t.codec), Some("mp4a.40.2".to_string()));
        assert!(result.remux_result.audio.is_some());
        assert!(result.chunk_meta.transmuxing.end.is_some());
    }

    #[test]
    fn test_missing_decrypter_reports_error() {
        let (tx, mut rx) = events::channel();
        let mut transmuxer = Transmuxer::new(HlsConfig::default(), tx, None);
        let decrypt = DecryptData::new(EncryptionMethod::Aes128, [1; 16], [0; 16]);

        let (meta, state) = first_chunk();
        let result = tokio_test::block_on(transmuxer.push(Bytes::from(adts_frames(2)), Some(&decrypt), meta, state));
        assert!(matches!(result, Err(HlsError::Decrypt(_))));
        assert!(matches!(
            rx.try_recv(),
            Ok(HlsEvent::Error(ErrorData { details: ErrorDetails::FragDecryptError, .. }))
        ));
    }

    #[test]
    fn test_flush_without_muxers_is_empty() {
        let (mut transmuxer, _rx) = transmuxer();
        let result = transmuxer.flush(ChunkMetadata::new(KEY, 1, 0)).unwrap();
        assert!(result.remux_result.is_empty());
        assert_eq!(result.chunk_meta.id, 1);
    }

    #[test]
    fn test_muxers_kept_across_contiguous_fragments() {
        let (mut transmuxer, _rx) = transmuxer();
        let (meta, state) = first_chunk();
        tokio_test::block_on(transmuxer.push(Bytes::from(adts_frames(4)), None, meta, state)).unwrap();

        let next = FragmentKey { sn: 2, ..KEY };
        let state = TransmuxState::for_fragment(Some(KEY), next, 4.0, true);
        let result = tokio_test::block_on(transmuxer.push(
            Bytes::from(adts_frames(4)),
            None,
            ChunkMetadata::new(next, 0, 44),
            state,
        ))
        .unwrap();
        // same muxers: no second init segment
        assert!(result.remux_result.init_segment.is_none());
        assert!(result.remux_result.audio.is_some());
    }
}
