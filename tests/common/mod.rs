//! Segment fixtures and event collection shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;

use hlsio::events::{EventReceiver, HlsEvent};
use hlsio::format::ts::{PID_PAT, STREAM_TYPE_AAC, STREAM_TYPE_H264, TS_PACKET_SIZE};
use hlsio::remux::RemuxedTrack;
use hlsio::utils::Crc32Mpeg2;

pub const PMT_PID: u16 = 0x1000;
pub const VIDEO_PID: u16 = 0x100;
pub const AUDIO_PID: u16 = 0x101;

/// Baseline 640x480, `avc1.42e01e`.
const SPS: [u8; 9] = [0x67, 0x42, 0xE0, 0x1E, 0xF4, 0x05, 0x01, 0xEC, 0x80];
const PPS: [u8; 4] = [0x68, 0xCE, 0x38, 0x80];
const AUD: [u8; 2] = [0x09, 0xF0];

/// Frame spacing at 30 fps, 90 kHz ticks.
pub const VIDEO_TICKS: i64 = 3000;
/// One 1024-sample AAC frame at 48 kHz.
pub const AUDIO_TICKS: i64 = 1920;

#[derive(Default)]
struct Packetizer {
    out: Vec<u8>,
    counters: HashMap<u16, u8>,
}

impl Packetizer {
    fn packets(&mut self, pid: u16, payload: &[u8]) {
        let room = TS_PACKET_SIZE - 4;
        let mut first = true;
        for piece in payload.chunks(room) {
            let counter = self.counters.entry(pid).or_insert(0);
            let cc = *counter;
            *counter = (cc + 1) & 0x0F;

            let mut packet = vec![
                0x47,
                (if first { 0x40 } else { 0x00 }) | ((pid >> 8) as u8 & 0x1F),
                pid as u8,
                0x10 | cc,
            ];
            if piece.len() < room {
                packet[3] |= 0x20;
                let field_length = room - piece.len() - 1;
                packet.push(field_length as u8);
                if field_length > 0 {
                    packet.push(0x00);
                    packet.resize(packet.len() + field_length - 1, 0xFF);
                }
            }
            packet.extend_from_slice(piece);
            self.out.extend(packet);
            first = false;
        }
    }

    fn section(&mut self, pid: u16, mut section: Vec<u8>) {
        let crc = Crc32Mpeg2::new().calculate(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        let mut payload = vec![0x00];
        payload.extend(section);
        self.packets(pid, &payload);
    }
}

fn pes(stream_id: u8, pts: i64, es: &[u8], bounded: bool) -> Vec<u8> {
    let mut header = vec![0x80, 0x80, 5];
    header.extend_from_slice(&[
        0x21 | ((pts >> 29) & 0x0E) as u8,
        (pts >> 22) as u8,
        (((pts >> 14) & 0xFE) | 1) as u8,
        (pts >> 7) as u8,
        (((pts << 1) & 0xFE) | 1) as u8,
    ]);
    let length = if bounded { header.len() + es.len() } else { 0 };
    let mut out = vec![0x00, 0x00, 0x01, stream_id, (length >> 8) as u8, length as u8];
    out.extend(header);
    out.extend_from_slice(es);
    out
}

fn adts_frame(fill: u8) -> Vec<u8> {
    let length = 24 + 7;
    let mut frame = vec![
        0xFF,
        0xF1,
        0x4C,
        0x80 | ((length >> 11) & 0x03) as u8,
        ((length >> 3) & 0xFF) as u8,
        (((length & 0x07) << 5) as u8) | 0x1F,
        0xFC,
    ];
    frame.resize(length, fill);
    frame
}

fn annexb(units: &[&[u8]]) -> Vec<u8> {
    let mut es = Vec::new();
    for unit in units {
        es.extend_from_slice(&[0, 0, 0, 1]);
        es.extend_from_slice(unit);
    }
    es
}

/// PAT and PMT announcing one H.264 and one AAC stream.
fn program() -> Packetizer {
    let mut ts = Packetizer::default();
    ts.section(
        PID_PAT,
        vec![
            0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00, 0x00, 0x01,
            0xE0 | (PMT_PID >> 8) as u8,
            PMT_PID as u8,
        ],
    );
    let mut pmt = vec![
        0x02, 0xB0, 0x17, 0x00, 0x01, 0xC1, 0x00, 0x00,
        0xE0 | (VIDEO_PID >> 8) as u8,
        VIDEO_PID as u8,
        0xF0, 0x00,
    ];
    for (stream_type, pid) in [(STREAM_TYPE_H264, VIDEO_PID), (STREAM_TYPE_AAC, AUDIO_PID)] {
        pmt.extend_from_slice(&[stream_type, 0xE0 | (pid >> 8) as u8, pid as u8, 0xF0, 0x00]);
    }
    ts.section(PMT_PID, pmt);
    ts
}

/// Video PES of frame `i`; the first one is an IDR carrying SPS and PPS.
fn video_pes(base: i64, i: usize) -> Vec<u8> {
    let mut slice = if i == 0 { vec![0x65, 0x88, 0x84] } else { vec![0x41, 0x9A, 0x02] };
    slice.resize(48, i as u8 + 1);
    let es = if i == 0 {
        annexb(&[&AUD, &SPS, &PPS, &slice])
    } else {
        annexb(&[&AUD, &slice])
    };
    pes(0xE0, base + i as i64 * VIDEO_TICKS, &es, false)
}

/// A muxed H.264 + AAC transport stream segment of `frames` video frames
/// starting at `base` ticks, one ADTS frame per video frame.
pub fn ts_segment(base: i64, frames: usize) -> Vec<u8> {
    let mut ts = program();
    for i in 0..frames {
        ts.packets(VIDEO_PID, &video_pes(base, i));
        ts.packets(
            AUDIO_PID,
            &pes(0xC0, base + i as i64 * AUDIO_TICKS, &adts_frame(i as u8 + 1), true),
        );
    }
    ts.out
}

/// Like [`ts_segment`], but audio is muxed late: one PES after every
/// `frames_per_pes` video frames, carrying that many ADTS frames.
pub fn ts_segment_sparse_audio(base: i64, frames: usize, frames_per_pes: usize) -> Vec<u8> {
    let mut ts = program();
    let mut audio_written = 0;
    for i in 0..frames {
        ts.packets(VIDEO_PID, &video_pes(base, i));
        if (i + 1) % frames_per_pes == 0 || i + 1 == frames {
            let es: Vec<u8> = (audio_written..=i).flat_map(|j| adts_frame(j as u8 + 1)).collect();
            ts.packets(AUDIO_PID, &pes(0xC0, base + audio_written as i64 * AUDIO_TICKS, &es, true));
            audio_written = i + 1;
        }
    }
    ts.out
}

/// Drains everything emitted so far.
pub fn drain(rx: &mut EventReceiver) -> Vec<HlsEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn names(events: &[HlsEvent]) -> Vec<&'static str> {
    events.iter().map(HlsEvent::name).collect()
}

/// Remuxed media payloads, in emission order.
pub fn remuxed(events: &[HlsEvent]) -> Vec<&RemuxedTrack> {
    events
        .iter()
        .filter_map(|event| match event {
            HlsEvent::FragParsingData { data, .. } => Some(data),
            _ => None,
        })
        .collect()
}
