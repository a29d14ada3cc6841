use bytes::{Bytes, BytesMut};

use super::types::*;

/// A reassembled PES packet: the elementary stream payload and its timing.
#[derive(Debug, Clone, PartialEq)]
pub struct PESPacket {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
}

/// TS payloads of one PID collected since the last payload unit start.
#[derive(Debug, Default)]
pub struct PESAssembler {
    chunks: Vec<Bytes>,
    size: usize,
}

impl PESAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, payload: Bytes) {
        self.size += payload.len();
        self.chunks.push(payload);
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Parses what was collected and starts over.
    pub fn take(&mut self) -> Option<PESPacket> {
        let chunks = std::mem::take(&mut self.chunks);
        let size = std::mem::replace(&mut self.size, 0);
        parse_pes(chunks, size)
    }

    /// Parses what was collected; on failure the data stays buffered in case
    /// the rest of the packet arrives with the next fragment.
    pub fn take_complete(&mut self) -> Option<PESPacket> {
        let pes = parse_pes(self.chunks.clone(), self.size)?;
        self.chunks.clear();
        self.size = 0;
        Some(pes)
    }
}

fn join(chunks: Vec<Bytes>, size: usize) -> Bytes {
    match chunks.len() {
        0 => Bytes::new(),
        1 => chunks.into_iter().next().unwrap_or_default(),
        _ => {
            let mut data = BytesMut::with_capacity(size);
            for chunk in chunks {
                data.extend_from_slice(&chunk);
            }
            data.freeze()
        }
    }
}

/// Parses a PES packet from its TS payload chunks.
///
/// Returns `None` for data that does not start with a PES start code, for a
/// packet shorter than its declared length, and for a header with no payload.
pub fn parse_pes(chunks: Vec<Bytes>, size: usize) -> Option<PESPacket> {
    if size == 0 {
        return None;
    }
    let data = join(chunks, size);
    if data.len() < PES_FIXED_HEADER_SIZE {
        return None;
    }

    let prefix = ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | data[2] as u32;
    if prefix != PES_START_CODE {
        return None;
    }

    let pes_len = ((data[4] as usize) << 8) | data[5] as usize;
    if pes_len > 0 && pes_len > data.len() - 6 {
        return None;
    }

    let flags = data[7];
    let mut pts = None;
    let mut dts = None;
    if flags & 0xC0 != 0 && data.len() >= 14 {
        let mut pes_pts = read_timestamp(&data[9..14]);
        if flags & 0x40 != 0 && data.len() >= 19 {
            let pes_dts = read_timestamp(&data[14..19]);
            if pes_pts - pes_dts > MAX_PTS_DTS_GAP {
                log::warn!(
                    "[tsdemuxer] PTS {} is {}s after DTS {}, using DTS",
                    pes_pts,
                    (pes_pts - pes_dts) / 90_000,
                    pes_dts
                );
                pes_pts = pes_dts;
            }
            dts = Some(pes_dts);
        } else {
            dts = Some(pes_pts);
        }
        pts = Some(pes_pts);
    }

    let payload_start = data[8] as usize + PES_FIXED_HEADER_SIZE;
    if data.len() <= payload_start {
        return None;
    }

    Some(PESPacket {
        data: data.slice(payload_start..),
        pts,
        dts,
    })
}
