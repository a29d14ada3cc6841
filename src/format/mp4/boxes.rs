//! ISO BMFF box walking for fragmented MP4 input.
//!
//! Offsets returned here are byte ranges into the slice that was searched,
//! so callers can patch fields such as `tfdt` in place.

use std::ops::Range;

pub type FourCC = [u8; 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: FourCC,
    pub offset: usize,
    /// Declared size including the header; `None` for a box running to the end of the file.
    pub size: Option<usize>,
    pub header_size: usize,
}

impl BoxHeader {
    /// Reads the header at `offset`, handling 64-bit `largesize` boxes.
    pub fn parse(data: &[u8], offset: usize) -> Option<Self> {
        let size = read_u32(data, offset)?;
        let box_type: FourCC = data.get(offset + 4..offset + 8)?.try_into().ok()?;
        let (size, header_size) = match size {
            0 => (None, 8),
            1 => (Some(read_u64(data, offset + 8)? as usize), 16),
            n => (Some(n as usize), 8),
        };
        if size.map_or(false, |s| s < header_size) {
            return None;
        }
        Some(Self {
            box_type,
            offset,
            size,
            header_size,
        })
    }

    /// End of the box within `data`, if it is complete there.
    pub fn end_within(&self, data: &[u8]) -> Option<usize> {
        let end = self.offset.checked_add(self.size?)?;
        (end <= data.len()).then_some(end)
    }

    pub fn content_range(&self, data: &[u8]) -> Range<usize> {
        let end = self
            .size
            .map_or(data.len(), |s| (self.offset + s).min(data.len()));
        (self.offset + self.header_size).min(end)..end
    }
}

pub fn read_u32(data: &[u8], pos: usize) -> Option<u32> {
    Some(u32::from_be_bytes(data.get(pos..pos + 4)?.try_into().ok()?))
}

pub fn read_u64(data: &[u8], pos: usize) -> Option<u64> {
    Some(u64::from_be_bytes(data.get(pos..pos + 8)?.try_into().ok()?))
}

/// Length of the run of complete top-level boxes at the start of `data`.
pub fn complete_boxes_len(data: &[u8]) -> usize {
    let mut offset = 0;
    while let Some(end) = BoxHeader::parse(data, offset).and_then(|h| h.end_within(data)) {
        offset = end;
    }
    offset
}

/// Content ranges of every box reached by `path`, searching children of
/// each match for the next path element.
///
/// ```
/// use hlsio::format::mp4::boxes::find_box;
///
/// let mut data = vec![0, 0, 0, 16, b'm', b'o', b'o', b'f'];
/// data.extend_from_slice(&[0, 0, 0, 8, b'm', b'f', b'h', b'd']);
/// assert_eq!(find_box(&data, &[b"moof", b"mfhd"]), vec![16..16]);
/// ```
pub fn find_box(data: &[u8], path: &[&FourCC]) -> Vec<Range<usize>> {
    let mut results = Vec::new();
    find_in(data, 0..data.len(), path, &mut results);
    results
}

fn find_in(data: &[u8], range: Range<usize>, path: &[&FourCC], results: &mut Vec<Range<usize>>) {
    let Some((kind, rest)) = path.split_first() else {
        return;
    };
    let scope = &data[..range.end];
    let mut offset = range.start;
    while let Some(header) = BoxHeader::parse(scope, offset) {
        let content = header.content_range(scope);
        if &header.box_type == *kind {
            if rest.is_empty() {
                results.push(content.clone());
            } else {
                find_in(data, content.clone(), rest, results);
            }
        }
        if content.end <= offset {
            break;
        }
        offset = content.end;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Audio,
    Video,
}

/// What the passthrough path needs to know about one `trak`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitTrackInfo {
    pub id: u32,
    pub timescale: u32,
    pub kind: HandlerKind,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitData {
    pub tracks: Vec<InitTrackInfo>,
}

impl InitData {
    pub fn has_audio(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == HandlerKind::Audio)
    }

    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == HandlerKind::Video)
    }

    pub fn timescale(&self, track_id: u32) -> Option<u32> {
        self.tracks.iter().find(|t| t.id == track_id).map(|t| t.timescale)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Reads track id, timescale and handler of each `moov/trak`. Tracks other
/// than audio and video are skipped.
pub fn parse_init_segment(data: &[u8]) -> InitData {
    let mut tracks = Vec::new();
    for trak in find_box(data, &[b"moov", b"trak"]) {
        let trak = &data[trak];
        let id = find_box(trak, &[b"tkhd"]).first().and_then(|r| {
            let tkhd = &trak[r.clone()];
            let pos = if tkhd.first() == Some(&1) { 20 } else { 12 };
            read_u32(tkhd, pos)
        });
        let timescale = find_box(trak, &[b"mdia", b"mdhd"]).first().and_then(|r| {
            let mdhd = &trak[r.clone()];
            let pos = if mdhd.first() == Some(&1) { 20 } else { 12 };
            read_u32(mdhd, pos)
        });
        let kind = find_box(trak, &[b"mdia", b"hdlr"])
            .first()
            .and_then(|r| trak.get(r.start + 8..r.start + 12))
            .and_then(|handler| match handler {
                b"soun" => Some(HandlerKind::Audio),
                b"vide" => Some(HandlerKind::Video),
                _ => None,
            });

        if let (Some(id), Some(timescale), Some(kind)) = (id, timescale, kind) {
            tracks.push(InitTrackInfo { id, timescale, kind });
        }
    }
    InitData { tracks }
}

fn traf_track_id(data: &[u8], traf: &Range<usize>) -> Option<u32> {
    let traf = &data[traf.clone()];
    let tfhd = find_box(traf, &[b"tfhd"]).into_iter().next()?;
    read_u32(traf, tfhd.start + 4)
}

/// Absolute range of the `tfdt` content inside `traf`.
fn tfdt_range(data: &[u8], traf: &Range<usize>) -> Option<Range<usize>> {
    let inner = find_box(&data[traf.clone()], &[b"tfdt"]).into_iter().next()?;
    Some(traf.start + inner.start..traf.start + inner.end)
}

fn read_base_media_decode_time(tfdt: &[u8]) -> Option<u64> {
    match tfdt.first()? {
        1 => read_u64(tfdt, 4),
        _ => read_u32(tfdt, 4).map(u64::from),
    }
}

/// Earliest `baseMediaDecodeTime` of the fragment, in seconds.
pub fn start_dts(init: &InitData, fragment: &[u8]) -> Option<f64> {
    find_box(fragment, &[b"moof", b"traf"])
        .iter()
        .filter_map(|traf| {
            let timescale = init.timescale(traf_track_id(fragment, traf)?)?;
            let tfdt = tfdt_range(fragment, traf)?;
            let base = read_base_media_decode_time(&fragment[tfdt])?;
            Some(base as f64 / timescale as f64)
        })
        .reduce(f64::min)
}

/// Shifts every `tfdt` back by `init_pts` (90 kHz), clamping at zero.
pub fn offset_start_dts(init: &InitData, fragment: &mut [u8], init_pts: i64) {
    for traf in find_box(fragment, &[b"moof", b"traf"]) {
        let Some(timescale) = traf_track_id(fragment, &traf).and_then(|id| init.timescale(id)) else {
            continue;
        };
        let Some(tfdt) = tfdt_range(fragment, &traf) else {
            continue;
        };
        let Some(base) = read_base_media_decode_time(&fragment[tfdt.clone()]) else {
            continue;
        };
        let offset = init_pts as i128 * timescale as i128 / 90_000;
        let shifted = (base as i128 - offset).max(0);

        let field = &mut fragment[tfdt];
        if field[0] == 1 {
            field[4..12].copy_from_slice(&(shifted as u64).to_be_bytes());
        } else {
            field[4..8].copy_from_slice(&(shifted.min(u32::MAX as i128) as u32).to_be_bytes());
        }
    }
}

const TFHD_BASE_DATA_OFFSET: u32 = 0x01;
const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x02;
const TFHD_DEFAULT_SAMPLE_DURATION: u32 = 0x08;

const TRUN_DATA_OFFSET: u32 = 0x01;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x04;
const TRUN_SAMPLE_DURATION: u32 = 0x100;
const TRUN_SAMPLE_SIZE: u32 = 0x200;
const TRUN_SAMPLE_FLAGS: u32 = 0x400;
const TRUN_SAMPLE_CTS: u32 = 0x800;

fn default_sample_duration(tfhd: &[u8]) -> Option<u32> {
    let flags = read_u32(tfhd, 0)? & 0x00ff_ffff;
    if flags & TFHD_DEFAULT_SAMPLE_DURATION == 0 {
        return None;
    }
    let mut pos = 8;
    if flags & TFHD_BASE_DATA_OFFSET != 0 {
        pos += 8;
    }
    if flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
        pos += 4;
    }
    read_u32(tfhd, pos)
}

fn trun_duration(trun: &[u8], default_duration: u32) -> u64 {
    let (Some(flags), Some(count)) = (read_u32(trun, 0), read_u32(trun, 4)) else {
        return 0;
    };
    let flags = flags & 0x00ff_ffff;
    if flags & TRUN_SAMPLE_DURATION == 0 {
        return default_duration as u64 * count as u64;
    }

    let mut pos = 8;
    if flags & TRUN_DATA_OFFSET != 0 {
        pos += 4;
    }
    if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
        pos += 4;
    }
    let stride = [TRUN_SAMPLE_DURATION, TRUN_SAMPLE_SIZE, TRUN_SAMPLE_FLAGS, TRUN_SAMPLE_CTS]
        .iter()
        .filter(|&&f| flags & f != 0)
        .count()
        * 4;

    (0..count as usize)
        .map_while(|i| read_u32(trun, pos + i * stride))
        .map(u64::from)
        .sum()
}

/// Longest track run of the fragment, in seconds.
pub fn duration(init: &InitData, fragment: &[u8]) -> f64 {
    find_box(fragment, &[b"moof", b"traf"])
        .iter()
        .filter_map(|traf| {
            let timescale = init.timescale(traf_track_id(fragment, traf)?)?;
            let traf = &fragment[traf.clone()];
            let default = find_box(traf, &[b"tfhd"])
                .first()
                .and_then(|r| default_sample_duration(&traf[r.clone()]))
                .unwrap_or(0);
            let ticks: u64 = find_box(traf, &[b"trun"])
                .into_iter()
                .map(|r| trun_duration(&traf[r], default))
                .sum();
            Some(ticks as f64 / timescale as f64)
        })
        .fold(0.0, f64::max)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn mp4_box(kind: &FourCC, content: &[u8]) -> Vec<u8> {
        let mut out = ((content.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(content);
        out
    }

    fn full_box(kind: &FourCC, version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
        let mut content = vec![version];
        content.extend_from_slice(&flags.to_be_bytes()[1..]);
        content.extend_from_slice(body);
        mp4_box(kind, &content)
    }

    fn trak(id: u32, timescale: u32, handler: &FourCC) -> Vec<u8> {
        let mut tkhd = vec![0u8; 8];
        tkhd.extend_from_slice(&id.to_be_bytes());
        tkhd.extend_from_slice(&[0u8; 8]);
        let mut mdhd = vec![0u8; 8];
        mdhd.extend_from_slice(&timescale.to_be_bytes());
        mdhd.extend_from_slice(&[0u8; 8]);
        let mut hdlr = vec![0u8; 4];
        hdlr.extend_from_slice(handler);
        hdlr.extend_from_slice(&[0u8; 13]);

        let mdia = [full_box(b"mdhd", 0, 0, &mdhd), full_box(b"hdlr", 0, 0, &hdlr)].concat();
        mp4_box(b"trak", &[full_box(b"tkhd", 0, 3, &tkhd), mp4_box(b"mdia", &mdia)].concat())
    }

    /// `ftyp` + `moov` with the given `(id, timescale, handler)` tracks.
    pub(crate) fn init_segment(tracks: &[(u32, u32, &FourCC)]) -> Vec<u8> {
        let traks: Vec<u8> = tracks.iter().flat_map(|&(id, ts, h)| trak(id, ts, h)).collect();
        [mp4_box(b"ftyp", b"isom\0\0\0\x01isomiso6"), mp4_box(b"moov", &traks)].concat()
    }

    /// `moof` + `mdat` with one `traf` per `(id, base_decode_time, sample_durations)`.
    pub(crate) fn media_segment(trafs: &[(u32, u64, &[u32])]) -> Vec<u8> {
        let mut moof = full_box(b"mfhd", 0, 0, &1u32.to_be_bytes());
        for &(id, base, durations) in trafs {
            let tfhd = full_box(b"tfhd", 0, 0x02_0000, &id.to_be_bytes());
            let tfdt = full_box(b"tfdt", 1, 0, &base.to_be_bytes());
            let mut trun = (durations.len() as u32).to_be_bytes().to_vec();
            for d in durations {
                trun.extend_from_slice(&d.to_be_bytes());
                trun.extend_from_slice(&4u32.to_be_bytes());
            }
            let trun = full_box(b"trun", 0, TRUN_SAMPLE_DURATION | TRUN_SAMPLE_SIZE, &trun);
            moof.extend(mp4_box(b"traf", &[tfhd, tfdt, trun].concat()));
        }
        [mp4_box(b"moof", &moof), mp4_box(b"mdat", &[0u8; 16])].concat()
    }

    #[test]
    fn test_complete_boxes_len() {
        let data = [mp4_box(b"styp", b"msdh"), mp4_box(b"moof", &[0u8; 20])].concat();
        assert_eq!(complete_boxes_len(&data), data.len());
        assert_eq!(complete_boxes_len(&data[..data.len() - 1]), 12);
        assert_eq!(complete_boxes_len(&data[..5]), 0);

        let mut large = vec![0, 0, 0, 1, b'm', b'd', b'a', b't'];
        large.extend_from_slice(&20u64.to_be_bytes());
        large.extend_from_slice(&[0xAA; 4]);
        assert_eq!(complete_boxes_len(&large), 20);
    }

    #[test]
    fn test_parse_init_segment() {
        let init = parse_init_segment(&init_segment(&[(1, 90_000, b"vide"), (2, 48_000, b"soun"), (3, 1000, b"text")]));
        assert_eq!(
            init.tracks,
            vec![
                InitTrackInfo { id: 1, timescale: 90_000, kind: HandlerKind::Video },
                InitTrackInfo { id: 2, timescale: 48_000, kind: HandlerKind::Audio },
            ]
        );
        assert!(init.has_audio() && init.has_video());
        assert!(parse_init_segment(&mp4_box(b"moof", &[])).is_empty());
    }

    #[test]
    fn test_fragment_timing() {
        let init = parse_init_segment(&init_segment(&[(1, 90_000, b"vide"), (2, 48_000, b"soun")]));
        let mut fragment = media_segment(&[(1, 900_000, &[3000, 3000, 3000]), (2, 470_400, &[1024; 4])]);

        assert_eq!(start_dts(&init, &fragment), Some(9.8));
        assert_eq!(duration(&init, &fragment), 0.1);

        offset_start_dts(&init, &mut fragment, 882_000);
        assert_eq!(start_dts(&init, &fragment), Some(0.0));
        let video_tfdt = &find_box(&fragment, &[b"moof", b"traf", b"tfdt"])[0];
        assert_eq!(read_u64(&fragment, video_tfdt.start + 4), Some(18_000));
    }

    #[test]
    fn test_default_sample_duration() {
        let init = parse_init_segment(&init_segment(&[(1, 1000, b"vide")]));
        let mut tfhd_body = 1u32.to_be_bytes().to_vec();
        tfhd_body.extend_from_slice(&40u32.to_be_bytes());
        let tfhd = full_box(b"tfhd", 0, TFHD_DEFAULT_SAMPLE_DURATION, &tfhd_body);
        let trun = full_box(b"trun", 0, 0, &5u32.to_be_bytes());
        let traf = mp4_box(b"traf", &[tfhd, trun].concat());
        let fragment = mp4_box(b"moof", &traf);
        assert_eq!(duration(&init, &fragment), 0.2);
    }
}
