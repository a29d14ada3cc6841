//! Fragmented MP4 box writer.
//!
//! Init segments carry a single track each, since every elementary stream
//! goes to its own sink:
//!
//! ```text
//! ftyp
//! moov
//!   mvhd
//!   trak (tkhd, mdia/{mdhd, hdlr, minf/{vmhd|smhd, dinf, stbl/stsd}})
//!   mvex/trex
//! ```
//!
//! Media fragments are `moof` (`mfhd`, `traf/{tfhd, tfdt, trun}`) followed
//! by an `mdat` the remuxer fills itself.

use bytes::{BufMut, Bytes, BytesMut};

use crate::av::{AudioTrack, VideoTrack};

pub const VIDEO_TRACK_ID: u32 = 1;
pub const AUDIO_TRACK_ID: u32 = 2;

/// Size of an `mdat` header; the remuxer reserves it in front of the payload.
pub const MDAT_HEADER_SIZE: usize = 8;

const MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// One entry of a `trun`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mp4Sample {
    pub size: u32,
    pub duration: u32,
    /// Composition offset, PTS minus DTS in track ticks.
    pub cts: u32,
    pub key: bool,
}

impl Mp4Sample {
    pub fn new(key: bool, duration: u32, size: u32, cts: u32) -> Self {
        Self {
            size,
            duration,
            cts,
            key,
        }
    }

    /// `sample_depends_on` = 2 for sync samples, else 1 with the non-sync bit.
    fn flags(&self) -> u32 {
        if self.key {
            0x0200_0000
        } else {
            0x0101_0000
        }
    }
}

fn write_box(buf: &mut BytesMut, kind: &[u8; 4], body: impl FnOnce(&mut BytesMut)) {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(kind);
    body(buf);
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn write_full_box(buf: &mut BytesMut, kind: &[u8; 4], version: u8, flags: u32, body: impl FnOnce(&mut BytesMut)) {
    write_box(buf, kind, |buf| {
        buf.put_u32((version as u32) << 24 | (flags & 0x00ff_ffff));
        body(buf);
    });
}

#[derive(Clone, Copy)]
enum SampleEntry<'a> {
    Audio(&'a AudioTrack),
    Video(&'a VideoTrack),
}

struct TrackHeader<'a> {
    id: u32,
    timescale: u32,
    duration: u32,
    entry: SampleEntry<'a>,
}

pub fn video_init_segment(track: &VideoTrack, timescale: u32) -> Bytes {
    init_segment(TrackHeader {
        id: VIDEO_TRACK_ID,
        timescale,
        duration: (track.duration * timescale as f64) as u32,
        entry: SampleEntry::Video(track),
    })
}

pub fn audio_init_segment(track: &AudioTrack, timescale: u32) -> Bytes {
    init_segment(TrackHeader {
        id: AUDIO_TRACK_ID,
        timescale,
        duration: (track.duration * timescale as f64) as u32,
        entry: SampleEntry::Audio(track),
    })
}

fn init_segment(track: TrackHeader<'_>) -> Bytes {
    let mut buf = BytesMut::with_capacity(1024);
    write_box(&mut buf, b"ftyp", |buf| {
        buf.put_slice(b"isom");
        buf.put_u32(1);
        buf.put_slice(b"isom");
        buf.put_slice(b"avc1");
    });
    write_box(&mut buf, b"moov", |buf| {
        write_mvhd(buf, &track);
        write_trak(buf, &track);
        write_box(buf, b"mvex", |buf| {
            write_full_box(buf, b"trex", 0, 0, |buf| {
                buf.put_u32(track.id);
                buf.put_u32(1); // default_sample_description_index
                buf.put_u32(0);
                buf.put_u32(0);
                buf.put_u32(0x0001_0001);
            });
        });
    });
    buf.freeze()
}

fn write_mvhd(buf: &mut BytesMut, track: &TrackHeader<'_>) {
    write_full_box(buf, b"mvhd", 0, 0, |buf| {
        buf.put_u32(0); // creation time
        buf.put_u32(0); // modification time
        buf.put_u32(track.timescale);
        buf.put_u32(track.duration);
        buf.put_u32(0x0001_0000); // rate 1.0
        buf.put_u16(0x0100); // volume 1.0
        buf.put_slice(&[0; 10]);
        MATRIX.iter().for_each(|m| buf.put_u32(*m));
        buf.put_slice(&[0; 24]);
        buf.put_u32(0xffff_ffff); // next_track_ID
    });
}

fn write_trak(buf: &mut BytesMut, track: &TrackHeader<'_>) {
    let (width, height, volume) = match track.entry {
        SampleEntry::Video(v) => (v.width, v.height, 0),
        SampleEntry::Audio(_) => (0, 0, 0x0100),
    };

    write_box(buf, b"trak", |buf| {
        write_full_box(buf, b"tkhd", 0, 0x07, |buf| {
            buf.put_u32(0);
            buf.put_u32(0);
            buf.put_u32(track.id);
            buf.put_u32(0);
            buf.put_u32(track.duration);
            buf.put_slice(&[0; 8]);
            buf.put_u16(0); // layer
            buf.put_u16(0); // alternate_group
            buf.put_u16(volume);
            buf.put_u16(0);
            MATRIX.iter().for_each(|m| buf.put_u32(*m));
            buf.put_u32(width << 16);
            buf.put_u32(height << 16);
        });
        write_box(buf, b"mdia", |buf| {
            write_full_box(buf, b"mdhd", 0, 0, |buf| {
                buf.put_u32(0);
                buf.put_u32(0);
                buf.put_u32(track.timescale);
                buf.put_u32(track.duration);
                buf.put_u16(0x55c4); // 'und'
                buf.put_u16(0);
            });
            let (handler, name): (&[u8; 4], &[u8]) = match track.entry {
                SampleEntry::Video(_) => (b"vide", b"VideoHandler\0"),
                SampleEntry::Audio(_) => (b"soun", b"SoundHandler\0"),
            };
            write_full_box(buf, b"hdlr", 0, 0, |buf| {
                buf.put_u32(0);
                buf.put_slice(handler);
                buf.put_slice(&[0; 12]);
                buf.put_slice(name);
            });
            write_box(buf, b"minf", |buf| {
                match track.entry {
                    SampleEntry::Video(_) => write_full_box(buf, b"vmhd", 0, 1, |buf| buf.put_slice(&[0; 8])),
                    SampleEntry::Audio(_) => write_full_box(buf, b"smhd", 0, 0, |buf| buf.put_u32(0)),
                }
                write_box(buf, b"dinf", |buf| {
                    write_full_box(buf, b"dref", 0, 0, |buf| {
                        buf.put_u32(1);
                        write_full_box(buf, b"url ", 0, 1, |_| {});
                    });
                });
                write_stbl(buf, &track.entry);
            });
        });
    });
}

fn write_stbl(buf: &mut BytesMut, entry: &SampleEntry<'_>) {
    write_box(buf, b"stbl", |buf| {
        write_full_box(buf, b"stsd", 0, 0, |buf| {
            buf.put_u32(1);
            match entry {
                SampleEntry::Video(track) => write_avc1(buf, track),
                SampleEntry::Audio(track) if track.is_aac => write_mp4a(buf, track),
                SampleEntry::Audio(track) => write_audio_entry(buf, b".mp3", track, |_| {}),
            }
        });
        write_full_box(buf, b"stts", 0, 0, |buf| buf.put_u32(0));
        write_full_box(buf, b"stsc", 0, 0, |buf| buf.put_u32(0));
        write_full_box(buf, b"stsz", 0, 0, |buf| {
            buf.put_u32(0);
            buf.put_u32(0);
        });
        write_full_box(buf, b"stco", 0, 0, |buf| buf.put_u32(0));
    });
}

fn write_avc1(buf: &mut BytesMut, track: &VideoTrack) {
    let sps = track.sps.clone().unwrap_or_default();
    let pps = track.pps.clone().unwrap_or_default();

    write_box(buf, b"avc1", |buf| {
        buf.put_slice(&[0; 6]);
        buf.put_u16(1); // data_reference_index
        buf.put_slice(&[0; 16]);
        buf.put_u16(track.width as u16);
        buf.put_u16(track.height as u16);
        buf.put_u32(0x0048_0000); // 72 dpi
        buf.put_u32(0x0048_0000);
        buf.put_u32(0);
        buf.put_u16(1); // frame_count
        let mut compressor = [0u8; 32];
        let name = b"hlsio";
        compressor[0] = name.len() as u8;
        compressor[1..=name.len()].copy_from_slice(name);
        buf.put_slice(&compressor);
        buf.put_u16(0x0018); // depth
        buf.put_i16(-1);

        write_box(buf, b"avcC", |buf| {
            buf.put_u8(1);
            buf.put_slice(sps.get(1..4).unwrap_or(&[0x42, 0xe0, 0x1e]));
            buf.put_u8(0xff); // 4 byte NAL lengths
            buf.put_u8(0xe1);
            buf.put_u16(sps.len() as u16);
            buf.put_slice(&sps);
            buf.put_u8(1);
            buf.put_u16(pps.len() as u16);
            buf.put_slice(&pps);
        });
        write_box(buf, b"pasp", |buf| {
            buf.put_u32(track.pixel_ratio.0);
            buf.put_u32(track.pixel_ratio.1);
        });
    });
}

fn write_audio_entry(buf: &mut BytesMut, kind: &[u8; 4], track: &AudioTrack, children: impl FnOnce(&mut BytesMut)) {
    let samplerate = track.samplerate.unwrap_or(0);
    write_box(buf, kind, |buf| {
        buf.put_slice(&[0; 6]);
        buf.put_u16(1);
        buf.put_slice(&[0; 8]);
        buf.put_u16(track.channel_count as u16);
        buf.put_u16(16); // sample size
        buf.put_u32(0);
        buf.put_u16(samplerate as u16);
        buf.put_u16(0);
        children(buf);
    });
}

fn write_mp4a(buf: &mut BytesMut, track: &AudioTrack) {
    let config = track.config.clone().unwrap_or_default();
    let config_len = config.len() as u8;
    write_audio_entry(buf, b"mp4a", track, |buf| {
        write_full_box(buf, b"esds", 0, 0, |buf| {
            buf.put_u8(0x03); // ES_Descriptor
            buf.put_u8(0x17 + config_len);
            buf.put_u16(1); // ES_ID
            buf.put_u8(0);
            buf.put_u8(0x04); // DecoderConfigDescriptor
            buf.put_u8(0x0f + config_len);
            buf.put_u8(0x40); // MPEG-4 audio
            buf.put_u8(0x15); // audio stream
            buf.put_slice(&[0; 11]);
            buf.put_u8(0x05); // DecoderSpecificInfo
            buf.put_u8(config_len);
            buf.put_slice(&config);
            buf.put_slice(&[0x06, 0x01, 0x02]); // SLConfigDescriptor
        });
    });
}

/// A `moof` for `samples`, whose data starts right after it in the `mdat`.
pub fn moof(sequence_number: u32, base_media_decode_time: u64, track_id: u32, samples: &[Mp4Sample]) -> Bytes {
    let mut buf = BytesMut::with_capacity(100 + samples.len() * 16);
    let mut data_offset_pos = 0;

    write_box(&mut buf, b"moof", |buf| {
        write_full_box(buf, b"mfhd", 0, 0, |buf| buf.put_u32(sequence_number));
        write_box(buf, b"traf", |buf| {
            write_full_box(buf, b"tfhd", 0, 0, |buf| buf.put_u32(track_id));
            write_full_box(buf, b"tfdt", 1, 0, |buf| buf.put_u64(base_media_decode_time));
            // data offset, duration, size, flags and composition offset per sample
            write_full_box(buf, b"trun", 0, 0x000f01, |buf| {
                buf.put_u32(samples.len() as u32);
                data_offset_pos = buf.len();
                buf.put_u32(0);
                for sample in samples {
                    buf.put_u32(sample.duration);
                    buf.put_u32(sample.size);
                    buf.put_u32(sample.flags());
                    buf.put_u32(sample.cts);
                }
            });
        });
    });

    let data_offset = (buf.len() + MDAT_HEADER_SIZE) as u32;
    buf[data_offset_pos..data_offset_pos + 4].copy_from_slice(&data_offset.to_be_bytes());
    buf.freeze()
}

/// Writes an `mdat` header for a box of `size` bytes into the first eight bytes of `buf`.
pub fn put_mdat_header(buf: &mut [u8], size: usize) {
    buf[..4].copy_from_slice(&(size as u32).to_be_bytes());
    buf[4..8].copy_from_slice(b"mdat");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::mp4::boxes::{find_box, parse_init_segment, read_u32, HandlerKind};
    use pretty_assertions::assert_eq;

    fn video_track() -> VideoTrack {
        let mut track = VideoTrack::new(10.0);
        track.sps = Some(Bytes::from_static(&[0x67, 0x42, 0xE0, 0x1E, 0xF4, 0x05, 0x01, 0xEC, 0x80]));
        track.pps = Some(Bytes::from_static(&[0x68, 0xCE, 0x38, 0x80]));
        track.width = 640;
        track.height = 480;
        track
    }

    #[test]
    fn test_init_segments_parse_back() {
        let video = video_init_segment(&video_track(), 90_000);
        let init = parse_init_segment(&video);
        assert_eq!(init.tracks.len(), 1);
        assert_eq!(init.tracks[0].id, VIDEO_TRACK_ID);
        assert_eq!(init.tracks[0].timescale, 90_000);
        assert_eq!(init.tracks[0].kind, HandlerKind::Video);
        assert_eq!(
            find_box(&video, &[b"moov", b"trak", b"mdia", b"minf", b"stbl", b"stsd"]).len(),
            1
        );

        let mut audio = AudioTrack::new(10.0);
        audio.samplerate = Some(48_000);
        audio.channel_count = 2;
        audio.is_aac = true;
        audio.config = Some(Bytes::from_static(&[0x11, 0x90]));
        let audio = audio_init_segment(&audio, 48_000);
        let init = parse_init_segment(&audio);
        assert_eq!(init.tracks[0].id, AUDIO_TRACK_ID);
        assert_eq!(init.tracks[0].kind, HandlerKind::Audio);
        assert_eq!(init.timescale(AUDIO_TRACK_ID), Some(48_000));
    }

    #[test]
    fn test_moof_data_offset() {
        let samples = [Mp4Sample::new(true, 3000, 100, 0), Mp4Sample::new(false, 3000, 50, 3000)];
        let moof = moof(7, 90_000, VIDEO_TRACK_ID, &samples);

        let trun = &find_box(&moof, &[b"moof", b"traf", b"trun"])[0];
        assert_eq!(read_u32(&moof, trun.start + 4), Some(2));
        assert_eq!(read_u32(&moof, trun.start + 8), Some(moof.len() as u32 + 8));
        // second sample flags: non-sync
        assert_eq!(read_u32(&moof, trun.start + 12 + 16 + 8), Some(0x0101_0000));

        let mfhd = &find_box(&moof, &[b"moof", b"mfhd"])[0];
        assert_eq!(read_u32(&moof, mfhd.start + 4), Some(7));
    }
}
