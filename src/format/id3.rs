//! ID3v2 tag detection and the HLS timestamp PRIV frame.

use bytes::Bytes;

const HEADER_SIZE: usize = 10;
const FRAME_HEADER_SIZE: usize = 10;

/// Owner of the PRIV frame carrying the 33-bit MPEG-TS timestamp of the
/// first sample in a packed audio segment.
pub const TRANSPORT_STREAM_TIMESTAMP_OWNER: &str = "com.apple.streaming.transportStreamTimestamp";

fn is_tag(data: &[u8], offset: usize, magic: &[u8; 3]) -> bool {
    let Some(tag) = data.get(offset..offset + HEADER_SIZE) else {
        return false;
    };
    &tag[..3] == magic
        && tag[3] < 0xFF
        && tag[4] < 0xFF
        && tag[6..10].iter().all(|&b| b < 0x80)
}

/// Whether an ID3v2 header starts at `offset`.
pub fn is_header(data: &[u8], offset: usize) -> bool {
    is_tag(data, offset, b"ID3")
}

/// Whether an ID3v2 footer starts at `offset`.
pub fn is_footer(data: &[u8], offset: usize) -> bool {
    is_tag(data, offset, b"3DI")
}

/// Reads a 28-bit syncsafe integer.
fn read_size(data: &[u8], offset: usize) -> usize {
    data[offset..offset + 4]
        .iter()
        .fold(0usize, |size, &b| (size << 7) | (b & 0x7F) as usize)
}

/// Returns the consecutive ID3 tags (footers included) starting at `offset`.
pub fn get_id3_data(data: &[u8], offset: usize) -> Option<&[u8]> {
    let front = offset;
    let mut offset = offset;
    while is_header(data, offset) {
        offset += HEADER_SIZE + read_size(data, offset + 6);
        if is_footer(data, offset) {
            offset += HEADER_SIZE;
        }
    }
    (offset > front).then(|| &data[front..offset.min(data.len())])
}

/// Whether a complete tag starts at `offset`.
pub fn can_parse(data: &[u8], offset: usize) -> bool {
    is_header(data, offset) && HEADER_SIZE + read_size(data, offset + 6) <= data.len() - offset
}

/// One ID3 frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Id3Frame {
    pub id: [u8; 4],
    pub data: Bytes,
}

/// Splits a run of ID3 tags into frames.
pub fn get_id3_frames(tags: &[u8]) -> Vec<Id3Frame> {
    let mut frames = Vec::new();
    let mut offset = 0;
    while is_header(tags, offset) {
        let size = read_size(tags, offset + 6);
        offset += HEADER_SIZE;
        let end = (offset + size).min(tags.len());
        while offset + FRAME_HEADER_SIZE <= end {
            let id = [tags[offset], tags[offset + 1], tags[offset + 2], tags[offset + 3]];
            if id == [0; 4] {
                // padding
                break;
            }
            let frame_size = read_size(tags, offset + 4);
            let start = offset + FRAME_HEADER_SIZE;
            let stop = (start + frame_size).min(end);
            frames.push(Id3Frame {
                id,
                data: Bytes::copy_from_slice(&tags[start..stop]),
            });
            offset = start + frame_size;
        }
        offset = offset.max(end);
        if is_footer(tags, offset) {
            offset += HEADER_SIZE;
        }
    }
    frames
}

/// Extracts the transport stream timestamp (90 kHz ticks) from a run of tags.
pub fn get_timestamp(tags: &[u8]) -> Option<i64> {
    get_id3_frames(tags).into_iter().find_map(|frame| {
        if &frame.id != b"PRIV" {
            return None;
        }
        let owner_end = frame.data.iter().position(|&b| b == 0)?;
        if &frame.data[..owner_end] != TRANSPORT_STREAM_TIMESTAMP_OWNER.as_bytes() {
            return None;
        }
        let stamp = frame.data.get(owner_end + 1..owner_end + 9)?;
        let high = (stamp[3] & 0x01) as i64;
        let low = u32::from_be_bytes([stamp[4], stamp[5], stamp[6], stamp[7]]) as i64;
        Some((high << 32) | low)
    })
}

/// Builds a tag holding only a timestamp PRIV frame.
#[cfg(test)]
pub(crate) fn timestamp_tag(ticks: i64) -> Vec<u8> {
    let mut payload = TRANSPORT_STREAM_TIMESTAMP_OWNER.as_bytes().to_vec();
    payload.push(0);
    payload.extend_from_slice(&[0, 0, 0, ((ticks >> 32) & 1) as u8]);
    payload.extend_from_slice(&(ticks as u32).to_be_bytes());

    let mut frame = b"PRIV".to_vec();
    frame.extend_from_slice(&syncsafe(payload.len()));
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(&payload);

    let mut tag = b"ID3\x04\x00\x00".to_vec();
    tag.extend_from_slice(&syncsafe(frame.len()));
    tag.extend_from_slice(&frame);
    tag
}

#[cfg(test)]
fn syncsafe(size: usize) -> [u8; 4] {
    [
        ((size >> 21) & 0x7F) as u8,
        ((size >> 14) & 0x7F) as u8,
        ((size >> 7) & 0x7F) as u8,
        (size & 0x7F) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_timestamp_frame() {
        let tag = timestamp_tag(0x1_0000_0010);
        assert!(is_header(&tag, 0));
        assert!(can_parse(&tag, 0));
        assert_eq!(get_id3_data(&tag, 0).map(<[u8]>::len), Some(tag.len()));
        assert_eq!(get_timestamp(&tag), Some(0x1_0000_0010));
    }

    #[test]
    fn test_consecutive_tags_are_grouped() {
        let mut data = timestamp_tag(900);
        let first = data.len();
        data.extend(timestamp_tag(1800));
        data.extend_from_slice(&[0xFF, 0xF1]);

        let tags = get_id3_data(&data, 0).unwrap();
        assert_eq!(tags.len(), first * 2);
        assert_eq!(get_id3_frames(tags).len(), 2);
        assert_eq!(get_timestamp(tags), Some(900));
        assert_eq!(get_id3_data(&data, data.len() - 2), None);
    }

    #[test]
    fn test_other_priv_owner_ignored() {
        let mut tag = timestamp_tag(90);
        // corrupt the owner string
        tag[20] = b'X';
        assert_eq!(get_timestamp(&tag), None);
    }
}
