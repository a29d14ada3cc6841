use super::types::*;
use crate::utils::Crc32Mpeg2;
use crate::{HlsError, Result};

/// Packet and PSI parsing. Stateless apart from the CRC table.
pub struct TSPacketParser {
    crc: Crc32Mpeg2,
}

impl TSPacketParser {
    pub fn new() -> Self {
        Self {
            crc: Crc32Mpeg2::new(),
        }
    }

    pub fn parse_header(&self, data: &[u8]) -> Result<TSHeader> {
        if data.len() < TS_HEADER_SIZE {
            return Err(HlsError::InvalidData("TS packet too short".into()));
        }

        if data[0] != SYNC_BYTE {
            return Err(HlsError::InvalidData("Invalid sync byte".into()));
        }

        Ok(TSHeader {
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            pid: (((data[1] & 0x1F) as u16) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation_field_exists: (data[3] & 0x20) != 0,
            contains_payload: (data[3] & 0x10) != 0,
            continuity_counter: data[3] & 0x0F,
        })
    }

    /// Offset of the payload inside a 188-byte `packet`, past the adaptation
    /// field. `None` when the packet carries no payload.
    pub fn payload_offset(&self, packet: &[u8], header: &TSHeader) -> Option<usize> {
        if !header.contains_payload {
            return None;
        }
        let offset = if header.adaptation_field_exists {
            TS_HEADER_SIZE + 1 + *packet.get(TS_HEADER_SIZE)? as usize
        } else {
            TS_HEADER_SIZE
        };
        (offset < packet.len()).then_some(offset)
    }

    /// Cuts the PSI section out of a payload, honoring the pointer field on
    /// unit starts. The CRC is checked but a mismatch only warns.
    pub fn section<'a>(&self, payload: &'a [u8], payload_unit_start: bool) -> Result<&'a [u8]> {
        let start = if payload_unit_start {
            1 + *payload
                .first()
                .ok_or_else(|| HlsError::InvalidData("empty PSI payload".into()))? as usize
        } else {
            0
        };
        let section = payload
            .get(start..)
            .filter(|s| s.len() >= 3)
            .ok_or_else(|| HlsError::InvalidData("PSI section header truncated".into()))?;

        let section_length = (((section[1] & 0x0F) as usize) << 8) | section[2] as usize;
        let end = (3 + section_length).min(section.len());
        let section = &section[..end];
        if end == 3 + section_length && section_length >= 4 && !self.crc.verify(section) {
            log::warn!("[tsdemuxer] CRC mismatch in PSI table {:#04x}", section[0]);
        }
        Ok(section)
    }

    pub fn parse_pat(&self, section: &[u8]) -> Result<PAT> {
        if section.first() != Some(&TABLE_ID_PAT) {
            return Err(HlsError::InvalidData("not a PAT section".into()));
        }
        let end = table_end(section)?;

        let mut pat = PAT::default();
        let mut pos = 8;
        while pos + 4 <= end {
            let program_number = ((section[pos] as u16) << 8) | section[pos + 1] as u16;
            let pid = (((section[pos + 2] & 0x1F) as u16) << 8) | section[pos + 3] as u16;
            pat.entries.push(PATEntry {
                program_number,
                program_map_pid: pid,
            });
            pos += 4;
        }

        Ok(pat)
    }

    pub fn parse_pmt(&self, section: &[u8]) -> Result<PMT> {
        if section.first() != Some(&TABLE_ID_PMT) {
            return Err(HlsError::InvalidData("not a PMT section".into()));
        }
        let end = table_end(section)?;
        if section.len() < 12 {
            return Err(HlsError::InvalidData("PMT too short for program info length".into()));
        }

        let mut pmt = PMT {
            pcr_pid: (((section[8] & 0x1F) as u16) << 8) | section[9] as u16,
            ..Default::default()
        };
        let program_info_length = (((section[10] & 0x0F) as usize) << 8) | section[11] as usize;
        let mut pos = 12 + program_info_length;

        while pos + 5 <= end {
            let stream_type = section[pos];
            let elementary_pid = (((section[pos + 1] & 0x1F) as u16) << 8) | section[pos + 2] as u16;
            let es_info_length = (((section[pos + 3] & 0x0F) as usize) << 8) | section[pos + 4] as usize;

            pmt.elementary_stream_infos.push(ElementaryStreamInfo {
                stream_type,
                elementary_pid,
            });
            pos += 5 + es_info_length;
        }

        Ok(pmt)
    }
}

impl Default for TSPacketParser {
    fn default() -> Self {
        Self::new()
    }
}

/// End of the table body: the section minus its trailing CRC.
fn table_end(section: &[u8]) -> Result<usize> {
    if section.len() < 3 {
        return Err(HlsError::InvalidData("PSI section header truncated".into()));
    }
    let section_length = (((section[1] & 0x0F) as usize) << 8) | section[2] as usize;
    Ok((3 + section_length).saturating_sub(4).min(section.len()))
}

/// First offset within the scan window where consecutive packets line up on
/// the sync byte. Needs two packets, and checks a third when present.
pub fn sync_offset(data: &[u8]) -> Option<usize> {
    let window = SYNC_SCAN_WINDOW.min(data.len());
    (0..window).find(|&i| {
        let second = i + TS_PACKET_SIZE;
        let third = second + TS_PACKET_SIZE;
        data[i] == SYNC_BYTE
            && data.get(second) == Some(&SYNC_BYTE)
            && data.get(third).map_or(true, |&b| b == SYNC_BYTE)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn with_crc(mut section: Vec<u8>) -> Vec<u8> {
        let crc = Crc32Mpeg2::new().calculate(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        section
    }

    #[test]
    fn test_parse_ts_header() {
        let parser = TSPacketParser::new();
        let data = [
            0x47, // Sync byte
            0x41, // Payload unit start, PID high bits
            0x00, // PID low bits
            0x37, // adaptation field + payload, continuity counter 7
        ];

        let header = parser.parse_header(&data).unwrap();
        assert!(header.payload_unit_start);
        assert_eq!(header.pid, 0x100);
        assert!(header.adaptation_field_exists);
        assert!(header.contains_payload);
        assert_eq!(header.continuity_counter, 7);

        assert!(parser.parse_header(&[0x46, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_payload_offset_skips_adaptation_field() {
        let parser = TSPacketParser::new();
        let mut packet = vec![0xFFu8; TS_PACKET_SIZE];
        packet[..5].copy_from_slice(&[0x47, 0x41, 0x00, 0x30, 0x07]);
        let header = parser.parse_header(&packet).unwrap();
        assert_eq!(parser.payload_offset(&packet, &header), Some(12));

        // adaptation field filling the whole packet
        packet[4] = 183;
        assert_eq!(parser.payload_offset(&packet, &header), None);

        packet[3] = 0x20;
        let header = parser.parse_header(&packet).unwrap();
        assert_eq!(parser.payload_offset(&packet, &header), None);
    }

    #[test]
    fn test_parse_pat() {
        let parser = TSPacketParser::new();
        let section = with_crc(vec![
            0x00, 0xB0, 0x11, // table id, section length 17
            0x00, 0x01, 0xC1, 0x00, 0x00, // ts id, version, section numbers
            0x00, 0x00, 0xE0, 0x10, // network PID entry
            0x00, 0x01, 0xF0, 0x00, // program 1 -> PMT 0x1000
        ]);
        let mut payload = vec![0x00];
        payload.extend_from_slice(&section);

        let section = parser.section(&payload, true).unwrap();
        let pat = parser.parse_pat(section).unwrap();
        assert_eq!(pat.entries.len(), 2);
        assert_eq!(pat.first_pmt_pid(), Some(0x1000));
    }

    #[test]
    fn test_parse_pmt() {
        let parser = TSPacketParser::new();
        let section = with_crc(vec![
            0x02, 0xB0, 0x1A, // table id, section length 26
            0x00, 0x01, 0xC1, 0x00, 0x00, // program number, version, section numbers
            0xE1, 0x00, // PCR PID 0x100
            0xF0, 0x03, 0x0A, 0x01, 0x00, // program info with one descriptor
            0x1B, 0xE1, 0x00, 0xF0, 0x00, // H.264 on 0x100
            0x0F, 0xE1, 0x01, 0xF0, 0x00, // AAC on 0x101
        ]);

        let pmt = parser.parse_pmt(parser.section(&section, false).unwrap()).unwrap();
        assert_eq!(pmt.pcr_pid, 0x100);
        assert_eq!(
            pmt.elementary_stream_infos,
            vec![
                ElementaryStreamInfo {
                    stream_type: STREAM_TYPE_H264,
                    elementary_pid: 0x100
                },
                ElementaryStreamInfo {
                    stream_type: STREAM_TYPE_AAC,
                    elementary_pid: 0x101
                },
            ]
        );
    }

    #[test]
    fn test_bad_crc_still_parses() {
        let parser = TSPacketParser::new();
        let mut section = with_crc(vec![0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00, 0x00, 0x01, 0xF0, 0x00]);
        let last = section.len() - 1;
        section[last] ^= 0xFF;
        let pat = parser.parse_pat(parser.section(&section, false).unwrap()).unwrap();
        assert_eq!(pat.first_pmt_pid(), Some(0x1000));
    }

    #[test]
    fn test_sync_offset() {
        let mut data = vec![0u8; 5 + TS_PACKET_SIZE * 3];
        for i in 0..3 {
            data[5 + i * TS_PACKET_SIZE] = SYNC_BYTE;
        }
        assert_eq!(sync_offset(&data), Some(5));

        // a lone sync byte is not enough
        assert_eq!(sync_offset(&data[5..TS_PACKET_SIZE + 5]), None);
        assert_eq!(sync_offset(&[0u8; 400]), None);
    }
}
