//! SAMPLE-AES sample decryption.
//!
//! AAC frames keep their first 16 bytes in the clear and have every following
//! whole 16-byte block encrypted. H.264 slices longer than 48 bytes are
//! encrypted after emulation prevention removal with a 1:9 pattern: one
//! encrypted block every 160 bytes, starting 32 bytes into the unit.

use bytes::{Bytes, BytesMut};
use futures::future::try_join_all;

use crate::av::{AudioSample, VideoSample};
use crate::codec::h264::H264Parser;
use crate::transmux::Decrypter;
use crate::Result;

const CLEAR_LEADER: usize = 16;
const BLOCK_SIZE: usize = 16;
const VIDEO_CLEAR_LEADER: usize = 32;
const VIDEO_PATTERN_STRIDE: usize = 160;
const VIDEO_MIN_UNIT: usize = 48;

pub async fn decrypt_audio_samples(
    samples: &mut [AudioSample],
    decrypter: &dyn Decrypter,
    key: &[u8; 16],
    iv: &[u8; 16],
) -> Result<()> {
    let jobs: Vec<(usize, Bytes)> = samples
        .iter()
        .enumerate()
        .filter(|(_, sample)| sample.unit.len() > CLEAR_LEADER)
        .map(|(i, sample)| {
            let unit = &sample.unit;
            (i, unit.slice(CLEAR_LEADER..unit.len() - unit.len() % BLOCK_SIZE))
        })
        .filter(|(_, encrypted)| !encrypted.is_empty())
        .collect();

    let decrypted = try_join_all(
        jobs.iter()
            .map(|(_, encrypted)| decrypter.decrypt_blocks(encrypted.clone(), key, iv)),
    )
    .await?;

    for ((i, _), plain) in jobs.into_iter().zip(decrypted) {
        let mut unit = BytesMut::from(&samples[i].unit[..]);
        let n = plain.len().min(unit.len() - CLEAR_LEADER);
        unit[CLEAR_LEADER..CLEAR_LEADER + n].copy_from_slice(&plain[..n]);
        samples[i].unit = unit.freeze();
    }
    Ok(())
}

pub async fn decrypt_video_samples(
    samples: &mut [VideoSample],
    parser: &mut H264Parser,
    decrypter: &dyn Decrypter,
    key: &[u8; 16],
    iv: &[u8; 16],
) -> Result<()> {
    // (sample, unit, unit without emulation prevention, encrypted blocks)
    let mut jobs = Vec::new();
    for (si, sample) in samples.iter().enumerate() {
        for (ui, unit) in sample.units.iter().enumerate() {
            let nal_type = unit.first().map_or(0, |b| b & 0x1F);
            if unit.len() <= VIDEO_MIN_UNIT || (nal_type != 1 && nal_type != 5) {
                continue;
            }
            let decoded = parser.remove_emulation_prevention(unit);
            let encrypted = encrypted_blocks(&decoded);
            jobs.push((si, ui, decoded, encrypted));
        }
    }

    let decrypted = try_join_all(
        jobs.iter()
            .map(|(_, _, _, encrypted)| decrypter.decrypt_blocks(encrypted.clone(), key, iv)),
    )
    .await?;

    for ((si, ui, decoded, _), plain) in jobs.into_iter().zip(decrypted) {
        samples[si].units[ui] = restore_blocks(&decoded, &plain);
    }
    Ok(())
}

fn block_positions(len: usize) -> impl Iterator<Item = usize> {
    (VIDEO_CLEAR_LEADER..)
        .step_by(VIDEO_PATTERN_STRIDE)
        .take_while(move |pos| pos + BLOCK_SIZE < len)
}

fn encrypted_blocks(decoded: &[u8]) -> Bytes {
    let mut blocks = BytesMut::new();
    for pos in block_positions(decoded.len()) {
        blocks.extend_from_slice(&decoded[pos..pos + BLOCK_SIZE]);
    }
    blocks.freeze()
}

fn restore_blocks(decoded: &[u8], plain: &[u8]) -> Bytes {
    let mut unit = BytesMut::from(decoded);
    for (block, pos) in plain.chunks_exact(BLOCK_SIZE).zip(block_positions(decoded.len())) {
        unit[pos..pos + BLOCK_SIZE].copy_from_slice(block);
    }
    unit.freeze()
}
