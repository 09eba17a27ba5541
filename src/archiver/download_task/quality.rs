//! Audio bitrate estimation and the configured bitrate floor.
//!
//! MP3 files carry their bitrate in every MPEG audio frame header, so the first
//! frame after any ID3v2 tag is read. Other formats (and MP3s whose first frame
//! isn't within the buffered head) fall back to size over declared duration.
//! When neither is available the bitrate is unknown and the check passes.

use crate::error::DownloadError;

const MPEG1_LAYER1: [u32; 15] = [
    0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448,
];
const MPEG1_LAYER2: [u32; 15] = [
    0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384,
];
const MPEG1_LAYER3: [u32; 15] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];
const MPEG2_LAYER1: [u32; 15] = [
    0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256,
];
const MPEG2_LAYER23: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

/// Best estimate of the audio bitrate in kbps
pub(super) fn estimate_bitrate_kbps(
    extension: &str,
    head: &[u8],
    size: u64,
    duration_secs: Option<u64>,
) -> Option<u32> {
    if extension == "mp3"
        && let Some(kbps) = mp3_frame_bitrate(head)
    {
        return Some(kbps);
    }

    let duration = duration_secs.filter(|d| *d > 0)?;
    let kbps = size.saturating_mul(8) / duration / 1000;
    Some(u32::try_from(kbps).unwrap_or(u32::MAX))
}

/// Reject audio below `min_kbps`; 0 disables the check
pub(super) fn check_quality(min_kbps: u32, bitrate_kbps: Option<u32>) -> Result<(), DownloadError> {
    match bitrate_kbps {
        Some(bitrate_kbps) if min_kbps > 0 && bitrate_kbps < min_kbps => {
            Err(DownloadError::QualityRejected {
                bitrate_kbps,
                min_kbps,
            })
        }
        _ => Ok(()),
    }
}

/// Bitrate of the first valid MPEG audio frame header in `head`
fn mp3_frame_bitrate(head: &[u8]) -> Option<u32> {
    let start = id3v2_len(head);
    let frames = head.get(start..)?;

    frames.windows(4).find_map(|w| {
        if w[0] != 0xFF || w[1] & 0xE0 != 0xE0 {
            return None;
        }
        let version = (w[1] >> 3) & 0x03;
        let layer = (w[1] >> 1) & 0x03;
        let bitrate_index = usize::from(w[2] >> 4);
        let sample_rate_index = (w[2] >> 2) & 0x03;

        // 01 version and 00 layer are reserved; index 15 is invalid, 0 is free format
        if version == 0b01 || layer == 0 || bitrate_index == 0 || bitrate_index == 15 {
            return None;
        }
        if sample_rate_index == 0b11 {
            return None;
        }

        let table = match (version, layer) {
            (0b11, 0b11) => &MPEG1_LAYER1,
            (0b11, 0b10) => &MPEG1_LAYER2,
            (0b11, 0b01) => &MPEG1_LAYER3,
            (_, 0b11) => &MPEG2_LAYER1,
            _ => &MPEG2_LAYER23,
        };
        Some(table[bitrate_index])
    })
}

/// Length of a leading ID3v2 tag, 0 when there is none
fn id3v2_len(head: &[u8]) -> usize {
    if head.len() < 10 || &head[..3] != b"ID3" {
        return 0;
    }
    let size = head[6..10]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | usize::from(b & 0x7F));
    let footer = if head[5] & 0x10 != 0 { 10 } else { 0 };
    10 + size + footer
}
