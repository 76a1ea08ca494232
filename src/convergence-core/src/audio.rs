//! WAV container concatenation.
//!
//! The speech service returns a complete RIFF/WAVE file per line. Gluing
//! those files together naively stacks headers, and most decoders stop at
//! the first one, so every clip after the first contributes only its sample
//! data and the single remaining header gets its size fields rewritten.

use std::io::Cursor;

/// Magic marker at the start of a RIFF container.
pub const RIFF_MAGIC: &[u8; 4] = b"RIFF";

/// Size of the canonical PCM WAV header.
pub const WAV_HEADER_LEN: usize = 44;

/// Concatenate clips that share one container format.
///
/// Clips are expected to share sample rate, channel count and bit depth;
/// only the magic marker is checked.
pub fn stitch<B: AsRef<[u8]>>(clips: &[B]) -> Vec<u8> {
    let Some((first, rest)) = clips.split_first() else {
        return Vec::new();
    };

    let capacity = rest
        .iter()
        .fold(first.as_ref().len(), |acc, clip| acc + clip.as_ref().len());
    let mut combined = Vec::with_capacity(capacity);
    combined.extend_from_slice(first.as_ref());

    for clip in rest {
        let clip = clip.as_ref();
        if is_riff(clip) {
            combined.extend_from_slice(clip.get(WAV_HEADER_LEN..).unwrap_or_default());
        } else {
            combined.extend_from_slice(clip);
        }
    }

    repair_header_sizes(&mut combined);
    combined
}

/// Rewrite the RIFF chunk size and data chunk size to match `buffer.len()`.
///
/// Buffers without the magic marker or shorter than a header are left alone.
pub fn repair_header_sizes(buffer: &mut [u8]) {
    if !is_riff(buffer) || buffer.len() < WAV_HEADER_LEN {
        return;
    }

    let riff_size = size_field(buffer.len() - 8);
    let data_size = size_field(buffer.len() - WAV_HEADER_LEN);
    buffer[4..8].copy_from_slice(&riff_size.to_le_bytes());
    buffer[40..44].copy_from_slice(&data_size.to_le_bytes());
}

/// Whether the buffer starts with the RIFF marker.
pub fn is_riff(bytes: &[u8]) -> bool {
    bytes.starts_with(RIFF_MAGIC)
}

/// Playable length in seconds, if the buffer decodes as WAV.
pub fn wav_duration_secs(bytes: &[u8]) -> Option<f64> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).ok()?;
    let sample_rate = reader.spec().sample_rate;
    if sample_rate == 0 {
        return None;
    }
    Some(reader.duration() as f64 / sample_rate as f64)
}

fn size_field(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
