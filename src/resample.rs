//! Sample-rate conversion between the 8 kHz telephony leg and the 24 kHz
//! AI leg, plus the base64 PCM16 helpers used on the AI channel boundary.
//!
//! Both directions are stateless and operate on complete buffers. Upsampling
//! is plain linear interpolation and downsampling a triple average - not a
//! band-limited filter. Aliasing is an accepted tradeoff for narrowband
//! G.711 source material.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// Upsample 8 kHz PCM to 24 kHz by linear interpolation.
///
/// Each source sample yields three output samples: the sample itself and two
/// interpolated points at 1/3 and 2/3 toward its successor. The final sample
/// interpolates against itself, so output length is exactly 3x input length.
pub fn upsample_8k_to_24k(samples: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(samples.len() * 3);
    for (i, &s) in samples.iter().enumerate() {
        let s0 = s as i32;
        let s1 = samples.get(i + 1).copied().unwrap_or(s) as i32;
        let diff = s1 - s0;
        out.push(s0 as i16);
        out.push((s0 + diff / 3) as i16);
        out.push((s0 + diff * 2 / 3) as i16);
    }
    out
}

/// Downsample 24 kHz PCM to 8 kHz by averaging consecutive triples.
///
/// A trailing partial group is dropped, so output length is
/// `floor(input length / 3)`.
pub fn downsample_24k_to_8k(samples: &[i16]) -> Vec<i16> {
    samples
        .chunks_exact(3)
        .map(|t| ((t[0] as i32 + t[1] as i32 + t[2] as i32) / 3) as i16)
        .collect()
}

/// Encode PCM16 samples as base64 over little-endian bytes
pub fn pcm16_to_base64(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// Decode base64 little-endian bytes into PCM16 samples
pub fn base64_to_pcm16(encoded: &str) -> Result<Vec<i16>, base64::DecodeError> {
    let bytes = BASE64.decode(encoded)?;
    Ok(bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect())
}
