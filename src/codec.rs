//! G.711 Audio Codec
//!
//! Pure Rust implementation of ITU-T G.711 μ-law (PCMU) and A-law (PCMA),
//! the narrowband codecs carried over the RTP leg. Both laws are stateless
//! per-sample compressors; encode is deterministic and decode is the exact
//! algebraic inverse on the codeword domain.

use serde::{Deserialize, Serialize};

/// Audio codec negotiated for a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Codec {
    /// G.711 μ-law - payload type 0
    #[default]
    Pcmu,
    /// G.711 A-law - payload type 8
    Pcma,
}

impl Codec {
    /// RTP payload type number
    pub fn payload_type(&self) -> u8 {
        match self {
            Codec::Pcmu => 0,
            Codec::Pcma => 8,
        }
    }

    /// Codec name for SDP rtpmap lines
    pub fn sdp_name(&self) -> &'static str {
        match self {
            Codec::Pcmu => "PCMU",
            Codec::Pcma => "PCMA",
        }
    }

    /// Samples per RTP packet (20 ms at 8 kHz)
    pub fn samples_per_packet(&self) -> usize {
        160
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sdp_name())
    }
}

/// G.711 codec for encoding/decoding telephone audio
#[derive(Debug, Clone, Copy)]
pub struct G711Codec {
    codec: Codec,
}

impl G711Codec {
    pub fn new(codec: Codec) -> Self {
        Self { codec }
    }

    /// Encode 16-bit PCM samples to G.711, one byte per sample
    pub fn encode(&self, pcm: &[i16]) -> Vec<u8> {
        match self.codec {
            Codec::Pcmu => pcm.iter().map(|&s| linear_to_ulaw(s)).collect(),
            Codec::Pcma => pcm.iter().map(|&s| linear_to_alaw(s)).collect(),
        }
    }

    /// Decode G.711 bytes to 16-bit PCM samples
    pub fn decode(&self, encoded: &[u8]) -> Vec<i16> {
        match self.codec {
            Codec::Pcmu => encoded.iter().map(|&b| ulaw_to_linear(b)).collect(),
            Codec::Pcma => encoded.iter().map(|&b| alaw_to_linear(b)).collect(),
        }
    }
}

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;
const ALAW_CLIP: i32 = 32767;

/// Highest set bit among bits 14..7 of `magnitude`, as an exponent 0..7.
fn segment_exponent(magnitude: i32) -> u32 {
    let mut exponent = 7;
    let mut mask = 0x4000;
    while magnitude & mask == 0 && exponent > 0 {
        exponent -= 1;
        mask >>= 1;
    }
    exponent
}

/// Convert a 16-bit linear PCM sample to μ-law
fn linear_to_ulaw(sample: i16) -> u8 {
    let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
    let mut magnitude = (sample as i32).abs().min(ULAW_CLIP);
    magnitude += ULAW_BIAS;

    let exponent = segment_exponent(magnitude);
    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;

    !(sign | ((exponent as u8) << 4) | mantissa)
}

/// Convert a μ-law byte to 16-bit linear PCM
fn ulaw_to_linear(byte: u8) -> i16 {
    let ulaw = !byte;
    let sign = ulaw & 0x80;
    let exponent = ((ulaw >> 4) & 0x07) as u32;
    let mantissa = (ulaw & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;

    if sign != 0 {
        (-magnitude) as i16
    } else {
        magnitude as i16
    }
}

/// Convert a 16-bit linear PCM sample to A-law
fn linear_to_alaw(sample: i16) -> u8 {
    let negative = sample < 0;
    let magnitude = (sample as i32).abs().min(ALAW_CLIP);

    let exponent = segment_exponent(magnitude);
    // Exponent zero carries the mantissa straight from bits 4..7.
    let mantissa = if exponent == 0 {
        ((magnitude >> 4) & 0x0F) as u8
    } else {
        ((magnitude >> (exponent + 3)) & 0x0F) as u8
    };

    let alaw = ((exponent as u8) << 4) | mantissa;
    alaw ^ if negative { 0xD5 } else { 0x55 }
}

/// Convert an A-law byte to 16-bit linear PCM
fn alaw_to_linear(byte: u8) -> i16 {
    let alaw = byte ^ 0x55;
    let sign = alaw & 0x80;
    let exponent = ((alaw >> 4) & 0x07) as u32;
    let mantissa = (alaw & 0x0F) as i32;

    let magnitude = if exponent == 0 {
        (mantissa << 4) + 0x08
    } else {
        ((mantissa << 4) + 0x108) << (exponent - 1)
    };

    if sign != 0 {
        (-magnitude) as i16
    } else {
        magnitude as i16
    }
}
