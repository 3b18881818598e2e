//! SDP offer/answer handling
//!
//! Minimal parser and builder for the single-audio-stream descriptions this
//! gateway exchanges. Accepted codecs are PCMU (payload type 0) and PCMA
//! (payload type 8) at 8000 Hz with 20 ms packet time.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::codec::Codec;
use crate::BridgeError;

/// Parsed remote session description
#[derive(Debug, Clone, Default)]
pub struct SdpDescriptor {
    /// Connection address from the `c=` line, if present
    pub connection: Option<Ipv4Addr>,
    /// Port from the `m=audio` line. None means no audio media was offered,
    /// which is a hard negotiation failure.
    pub media_port: Option<u16>,
    /// Payload type -> codec token (e.g. "PCMA/8000") from rtpmap lines
    pub codecs: HashMap<u8, Option<String>>,
}

impl SdpDescriptor {
    /// Parse a raw SDP body line by line
    pub fn parse(sdp: &str) -> Self {
        let mut descriptor = Self::default();

        for line in sdp.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(rest) = line.strip_prefix("c=IN IP4 ") {
                descriptor.connection = rest.trim().parse().ok();
            } else if line.starts_with("m=audio") {
                let mut parts = line.split_whitespace();
                parts.next(); // m=audio
                descriptor.media_port = parts.next().and_then(|p| p.parse().ok());
                parts.next(); // RTP/AVP
                for pt in parts {
                    if let Ok(pt) = pt.parse::<u8>() {
                        descriptor.codecs.entry(pt).or_insert(None);
                    }
                }
            } else if let Some(rest) = line.strip_prefix("a=rtpmap:") {
                if let Some((pt, token)) = rest.split_once(' ') {
                    if let Ok(pt) = pt.parse::<u8>() {
                        descriptor.codecs.insert(pt, Some(token.to_string()));
                    }
                }
            }
        }

        descriptor
    }

    /// Media port, or the negotiation error every caller must abort on
    pub fn require_media_port(&self) -> Result<u16, BridgeError> {
        self.media_port
            .ok_or_else(|| BridgeError::Negotiation("missing audio media line in SDP".to_string()))
    }

    /// Codec selection policy: A-law wins whenever offered, otherwise μ-law.
    pub fn preferred_codec(&self) -> Codec {
        let offers_pcma = self
            .codecs
            .values()
            .any(|token| token.as_deref().is_some_and(|t| t.starts_with("PCMA")));
        if offers_pcma {
            Codec::Pcma
        } else {
            Codec::Pcmu
        }
    }
}

/// Build a minimal SDP answer/offer with one audio media line.
///
/// `direction` is the SDP direction attribute, normally `sendrecv`.
pub fn build_sdp(ip: &str, port: u16, codec: Codec, direction: &str) -> String {
    let payload_type = codec.payload_type();
    [
        "v=0".to_string(),
        format!("o=- 0 0 IN IP4 {ip}"),
        "s=OpenAI Bridge".to_string(),
        format!("c=IN IP4 {ip}"),
        "t=0 0".to_string(),
        format!("m=audio {port} RTP/AVP {payload_type}"),
        format!("a=rtpmap:{payload_type} {}/8000", codec.sdp_name()),
        "a=ptime:20".to_string(),
        format!("a={direction}"),
    ]
    .join("\r\n")
}
