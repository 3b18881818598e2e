//! RTP transport
//!
//! Per-session UDP socket with RFC 3550 packetization for G.711 payloads.
//! Sequence and timestamp are session-scoped counters: sequence advances by
//! one per packet mod 2^16, timestamp by the payload's sample count mod 2^32.
//! Neither is ever derived from wall-clock time or reset after creation.
//!
//! The receive path has no jitter buffer or reordering; payloads are decoded
//! in arrival order. That is an accepted limitation for narrowband,
//! single-hop voice, not an ordering guarantee.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::codec::{Codec, G711Codec};
use crate::BridgeError;

/// Fixed outbound frame size: 20 ms at 8 kHz
pub const FRAME_SAMPLES: usize = 160;

const HEADER_LEN: usize = 12;

/// 12-byte RTP header. Version 2, no padding/extension/CSRC, no marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Serialize the header
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        buf.put_u8(0x80); // V=2, P=0, X=0, CC=0
        buf.put_u8(self.payload_type & 0x7F);
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        buf
    }

    /// Parse a header from the front of a datagram
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            payload_type: data[1] & 0x7F,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        })
    }
}

/// RTP transport for one call session
pub struct RtpSession {
    socket: Arc<UdpSocket>,
    remote: RwLock<Option<SocketAddr>>,
    codec: RwLock<Codec>,
    ssrc: u32,
    sequence: RwLock<u16>,
    timestamp: RwLock<u32>,
    cancel: CancellationToken,
}

impl RtpSession {
    /// Bind an ephemeral local UDP port. The bound port number goes into the
    /// local SDP answer/offer.
    pub async fn bind() -> Result<Self, BridgeError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket: Arc::new(socket),
            remote: RwLock::new(None),
            codec: RwLock::new(Codec::default()),
            ssrc: rand::random::<u32>(),
            sequence: RwLock::new(0),
            timestamp: RwLock::new(0),
            cancel: CancellationToken::new(),
        })
    }

    /// Local RTP port
    pub fn local_port(&self) -> u16 {
        self.socket.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Session SSRC, fixed for the transport's lifetime
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Set the negotiated remote media endpoint
    pub async fn set_remote(&self, addr: SocketAddr) {
        *self.remote.write().await = Some(addr);
    }

    /// Set the negotiated codec. Decided once per call from SDP.
    pub async fn set_codec(&self, codec: Codec) {
        *self.codec.write().await = codec;
    }

    pub async fn codec(&self) -> Codec {
        *self.codec.read().await
    }

    /// Send one already-encoded G.711 payload.
    ///
    /// A silent no-op while the remote address is unknown. Socket errors are
    /// logged; the transport keeps running until closed.
    pub async fn send_payload(&self, payload: &[u8]) {
        let remote = match *self.remote.read().await {
            Some(addr) => addr,
            None => return,
        };

        let sequence = {
            let mut seq = self.sequence.write().await;
            let current = *seq;
            *seq = seq.wrapping_add(1);
            current
        };
        let timestamp = {
            let mut ts = self.timestamp.write().await;
            let current = *ts;
            *ts = ts.wrapping_add(payload.len() as u32);
            current
        };

        let header = RtpHeader {
            payload_type: self.codec.read().await.payload_type(),
            sequence,
            timestamp,
            ssrc: self.ssrc,
        };
        let mut packet = header.to_bytes();
        packet.extend_from_slice(payload);

        if let Err(e) = self.socket.send_to(&packet, remote).await {
            tracing::warn!("RTP send error: {e}");
        }
    }

    /// Encode and send 8 kHz PCM in fixed 160-sample frames.
    ///
    /// A final partial frame is zero-padded to keep constant packet timing
    /// for the remote endpoint.
    pub async fn send_audio(&self, samples: &[i16]) {
        let codec = G711Codec::new(*self.codec.read().await);
        for frame in samples.chunks(FRAME_SAMPLES) {
            let payload = if frame.len() < FRAME_SAMPLES {
                let mut padded = vec![0i16; FRAME_SAMPLES];
                padded[..frame.len()].copy_from_slice(frame);
                codec.encode(&padded)
            } else {
                codec.encode(frame)
            };
            self.send_payload(&payload).await;
        }
    }

    /// Start the receive loop for the session's negotiated codec.
    ///
    /// Datagrams shorter than the 12-byte header are discarded silently;
    /// anything after the header is decoded as G.711 and delivered in
    /// arrival order. Each datagram is processed before the next is read.
    pub async fn start_receiving(&self) -> mpsc::Receiver<Vec<i16>> {
        let (tx, rx) = mpsc::channel(64);
        let socket = self.socket.clone();
        let codec = G711Codec::new(*self.codec.read().await);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = socket.recv_from(&mut buf) => match result {
                        Ok((len, _)) => {
                            if len < HEADER_LEN {
                                continue; // malformed, drop
                            }
                            let samples = codec.decode(&buf[HEADER_LEN..len]);
                            if tx.send(samples).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("RTP receive error: {e}");
                        }
                    }
                }
            }
        });

        rx
    }

    /// Stop the receive loop. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}
