//! Call session lifecycle
//!
//! One [`CallSession`] per live call, inbound or outbound. The session owns
//! the RTP transport and the AI channel and moves through a fixed set of
//! states:
//!
//! ```text
//! Created -> MediaBound -> Negotiated -> Bridging -> Closed
//! ```
//!
//! Close is reachable from every state and is idempotent. It always releases
//! both halves together: the RTP socket and the AI channel.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::ai::{AiChannel, AiEvent};
use crate::codec::Codec;
use crate::resample::{downsample_24k_to_8k, pcm16_to_base64, upsample_8k_to_24k};
use crate::rtp::RtpSession;
use crate::sdp::{self, SdpDescriptor};
use crate::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    MediaBound,
    Negotiated,
    Bridging,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::MediaBound => write!(f, "media_bound"),
            Self::Negotiated => write!(f, "negotiated"),
            Self::Bridging => write!(f, "bridging"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// One live call bridged to the AI backend
pub struct CallSession {
    call_id: String,
    direction: CallDirection,
    topic: Option<String>,
    state: RwLock<SessionState>,
    codec: RwLock<Codec>,
    rtp: RwLock<Option<Arc<RtpSession>>>,
    ai: RwLock<Option<Arc<dyn AiChannel>>>,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl CallSession {
    pub fn new(call_id: String, direction: CallDirection, topic: Option<String>) -> Self {
        Self {
            call_id,
            direction,
            topic,
            state: RwLock::new(SessionState::Created),
            codec: RwLock::new(Codec::default()),
            rtp: RwLock::new(None),
            ai: RwLock::new(None),
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn codec(&self) -> Codec {
        *self.codec.read().await
    }

    /// Seconds since the session was created
    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    /// Bind the RTP socket. Created -> MediaBound.
    pub async fn bind_media(&self) -> Result<(), BridgeError> {
        {
            let state = self.state.read().await;
            if *state != SessionState::Created {
                return Err(BridgeError::InvalidState(format!(
                    "cannot bind media in state {state}"
                )));
            }
        }

        let rtp = RtpSession::bind().await?;
        tracing::info!(
            call_id = %self.call_id,
            port = rtp.local_port(),
            "RTP socket bound"
        );
        *self.rtp.write().await = Some(Arc::new(rtp));
        *self.state.write().await = SessionState::MediaBound;
        Ok(())
    }

    /// Bound local RTP port, once media is bound
    pub async fn local_port(&self) -> Option<u16> {
        self.rtp.read().await.as_ref().map(|r| r.local_port())
    }

    /// Local SDP offer/answer for the bound media port
    pub async fn local_sdp(&self, ip: &str) -> Result<String, BridgeError> {
        let rtp = self.rtp.read().await;
        let rtp = rtp
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidState("media not bound".to_string()))?;
        Ok(sdp::build_sdp(
            ip,
            rtp.local_port(),
            *self.codec.read().await,
            "sendrecv",
        ))
    }

    /// Apply the remote SDP. MediaBound -> Negotiated.
    ///
    /// `fallback_ip` stands in for a missing `c=` line (the INVITE source
    /// address for inbound calls). Any negotiation failure closes the
    /// session before the error is returned.
    pub async fn negotiate(
        &self,
        remote_sdp: &str,
        fallback_ip: Option<IpAddr>,
    ) -> Result<(), BridgeError> {
        {
            // Codec and remote address are decided once per call; a session
            // past MediaBound must not be rewritten.
            let state = self.state.read().await;
            if *state != SessionState::MediaBound {
                return Err(BridgeError::InvalidState(format!(
                    "cannot negotiate in state {state}"
                )));
            }
        }

        let descriptor = SdpDescriptor::parse(remote_sdp);

        let port = match descriptor.require_media_port() {
            Ok(port) => port,
            Err(e) => {
                tracing::error!(call_id = %self.call_id, "remote SDP has no audio media line");
                self.close().await;
                return Err(e);
            }
        };
        let remote_ip = match descriptor.connection.map(IpAddr::V4).or(fallback_ip) {
            Some(ip) => ip,
            None => {
                tracing::error!(call_id = %self.call_id, "remote SDP has no connection address");
                self.close().await;
                return Err(BridgeError::Negotiation(
                    "missing connection address in SDP".to_string(),
                ));
            }
        };
        let codec = descriptor.preferred_codec();

        let rtp = self.rtp.read().await;
        let rtp = rtp
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidState("media not bound".to_string()))?;
        rtp.set_codec(codec).await;
        rtp.set_remote(SocketAddr::new(remote_ip, port)).await;
        *self.codec.write().await = codec;
        *self.state.write().await = SessionState::Negotiated;

        tracing::info!(
            call_id = %self.call_id,
            %codec,
            remote = %format!("{remote_ip}:{port}"),
            "media negotiated"
        );
        Ok(())
    }

    /// Wire the two audio flows. Negotiated -> Bridging.
    ///
    /// Phone to AI: RTP frames are decoded by the transport, upsampled to
    /// 24 kHz and streamed to the channel as base64 PCM16. AI to phone:
    /// audio events are downsampled to 8 kHz and packetized over RTP. Text
    /// and transcript events are logged; an error or close event from the
    /// channel tears the session down.
    pub async fn start_bridge(
        self: &Arc<Self>,
        channel: Arc<dyn AiChannel>,
        mut events: mpsc::Receiver<AiEvent>,
    ) -> Result<(), BridgeError> {
        {
            let state = self.state.read().await;
            if *state != SessionState::Negotiated {
                return Err(BridgeError::InvalidState(format!(
                    "cannot bridge in state {state}"
                )));
            }
        }
        let rtp = self
            .rtp
            .read()
            .await
            .clone()
            .ok_or_else(|| BridgeError::InvalidState("media not bound".to_string()))?;

        *self.ai.write().await = Some(channel.clone());
        *self.state.write().await = SessionState::Bridging;

        // Phone -> AI
        let mut frames = rtp.start_receiving().await;
        let uplink_cancel = self.cancel.clone();
        let uplink_channel = channel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = uplink_cancel.cancelled() => break,
                    frame = frames.recv() => {
                        let Some(samples) = frame else { break };
                        let upsampled = upsample_8k_to_24k(&samples);
                        uplink_channel.send_audio(&pcm16_to_base64(&upsampled)).await;
                    }
                }
            }
        });

        // AI -> Phone
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut assistant_text = String::new();
            loop {
                tokio::select! {
                    _ = session.cancel.cancelled() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        match event {
                            AiEvent::Ready => {
                                tracing::debug!(call_id = %session.call_id, "AI channel ready");
                            }
                            AiEvent::Audio(samples) => {
                                let downsampled = downsample_24k_to_8k(&samples);
                                rtp.send_audio(&downsampled).await;
                            }
                            AiEvent::Text(delta) => {
                                assistant_text.push_str(&delta);
                                if ends_sentence(&assistant_text) {
                                    tracing::info!(
                                        call_id = %session.call_id,
                                        "Assistant: {}",
                                        assistant_text.trim()
                                    );
                                    assistant_text.clear();
                                }
                            }
                            AiEvent::Transcript(text) => {
                                tracing::info!(call_id = %session.call_id, "Caller: {text}");
                            }
                            AiEvent::Error(message) => {
                                tracing::error!(
                                    call_id = %session.call_id,
                                    "AI channel error: {message}"
                                );
                                session.close().await;
                                break;
                            }
                            AiEvent::Closed => {
                                tracing::info!(call_id = %session.call_id, "AI channel closed");
                                session.close().await;
                                break;
                            }
                        }
                    }
                }
            }
            if !assistant_text.trim().is_empty() {
                tracing::info!(
                    call_id = %session.call_id,
                    "Assistant: {}",
                    assistant_text.trim()
                );
            }
        });

        tracing::info!(
            call_id = %self.call_id,
            direction = %self.direction,
            codec = %*self.codec.read().await,
            "media bridge started"
        );
        Ok(())
    }

    /// Completes once the session has closed, whichever side initiated it
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    /// Tear the session down. Idempotent; any state -> Closed.
    ///
    /// Stops both bridge tasks, then releases the RTP socket and closes the
    /// AI channel. Runs on every exit path, including setup failures.
    pub async fn close(&self) {
        {
            let mut state = self.state.write().await;
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }
        self.cancel.cancel();

        if let Some(rtp) = self.rtp.write().await.take() {
            rtp.close();
        }
        if let Some(ai) = self.ai.write().await.take() {
            ai.close().await;
        }

        tracing::info!(
            call_id = %self.call_id,
            direction = %self.direction,
            duration_secs = self.age_secs(),
            "call session closed"
        );
    }
}

/// True once the buffered text ends a sentence: closing punctuation
/// followed by one whitespace character.
fn ends_sentence(text: &str) -> bool {
    let mut chars = text.chars().rev();
    match (chars.next(), chars.next()) {
        (Some(last), Some(prev)) => last.is_whitespace() && matches!(prev, '.' | '!' | '?'),
        _ => false,
    }
}
