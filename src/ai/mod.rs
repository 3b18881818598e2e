//! AI audio channel boundary
//!
//! The voice-AI backend is an external collaborator reached over a duplex
//! channel. Its callback-style events are delivered here as a tagged enum
//! over an mpsc channel, preserving per-channel ordering without callback
//! control flow.

mod realtime;

pub use realtime::{RealtimeChannel, RealtimeConfig, RealtimeFactory};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::BridgeError;

/// Events emitted by the AI audio channel
#[derive(Debug, Clone, PartialEq)]
pub enum AiEvent {
    /// Session negotiated; safe to send audio
    Ready,
    /// Assistant audio, 24 kHz PCM16
    Audio(Vec<i16>),
    /// Incremental assistant text token
    Text(String),
    /// Completed caller utterance
    Transcript(String),
    /// Channel error
    Error(String),
    /// Channel closed by the backend
    Closed,
}

/// Duplex audio channel to the AI backend
#[async_trait]
pub trait AiChannel: Send + Sync {
    /// Send base64-encoded 24 kHz PCM16 caller audio.
    /// A no-op until the channel is ready.
    async fn send_audio(&self, audio_b64: &str);

    /// Close the channel. Idempotent.
    async fn close(&self);
}

/// Connects AI channels for new call sessions
#[async_trait]
pub trait AiChannelFactory: Send + Sync {
    /// Open a channel with per-call instructions. The returned receiver
    /// carries the channel's events in emission order, starting with
    /// [`AiEvent::Ready`] once the channel accepts audio.
    async fn connect(
        &self,
        instructions: &str,
    ) -> Result<(Arc<dyn AiChannel>, mpsc::Receiver<AiEvent>), BridgeError>;
}
