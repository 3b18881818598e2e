//! SIP/RTP media gateway for realtime voice AI.
//!
//! Bridges telephone calls to a streaming AI backend over a duplex audio
//! channel. Features:
//! - SIP registration with digest authentication against any registrar
//! - Inbound and outbound call handling with SDP offer/answer
//! - Per-call RTP transport with G.711 (PCMU/PCMA) transcoding
//! - 8 kHz <-> 24 kHz resampling between telephony and the AI backend
//!
//! The SIP transaction/dialog stack, the HTTP control plane, and the log
//! sink are external collaborators reached through the traits in
//! [`signaling`] and [`ai`].

pub mod ai;
pub mod auth;
pub mod codec;
pub mod config;
pub mod controller;
pub mod registration;
pub mod resample;
pub mod rtp;
pub mod sdp;
pub mod session;
pub mod signaling;

pub use codec::{Codec, G711Codec};
pub use config::BridgeConfig;
pub use controller::CallController;
pub use registration::RegistrationManager;
pub use rtp::RtpSession;
pub use sdp::SdpDescriptor;
pub use session::{CallDirection, CallSession, SessionState};

use thiserror::Error;

/// Gateway errors
#[derive(Error, Debug)]
pub enum BridgeError {
    /// SDP offer/answer failure. Fatal to the call, never retried.
    #[error("SDP negotiation failed: {0}")]
    Negotiation(String),

    /// REGISTER/INVITE digest failure or non-2xx final status.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// RTP socket error. Logged by the transport; the session keeps running.
    #[error("Transport error: {0}")]
    Transport(String),

    /// AI channel connect or runtime error. Fatal to the session.
    #[error("AI channel error: {0}")]
    Channel(String),

    /// SIP collaborator request failure.
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Operation attempted in the wrong session state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
