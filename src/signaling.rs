//! SIP signaling boundary
//!
//! The SIP transaction and dialog machinery is an external collaborator
//! behind these traits. The rest of the crate builds headers, bodies and
//! digest responses; transport, retransmission and dialog bookkeeping stay
//! on the other side of the seam.

use std::net::IpAddr;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::auth::DigestCredentials;
use crate::BridgeError;

/// One SIP header as a name/value pair
pub type Header = (String, String);

/// Final response to a non-INVITE transaction
#[derive(Debug, Clone)]
pub struct SipResponse {
    pub status: u16,
    pub headers: Vec<Header>,
}

impl SipResponse {
    /// Look up a header value by name, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// An established outbound (UAC) dialog
pub struct OutboundDialog {
    /// SDP answer from the remote party, if the 200 OK carried one
    pub remote_sdp: Option<String>,
    /// Cancelled when the dialog ends, whatever the cause
    pub terminated: CancellationToken,
}

/// Answer surface for one inbound INVITE. Consumed by the first response.
#[async_trait]
pub trait InviteResponder: Send {
    /// Accept with a success status and an SDP answer body
    async fn accept(self: Box<Self>, status: u16, sdp: String) -> Result<(), BridgeError>;

    /// Reject with a failure status
    async fn reject(self: Box<Self>, status: u16) -> Result<(), BridgeError>;
}

/// Inbound INVITE delivered by the SIP stack
pub struct InboundInvite {
    pub call_id: Option<String>,
    pub caller: Option<String>,
    /// SDP offer body, if any
    pub body: Option<String>,
    /// Source address of the INVITE; the media fallback when the offer
    /// carries no `c=` line
    pub source: Option<IpAddr>,
    pub responder: Box<dyn InviteResponder>,
    /// Cancelled when the remote party sends CANCEL or BYE
    pub hangup: CancellationToken,
}

/// The SIP stack as seen from this crate
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Send a non-INVITE request and await the final response
    async fn send_request(
        &self,
        uri: &str,
        method: &str,
        headers: Vec<Header>,
    ) -> Result<SipResponse, BridgeError>;

    /// Create an outbound dialog with a local SDP offer, authenticating
    /// with the given credentials if challenged
    async fn create_dialog(
        &self,
        uri: &str,
        local_sdp: &str,
        credentials: &DigestCredentials,
        headers: Vec<Header>,
    ) -> Result<OutboundDialog, BridgeError>;
}
