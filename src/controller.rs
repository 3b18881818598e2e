//! Call control
//!
//! Orchestrates call sessions on top of the signaling and AI collaborators.
//! Inbound INVITEs are answered with an SDP answer and bridged; outbound
//! calls are placed with an SDP offer, optionally scoped to a conversation
//! topic. Every failure path closes the session before the error surfaces.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::ai::AiChannelFactory;
use crate::auth::DigestCredentials;
use crate::config::BridgeConfig;
use crate::session::{CallDirection, CallSession};
use crate::signaling::{Header, InboundInvite, SignalingClient};
use crate::BridgeError;

/// Orchestrates inbound and outbound calls
pub struct CallController {
    config: Arc<BridgeConfig>,
    signaling: Arc<dyn SignalingClient>,
    ai: Arc<dyn AiChannelFactory>,
    sessions: Arc<RwLock<HashMap<String, Arc<CallSession>>>>,
}

impl CallController {
    pub fn new(
        config: Arc<BridgeConfig>,
        signaling: Arc<dyn SignalingClient>,
        ai: Arc<dyn AiChannelFactory>,
    ) -> Self {
        Self {
            config,
            signaling,
            ai,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Address advertised in local SDP: the configured RTP_IP, else the
    /// first non-loopback interface, else loopback.
    fn advertised_ip(&self) -> String {
        if let Some(ip) = &self.config.rtp_ip {
            return ip.clone();
        }
        local_ipv4()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    /// Answer an inbound INVITE and bridge it to the AI backend.
    ///
    /// A bad offer is rejected with 488; any later setup failure closes the
    /// session. The call stays up until the remote hangs up or the bridge
    /// tears itself down.
    pub async fn handle_invite(&self, invite: InboundInvite) -> Result<String, BridgeError> {
        let InboundInvite {
            call_id,
            caller,
            body,
            source,
            responder,
            hangup,
        } = invite;
        let call_id = call_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        tracing::info!(
            call_id = %call_id,
            caller = caller.as_deref().unwrap_or("unknown"),
            "incoming call"
        );

        let session = Arc::new(CallSession::new(
            call_id.clone(),
            CallDirection::Inbound,
            None,
        ));

        if let Err(e) = session.bind_media().await {
            let _ = responder.reject(500).await;
            session.close().await;
            return Err(e);
        }

        if let Err(e) = session
            .negotiate(body.as_deref().unwrap_or(""), source)
            .await
        {
            // Session already closed itself on the negotiation failure.
            let _ = responder.reject(488).await;
            return Err(e);
        }

        let answer = match session.local_sdp(&self.advertised_ip()).await {
            Ok(answer) => answer,
            Err(e) => {
                let _ = responder.reject(500).await;
                session.close().await;
                return Err(e);
            }
        };
        if let Err(e) = responder.accept(200, answer).await {
            session.close().await;
            return Err(e);
        }

        let instructions = self.config.instructions_for(None);
        let (channel, events) = match self.ai.connect(&instructions).await {
            Ok(pair) => pair,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };
        if let Err(e) = session.start_bridge(channel, events).await {
            session.close().await;
            return Err(e);
        }

        self.track(call_id.clone(), session, hangup).await;
        Ok(call_id)
    }

    /// Place an outbound call and bridge it to the AI backend.
    ///
    /// The answer must carry an SDP body; a 200 OK without one is a
    /// negotiation failure.
    pub async fn place_call(
        &self,
        number: &str,
        topic: Option<String>,
    ) -> Result<String, BridgeError> {
        let call_id = Uuid::new_v4().to_string();
        tracing::info!(call_id = %call_id, number, "placing outbound call");

        let session = Arc::new(CallSession::new(
            call_id.clone(),
            CallDirection::Outbound,
            topic.clone(),
        ));

        if let Err(e) = session.bind_media().await {
            session.close().await;
            return Err(e);
        }
        let offer = match session.local_sdp(&self.advertised_ip()).await {
            Ok(sdp) => sdp,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };

        let credentials = DigestCredentials {
            username: self.config.extension.clone(),
            password: self.config.password.clone(),
        };
        let headers: Vec<Header> = vec![
            (
                "From".to_string(),
                format!("<{}>;tag=bridge", self.config.extension_uri()),
            ),
            ("User-Agent".to_string(), "OpenAI-Bridge".to_string()),
        ];
        let uri = self.config.call_uri(number);

        let dialog = match self
            .signaling
            .create_dialog(&uri, &offer, &credentials, headers)
            .await
        {
            Ok(dialog) => dialog,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };

        let remote_sdp = match dialog.remote_sdp {
            Some(sdp) => sdp,
            None => {
                session.close().await;
                return Err(BridgeError::Negotiation(
                    "call answer carried no SDP".to_string(),
                ));
            }
        };

        // Closes the session itself on failure.
        session.negotiate(&remote_sdp, None).await?;

        let instructions = self.config.instructions_for(topic.as_deref());
        let (channel, events) = match self.ai.connect(&instructions).await {
            Ok(pair) => pair,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };
        if let Err(e) = session.start_bridge(channel, events).await {
            session.close().await;
            return Err(e);
        }

        self.track(call_id.clone(), session, dialog.terminated).await;
        Ok(call_id)
    }

    /// Register the session and watch for remote termination
    async fn track(
        &self,
        call_id: String,
        session: Arc<CallSession>,
        terminated: tokio_util::sync::CancellationToken,
    ) {
        self.sessions
            .write()
            .await
            .insert(call_id.clone(), session.clone());

        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = terminated.cancelled() => {
                    tracing::info!(call_id = %call_id, "remote party ended the call");
                    session.close().await;
                }
                // The session may close itself first (AI error/close); evict
                // it without waiting for a BYE that may never come.
                _ = session.closed() => {}
            }
            sessions.write().await.remove(&call_id);
        });
    }

    /// Look up a live session by call id
    pub async fn session(&self, call_id: &str) -> Option<Arc<CallSession>> {
        self.sessions.read().await.get(call_id).cloned()
    }

    /// Call ids of all live sessions
    pub async fn active_calls(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Close every live session
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().collect();
        for (_, session) in sessions {
            session.close().await;
        }
    }
}

/// First non-loopback IPv4 interface address
fn local_ipv4() -> Option<Ipv4Addr> {
    get_if_addrs::get_if_addrs()
        .ok()?
        .into_iter()
        .find_map(|iface| {
            if iface.is_loopback() {
                return None;
            }
            match iface.addr {
                get_if_addrs::IfAddr::V4(v4) => Some(v4.ip),
                _ => None,
            }
        })
}
