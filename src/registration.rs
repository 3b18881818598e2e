//! SIP registration
//!
//! Keeps the gateway's extension registered at the configured registrar.
//! REGISTER is sent bare first; a 401 challenge is answered exactly once
//! with a digest Authorization header. Bindings are requested for 300
//! seconds and refreshed every 270, re-armed only after a successful
//! refresh. A failed refresh is logged and the timer stops; the binding
//! then lapses at the registrar until `run` is called again.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::auth::{build_authorization, DigestChallenge, DigestCredentials};
use crate::config::BridgeConfig;
use crate::signaling::{Header, SignalingClient};
use crate::BridgeError;

/// Requested binding lifetime, in seconds
pub const REGISTER_EXPIRES_SECS: u32 = 300;

/// Refresh interval, 30 seconds inside the binding lifetime
pub const REGISTER_REFRESH: Duration = Duration::from_secs(270);

/// Keeps one extension registered
pub struct RegistrationManager {
    config: Arc<BridgeConfig>,
    signaling: Arc<dyn SignalingClient>,
    cancel: CancellationToken,
}

impl RegistrationManager {
    pub fn new(config: Arc<BridgeConfig>, signaling: Arc<dyn SignalingClient>) -> Self {
        Self {
            config,
            signaling,
            cancel: CancellationToken::new(),
        }
    }

    fn request_headers(&self, authorization: Option<String>) -> Vec<Header> {
        let aor = format!("<{}>", self.config.extension_uri());
        let mut headers = vec![
            ("To".to_string(), aor.clone()),
            ("From".to_string(), format!("{aor};tag=bridge")),
            ("Contact".to_string(), aor),
            ("User-Agent".to_string(), "OpenAI-Bridge".to_string()),
            ("Expires".to_string(), REGISTER_EXPIRES_SECS.to_string()),
        ];
        if let Some(authorization) = authorization {
            headers.push(("Authorization".to_string(), authorization));
        }
        headers
    }

    /// One REGISTER attempt.
    ///
    /// A 401 is answered once with digest credentials; any other non-2xx
    /// final status (including a second 401) is an authentication failure.
    pub async fn register(&self) -> Result<(), BridgeError> {
        let uri = self.config.registrar_uri();

        let response = self
            .signaling
            .send_request(&uri, "REGISTER", self.request_headers(None))
            .await?;

        let response = if response.status == 401 {
            let challenge = response.header("WWW-Authenticate").ok_or_else(|| {
                BridgeError::Authentication("401 without WWW-Authenticate".to_string())
            })?;
            let challenge = DigestChallenge::parse(challenge)?;
            let credentials = DigestCredentials {
                username: self.config.extension.clone(),
                password: self.config.password.clone(),
            };
            let authorization = build_authorization(&credentials, &challenge, "REGISTER", &uri);
            self.signaling
                .send_request(&uri, "REGISTER", self.request_headers(Some(authorization)))
                .await?
        } else {
            response
        };

        if !response.is_success() {
            return Err(BridgeError::Authentication(format!(
                "REGISTER failed with status {}",
                response.status
            )));
        }

        tracing::info!(
            extension = %self.config.extension,
            registrar = %self.config.sip_server,
            "SIP registration complete"
        );
        Ok(())
    }

    /// Register now, then keep refreshing in the background.
    ///
    /// The initial failure surfaces to the caller; later refresh failures
    /// are logged and stop the refresh loop.
    pub async fn run(self: &Arc<Self>) -> Result<(), BridgeError> {
        self.register().await?;

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    _ = tokio::time::sleep(REGISTER_REFRESH) => {
                        if let Err(e) = manager.register().await {
                            tracing::error!("SIP re-registration failed: {e}");
                            break;
                        }
                    }
                }
            }
        });
        Ok(())
    }

    /// Stop the refresh loop
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use crate::signaling::{OutboundDialog, SipResponse};

    struct FakeSignaling {
        responses: Mutex<VecDeque<SipResponse>>,
        requests: Mutex<Vec<(String, String, Vec<Header>)>>,
    }

    impl FakeSignaling {
        fn new(responses: Vec<SipResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        async fn sent(&self) -> Vec<(String, String, Vec<Header>)> {
            self.requests.lock().await.clone()
        }
    }

    #[async_trait]
    impl SignalingClient for FakeSignaling {
        async fn send_request(
            &self,
            uri: &str,
            method: &str,
            headers: Vec<Header>,
        ) -> Result<SipResponse, BridgeError> {
            self.requests
                .lock()
                .await
                .push((uri.to_string(), method.to_string(), headers));
            self.responses
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| BridgeError::Signaling("no scripted response".to_string()))
        }

        async fn create_dialog(
            &self,
            _uri: &str,
            _local_sdp: &str,
            _credentials: &DigestCredentials,
            _headers: Vec<Header>,
        ) -> Result<OutboundDialog, BridgeError> {
            Err(BridgeError::Signaling("not scripted".to_string()))
        }
    }

    fn config() -> Arc<BridgeConfig> {
        Arc::new(BridgeConfig {
            sip_server: "pbx.example.com:5060".to_string(),
            extension: "101".to_string(),
            password: "sekret".to_string(),
            ..Default::default()
        })
    }

    fn ok() -> SipResponse {
        SipResponse {
            status: 200,
            headers: vec![],
        }
    }

    fn challenge() -> SipResponse {
        SipResponse {
            status: 401,
            headers: vec![(
                "WWW-Authenticate".to_string(),
                "Digest realm=\"asterisk\", nonce=\"4f2ab0e7\", qop=\"auth\"".to_string(),
            )],
        }
    }

    fn header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[tokio::test]
    async fn registers_without_credentials_on_immediate_success() {
        let signaling = FakeSignaling::new(vec![ok()]);
        let manager = RegistrationManager::new(config(), signaling.clone());

        manager.register().await.unwrap();

        let sent = signaling.sent().await;
        assert_eq!(sent.len(), 1);
        let (uri, method, headers) = &sent[0];
        assert_eq!(uri, "sip:pbx.example.com:5060");
        assert_eq!(method, "REGISTER");
        assert_eq!(
            header(headers, "To"),
            Some("<sip:101@pbx.example.com:5060>")
        );
        assert_eq!(
            header(headers, "From"),
            Some("<sip:101@pbx.example.com:5060>;tag=bridge")
        );
        assert_eq!(header(headers, "Expires"), Some("300"));
        assert_eq!(header(headers, "User-Agent"), Some("OpenAI-Bridge"));
        assert_eq!(header(headers, "Authorization"), None);
    }

    #[tokio::test]
    async fn answers_a_challenge_with_digest_credentials() {
        let signaling = FakeSignaling::new(vec![challenge(), ok()]);
        let manager = RegistrationManager::new(config(), signaling.clone());

        manager.register().await.unwrap();

        let sent = signaling.sent().await;
        assert_eq!(sent.len(), 2);
        let authorization = header(&sent[1].2, "Authorization").unwrap();
        assert!(authorization.starts_with("Digest username=\"101\""));
        assert!(authorization.contains("realm=\"asterisk\""));
        assert!(authorization.contains("nonce=\"4f2ab0e7\""));
        assert!(authorization.contains("uri=\"sip:pbx.example.com:5060\""));
        assert!(authorization.contains("qop=auth"));
        assert!(authorization.contains("nc=00000001"));
    }

    #[tokio::test]
    async fn rejected_credentials_fail_without_a_second_retry() {
        let forbidden = SipResponse {
            status: 403,
            headers: vec![],
        };
        let signaling = FakeSignaling::new(vec![challenge(), forbidden]);
        let manager = RegistrationManager::new(config(), signaling.clone());

        let result = manager.register().await;
        assert!(matches!(result, Err(BridgeError::Authentication(_))));
        assert_eq!(signaling.sent().await.len(), 2);
    }

    #[tokio::test]
    async fn non_challenge_failure_is_an_authentication_error() {
        let signaling = FakeSignaling::new(vec![SipResponse {
            status: 503,
            headers: vec![],
        }]);
        let manager = RegistrationManager::new(config(), signaling.clone());

        assert!(matches!(
            manager.register().await,
            Err(BridgeError::Authentication(_))
        ));
        assert_eq!(signaling.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn challenge_without_www_authenticate_is_rejected() {
        let bare_401 = SipResponse {
            status: 401,
            headers: vec![],
        };
        let signaling = FakeSignaling::new(vec![bare_401]);
        let manager = RegistrationManager::new(config(), signaling);

        assert!(matches!(
            manager.register().await,
            Err(BridgeError::Authentication(_))
        ));
    }
}
