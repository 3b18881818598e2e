//! SIP Digest Authentication
//!
//! HTTP Digest (RFC 2617) challenge/response for REGISTER and INVITE. The
//! hash primitive is MD5 because that is what the legacy SIP digest scheme
//! speaks; this is a protocol compatibility requirement, not a security
//! choice.

use std::collections::HashMap;

use crate::BridgeError;

/// Username/password pair for a SIP account
#[derive(Debug, Clone)]
pub struct DigestCredentials {
    pub username: String,
    pub password: String,
}

/// Challenge parameters extracted from a WWW-Authenticate header value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
}

impl DigestChallenge {
    /// Parse a `Digest realm="...", nonce="...", ...` header value
    pub fn parse(header: &str) -> Result<Self, BridgeError> {
        let params = parse_auth_params(header);
        let realm = params
            .get("realm")
            .cloned()
            .ok_or_else(|| BridgeError::Authentication("challenge missing realm".to_string()))?;
        let nonce = params
            .get("nonce")
            .cloned()
            .ok_or_else(|| BridgeError::Authentication("challenge missing nonce".to_string()))?;
        Ok(Self {
            realm,
            nonce,
            qop: params.get("qop").cloned(),
        })
    }
}

/// Split a challenge header into key/value pairs, dropping surrounding quotes
fn parse_auth_params(header: &str) -> HashMap<String, String> {
    let rest = header.trim();
    let rest = if rest.len() >= 6 && rest[..6].eq_ignore_ascii_case("digest") {
        &rest[6..]
    } else {
        rest
    };

    rest.split(',')
        .filter_map(|part| part.split_once('='))
        .map(|(key, value)| {
            (
                key.trim().to_ascii_lowercase(),
                value.trim().trim_matches('"').to_string(),
            )
        })
        .collect()
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input))
}

/// Fresh 8-byte hex client nonce
fn client_nonce() -> String {
    let bytes: [u8; 8] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Compute the digest response hash.
///
/// `cnonce` and `nc` are only consulted when the challenge carried a qop.
pub fn digest_response(
    credentials: &DigestCredentials,
    challenge: &DigestChallenge,
    method: &str,
    uri: &str,
    cnonce: &str,
    nc: &str,
) -> String {
    let ha1 = md5_hex(&format!(
        "{}:{}:{}",
        credentials.username, challenge.realm, credentials.password
    ));
    let ha2 = md5_hex(&format!("{method}:{uri}"));

    match challenge.qop.as_deref() {
        Some(qop) => md5_hex(&format!(
            "{ha1}:{}:{nc}:{cnonce}:{qop}:{ha2}",
            challenge.nonce
        )),
        None => md5_hex(&format!("{ha1}:{}:{ha2}", challenge.nonce)),
    }
}

/// Build the full `Authorization` header value for a challenge.
///
/// qop/nc/cnonce are emitted only when the challenge requested a qop.
pub fn build_authorization(
    credentials: &DigestCredentials,
    challenge: &DigestChallenge,
    method: &str,
    uri: &str,
) -> String {
    const NONCE_COUNT: &str = "00000001";

    let cnonce = client_nonce();
    let response = digest_response(credentials, challenge, method, uri, &cnonce, NONCE_COUNT);

    let mut params = vec![
        format!("username=\"{}\"", credentials.username),
        format!("realm=\"{}\"", challenge.realm),
        format!("nonce=\"{}\"", challenge.nonce),
        format!("uri=\"{uri}\""),
        format!("response=\"{response}\""),
    ];
    if let Some(qop) = &challenge.qop {
        params.push(format!("qop={qop}"));
        params.push(format!("nc={NONCE_COUNT}"));
        params.push(format!("cnonce=\"{cnonce}\""));
    }

    format!("Digest {}", params.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_challenge_with_qop() {
        let challenge = DigestChallenge::parse(
            "Digest realm=\"asterisk\", nonce=\"4f2ab0e7\", qop=\"auth\", algorithm=MD5",
        )
        .unwrap();
        assert_eq!(challenge.realm, "asterisk");
        assert_eq!(challenge.nonce, "4f2ab0e7");
        assert_eq!(challenge.qop.as_deref(), Some("auth"));
    }

    #[test]
    fn parses_challenge_without_qop() {
        let challenge =
            DigestChallenge::parse("Digest realm=\"asterisk\", nonce=\"4f2ab0e7\"").unwrap();
        assert_eq!(challenge.qop, None);

        assert!(DigestChallenge::parse("Digest nonce=\"x\"").is_err());
    }

    #[test]
    fn rfc2617_qop_reference_vector() {
        // The worked example from RFC 2617 section 3.5.
        let credentials = DigestCredentials {
            username: "Mufasa".to_string(),
            password: "Circle Of Life".to_string(),
        };
        let challenge = DigestChallenge {
            realm: "testrealm@host.com".to_string(),
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".to_string(),
            qop: Some("auth".to_string()),
        };
        let response = digest_response(
            &credentials,
            &challenge,
            "GET",
            "/dir/index.html",
            "0a4f113b",
            "00000001",
        );
        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn no_qop_reference_vector() {
        let credentials = DigestCredentials {
            username: "101".to_string(),
            password: "sekret".to_string(),
        };
        let challenge = DigestChallenge {
            realm: "asterisk".to_string(),
            nonce: "4f2ab0e7".to_string(),
            qop: None,
        };
        let response = digest_response(
            &credentials,
            &challenge,
            "REGISTER",
            "sip:pbx.example.com",
            "ignored",
            "ignored",
        );
        assert_eq!(response, "bf629c97203f22dd514ed43a07b306b7");
    }

    #[test]
    fn authorization_header_shape() {
        let credentials = DigestCredentials {
            username: "101".to_string(),
            password: "sekret".to_string(),
        };
        let with_qop = DigestChallenge {
            realm: "asterisk".to_string(),
            nonce: "abc".to_string(),
            qop: Some("auth".to_string()),
        };
        let header = build_authorization(&credentials, &with_qop, "REGISTER", "sip:pbx");
        assert!(header.starts_with("Digest username=\"101\""));
        assert!(header.contains("realm=\"asterisk\""));
        assert!(header.contains("uri=\"sip:pbx\""));
        assert!(header.contains("response=\""));
        assert!(header.contains("qop=auth"));
        assert!(header.contains("nc=00000001"));
        assert!(header.contains("cnonce=\""));

        let without_qop = DigestChallenge {
            qop: None,
            ..with_qop
        };
        let header = build_authorization(&credentials, &without_qop, "REGISTER", "sip:pbx");
        assert!(!header.contains("qop"));
        assert!(!header.contains("nc="));
        assert!(!header.contains("cnonce"));
    }
}
