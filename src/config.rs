//! Gateway Configuration
//!
//! Connection settings for the SIP registrar and the AI backend.

use serde::{Deserialize, Serialize};

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// SIP registrar host:port (e.g. "pbx.example.com:5060")
    pub sip_server: String,

    /// SIP extension / auth username
    pub extension: String,

    /// SIP password
    pub password: String,

    /// SIP transport parameter for outbound INVITEs
    pub transport: String,

    /// Default number for outbound calls when the caller supplies none
    pub default_number: Option<String>,

    /// Advertised RTP address (auto-detected if None)
    pub rtp_ip: Option<String>,

    /// AI backend API key
    pub ai_api_key: String,

    /// AI realtime model name
    pub ai_model: String,

    /// AI voice
    pub ai_voice: String,

    /// Base instructions for the AI session
    pub ai_instructions: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            sip_server: String::new(),
            extension: String::new(),
            password: String::new(),
            transport: "udp".to_string(),
            default_number: None,
            rtp_ip: None,
            ai_api_key: String::new(),
            ai_model: "gpt-4o-realtime-preview".to_string(),
            ai_voice: "alloy".to_string(),
            ai_instructions: "You are a helpful voice assistant for incoming callers.".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sip_server: std::env::var("SIP_SERVER").unwrap_or(defaults.sip_server),
            extension: std::env::var("SIP_EXTENSION").unwrap_or(defaults.extension),
            password: std::env::var("SIP_PASSWORD").unwrap_or(defaults.password),
            transport: std::env::var("SIP_TRANSPORT").unwrap_or(defaults.transport),
            default_number: std::env::var("SIP_PHONE").ok(),
            rtp_ip: std::env::var("RTP_IP").ok(),
            ai_api_key: std::env::var("OPENAI_API_KEY").unwrap_or(defaults.ai_api_key),
            ai_model: std::env::var("OPENAI_REALTIME_MODEL").unwrap_or(defaults.ai_model),
            ai_voice: std::env::var("OPENAI_VOICE").unwrap_or(defaults.ai_voice),
            ai_instructions: std::env::var("OPENAI_INSTRUCTIONS").unwrap_or(defaults.ai_instructions),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.sip_server.is_empty() {
            return Err("SIP server is required".to_string());
        }
        if self.extension.is_empty() {
            return Err("SIP extension is required".to_string());
        }
        if self.password.is_empty() {
            return Err("SIP password is required".to_string());
        }
        Ok(())
    }

    /// Registrar URI for REGISTER requests
    pub fn registrar_uri(&self) -> String {
        format!("sip:{}", self.sip_server)
    }

    /// Address-of-record for the configured extension
    pub fn extension_uri(&self) -> String {
        format!("sip:{}@{}", self.extension, self.sip_server)
    }

    /// Target URI for an outbound call
    pub fn call_uri(&self, number: &str) -> String {
        format!(
            "sip:{}@{};transport={}",
            number, self.sip_server, self.transport
        )
    }

    /// Instructions for one call, with an optional conversation topic
    pub fn instructions_for(&self, topic: Option<&str>) -> String {
        match topic {
            Some(topic) if !topic.is_empty() => {
                format!("{}\nConversation topic: {}", self.ai_instructions, topic)
            }
            _ => self.ai_instructions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_server_and_credentials() {
        let mut config = BridgeConfig::default();
        assert!(config.validate().is_err());

        config.sip_server = "pbx.example.com:5060".to_string();
        config.extension = "101".to_string();
        config.password = "sekret".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn uris_include_transport_and_extension() {
        let config = BridgeConfig {
            sip_server: "pbx.example.com:5060".to_string(),
            extension: "101".to_string(),
            ..Default::default()
        };
        assert_eq!(config.registrar_uri(), "sip:pbx.example.com:5060");
        assert_eq!(config.extension_uri(), "sip:101@pbx.example.com:5060");
        assert_eq!(
            config.call_uri("0123456"),
            "sip:0123456@pbx.example.com:5060;transport=udp"
        );
    }

    #[test]
    fn topic_is_appended_to_instructions() {
        let config = BridgeConfig {
            ai_instructions: "Base.".to_string(),
            ..Default::default()
        };
        assert_eq!(config.instructions_for(None), "Base.");
        assert_eq!(
            config.instructions_for(Some("billing")),
            "Base.\nConversation topic: billing"
        );
    }
}
