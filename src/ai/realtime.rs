//! OpenAI Realtime API channel
//!
//! WebSocket client for the Realtime voice API. One connection per call:
//! the session is configured for raw PCM16 audio both ways with server-side
//! voice activity detection, so turn taking is driven entirely by the
//! backend. A writer task owns the sink half; everything sent to the server
//! goes through its queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::ai::{AiChannel, AiChannelFactory, AiEvent};
use crate::resample::base64_to_pcm16;
use crate::BridgeError;

const REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
const TRANSCRIPTION_MODEL: &str = "gpt-4o-mini-transcribe";

/// Connection parameters for the Realtime API
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub api_key: String,
    pub model: String,
    pub voice: String,
}

/// Server events we act on. Everything else falls through to `Other`.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type")]
enum ServerEvent {
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: Option<String> },
    #[serde(rename = "response.text.delta")]
    TextDelta { delta: Option<String> },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { delta: Option<String> },
    // The live API emits the long form; older event logs carry the short one.
    #[serde(
        rename = "conversation.item.input_audio_transcription.completed",
        alias = "input_audio_transcription.completed"
    )]
    TranscriptionCompleted { transcript: Option<String> },
    #[serde(rename = "error")]
    Error { error: Option<ErrorBody> },
    #[serde(other)]
    Other,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Map one server text frame to a channel event. None means ignore.
fn event_from_text(text: &str) -> Option<AiEvent> {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(ServerEvent::AudioDelta { delta: Some(delta) }) => match base64_to_pcm16(&delta) {
            Ok(samples) => Some(AiEvent::Audio(samples)),
            Err(_) => Some(AiEvent::Error("invalid audio delta payload".to_string())),
        },
        Ok(ServerEvent::TextDelta { delta: Some(delta) })
        | Ok(ServerEvent::OutputTextDelta { delta: Some(delta) }) => Some(AiEvent::Text(delta)),
        Ok(ServerEvent::TranscriptionCompleted {
            transcript: Some(transcript),
        }) => Some(AiEvent::Transcript(transcript)),
        Ok(ServerEvent::Error { error }) => Some(AiEvent::Error(
            error
                .and_then(|e| e.message)
                .unwrap_or_else(|| "realtime API error".to_string()),
        )),
        Ok(_) => None,
        Err(e) => Some(AiEvent::Error(format!("unparseable realtime event: {e}"))),
    }
}

/// One live Realtime API connection
pub struct RealtimeChannel {
    outbound: mpsc::Sender<Message>,
    ready: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl RealtimeChannel {
    /// Connect, configure the session, and spawn the reader/writer tasks.
    pub async fn connect(
        config: &RealtimeConfig,
        instructions: &str,
    ) -> Result<(Arc<Self>, mpsc::Receiver<AiEvent>), BridgeError> {
        if config.api_key.is_empty() {
            return Err(BridgeError::Channel("missing AI API key".to_string()));
        }

        let url = format!("{REALTIME_URL}?model={}", config.model);
        let mut request = url
            .into_client_request()
            .map_err(|e| BridgeError::Channel(format!("invalid realtime URL: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| BridgeError::Channel(format!("invalid API key header: {e}")))?;
        request.headers_mut().insert("Authorization", bearer);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| BridgeError::Channel(format!("realtime connect failed: {e}")))?;
        let (mut sink, mut source) = stream.split();

        // Session configuration must precede any audio.
        let update = serde_json::json!({
            "type": "session.update",
            "session": {
                "instructions": instructions,
                "voice": config.voice,
                "input_audio_format": "pcm16",
                "output_audio_format": "pcm16",
                "turn_detection": { "type": "server_vad" },
                "input_audio_transcription": { "model": TRANSCRIPTION_MODEL },
            },
        });
        sink.send(Message::text(update.to_string()))
            .await
            .map_err(|e| BridgeError::Channel(format!("session.update failed: {e}")))?;

        tracing::info!(model = %config.model, voice = %config.voice, "realtime session configured");

        let (event_tx, event_rx) = mpsc::channel(64);
        let (outbound, mut outbound_rx) = mpsc::channel::<Message>(64);
        let ready = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        // The session is configured; the channel accepts audio from here on.
        let _ = event_tx.send(AiEvent::Ready).await;

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    message = outbound_rx.recv() => {
                        let Some(message) = message else { break };
                        if let Err(e) = sink.send(message).await {
                            tracing::warn!("realtime send error: {e}");
                            break;
                        }
                    }
                }
            }
        });

        let reader_ready = ready.clone();
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    frame = source.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = event_from_text(&text) {
                                if event_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            reader_ready.store(false, Ordering::SeqCst);
                            let _ = event_tx.send(AiEvent::Closed).await;
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            reader_ready.store(false, Ordering::SeqCst);
                            let _ = event_tx.send(AiEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                }
            }
        });

        let channel = Arc::new(Self {
            outbound,
            ready,
            cancel,
        });
        Ok((channel, event_rx))
    }
}

#[async_trait]
impl AiChannel for RealtimeChannel {
    async fn send_audio(&self, audio_b64: &str) {
        if !self.ready.load(Ordering::SeqCst) {
            return;
        }
        let append = serde_json::json!({
            "type": "input_audio_buffer.append",
            "audio": audio_b64,
        });
        if self
            .outbound
            .send(Message::text(append.to_string()))
            .await
            .is_err()
        {
            self.ready.store(false, Ordering::SeqCst);
        }
    }

    async fn close(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

/// Opens one [`RealtimeChannel`] per call
pub struct RealtimeFactory {
    config: RealtimeConfig,
}

impl RealtimeFactory {
    pub fn new(config: RealtimeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AiChannelFactory for RealtimeFactory {
    async fn connect(
        &self,
        instructions: &str,
    ) -> Result<(Arc<dyn AiChannel>, mpsc::Receiver<AiEvent>), BridgeError> {
        let (channel, events) = RealtimeChannel::connect(&self.config, instructions).await?;
        Ok((channel, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::pcm16_to_base64;

    #[test]
    fn audio_delta_decodes_to_samples() {
        let samples = vec![0i16, 1000, -1000, 32767];
        let frame = serde_json::json!({
            "type": "response.audio.delta",
            "delta": pcm16_to_base64(&samples),
        });
        assert_eq!(
            event_from_text(&frame.to_string()),
            Some(AiEvent::Audio(samples))
        );
    }

    #[test]
    fn text_deltas_map_to_text_events() {
        let frame = r#"{"type":"response.text.delta","delta":"Hello"}"#;
        assert_eq!(
            event_from_text(frame),
            Some(AiEvent::Text("Hello".to_string()))
        );

        let frame = r#"{"type":"response.output_text.delta","delta":" there"}"#;
        assert_eq!(
            event_from_text(frame),
            Some(AiEvent::Text(" there".to_string()))
        );
    }

    #[test]
    fn transcription_completed_maps_to_transcript() {
        let frame = r#"{
            "type": "conversation.item.input_audio_transcription.completed",
            "transcript": "What are your opening hours?"
        }"#;
        assert_eq!(
            event_from_text(frame),
            Some(AiEvent::Transcript(
                "What are your opening hours?".to_string()
            ))
        );

        // Short event name accepted as well.
        let frame = r#"{
            "type": "input_audio_transcription.completed",
            "transcript": "Hello?"
        }"#;
        assert_eq!(
            event_from_text(frame),
            Some(AiEvent::Transcript("Hello?".to_string()))
        );
    }

    #[test]
    fn error_events_carry_the_server_message() {
        let frame = r#"{"type":"error","error":{"message":"session expired"}}"#;
        assert_eq!(
            event_from_text(frame),
            Some(AiEvent::Error("session expired".to_string()))
        );

        let frame = r#"{"type":"error"}"#;
        assert_eq!(
            event_from_text(frame),
            Some(AiEvent::Error("realtime API error".to_string()))
        );
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        let frame = r#"{"type":"session.created","session":{}}"#;
        assert_eq!(event_from_text(frame), None);

        // Known type with a missing field is ignored too.
        let frame = r#"{"type":"response.audio.delta"}"#;
        assert_eq!(event_from_text(frame), None);
    }

    #[test]
    fn garbage_frames_surface_as_errors() {
        assert!(matches!(
            event_from_text("not json"),
            Some(AiEvent::Error(_))
        ));
    }
}
