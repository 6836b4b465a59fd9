//! WebSocket control message schemas
//!
//! Binary frames carry audio in both directions and are not represented
//! here: inbound binary is opaque compressed audio, outbound binary is raw
//! PCM16. Everything else is an internally-tagged JSON control message.

use serde::{Deserialize, Serialize};

use garson_core::{OrderIntent, Product};
use garson_pipeline::SessionEvent;

/// Control messages accepted from the client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// End of the user utterance; forces the turn trigger
    AudioEnd,
    /// Barge-in: cancel all in-flight work
    Interrupt,
    /// Liveness probe
    Ping,
    /// The client finished rendering the last TTS stream
    PlaybackComplete,
}

/// Control messages emitted to the client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Greeting {
        text: String,
    },
    Status {
        message: String,
    },
    PartialTranscript {
        text: String,
        confidence: f32,
        is_final: bool,
    },
    Transcript {
        text: String,
        is_final: bool,
    },
    AiToken {
        token: String,
        full_text: String,
    },
    AiComplete {
        data: OrderIntent,
    },
    Recommendation {
        product: Product,
    },
    TtsStart,
    TtsComplete,
    InterruptAck,
    Pong,
    Error {
        message: String,
    },
}

impl OutboundMessage {
    /// Convert a pipeline event into its wire message. Binary audio frames
    /// (`TtsAudio`) are sent as-is by the writer and return `None` here.
    pub fn from_event(event: SessionEvent) -> Option<Self> {
        match event {
            SessionEvent::Greeting { text } => Some(OutboundMessage::Greeting { text }),
            SessionEvent::Status { message } => Some(OutboundMessage::Status {
                message: message.to_string(),
            }),
            SessionEvent::PartialTranscript { text, confidence } => {
                Some(OutboundMessage::PartialTranscript {
                    text,
                    confidence,
                    is_final: false,
                })
            }
            SessionEvent::Transcript { text } => Some(OutboundMessage::Transcript {
                text,
                is_final: true,
            }),
            SessionEvent::AiToken { token, full_text } => {
                Some(OutboundMessage::AiToken { token, full_text })
            }
            SessionEvent::AiComplete { intent } => Some(OutboundMessage::AiComplete { data: intent }),
            SessionEvent::Recommendation { product } => {
                Some(OutboundMessage::Recommendation { product })
            }
            SessionEvent::TtsStart => Some(OutboundMessage::TtsStart),
            SessionEvent::TtsComplete => Some(OutboundMessage::TtsComplete),
            SessionEvent::InterruptAck => Some(OutboundMessage::InterruptAck),
            SessionEvent::Pong => Some(OutboundMessage::Pong),
            SessionEvent::Error { message } => Some(OutboundMessage::Error { message }),
            SessionEvent::TtsAudio(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use garson_core::IntentKind;

    #[test]
    fn test_inbound_tags() {
        let msg: InboundMessage = serde_json::from_str(r#"{"type":"audio_end"}"#).unwrap();
        assert!(matches!(msg, InboundMessage::AudioEnd));

        let msg: InboundMessage = serde_json::from_str(r#"{"type":"interrupt"}"#).unwrap();
        assert!(matches!(msg, InboundMessage::Interrupt));

        let msg: InboundMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, InboundMessage::Ping));

        let msg: InboundMessage =
            serde_json::from_str(r#"{"type":"playback_complete"}"#).unwrap();
        assert!(matches!(msg, InboundMessage::PlaybackComplete));
    }

    #[test]
    fn test_unknown_inbound_type_rejected() {
        assert!(serde_json::from_str::<InboundMessage>(r#"{"type":"selfdestruct"}"#).is_err());
        assert!(serde_json::from_str::<InboundMessage>("not json").is_err());
    }

    #[test]
    fn test_outbound_partial_transcript_schema() {
        let msg = OutboundMessage::PartialTranscript {
            text: "iki pizza".to_string(),
            confidence: 0.85,
            is_final: false,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "partial_transcript");
        assert_eq!(json["text"], "iki pizza");
        assert_eq!(json["is_final"], false);
    }

    #[test]
    fn test_outbound_ai_complete_schema() {
        let msg = OutboundMessage::AiComplete {
            data: OrderIntent {
                spoken_response: "İki pizza ekledim.".to_string(),
                intent: IntentKind::Add,
                product_name: Some("Pizza".to_string()),
                quantity: 2,
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ai_complete");
        assert_eq!(json["data"]["intent"], "add");
        assert_eq!(json["data"]["quantity"], 2);
    }

    #[test]
    fn test_event_conversion() {
        let msg = OutboundMessage::from_event(SessionEvent::TtsStart).unwrap();
        assert_eq!(
            serde_json::to_value(&msg).unwrap()["type"],
            "tts_start"
        );

        assert!(OutboundMessage::from_event(SessionEvent::TtsAudio(Bytes::new())).is_none());
    }
}
