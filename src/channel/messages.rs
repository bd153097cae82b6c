use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ApplicationError, ChannelError, ProtocolError};
use crate::store::{FeedbackCategory, Origin};

/// One unit crossing the duplex channel
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    pub payload: WirePayload,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WirePayload {
    /// Raw encoded audio, carried in binary frames without an envelope
    Audio(Vec<u8>),
    Transcript(TranscriptPayload),
    Feedback(FeedbackPayload),
    Control(ControlPayload),
    Error(ErrorPayload),
}

impl WirePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            WirePayload::Audio(_) => "audio",
            WirePayload::Transcript(_) => "transcript",
            WirePayload::Feedback(_) => "feedback",
            WirePayload::Control(_) => "control",
            WirePayload::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Ai,
}

impl From<Speaker> for Origin {
    fn from(speaker: Speaker) -> Self {
        match speaker {
            Speaker::User => Origin::Local,
            Speaker::Ai => Origin::Remote,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptPayload {
    pub speaker: Speaker,
    pub text: String,
    #[serde(rename = "audioUrl", default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackPayload {
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<FeedbackCategory>,
}

/// Control payload. Outbound frames carry `action`, inbound ones `status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ControlPayload {
    pub const END: &'static str = "end";
    pub const ENDED: &'static str = "ended";

    pub fn action(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            status: None,
        }
    }

    /// Remote signalled that the session is over
    pub fn is_ended(&self) -> bool {
        self.status.as_deref() == Some(Self::ENDED)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

impl From<ErrorPayload> for ApplicationError {
    fn from(payload: ErrorPayload) -> Self {
        ApplicationError::new(payload.message)
    }
}

/// Epoch values below this are taken as seconds, at or above as milliseconds.
/// 1e11 ms is March 1973; 1e11 s is far past any real clock.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Resolve a sender timestamp: epoch seconds or milliseconds (integer or
/// fractional) or RFC3339 text. Anything else resolves to `None`.
fn resolve_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => {
            let epoch = n.as_f64()?;
            if !epoch.is_finite() || epoch < 0.0 {
                return None;
            }
            let millis = if epoch < EPOCH_MILLIS_THRESHOLD {
                epoch * 1000.0
            } else {
                epoch
            };
            Utc.timestamp_millis_opt(millis.round() as i64).single()
        }
        serde_json::Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(rename = "sessionId", default)]
    session_id: Option<String>,
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OutboundFrame<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: serde_json::Value,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    timestamp: String,
}

impl WireMessage {
    pub fn new(payload: WirePayload) -> Self {
        Self {
            payload,
            session_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Outbound control frame, e.g. `control("end")`
    pub fn control(action: impl Into<String>) -> Self {
        Self::new(WirePayload::Control(ControlPayload::action(action)))
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Parse an inbound text frame
    pub fn decode_text(text: &str) -> Result<Self, ProtocolError> {
        let frame: InboundFrame = serde_json::from_str(text)
            .map_err(|e| ProtocolError::new(format!("invalid JSON envelope: {}", e)))?;

        let payload = match frame.kind.as_str() {
            "transcript" => WirePayload::Transcript(parse_data(&frame.kind, frame.data)?),
            "feedback" => WirePayload::Feedback(parse_data(&frame.kind, frame.data)?),
            "control" => WirePayload::Control(parse_data(&frame.kind, frame.data)?),
            "error" => WirePayload::Error(parse_data(&frame.kind, frame.data)?),
            "audio" => {
                return Err(ProtocolError::new("audio must arrive as a binary frame"));
            }
            other => return Err(ProtocolError::new(format!("unknown message type: {}", other))),
        };

        Ok(Self {
            payload,
            session_id: frame.session_id,
            timestamp: frame
                .timestamp
                .as_ref()
                .and_then(resolve_timestamp)
                .unwrap_or_else(Utc::now),
        })
    }

    /// Wrap an inbound binary frame as playback audio, stamped on receipt
    pub fn decode_binary(bytes: Vec<u8>) -> Self {
        Self::new(WirePayload::Audio(bytes))
    }

    /// Serialize a non-audio message into its JSON text frame
    pub fn encode_text(&self) -> Result<String, ChannelError> {
        let data = match &self.payload {
            WirePayload::Audio(_) => {
                return Err(ChannelError::Encode(
                    "audio is sent as a binary frame".to_string(),
                ))
            }
            WirePayload::Transcript(p) => serde_json::to_value(p),
            WirePayload::Feedback(p) => serde_json::to_value(p),
            WirePayload::Control(p) => serde_json::to_value(p),
            WirePayload::Error(p) => serde_json::to_value(p),
        }
        .map_err(|e| ChannelError::Encode(e.to_string()))?;

        let frame = OutboundFrame {
            kind: self.payload.kind(),
            data,
            session_id: self.session_id.as_deref(),
            timestamp: self.timestamp.to_rfc3339(),
        };

        serde_json::to_string(&frame).map_err(|e| ChannelError::Encode(e.to_string()))
    }
}

fn parse_data<T: serde::de::DeserializeOwned>(
    kind: &str,
    data: serde_json::Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(data)
        .map_err(|e| ProtocolError::new(format!("invalid {} payload: {}", kind, e)))
}
