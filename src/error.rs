//! Error taxonomy for the interview client.
//!
//! Every error has two renderings: `Display` carries diagnostic detail for
//! logs, while `user_message()` is the stable, human-readable text that ends
//! up in the session store's `error` field.

use thiserror::Error;

/// Result type alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Microphone access failures. Recoverable through an explicit retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("Microphone access denied: {0}")]
    Denied(String),

    #[error("No input device available")]
    NoDevice,
}

impl PermissionError {
    pub fn user_message(&self) -> String {
        match self {
            PermissionError::Denied(_) => {
                "Microphone access was denied. Allow access and try again.".to_string()
            }
            PermissionError::NoDevice => {
                "No microphone was found. Connect one and try again.".to_string()
            }
        }
    }
}

/// Device and stream faults other than permission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Audio encoding error: {0}")]
    Encode(String),
}

impl AudioError {
    pub fn user_message(&self) -> String {
        match self {
            AudioError::Permission(e) => e.user_message(),
            AudioError::Device(_) | AudioError::Stream(_) => {
                "The microphone stopped working. Check your audio device.".to_string()
            }
            AudioError::Encode(_) => "Recorded audio could not be processed.".to_string(),
        }
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, AudioError::Permission(_))
    }
}

impl From<cpal::DevicesError> for AudioError {
    fn from(err: cpal::DevicesError) -> Self {
        AudioError::Device(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        AudioError::Device(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AudioError::Permission(PermissionError::Denied(err.to_string()))
            }
            other => AudioError::Stream(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        AudioError::Stream(err.to_string())
    }
}

/// Transport-level failures of the duplex channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel is not connected")]
    NotConnected,

    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("Connection failed after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Failed to encode outbound message: {0}")]
    Encode(String),
}

impl ChannelError {
    pub fn user_message(&self) -> String {
        match self {
            ChannelError::NotConnected => "Not connected to the interview service.".to_string(),
            ChannelError::Handshake(_) => {
                "The connection to the interview service was interrupted.".to_string()
            }
            ChannelError::ReconnectExhausted { .. } => {
                "Connection to the interview service failed. Please restart the session."
                    .to_string()
            }
            ChannelError::Encode(_) => "A message could not be sent.".to_string(),
        }
    }

    /// Whether the session can no longer continue over this channel.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelError::ReconnectExhausted { .. })
    }
}

/// Malformed inbound frame. Logged, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed inbound frame: {reason}")]
pub struct ProtocolError {
    pub reason: String,
}

impl ProtocolError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Error payload signalled by the remote peer. The channel stays open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Remote error: {message}")]
pub struct ApplicationError {
    pub message: String,
}

impl ApplicationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The remote text, or a generic line when the peer sent none
    pub fn user_message(&self) -> String {
        let message = self.message.trim();
        if message.is_empty() {
            "The interview service reported an error.".to_string()
        } else {
            message.to_string()
        }
    }
}

/// Failures of the one-shot session creation call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Session service unreachable: {0}")]
    Unreachable(String),

    #[error("Session service rejected request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Session service returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::Unreachable(_) => {
                "The interview service is unreachable. Check your connection and try again."
                    .to_string()
            }
            ServiceError::Rejected { .. } => {
                "The interview service could not start this session.".to_string()
            }
            ServiceError::InvalidResponse(_) => {
                "The interview service sent an unexpected response.".to_string()
            }
        }
    }
}

/// Any error crossing a component boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<PermissionError> for ClientError {
    fn from(err: PermissionError) -> Self {
        ClientError::Audio(AudioError::Permission(err))
    }
}

impl ClientError {
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Audio(e) => e.user_message(),
            ClientError::Channel(e) => e.user_message(),
            ClientError::Service(e) => e.user_message(),
        }
    }
}
