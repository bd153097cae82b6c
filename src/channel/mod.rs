//! Duplex session channel
//!
//! - `messages`: the tagged wire protocol (JSON text frames + raw binary audio)
//! - `policy`: fixed-interval, bounded-attempt reconnect policy
//! - `client`: connection lifecycle and frame pump over a WebSocket

pub mod client;
pub mod messages;
pub mod policy;

pub use client::{ChannelClient, ChannelEvent, ChannelState};
pub use messages::{
    ControlPayload, ErrorPayload, FeedbackPayload, Speaker, TranscriptPayload, WireMessage,
    WirePayload,
};
pub use policy::{CloseKind, ReconnectDecision, ReconnectPolicy};
