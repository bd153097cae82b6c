pub mod audio;
pub mod channel;
pub mod config;
pub mod error;
pub mod service;
pub mod session;
pub mod store;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioChunk, AudioFrame, AudioSource,
    CapturePipeline, ChunkEncoding, MicrophoneBackend, PermissionState,
};
pub use channel::{ChannelClient, ChannelEvent, ChannelState, WireMessage, WirePayload};
pub use config::Config;
pub use error::{ClientError, ClientResult};
pub use service::{CreateSessionRequest, CreatedSession, HttpSessionService, SessionService};
pub use session::InterviewSession;
pub use store::{InterviewType, PlanTier, SessionState, SessionStatus, StoreHandle};
