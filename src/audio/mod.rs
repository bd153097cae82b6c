pub mod backend;
pub mod capture;
pub mod convert;
pub mod encoder;
pub mod level;
pub mod microphone;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource};
pub use capture::{AudioChunk, CapturePipeline, ChunkSink, PermissionState};
pub use encoder::ChunkEncoding;
pub use level::LevelMeter;
pub use microphone::MicrophoneBackend;
