use anyhow::Result;
use tokio::sync::mpsc;

use super::microphone::MicrophoneBackend;
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since the device was opened
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn duration_ms(&self) -> u64 {
        let per_second = self.sample_rate as u64 * self.channels.max(1) as u64;
        if per_second == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / per_second
    }
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (will resample if needed)
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Frames queued between the device callback and the consumer;
    /// the callback drops frames rather than block when it is full
    pub frame_buffer: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self::from(&AudioConfig::default())
    }
}

impl From<&AudioConfig> for AudioBackendConfig {
    fn from(config: &AudioConfig) -> Self {
        Self {
            target_sample_rate: config.sample_rate,
            target_channels: config.channels,
            frame_buffer: config.frame_buffer.max(1),
        }
    }
}

/// Audio input device.
///
/// `open` acquires the device (and is where the OS permission prompt, if
/// any, is answered); frames flow on the returned receiver until `close`.
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Acquire the device and start delivering frames
    async fn open(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AudioError>;

    /// Release the device
    async fn close(&mut self) -> Result<(), AudioError>;

    /// Check if the device is currently held
    fn is_open(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// The host's default input device
    DefaultMicrophone,
    /// An input device selected by name
    Microphone(String),
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        let backend = match source {
            AudioSource::DefaultMicrophone => MicrophoneBackend::new(config, None),
            AudioSource::Microphone(name) => MicrophoneBackend::new(config, Some(name)),
        };
        Ok(Box::new(backend))
    }
}
