use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::ChunkEncoding;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub channel: ChannelConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    /// Base URL of the session service (session creation + health)
    pub api_base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "interviewflow".to_string(),
            api_base_url: "http://localhost:8000".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Reconnect behaviour of the duplex channel
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Consecutive reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Fixed delay before each reconnect attempt
    pub reconnect_interval_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 3,
            reconnect_interval_ms: 3000,
        }
    }
}

impl ChannelConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of emitted chunks in Hz
    pub sample_rate: u32,
    /// Channel count of emitted chunks (1 = mono)
    pub channels: u16,
    /// Chunk cadence in milliseconds
    pub chunk_duration_ms: u64,
    pub encoding: ChunkEncoding,
    /// Bounded queue between the device callback and the pipeline, in frames
    pub frame_buffer: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // 16kHz mono speech
            channels: 1,
            chunk_duration_ms: 100,
            encoding: ChunkEncoding::Pcm16,
            frame_buffer: 64,
        }
    }
}

impl AudioConfig {
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_millis(self.chunk_duration_ms)
    }

    /// Interleaved samples that make up one chunk
    pub fn samples_per_chunk(&self) -> usize {
        let per_channel = self.sample_rate as u64 * self.chunk_duration_ms / 1000;
        (per_channel as usize * self.channels as usize).max(1)
    }
}

impl Config {
    /// Load configuration from an optional file plus `INTERVIEWFLOW__*` env vars.
    ///
    /// Missing keys fall back to defaults, so an absent file is not an error.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("INTERVIEWFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }
}
