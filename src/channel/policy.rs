use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::config::ChannelConfig;

/// How a channel closed, as far as reconnection is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Normal close code: user teardown or the remote finishing cleanly
    Normal,
    /// Anything else, including a dropped socket without a close frame
    Abnormal,
}

impl CloseKind {
    pub fn from_code(code: Option<CloseCode>) -> Self {
        match code {
            Some(CloseCode::Normal) => CloseKind::Normal,
            _ => CloseKind::Abnormal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Schedule exactly one attempt after `delay`
    Retry { attempt: u32, delay: Duration },
    /// Closed normally; stay idle
    Stop,
    /// Attempts exhausted; surface a terminal error
    GiveUp { attempts: u32 },
}

/// Fixed-interval, bounded-attempt reconnect policy
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    interval: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            attempts: 0,
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(config.max_reconnect_attempts, config.reconnect_interval())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// A connection opened successfully
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Manual teardown: no further reconnects for this instance
    pub fn disable(&mut self) {
        self.attempts = self.max_attempts;
    }

    pub fn on_close(&mut self, kind: CloseKind) -> ReconnectDecision {
        match kind {
            CloseKind::Normal => ReconnectDecision::Stop,
            CloseKind::Abnormal if self.attempts < self.max_attempts => {
                self.attempts += 1;
                ReconnectDecision::Retry {
                    attempt: self.attempts,
                    delay: self.interval,
                }
            }
            CloseKind::Abnormal => ReconnectDecision::GiveUp {
                attempts: self.attempts,
            },
        }
    }
}
