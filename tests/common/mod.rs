// Shared fixtures for integration tests:
// - a scripted in-memory audio device
// - a local WebSocket server standing in for the session channel
// - helpers for waiting on channel events and store state

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use interviewflow::audio::{AudioBackend, AudioFrame};
use interviewflow::channel::ChannelEvent;
use interviewflow::config::{AudioConfig, ChannelConfig};
use interviewflow::error::{AudioError, PermissionError};
use interviewflow::store::{SessionState, StoreHandle};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub const WAIT: Duration = Duration::from_secs(5);

/// 10ms chunks at 16kHz mono = 160 samples per chunk
pub fn test_audio_config() -> AudioConfig {
    AudioConfig {
        chunk_duration_ms: 10,
        ..AudioConfig::default()
    }
}

pub fn fast_channel_config() -> ChannelConfig {
    ChannelConfig {
        max_reconnect_attempts: 3,
        reconnect_interval_ms: 50,
    }
}

#[derive(Default)]
struct ScriptState {
    deny_remaining: u32,
    frames: Option<mpsc::Sender<AudioFrame>>,
    elapsed_ms: u64,
    opens: u32,
    closes: u32,
}

/// Test-side handle to a [`ScriptedBackend`]
#[derive(Clone, Default)]
pub struct BackendControl {
    state: Arc<Mutex<ScriptState>>,
}

impl BackendControl {
    /// Make the next `n` opens fail with a permission denial
    pub fn deny_next(&self, n: u32) {
        self.state.lock().unwrap().deny_remaining = n;
    }

    /// Deliver one 16kHz mono frame. Returns false if the device is not open.
    pub async fn push(&self, samples: Vec<i16>) -> bool {
        let (tx, timestamp_ms) = {
            let mut state = self.state.lock().unwrap();
            let Some(tx) = state.frames.clone() else {
                return false;
            };
            let timestamp_ms = state.elapsed_ms;
            state.elapsed_ms += samples.len() as u64 * 1000 / 16000;
            (tx, timestamp_ms)
        };

        tx.send(AudioFrame {
            samples,
            sample_rate: 16000,
            channels: 1,
            timestamp_ms,
        })
        .await
        .is_ok()
    }

    /// Simulate the device disappearing
    pub fn end_stream(&self) {
        self.state.lock().unwrap().frames = None;
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().frames.is_some()
    }

    pub fn opens(&self) -> u32 {
        self.state.lock().unwrap().opens
    }

    pub fn closes(&self) -> u32 {
        self.state.lock().unwrap().closes
    }
}

pub struct ScriptedBackend {
    control: BackendControl,
}

impl ScriptedBackend {
    pub fn boxed() -> (Box<dyn AudioBackend>, BackendControl) {
        let control = BackendControl::default();
        let backend = Self {
            control: control.clone(),
        };
        (Box::new(backend), control)
    }
}

#[async_trait::async_trait]
impl AudioBackend for ScriptedBackend {
    async fn open(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AudioError> {
        let mut state = self.control.state.lock().unwrap();
        if state.deny_remaining > 0 {
            state.deny_remaining -= 1;
            return Err(PermissionError::Denied("scripted denial".to_string()).into());
        }

        let (tx, rx) = mpsc::channel(64);
        state.frames = Some(tx);
        state.opens += 1;
        Ok(rx)
    }

    async fn close(&mut self) -> Result<(), AudioError> {
        let mut state = self.control.state.lock().unwrap();
        state.frames = None;
        state.closes += 1;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.control.is_open()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub type ServerSocket = WebSocketStream<TcpStream>;

/// Local WebSocket server; every accepted connection is handed to the test
pub struct WsServer {
    pub url: String,
    connections: mpsc::UnboundedReceiver<ServerSocket>,
}

impl WsServer {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("ws://{}", listener.local_addr()?);
        let (tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                match tokio_tungstenite::accept_async(stream).await {
                    Ok(socket) => {
                        if tx.send(socket).is_err() {
                            break;
                        }
                    }
                    Err(e) => eprintln!("test server handshake failed: {}", e),
                }
            }
        });

        Ok(Self { url, connections })
    }

    pub async fn accept(&mut self) -> Result<ServerSocket> {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .map_err(|_| anyhow!("no connection within {:?}", WAIT))?
            .ok_or_else(|| anyhow!("test server stopped"))
    }
}

/// An address nothing listens on
pub async fn refused_endpoint() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("ws://{}", addr))
}

/// Next data or close frame from the client, skipping pings and pongs
pub async fn next_frame(socket: &mut ServerSocket) -> Result<Message> {
    use futures::StreamExt;

    loop {
        let frame = tokio::time::timeout(WAIT, socket.next())
            .await
            .map_err(|_| anyhow!("no frame within {:?}", WAIT))?
            .ok_or_else(|| anyhow!("client went away"))??;

        match frame {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return Ok(other),
        }
    }
}

pub async fn send_text(socket: &mut ServerSocket, text: &str) -> Result<()> {
    use futures::SinkExt;
    socket.send(Message::Text(text.to_string())).await?;
    Ok(())
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> Result<ChannelEvent> {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .map_err(|_| anyhow!("no channel event within {:?}", WAIT))?
        .ok_or_else(|| anyhow!("channel event stream closed"))
}

/// Skip events until one matches
pub async fn wait_for_event(
    events: &mut mpsc::UnboundedReceiver<ChannelEvent>,
    matches: impl Fn(&ChannelEvent) -> bool,
) -> Result<ChannelEvent> {
    loop {
        let event = next_event(events).await?;
        if matches(&event) {
            return Ok(event);
        }
    }
}

/// Wait until the store publishes a state satisfying `done`
pub async fn wait_for_state(
    store: &StoreHandle,
    done: impl Fn(&SessionState) -> bool,
) -> Result<SessionState> {
    let mut rx = store.subscribe();
    let result = tokio::time::timeout(WAIT, rx.wait_for(|state| done(state))).await;
    match result {
        Ok(Ok(state)) => Ok(state.clone()),
        Ok(Err(_)) => Err(anyhow!("store stopped")),
        Err(_) => Err(anyhow!(
            "store did not reach expected state; last: {:?}",
            store.snapshot()
        )),
    }
}

/// Poll `check` until it holds
pub async fn eventually(check: impl Fn() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        if tokio::time::Instant::now() > deadline {
            return Err(anyhow!("condition not met within {:?}", WAIT));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
