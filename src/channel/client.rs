use futures::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::messages::WireMessage;
use super::policy::{CloseKind, ReconnectDecision, ReconnectPolicy};
use crate::config::ChannelConfig;
use crate::error::{ChannelError, ProtocolError};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a manual close may take before the driver is aborted
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closing,
    Reconnecting,
    /// Reconnect attempts exhausted
    Failed,
}

/// Everything the channel reports, in per-channel receipt order
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Opened,
    Message(WireMessage),
    ProtocolError(ProtocolError),
    Closed { code: Option<u16>, kind: CloseKind },
    ReconnectScheduled { attempt: u32, delay: Duration },
    Failed(ChannelError),
}

/// Shared between the client handle and its driver task
struct Shared {
    state: watch::Sender<ChannelState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    policy: Mutex<ReconnectPolicy>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl Shared {
    fn set_state(&self, state: ChannelState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!("Channel state: {:?} -> {:?}", current, state);
                *current = state;
                true
            }
        });
    }

    fn emit(&self, event: ChannelEvent) {
        if self.events.send(event).is_err() {
            debug!("Channel event receiver dropped");
        }
    }

    fn set_outbound(&self, tx: Option<mpsc::UnboundedSender<Message>>) {
        if let Ok(mut slot) = self.outbound.lock() {
            *slot = tx;
        }
    }

    fn push(&self, frame: Message) -> Result<(), ChannelError> {
        let slot = self
            .outbound
            .lock()
            .map_err(|_| ChannelError::NotConnected)?;
        match slot.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| ChannelError::NotConnected),
            None => Err(ChannelError::NotConnected),
        }
    }

    fn with_policy<T>(&self, f: impl FnOnce(&mut ReconnectPolicy) -> T) -> Option<T> {
        self.policy.lock().ok().map(|mut policy| f(&mut policy))
    }
}

struct Driver {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns at most one duplex channel to a session endpoint.
///
/// A background driver task performs the handshake, pumps frames in both
/// directions and applies the reconnect policy. Inbound traffic and lifecycle
/// changes are reported on the event receiver returned by [`ChannelClient::new`].
pub struct ChannelClient {
    shared: Arc<Shared>,
    driver: tokio::sync::Mutex<Option<Driver>>,
    state_rx: watch::Receiver<ChannelState>,
}

impl ChannelClient {
    pub fn new(config: &ChannelConfig) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Idle);

        let shared = Arc::new(Shared {
            state: state_tx,
            outbound: Mutex::new(None),
            policy: Mutex::new(ReconnectPolicy::from_config(config)),
            events: events_tx,
        });

        let client = Self {
            shared,
            driver: tokio::sync::Mutex::new(None),
            state_rx,
        };

        (client, events_rx)
    }

    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Open a channel to `endpoint`, replacing any existing one.
    ///
    /// Resolves with the outcome of the first handshake. A failed first
    /// handshake still counts as an abnormal close, so the reconnect policy
    /// keeps trying in the background until it opens or gives up.
    pub async fn connect(&self, endpoint: &str) -> Result<(), ChannelError> {
        let first_rx = {
            let mut driver = self.driver.lock().await;
            if let Some(old) = driver.take() {
                info!("Replacing existing channel before connecting");
                shutdown(old).await;
            }

            self.shared.with_policy(|p| p.reset());

            let (first_tx, first_rx) = oneshot::channel();
            let cancel = CancellationToken::new();
            let task = tokio::spawn(run(
                Arc::clone(&self.shared),
                endpoint.to_string(),
                cancel.clone(),
                first_tx,
            ));
            *driver = Some(Driver { cancel, task });
            first_rx
        };

        first_rx.await.unwrap_or(Err(ChannelError::NotConnected))
    }

    /// Send an application message. Fails fast unless the channel is open;
    /// nothing is queued or retried.
    pub fn send(&self, message: &WireMessage) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::NotConnected);
        }
        let text = message.encode_text()?;
        debug!("Sending {} frame", message.payload.kind());
        self.shared.push(Message::Text(text))
    }

    /// Send one encoded audio buffer as a binary frame. Empty buffers are
    /// skipped and reported as success.
    pub fn send_audio(&self, data: &[u8]) -> Result<(), ChannelError> {
        if data.is_empty() {
            debug!("Skipping empty audio buffer");
            return Ok(());
        }
        if !self.is_open() {
            return Err(ChannelError::NotConnected);
        }
        self.shared.push(Message::Binary(data.to_vec()))
    }

    /// Close with a normal code and disable reconnection. Safe in any state,
    /// including mid-handshake and during reconnect backoff. Frames already
    /// accepted by `send`/`send_audio` are written before the close frame.
    pub async fn disconnect(&self) {
        self.shared.with_policy(|p| p.disable());

        let mut driver = self.driver.lock().await;
        match driver.take() {
            Some(old) => {
                info!("Disconnecting channel");
                shutdown(old).await;
            }
            None => debug!("Disconnect called with no active channel"),
        }

        self.shared.set_outbound(None);
        if self.state() != ChannelState::Failed {
            self.shared.set_state(ChannelState::Idle);
        }
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        if let Ok(mut driver) = self.driver.try_lock() {
            if let Some(driver) = driver.take() {
                debug!("Channel client dropped; cancelling driver");
                driver.cancel.cancel();
            }
        }
        self.shared.set_outbound(None);
    }
}

async fn shutdown(driver: Driver) {
    driver.cancel.cancel();
    let mut task = driver.task;
    if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
        warn!("Channel driver did not stop in time; aborting");
        task.abort();
    }
}

enum PumpExit {
    Cancelled,
    Closed { code: Option<CloseCode> },
}

async fn run(
    shared: Arc<Shared>,
    endpoint: String,
    cancel: CancellationToken,
    first_tx: oneshot::Sender<Result<(), ChannelError>>,
) {
    let mut first = Some(first_tx);

    loop {
        shared.set_state(ChannelState::Connecting);
        info!("Connecting to {}", endpoint);

        let handshake = tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio_tungstenite::connect_async(endpoint.as_str()) => result,
        };

        let code = match handshake {
            Ok((socket, _response)) => {
                info!("Channel open: {}", endpoint);
                shared.with_policy(|p| p.reset());
                if let Some(tx) = first.take() {
                    let _ = tx.send(Ok(()));
                }

                match pump(&shared, socket, &cancel).await {
                    PumpExit::Cancelled => break,
                    PumpExit::Closed { code } => code,
                }
            }
            Err(e) => {
                warn!("Channel handshake failed: {}", e);
                if let Some(tx) = first.take() {
                    let _ = tx.send(Err(ChannelError::Handshake(e.to_string())));
                }
                None
            }
        };

        let kind = CloseKind::from_code(code);
        shared.emit(ChannelEvent::Closed {
            code: code.map(u16::from),
            kind,
        });

        let decision = shared
            .with_policy(|p| p.on_close(kind))
            .unwrap_or(ReconnectDecision::Stop);

        match decision {
            ReconnectDecision::Retry { attempt, delay } => {
                info!(
                    "Reconnecting in {:?} (attempt {})",
                    delay, attempt
                );
                shared.set_state(ChannelState::Reconnecting);
                shared.emit(ChannelEvent::ReconnectScheduled { attempt, delay });

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            ReconnectDecision::Stop => {
                info!("Channel closed normally");
                shared.set_state(ChannelState::Idle);
                return;
            }
            ReconnectDecision::GiveUp { attempts } => {
                error!("Channel failed after {} reconnect attempts", attempts);
                shared.set_state(ChannelState::Failed);
                shared.emit(ChannelEvent::Failed(ChannelError::ReconnectExhausted {
                    attempts,
                }));
                return;
            }
        }
    }

    debug!("Channel driver cancelled");
    shared.set_state(ChannelState::Idle);
}

async fn pump(shared: &Shared, socket: Socket, cancel: &CancellationToken) -> PumpExit {
    let (mut sink, mut source) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    shared.set_outbound(Some(out_tx));
    shared.set_state(ChannelState::Open);
    shared.emit(ChannelEvent::Opened);

    let exit = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                shared.set_outbound(None);
                shared.set_state(ChannelState::Closing);

                // Frames accepted before the disconnect still go out, in order
                while let Ok(frame) = out_rx.try_recv() {
                    if let Err(e) = sink.send(frame).await {
                        debug!("Failed to flush frame before close: {}", e);
                        break;
                    }
                }

                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client disconnect".into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!("Failed to send close frame: {}", e);
                }
                shared.emit(ChannelEvent::Closed {
                    code: Some(u16::from(CloseCode::Normal)),
                    kind: CloseKind::Normal,
                });
                break PumpExit::Cancelled;
            }

            Some(frame) = out_rx.recv() => {
                if let Err(e) = sink.send(frame).await {
                    warn!("Channel write failed: {}", e);
                    break PumpExit::Closed { code: None };
                }
            }

            inbound = source.next() => match inbound {
                Some(Ok(Message::Text(text))) => match WireMessage::decode_text(&text) {
                    Ok(message) => {
                        debug!("Received {} frame", message.payload.kind());
                        shared.emit(ChannelEvent::Message(message));
                    }
                    Err(e) => {
                        warn!("Dropping inbound frame: {}", e);
                        shared.emit(ChannelEvent::ProtocolError(e));
                    }
                },
                Some(Ok(Message::Binary(bytes))) => {
                    debug!("Received {} bytes of playback audio", bytes.len());
                    shared.emit(ChannelEvent::Message(WireMessage::decode_binary(bytes)));
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| f.code);
                    info!("Remote closed channel (code {:?})", code);
                    break PumpExit::Closed { code };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Channel read failed: {}", e);
                    break PumpExit::Closed { code: None };
                }
                None => {
                    warn!("Channel stream ended without a close frame");
                    break PumpExit::Closed { code: None };
                }
            },
        }
    };

    shared.set_outbound(None);
    exit
}
