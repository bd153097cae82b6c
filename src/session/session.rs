use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::routing::{route, Route, SessionContext};
use crate::audio::{AudioChunk, CapturePipeline, ChunkSink, PermissionState};
use crate::channel::{ChannelClient, ChannelEvent, ChannelState, ControlPayload, WireMessage};
use crate::config::ChannelConfig;
use crate::error::{AudioError, ChannelError, ClientResult};
use crate::service::{CreateSessionRequest, CreatedSession, SessionService};
use crate::store::{Action, InterviewType, Origin, PlanTier, StoreHandle};

/// Inbound playback audio is fanned out to at most this many pending buffers
/// per subscriber; slow listeners lose the oldest.
const PLAYBACK_BUFFER: usize = 32;

struct Inner {
    store: StoreHandle,
    channel: ChannelClient,
    capture: CapturePipeline,
    /// Held across the check-and-send of every chunk; cleared first on end
    accepting_audio: Mutex<bool>,
    ended: AtomicBool,
    context: Mutex<Option<SessionContext>>,
    playback: broadcast::Sender<Vec<u8>>,
}

impl Inner {
    fn context(&self) -> Option<SessionContext> {
        self.context.lock().ok().and_then(|slot| slot.clone())
    }

    fn set_context(&self, context: Option<SessionContext>) {
        if let Ok(mut slot) = self.context.lock() {
            *slot = context;
        }
    }

    fn set_accepting(&self, accepting: bool) {
        if let Ok(mut gate) = self.accepting_audio.lock() {
            *gate = accepting;
        }
    }

    fn forward_chunk(&self, chunk: AudioChunk) {
        let Ok(accepting) = self.accepting_audio.lock() else {
            return;
        };
        if !*accepting {
            debug!("Session not accepting audio; dropping chunk {}", chunk.sequence);
            return;
        }
        if chunk.is_empty() {
            return;
        }
        if !self.channel.is_open() {
            debug!("Channel not open; dropping chunk {}", chunk.sequence);
            return;
        }

        match self.channel.send_audio(&chunk.data) {
            Ok(()) => {}
            // Closed between the check and the send
            Err(ChannelError::NotConnected) => {
                debug!("Channel closed; dropping chunk {}", chunk.sequence)
            }
            Err(e) => {
                warn!("Failed to send chunk {}: {}", chunk.sequence, e);
                self.store.set_error(Some(e.user_message()));
            }
        }
    }

    async fn handle_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => {
                self.store.set_connected(true);
                self.store.dispatch(Action::Activate);
            }
            ChannelEvent::Message(message) => {
                let Some(context) = self.context() else {
                    debug!("No live session; dropping {} frame", message.payload.kind());
                    return;
                };
                match route(message, &context) {
                    Route::Store(action) => self.store.dispatch(action),
                    Route::End => {
                        info!("Remote ended session {}", context.session_id);
                        self.end().await;
                    }
                    Route::Playback(bytes) => {
                        // No subscribers is fine; playback is optional
                        let _ = self.playback.send(bytes);
                    }
                    Route::Ignore => {}
                }
            }
            ChannelEvent::ProtocolError(e) => {
                warn!("{}", e);
            }
            ChannelEvent::Closed { code, kind } => {
                debug!("Channel closed ({:?}, code {:?})", kind, code);
                self.store.set_connected(false);
            }
            ChannelEvent::ReconnectScheduled { attempt, delay } => {
                info!("Reconnect attempt {} in {:?}", attempt, delay);
            }
            ChannelEvent::Failed(e) => {
                error!("Channel failed: {}", e);
                self.set_accepting(false);
                self.store.dispatch(Action::Fail {
                    message: e.user_message(),
                });
                self.capture.stop().await;
            }
        }
    }

    async fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            debug!("Session already ended");
            return;
        }
        self.set_accepting(false);

        if self.channel.is_open() {
            let mut message = WireMessage::control(ControlPayload::END);
            if let Some(context) = self.context() {
                message = message.with_session_id(context.session_id);
            }
            if let Err(e) = self.channel.send(&message) {
                warn!("Failed to send end control message: {}", e);
            }
        }

        self.capture.stop().await;
        self.channel.disconnect().await;
        self.store.end();
        info!("Session ended");
    }
}

/// Composition root for one live interview.
///
/// Inbound channel traffic is routed into the store in receipt order, capture
/// chunks are forwarded to the channel only while it is open, and `end` tears
/// things down so that no audio leaves after an end was requested.
pub struct InterviewSession {
    inner: Arc<Inner>,
    tasks: Vec<JoinHandle<()>>,
}

impl InterviewSession {
    pub fn new(store: StoreHandle, channel: &ChannelConfig, capture: CapturePipeline) -> Self {
        let (channel, events) = ChannelClient::new(channel);
        let (playback, _) = broadcast::channel(PLAYBACK_BUFFER);

        let inner = Arc::new(Inner {
            store,
            channel,
            capture,
            accepting_audio: Mutex::new(false),
            ended: AtomicBool::new(true),
            context: Mutex::new(None),
            playback,
        });

        // Subscribe before anything can start recording so no flip is missed
        let recording = inner.capture.subscribe_recording();
        let fault = inner.capture.subscribe_fault();

        let tasks = vec![
            tokio::spawn(route_events(Arc::downgrade(&inner), events)),
            tokio::spawn(watch_capture(Arc::downgrade(&inner), recording, fault)),
        ];

        Self { inner, tasks }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.inner.store
    }

    pub fn channel_state(&self) -> ChannelState {
        self.inner.channel.state()
    }

    pub fn permission(&self) -> PermissionState {
        self.inner.capture.permission()
    }

    pub fn subscribe_level(&self) -> watch::Receiver<f32> {
        self.inner.capture.subscribe_level()
    }

    /// Inbound binary audio from the remote peer
    pub fn subscribe_playback(&self) -> broadcast::Receiver<Vec<u8>> {
        self.inner.playback.subscribe()
    }

    /// Create a session through `service` and begin it.
    ///
    /// A service failure is recorded in the store before it is returned.
    pub async fn start_from_service(
        &self,
        service: &dyn SessionService,
        request: &CreateSessionRequest,
    ) -> ClientResult<CreatedSession> {
        let created = match service.create_session(request).await {
            Ok(created) => created,
            Err(e) => {
                error!("Failed to create session: {}", e);
                self.inner.store.set_error(Some(e.user_message()));
                return Err(e.into());
            }
        };

        self.begin(&created, request.interview_type, request.plan_tier)
            .await?;
        Ok(created)
    }

    /// Start a session the service already created and connect its channel.
    /// A session that is still live is ended first.
    ///
    /// A failed first handshake is recorded in the store; the channel keeps
    /// retrying in the background.
    pub async fn begin(
        &self,
        created: &CreatedSession,
        interview_type: InterviewType,
        tier: PlanTier,
    ) -> Result<(), ChannelError> {
        let inner = &self.inner;
        if !inner.ended.load(Ordering::SeqCst) {
            info!("Ending live session before beginning {}", created.session_id);
            inner.end().await;
        }

        info!(
            "Beginning {} session {} ({} tier)",
            interview_type, created.session_id, tier
        );

        inner.store.start(
            interview_type,
            tier,
            created.session_id.clone(),
            created.channel_endpoint.clone(),
        );
        if !created.initial_greeting.is_empty() {
            inner
                .store
                .append_message(Origin::Remote, created.initial_greeting.clone(), None);
        }

        inner.set_context(Some(SessionContext {
            session_id: created.session_id.clone(),
            tier,
        }));
        inner.ended.store(false, Ordering::SeqCst);
        inner.set_accepting(true);

        if let Err(e) = inner.channel.connect(&created.channel_endpoint).await {
            warn!("Initial connection failed: {}", e);
            inner.store.set_error(Some(e.user_message()));
            return Err(e);
        }
        Ok(())
    }

    /// Start streaming microphone chunks to the channel
    pub async fn start_recording(&self) -> Result<(), AudioError> {
        if self.inner.ended.load(Ordering::SeqCst) {
            warn!("No live session; not starting capture");
            return Ok(());
        }

        let weak = Arc::downgrade(&self.inner);
        let sink: ChunkSink = Arc::new(move |chunk| {
            if let Some(inner) = weak.upgrade() {
                inner.forward_chunk(chunk);
            }
        });

        if let Err(e) = self.inner.capture.start(sink).await {
            warn!("Failed to start recording: {}", e);
            self.inner.store.set_error(Some(e.user_message()));
            return Err(e);
        }
        Ok(())
    }

    pub async fn stop_recording(&self) {
        self.inner.capture.stop().await;
    }

    /// Re-request microphone access after a denial
    pub async fn retry_permission(&self) -> Result<(), AudioError> {
        match self.inner.capture.retry_permission().await {
            Ok(()) => {
                self.inner.store.set_error(None);
                Ok(())
            }
            Err(e) => {
                self.inner.store.set_error(Some(e.user_message()));
                Err(e)
            }
        }
    }

    pub async fn pause(&self) {
        self.inner.capture.stop().await;
        self.inner.store.dispatch(Action::Pause);
    }

    pub async fn resume(&self) -> Result<(), AudioError> {
        self.inner.store.dispatch(Action::Resume);
        self.start_recording().await
    }

    /// End the live session: send the end control message if the channel is
    /// open, stop capture, disconnect, then mark the session completed.
    /// Repeated calls are no-ops.
    pub async fn end(&self) {
        self.inner.end().await;
    }

    /// Clear the store back to its initial state, ending any live session
    pub async fn reset(&self) {
        self.inner.end().await;
        self.inner.set_context(None);
        self.inner.store.reset();
    }

    /// End the session and release the microphone
    pub async fn shutdown(&self) {
        self.inner.end().await;
        self.inner.capture.shutdown().await;
    }
}

impl Drop for InterviewSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn route_events(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_event(event).await;
    }
    debug!("Channel event router stopped");
}

/// Mirror the pipeline's recording flag and device faults into the store
async fn watch_capture(
    inner: Weak<Inner>,
    mut recording: watch::Receiver<bool>,
    mut fault: watch::Receiver<Option<AudioError>>,
) {
    loop {
        tokio::select! {
            changed = recording.changed() => {
                if changed.is_err() {
                    break;
                }
                let capturing = *recording.borrow_and_update();
                match inner.upgrade() {
                    Some(inner) => inner.store.set_capturing(capturing),
                    None => break,
                }
            }
            changed = fault.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = fault.borrow_and_update().clone();
                if let (Some(e), Some(inner)) = (current, inner.upgrade()) {
                    inner.store.set_error(Some(e.user_message()));
                }
            }
        }
    }
    debug!("Capture watcher stopped");
}
