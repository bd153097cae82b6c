use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::state::{Action, FeedbackCategory, InterviewType, Origin, PlanTier, SessionState};

enum Command {
    Apply(Action),
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle to the single-writer session store.
///
/// Every clone feeds the same FIFO queue; one consumer task applies actions
/// in arrival order and publishes the resulting state through a `watch`
/// channel. Dispatching never blocks, so it is safe from device and network
/// callbacks.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<SessionState>,
}

impl StoreHandle {
    /// Spawn the consumer task. It exits once every handle is dropped.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let (state_tx, state_rx) = watch::channel(SessionState::default());

        let task = tokio::spawn(async move {
            info!("Session store started");

            while let Some(command) = rx.recv().await {
                match command {
                    Command::Apply(action) => {
                        debug!("Applying store action: {}", action.name());
                        state_tx.send_if_modified(|state| state.apply(action));
                    }
                    Command::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }

            info!("Session store stopped");
        });

        (Self { tx, state_rx }, task)
    }

    /// Enqueue an action. Silently dropped if the store has shut down.
    pub fn dispatch(&self, action: Action) {
        if self.tx.send(Command::Apply(action)).is_err() {
            debug!("Session store is gone; action dropped");
        }
    }

    /// Resolves once every action dispatched before this call has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Current state
    pub fn snapshot(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Change notifications for rendering
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    pub fn start(
        &self,
        interview_type: InterviewType,
        tier: PlanTier,
        id: impl Into<String>,
        endpoint: impl Into<String>,
    ) {
        self.dispatch(Action::Start {
            interview_type,
            tier,
            id: id.into(),
            endpoint: endpoint.into(),
        });
    }

    pub fn end(&self) {
        self.dispatch(Action::End);
    }

    pub fn append_message(
        &self,
        origin: Origin,
        content: impl Into<String>,
        audio_ref: Option<String>,
    ) {
        self.dispatch(Action::AppendMessage {
            origin,
            content: content.into(),
            audio_ref,
        });
    }

    pub fn append_feedback(
        &self,
        message_id: impl Into<String>,
        category: FeedbackCategory,
        content: impl Into<String>,
        score: Option<f32>,
        suggestions: Option<Vec<String>>,
    ) {
        self.dispatch(Action::AppendFeedback {
            message_id: message_id.into(),
            category,
            content: content.into(),
            score,
            suggestions,
        });
    }

    pub fn set_capturing(&self, capturing: bool) {
        self.dispatch(Action::SetCapturing(capturing));
    }

    pub fn set_connected(&self, connected: bool) {
        self.dispatch(Action::SetConnected(connected));
    }

    pub fn set_error(&self, error: Option<String>) {
        self.dispatch(Action::SetError(error));
    }

    pub fn reset(&self) {
        self.dispatch(Action::Reset);
    }
}
