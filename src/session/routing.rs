use tracing::debug;

use crate::channel::{WireMessage, WirePayload};
use crate::error::ApplicationError;
use crate::store::{Action, FeedbackCategory, PlanTier};

/// The live session an inbound message is checked against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    pub tier: PlanTier,
}

/// What to do with one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Store(Action),
    /// Remote ended the session
    End,
    Playback(Vec<u8>),
    Ignore,
}

/// Map an inbound wire message to its effect. Messages stamped with another
/// session's id are ignored.
pub fn route(message: WireMessage, context: &SessionContext) -> Route {
    if let Some(id) = message.session_id.as_deref() {
        if id != context.session_id {
            debug!(
                "Ignoring {} frame for session {} (current: {})",
                message.payload.kind(),
                id,
                context.session_id
            );
            return Route::Ignore;
        }
    }

    match message.payload {
        WirePayload::Transcript(t) => Route::Store(Action::AppendMessage {
            origin: t.speaker.into(),
            content: t.text,
            audio_ref: t.audio_url,
        }),
        WirePayload::Feedback(f) => Route::Store(Action::AppendFeedback {
            message_id: f.message_id,
            category: f
                .category
                .unwrap_or_else(|| FeedbackCategory::default_for(context.tier)),
            content: f.content,
            score: f.score,
            suggestions: f.suggestions,
        }),
        WirePayload::Control(c) if c.is_ended() => Route::End,
        WirePayload::Control(c) => {
            debug!("Ignoring control frame: {:?}", c);
            Route::Ignore
        }
        WirePayload::Error(e) => {
            let error = ApplicationError::from(e);
            debug!("{}", error);
            Route::Store(Action::SetError(Some(error.user_message())))
        }
        WirePayload::Audio(bytes) => Route::Playback(bytes),
    }
}
