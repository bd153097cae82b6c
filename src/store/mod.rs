//! Session state store
//!
//! Canonical session record, ordered transcript and feedback logs, and the
//! connectivity flags, mutated only through named actions applied by a single
//! consumer task.

mod handle;
mod state;

pub use handle::StoreHandle;
pub use state::{
    Action, Connectivity, FeedbackCategory, FeedbackItem, InterviewType, Origin, PlanTier,
    Session, SessionState, SessionStatus, TranscriptMessage,
};
