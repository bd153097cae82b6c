//! Live interview orchestration
//!
//! `InterviewSession` owns one channel client and one capture pipeline and
//! wires them to the session store:
//! - inbound frames are routed to store actions in receipt order
//! - capture chunks go to the channel only while it is open
//! - ending a session sends the end control message, stops capture,
//!   disconnects, and only then marks the session completed

mod routing;
mod session;

pub use routing::{route, Route, SessionContext};
pub use session::InterviewSession;
