use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Kind of practice interview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterviewType {
    General,
    Behavioral,
    Technical,
}

impl InterviewType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewType::General => "general",
            InterviewType::Behavioral => "behavioral",
            InterviewType::Technical => "technical",
        }
    }
}

impl fmt::Display for InterviewType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterviewType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "general" => Ok(InterviewType::General),
            "behavioral" => Ok(InterviewType::Behavioral),
            "technical" => Ok(InterviewType::Technical),
            other => Err(format!("unknown interview type: {}", other)),
        }
    }
}

/// Feature-access level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Premium,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Premium => "premium",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "premium" => Ok(PlanTier::Premium),
            other => Err(format!("unknown plan tier: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Setup,
    Active,
    Paused,
    Completed,
    Error,
}

/// The live session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub interview_type: InterviewType,
    pub status: SessionStatus,
    pub tier: PlanTier,
    pub start_time: DateTime<Utc>,
    /// Set exactly once, on the transition into `Completed`
    pub end_time: Option<DateTime<Utc>>,
    /// Duplex channel endpoint for this session
    pub endpoint: String,
}

/// Who produced a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// The candidate speaking into the microphone
    Local,
    /// The remote interviewer agent
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub id: String,
    pub origin: Origin,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub audio_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackCategory {
    Basic,
    Detailed,
}

impl FeedbackCategory {
    /// Category used when the remote does not say which one it sent
    pub fn default_for(tier: PlanTier) -> Self {
        match tier {
            PlanTier::Free => FeedbackCategory::Basic,
            PlanTier::Premium => FeedbackCategory::Detailed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub id: String,
    /// Transcript message this feedback refers to. Lookup only; may dangle.
    pub message_id: String,
    pub category: FeedbackCategory,
    pub content: String,
    /// Score in [0, 100]
    pub score: Option<f32>,
    pub suggestions: Option<Vec<String>>,
}

/// Ephemeral device/transport flags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Connectivity {
    pub connected: bool,
    pub capturing: bool,
    pub last_error: Option<String>,
}

/// Every mutation the store accepts. Applied one at a time, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Start {
        interview_type: InterviewType,
        tier: PlanTier,
        id: String,
        endpoint: String,
    },
    Activate,
    Pause,
    Resume,
    Fail {
        message: String,
    },
    End,
    AppendMessage {
        origin: Origin,
        content: String,
        audio_ref: Option<String>,
    },
    AppendFeedback {
        message_id: String,
        category: FeedbackCategory,
        content: String,
        score: Option<f32>,
        suggestions: Option<Vec<String>>,
    },
    SetCapturing(bool),
    SetConnected(bool),
    SetError(Option<String>),
    Reset,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Start { .. } => "start",
            Action::Activate => "activate",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Fail { .. } => "fail",
            Action::End => "end",
            Action::AppendMessage { .. } => "append_message",
            Action::AppendFeedback { .. } => "append_feedback",
            Action::SetCapturing(_) => "set_capturing",
            Action::SetConnected(_) => "set_connected",
            Action::SetError(_) => "set_error",
            Action::Reset => "reset",
        }
    }
}

/// Canonical, renderable view of one client context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session: Option<Session>,
    pub messages: Vec<TranscriptMessage>,
    pub feedback: Vec<FeedbackItem>,
    pub connectivity: Connectivity,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Option<SessionStatus> {
        self.session.as_ref().map(|s| s.status)
    }

    pub fn is_completed(&self) -> bool {
        self.status() == Some(SessionStatus::Completed)
    }

    /// Apply one action. Returns whether anything changed.
    ///
    /// Session-bound actions without a session are no-ops, never errors.
    pub fn apply(&mut self, action: Action) -> bool {
        let name = action.name();
        let changed = match action {
            Action::Start {
                interview_type,
                tier,
                id,
                endpoint,
            } => {
                self.session = Some(Session {
                    id,
                    interview_type,
                    status: SessionStatus::Setup,
                    tier,
                    start_time: Utc::now(),
                    end_time: None,
                    endpoint,
                });
                self.messages.clear();
                self.feedback.clear();
                self.connectivity.last_error = None;
                true
            }

            Action::Activate => self.transition(SessionStatus::Setup, SessionStatus::Active),
            Action::Pause => self.transition(SessionStatus::Active, SessionStatus::Paused),
            Action::Resume => self.transition(SessionStatus::Paused, SessionStatus::Active),

            Action::Fail { message } => match self.session.as_mut() {
                Some(session) => {
                    if matches!(
                        session.status,
                        SessionStatus::Setup | SessionStatus::Active | SessionStatus::Paused
                    ) {
                        session.status = SessionStatus::Error;
                    }
                    self.connectivity.last_error = Some(message);
                    true
                }
                None => false,
            },

            Action::End => match self.session.as_mut() {
                Some(session) if session.status != SessionStatus::Completed => {
                    session.status = SessionStatus::Completed;
                    if session.end_time.is_none() {
                        session.end_time = Some(Utc::now());
                    }
                    self.connectivity.capturing = false;
                    true
                }
                _ => false,
            },

            Action::AppendMessage {
                origin,
                content,
                audio_ref,
            } => {
                if self.session.is_none() {
                    false
                } else {
                    self.messages.push(TranscriptMessage {
                        id: uuid::Uuid::new_v4().to_string(),
                        origin,
                        content,
                        created_at: Utc::now(),
                        audio_ref,
                    });
                    true
                }
            }

            Action::AppendFeedback {
                message_id,
                category,
                content,
                score,
                suggestions,
            } => {
                if self.session.is_none() {
                    false
                } else {
                    self.feedback.push(FeedbackItem {
                        id: uuid::Uuid::new_v4().to_string(),
                        message_id,
                        category,
                        content,
                        score: score.filter(|s| s.is_finite()).map(|s| s.clamp(0.0, 100.0)),
                        suggestions,
                    });
                    true
                }
            }

            Action::SetCapturing(capturing) => {
                replace_if_changed(&mut self.connectivity.capturing, capturing)
            }
            Action::SetConnected(connected) => {
                replace_if_changed(&mut self.connectivity.connected, connected)
            }
            Action::SetError(error) => replace_if_changed(&mut self.connectivity.last_error, error),

            Action::Reset => {
                let changed = *self != SessionState::default();
                *self = SessionState::default();
                changed
            }
        };

        if !changed {
            debug!("Store action {} was a no-op", name);
        }
        changed
    }

    fn transition(&mut self, from: SessionStatus, to: SessionStatus) -> bool {
        match self.session.as_mut() {
            Some(session) if session.status == from => {
                session.status = to;
                true
            }
            _ => false,
        }
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}
