use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which trigger asked for a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollRequestKind {
    Initial,
    Poll,
    Idle,
    Round,
    Hibernation,
    Retry,
    Awaken,
    Drumbeat,
}

impl PollRequestKind {
    /// Kinds which report regardless of deviation
    pub fn ignores_deviation(&self) -> bool {
        matches!(
            self,
            PollRequestKind::Idle
                | PollRequestKind::Hibernation
                | PollRequestKind::Retry
                | PollRequestKind::Awaken
        )
    }
}

impl std::fmt::Display for PollRequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PollRequestKind::Initial => "initial",
            PollRequestKind::Poll => "poll",
            PollRequestKind::Idle => "idle",
            PollRequestKind::Round => "round",
            PollRequestKind::Hibernation => "hibernation",
            PollRequestKind::Retry => "retry",
            PollRequestKind::Awaken => "awaken",
            PollRequestKind::Drumbeat => "drumbeat",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRequest {
    pub kind: PollRequestKind,
    pub at: DateTime<Utc>,
}

impl PollRequest {
    pub fn now(kind: PollRequestKind) -> Self {
        Self {
            kind,
            at: Utc::now(),
        }
    }
}
