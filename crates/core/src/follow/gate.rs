use serde::{Deserialize, Serialize};

/// Pending close of the gate, fired by [`super::FollowMode::poll`] once the
/// host clock reaches `deadline_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeferredClose {
    pub deadline_ms: f64,
    pub fade_ms: f64,
}

impl DeferredClose {
    pub fn is_due(&self, now_ms: f64) -> bool {
        now_ms >= self.deadline_ms
    }
}

/// Audio gate. Only an open gate can carry a close timer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum GateState {
    #[default]
    Closed,
    Open { close_timer: Option<DeferredClose> },
}

impl GateState {
    pub fn is_open(&self) -> bool {
        matches!(self, GateState::Open { .. })
    }

    pub fn close_timer(&self) -> Option<DeferredClose> {
        match self {
            GateState::Open { close_timer } => *close_timer,
            GateState::Closed => None,
        }
    }

    /// Opens the gate with `timer` as its only pending close. Whatever timer
    /// was armed before is replaced in the same step.
    pub fn arm(&mut self, timer: DeferredClose) {
        *self = GateState::Open {
            close_timer: Some(timer),
        };
    }

    /// Drops the pending close, leaving the gate as it is.
    pub fn cancel(&mut self) {
        if let GateState::Open { close_timer } = self {
            *close_timer = None;
        }
    }

    /// Takes the timer out if it is due at `now_ms` and closes the gate.
    pub fn take_due(&mut self, now_ms: f64) -> Option<DeferredClose> {
        match *self {
            GateState::Open {
                close_timer: Some(timer),
            } if timer.is_due(now_ms) => {
                *self = GateState::Closed;
                Some(timer)
            }
            _ => None,
        }
    }
}
