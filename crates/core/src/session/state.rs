use std::fmt;

use parking_lot::Mutex;

use crate::error::{CaptureError, Result};

/// Capture session lifecycle.
///
/// ```text
/// Disconnected -> Negotiating -> Ready -> Playing -> Closed
///                      |           |                  ^
///                      +-----------+------------------+
/// ```
///
/// `Closed` is terminal; reconnecting means building a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// DESCRIBE/SETUP in progress.
    Negotiating,
    /// All media wired, delivery not started.
    Ready,
    /// PLAY issued, packets flowing.
    Playing,
    Closed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Negotiating => "Negotiating",
            Self::Ready => "Ready",
            Self::Playing => "Playing",
            Self::Closed => "Closed",
        }
    }

    fn can_enter(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Negotiating)
                | (Negotiating, Ready)
                | (Ready, Playing)
                | (Negotiating | Ready | Playing, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared, lock-guarded state cell with checked transitions.
#[derive(Debug)]
pub(crate) struct StateCell {
    state: Mutex<SessionState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Disconnected),
        }
    }

    pub(crate) fn get(&self) -> SessionState {
        *self.state.lock()
    }

    /// Move to `next`, failing if the transition is not allowed.
    pub(crate) fn transition(&self, next: SessionState) -> Result<()> {
        let mut state = self.state.lock();
        if !state.can_enter(next) {
            return Err(CaptureError::InvalidState {
                expected: expected_before(next),
                found: state.name(),
            });
        }
        tracing::debug!(from = %*state, to = %next, "session state");
        *state = next;
        Ok(())
    }

    /// Enter `Closed` from any state. Returns false if already closed.
    pub(crate) fn close(&self) -> bool {
        let mut state = self.state.lock();
        if *state == SessionState::Closed {
            return false;
        }
        tracing::debug!(from = %*state, "session state -> Closed");
        *state = SessionState::Closed;
        true
    }
}

fn expected_before(next: SessionState) -> &'static str {
    match next {
        SessionState::Negotiating => "Disconnected",
        SessionState::Ready => "Negotiating",
        SessionState::Playing => "Ready",
        SessionState::Closed => "Negotiating, Ready or Playing",
        SessionState::Disconnected => "nothing",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_path() {
        let cell = StateCell::new();
        cell.transition(SessionState::Negotiating).unwrap();
        cell.transition(SessionState::Ready).unwrap();
        cell.transition(SessionState::Playing).unwrap();
        assert_eq!(cell.get(), SessionState::Playing);
        assert!(cell.close());
        assert!(!cell.close());
    }

    #[test]
    fn cannot_skip_or_resume() {
        let cell = StateCell::new();
        let err = cell.transition(SessionState::Playing).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::InvalidState {
                expected: "Ready",
                found: "Disconnected"
            }
        ));

        cell.transition(SessionState::Negotiating).unwrap();
        cell.close();
        assert!(cell.transition(SessionState::Negotiating).is_err());
        assert!(cell.transition(SessionState::Playing).is_err());
        assert_eq!(cell.get(), SessionState::Closed);
    }
}
