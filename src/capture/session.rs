//! Capture session lifecycle
//!
//! At most one session is active. A session moves through one transition
//! function:
//!
//! ```text
//!            Start                 Complete
//!   Idle ───────────▶ Active ───────────────▶ Completed
//!     ▲                │  │  Fail
//!     │ Reset          │  └─────────────────▶ Failed
//!     │                │ Supersede / Cancel
//!     └── terminal ◀───┴───────────────────▶ Superseded / Cancelled
//! ```
//!
//! Terminal states hold no current session, so a new `Start` is always
//! accepted from them. The cancellation token handed to the replay task is
//! cancelled on supersede and cancel.

use std::fmt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::types::SessionId;
use crate::util::now_millis;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active {
        session_id: SessionId,
        fingerprint: String,
    },
    Completed {
        session_id: SessionId,
    },
    Failed {
        session_id: SessionId,
        error: String,
    },
    Superseded {
        session_id: SessionId,
    },
    Cancelled {
        session_id: SessionId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Start {
        session_id: SessionId,
        fingerprint: String,
    },
    Complete {
        session_id: SessionId,
    },
    Fail {
        session_id: SessionId,
        error: String,
    },
    Supersede {
        session_id: SessionId,
    },
    Cancel {
        session_id: SessionId,
    },
    Reset,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {active} is still active")]
    StillActive { active: SessionId },
    #[error("session {requested} is not the current session")]
    NotCurrent { requested: SessionId },
}

impl SessionState {
    /// Apply an event, returning the next state
    pub fn apply(&self, event: SessionEvent) -> Result<SessionState, SessionError> {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (S::Active { session_id, .. }, E::Start { .. }) => Err(SessionError::StillActive {
                active: *session_id,
            }),
            (
                _,
                E::Start {
                    session_id,
                    fingerprint,
                },
            ) => Ok(S::Active {
                session_id,
                fingerprint,
            }),
            (S::Active { session_id, .. }, E::Reset) => Err(SessionError::StillActive {
                active: *session_id,
            }),
            (_, E::Reset) => Ok(S::Idle),
            (S::Active { session_id, .. }, event) => {
                let current = *session_id;
                let (requested, next) = match event {
                    E::Complete { session_id } => (session_id, S::Completed { session_id }),
                    E::Fail { session_id, error } => (session_id, S::Failed { session_id, error }),
                    E::Supersede { session_id } => (session_id, S::Superseded { session_id }),
                    E::Cancel { session_id } => (session_id, S::Cancelled { session_id }),
                    E::Start { .. } | E::Reset => unreachable!("handled above"),
                };
                if requested == current {
                    Ok(next)
                } else {
                    Err(SessionError::NotCurrent { requested })
                }
            }
            (_, E::Complete { session_id })
            | (_, E::Fail { session_id, .. })
            | (_, E::Supersede { session_id })
            | (_, E::Cancel { session_id }) => Err(SessionError::NotCurrent {
                requested: session_id,
            }),
        }
    }

    /// Id of the active session, if any
    pub fn current_id(&self) -> Option<SessionId> {
        match self {
            SessionState::Active { session_id, .. } => Some(*session_id),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active { .. })
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Active { session_id, .. } => write!(f, "active ({})", session_id),
            SessionState::Completed { session_id } => write!(f, "completed ({})", session_id),
            SessionState::Failed { session_id, error } => {
                write!(f, "failed ({}): {}", session_id, error)
            }
            SessionState::Superseded { session_id } => write!(f, "superseded ({})", session_id),
            SessionState::Cancelled { session_id } => write!(f, "cancelled ({})", session_id),
        }
    }
}

/// Handle given to the task that replays one session
#[derive(Debug, Clone)]
pub struct SessionTicket {
    id: SessionId,
    token: CancellationToken,
}

impl SessionTicket {
    pub fn new(id: SessionId, token: CancellationToken) -> Self {
        Self { id, token }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// False once the session was superseded or cancelled
    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Resolves when the session is superseded or cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Owner of the session state and the active session's cancellation token
#[derive(Debug)]
pub struct SessionManager {
    state: SessionState,
    token: Option<CancellationToken>,
    last_id: SessionId,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            token: None,
            last_id: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn current_id(&self) -> Option<SessionId> {
        self.state.current_id()
    }

    /// True iff `id` is the active session and has not been cancelled
    pub fn is_current(&self, id: SessionId) -> bool {
        self.current_id() == Some(id)
            && self.token.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    /// Strictly increasing, wall-clock based ids
    fn next_id(&mut self) -> SessionId {
        let now = now_millis().max(0) as SessionId;
        let id = now.max(self.last_id + 1);
        self.last_id = id;
        id
    }

    /// Start a new session; fails while another one is active
    pub fn begin(&mut self, fingerprint: impl Into<String>) -> Result<SessionTicket, SessionError> {
        if let Some(active) = self.current_id() {
            return Err(SessionError::StillActive { active });
        }
        let session_id = self.next_id();
        self.state = self.state.apply(SessionEvent::Start {
            session_id,
            fingerprint: fingerprint.into(),
        })?;
        let token = CancellationToken::new();
        self.token = Some(token.clone());
        Ok(SessionTicket::new(session_id, token))
    }

    /// Supersede the active session, cancelling its token
    pub fn supersede_active(&mut self) -> Option<SessionId> {
        let session_id = self.current_id()?;
        self.stop(SessionEvent::Supersede { session_id })
    }

    /// Cancel the active session without starting another
    pub fn cancel_active(&mut self) -> Option<SessionId> {
        let session_id = self.current_id()?;
        self.stop(SessionEvent::Cancel { session_id })
    }

    fn stop(&mut self, event: SessionEvent) -> Option<SessionId> {
        let next = self.state.apply(event).ok()?;
        let id = self.current_id();
        self.state = next;
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        id
    }

    pub fn complete(&mut self, session_id: SessionId) -> Result<(), SessionError> {
        self.state = self.state.apply(SessionEvent::Complete { session_id })?;
        self.token = None;
        Ok(())
    }

    pub fn fail(&mut self, session_id: SessionId, error: impl Into<String>) -> Result<(), SessionError> {
        self.state = self.state.apply(SessionEvent::Fail {
            session_id,
            error: error.into(),
        })?;
        self.token = None;
        Ok(())
    }

    /// Return a finished manager to `Idle`
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.state = self.state.apply(SessionEvent::Reset)?;
        Ok(())
    }
}
