use crate::error::ProtocolError;
use crate::message::{Dict, Id};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Challenged,
    Established { session_id: Id },
    Aborted { reason: String, details: Dict },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Challenged => "challenged",
            SessionState::Established { .. } => "established",
            SessionState::Aborted { .. } => "aborted",
        }
    }

    pub fn session_id(&self) -> Option<Id> {
        match self {
            SessionState::Established { session_id } => Some(*session_id),
            _ => None,
        }
    }

    pub fn is_established(&self) -> bool {
        matches!(self, SessionState::Established { .. })
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handshake state machine.
///
/// ```text
/// disconnected --connect--> connecting --welcome--> established
/// connecting --challenge--> challenged --authenticated--> connecting
/// connecting | challenged --abort--> aborted
/// established --transport lost--> disconnected
/// ```
///
/// `Aborted` is terminal. Retrying means building a new session.
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    fn invalid(&self, event: &'static str) -> ProtocolError {
        ProtocolError::InvalidTransition {
            from: self.state.name(),
            event,
        }
    }

    pub fn connect(&mut self) -> Result<(), ProtocolError> {
        match self.state {
            SessionState::Disconnected => {
                self.state = SessionState::Connecting;
                Ok(())
            }
            _ => Err(self.invalid("connect")),
        }
    }

    pub fn challenge(&mut self) -> Result<(), ProtocolError> {
        match self.state {
            SessionState::Connecting => {
                self.state = SessionState::Challenged;
                Ok(())
            }
            _ => Err(self.invalid("challenge")),
        }
    }

    pub fn authenticated(&mut self) -> Result<(), ProtocolError> {
        match self.state {
            SessionState::Challenged => {
                self.state = SessionState::Connecting;
                Ok(())
            }
            _ => Err(self.invalid("authenticate")),
        }
    }

    pub fn welcome(&mut self, session_id: Id) -> Result<(), ProtocolError> {
        match self.state {
            SessionState::Connecting => {
                self.state = SessionState::Established { session_id };
                Ok(())
            }
            _ => Err(self.invalid("welcome")),
        }
    }

    pub fn abort(&mut self, reason: &str, details: Dict) -> Result<(), ProtocolError> {
        match self.state {
            SessionState::Connecting | SessionState::Challenged => {
                self.state = SessionState::Aborted {
                    reason: reason.to_string(),
                    details,
                };
                Ok(())
            }
            _ => Err(self.invalid("abort")),
        }
    }

    /// Transport went away. An aborted session stays aborted.
    pub fn transport_lost(&mut self) {
        if !matches!(self.state, SessionState::Aborted { .. }) {
            self.state = SessionState::Disconnected;
        }
    }
}

/// Answers CHALLENGE messages during the handshake.
pub trait Authenticator: Send + Sync + 'static {
    /// Signature for the challenge, or `None` to give up and abort.
    fn respond(&self, auth_method: &str, extra: &Dict) -> Option<String>;
}

impl<F> Authenticator for F
where
    F: Fn(&str, &Dict) -> Option<String> + Send + Sync + 'static,
{
    fn respond(&self, auth_method: &str, extra: &Dict) -> Option<String> {
        self(auth_method, extra)
    }
}

#[derive(Debug, Clone)]
pub struct TicketAuthenticator {
    ticket: String,
}

impl TicketAuthenticator {
    pub fn new(ticket: impl Into<String>) -> Self {
        Self {
            ticket: ticket.into(),
        }
    }
}

impl Authenticator for TicketAuthenticator {
    fn respond(&self, auth_method: &str, _extra: &Dict) -> Option<String> {
        (auth_method == "ticket").then(|| self.ticket.clone())
    }
}
