use crate::connection::SessionCommand;
use crate::message::{Dict, Id, Payload};
use tokio::sync::mpsc;

pub const ERROR_CANCELED: &str = "wamp.error.canceled";

#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub details: Dict,
    pub payload: Payload,
}

/// A procedure this client provides to the router.
///
/// Dropping the registration stops delivery; pending invocations are
/// answered with `wamp.error.canceled`. Use `Session::unregister` to remove
/// it from the router.
#[derive(Debug)]
pub struct Registration {
    pub(crate) registration_id: Id,
    pub(crate) procedure: String,
    pub(crate) invocations: mpsc::Receiver<Invocation>,
}

impl Registration {
    pub fn id(&self) -> Id {
        self.registration_id
    }

    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    pub async fn next_invocation(&mut self) -> Option<Invocation> {
        self.invocations.recv().await
    }
}

/// A call routed to one of our registrations. Must be answered once.
#[derive(Debug)]
pub struct Invocation {
    pub request_id: Id,
    pub details: Dict,
    pub payload: Payload,
    pub(crate) command_tx: Option<mpsc::UnboundedSender<SessionCommand>>,
}

impl Invocation {
    pub fn respond(mut self, payload: Payload) {
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(SessionCommand::Yield {
                request_id: self.request_id,
                payload,
            });
        }
    }

    pub fn fail(mut self, error: impl Into<String>, payload: Payload) {
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(SessionCommand::InvocationError {
                request_id: self.request_id,
                error: error.into(),
                payload,
            });
        }
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(SessionCommand::InvocationError {
                request_id: self.request_id,
                error: ERROR_CANCELED.to_string(),
                payload: Payload::new(),
            });
        }
    }
}
