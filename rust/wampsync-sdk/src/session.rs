use crate::config::{SessionConfig, TransportConfig};
use crate::connection::{spawn_session_loop, SessionCommand, CLOSE_REALM};
use crate::content::ContentIdentifier;
use crate::error::{ProtocolError, RequestError, SubscriptionError};
use crate::machine::{Authenticator, SessionState};
use crate::message::{Dict, Id, Payload};
use crate::rpc::{CallResult, Registration};
use crate::subscription::Subscription;
use crate::transport::{Transport, WebSocketTransport};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

struct SessionInner {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    state_rx: watch::Receiver<SessionState>,
}

/// Handle to one WAMP session.
///
/// Cloning is cheap; every clone drives the same session task. The task
/// ends on ABORT, GOODBYE, transport loss, `disconnect`, or once the last
/// handle is dropped. A closed session never reconnects by itself.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Starts a session over `transport`. Must be called inside a Tokio runtime.
    pub fn start<T: Transport>(transport: T, config: SessionConfig) -> Self {
        Self::spawn(transport, config, None)
    }

    pub fn start_with_authenticator<T, A>(transport: T, config: SessionConfig, authenticator: A) -> Self
    where
        T: Transport,
        A: Authenticator,
    {
        Self::spawn(transport, config, Some(Arc::new(authenticator)))
    }

    pub fn connect_websocket(
        transport: TransportConfig,
        config: SessionConfig,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Self {
        Self::spawn(WebSocketTransport::new(transport), config, authenticator)
    }

    fn spawn<T: Transport>(
        transport: T,
        config: SessionConfig,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let state_rx =
            spawn_session_loop(transport, config, authenticator, &command_tx, command_rx);
        Self {
            inner: Arc::new(SessionInner {
                command_tx,
                state_rx,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state_rx.borrow().clone()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state_rx.clone()
    }

    pub fn session_id(&self) -> Option<Id> {
        self.inner.state_rx.borrow().session_id()
    }

    /// Waits for WELCOME and returns the session id.
    pub async fn established(&self) -> Result<Id, ProtocolError> {
        let mut rx = self.inner.state_rx.clone();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                SessionState::Established { session_id } => return Ok(session_id),
                SessionState::Aborted { reason, details } => {
                    return Err(ProtocolError::SessionAborted { reason, details })
                }
                SessionState::Disconnected => return Err(ProtocolError::SessionClosed),
                SessionState::Connecting | SessionState::Challenged => {}
            }
            if rx.changed().await.is_err() {
                // Task is gone; its last published state is final.
                let state = rx.borrow().clone();
                return match state {
                    SessionState::Established { session_id } => Ok(session_id),
                    SessionState::Aborted { reason, details } => {
                        Err(ProtocolError::SessionAborted { reason, details })
                    }
                    _ => Err(ProtocolError::SessionClosed),
                };
            }
        }
    }

    /// Subscribes to `content`, sharing the router subscription with other holders.
    ///
    /// Dropping the returned future before SUBSCRIBED arrives still cleans
    /// up the router side once the acknowledgement comes in.
    pub async fn subscribe(
        &self,
        content: ContentIdentifier,
    ) -> Result<Subscription, SubscriptionError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(SessionCommand::Subscribe { content, reply })
            .map_err(|_| SubscriptionError::SessionClosed)?;
        rx.await.map_err(|_| SubscriptionError::SessionClosed)?
    }

    /// Releases `subscription` and its associated children, waiting for
    /// UNSUBSCRIBED when it was the last holder.
    pub async fn unsubscribe(&self, mut subscription: Subscription) -> Result<(), SubscriptionError> {
        subscription.disarm();
        let (reply, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(SessionCommand::Unsubscribe {
                handle_id: subscription.id(),
                reply,
            })
            .map_err(|_| SubscriptionError::SessionClosed)?;
        rx.await.map_err(|_| SubscriptionError::SessionClosed)?
    }

    /// Ties `child` to `parent`: releasing the parent releases the child too.
    pub fn associate(&self, parent: &Subscription, child: &Subscription) {
        let _ = self.inner.command_tx.send(SessionCommand::Associate {
            parent: parent.id(),
            child: child.id(),
        });
    }

    pub async fn call(&self, procedure: &str, payload: Payload) -> Result<CallResult, RequestError> {
        self.call_with_options(procedure, Dict::new(), payload).await
    }

    pub async fn call_with_options(
        &self,
        procedure: &str,
        options: Dict,
        payload: Payload,
    ) -> Result<CallResult, RequestError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(SessionCommand::Call {
                procedure: procedure.to_string(),
                options,
                payload,
                reply,
            })
            .map_err(|_| RequestError::SessionClosed)?;
        rx.await.map_err(|_| RequestError::SessionClosed)?
    }

    /// Publishes to `topic`. With `acknowledge` the router's publication id is returned.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Payload,
        acknowledge: bool,
    ) -> Result<Option<Id>, RequestError> {
        let (reply, rx) = if acknowledge {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        self.inner
            .command_tx
            .send(SessionCommand::Publish {
                topic: topic.to_string(),
                options: Dict::new(),
                payload,
                reply,
            })
            .map_err(|_| RequestError::SessionClosed)?;
        match rx {
            Some(rx) => rx.await.map_err(|_| RequestError::SessionClosed)?,
            None => Ok(None),
        }
    }

    pub async fn register(&self, procedure: &str) -> Result<Registration, RequestError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(SessionCommand::Register {
                procedure: procedure.to_string(),
                options: Dict::new(),
                reply,
            })
            .map_err(|_| RequestError::SessionClosed)?;
        rx.await.map_err(|_| RequestError::SessionClosed)?
    }

    pub async fn unregister(&self, registration: Registration) -> Result<(), RequestError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(SessionCommand::Unregister {
                registration_id: registration.id(),
                reply,
            })
            .map_err(|_| RequestError::SessionClosed)?;
        rx.await.map_err(|_| RequestError::SessionClosed)?
    }

    /// Says GOODBYE and closes the transport. Returns once the session task has finished.
    pub async fn disconnect(&self) {
        self.disconnect_with_reason(CLOSE_REALM).await
    }

    pub async fn disconnect_with_reason(&self, reason: &str) {
        let (reply, rx) = oneshot::channel();
        let sent = self.inner.command_tx.send(SessionCommand::Disconnect {
            reason: reason.to_string(),
            reply,
        });
        if sent.is_ok() {
            let _ = rx.await;
        }
    }
}
