//! The session task.
//!
//! One task owns the transport, the handshake machine, the request table and
//! the subscription registry. Inbound frames are decoded and dispatched one
//! at a time; callers talk to the task through [`SessionCommand`]s.

use crate::config::SessionConfig;
use crate::content::ContentIdentifier;
use crate::correlation::{FailedRequest, RequestKind, RequestTable};
use crate::error::{ProtocolError, RequestError, SubscriptionError};
use crate::machine::{Authenticator, SessionMachine, SessionState};
use crate::message::{parse_frame, Dict, Id, MessageType, Payload, WampMessage};
use crate::registry::{
    SubscribeReply, SubscribeRequest, SubscriptionRegistry, UnsubscribeReply, UnsubscribeRequest,
};
use crate::rpc::{CallResult, Invocation, Registration};
use crate::subscription::{HandleId, SubscriptionEvent};
use crate::transport::{Transport, TransportEvent};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, Interval};

pub const CLOSE_REALM: &str = "wamp.close.close_realm";
pub const GOODBYE_AND_OUT: &str = "wamp.close.goodbye_and_out";
pub const AUTHENTICATION_FAILED: &str = "wamp.error.authentication_failed";
pub const NO_SUCH_REGISTRATION: &str = "wamp.error.no_such_registration";

pub(crate) type CallReply = oneshot::Sender<Result<CallResult, RequestError>>;
pub(crate) type PublishReply = oneshot::Sender<Result<Option<Id>, RequestError>>;
pub(crate) type RegisterReply = oneshot::Sender<Result<Registration, RequestError>>;
pub(crate) type UnregisterReply = oneshot::Sender<Result<(), RequestError>>;

pub(crate) enum SessionCommand {
    Subscribe {
        content: ContentIdentifier,
        reply: SubscribeReply,
    },
    Unsubscribe {
        handle_id: HandleId,
        reply: UnsubscribeReply,
    },
    Associate {
        parent: HandleId,
        child: HandleId,
    },
    Call {
        procedure: String,
        options: Dict,
        payload: Payload,
        reply: CallReply,
    },
    Publish {
        topic: String,
        options: Dict,
        payload: Payload,
        reply: Option<PublishReply>,
    },
    Register {
        procedure: String,
        options: Dict,
        reply: RegisterReply,
    },
    Unregister {
        registration_id: Id,
        reply: UnregisterReply,
    },
    Yield {
        request_id: Id,
        payload: Payload,
    },
    InvocationError {
        request_id: Id,
        error: String,
        payload: Payload,
    },
    Disconnect {
        reason: String,
        reply: oneshot::Sender<()>,
    },
}

enum Pending {
    Subscribe { key: String },
    Unsubscribe { key: String },
    /// UNSUBSCRIBE for a subscription nobody holds any more.
    Reclaim { subscription_id: Id },
    Call(CallReply),
    Publish(PublishReply),
    Register { procedure: String, reply: RegisterReply },
    Unregister { registration_id: Id, reply: UnregisterReply },
}

enum Flow {
    Continue,
    Stop,
}

pub(crate) fn spawn_session_loop<T: Transport>(
    transport: T,
    config: SessionConfig,
    authenticator: Option<Arc<dyn Authenticator>>,
    command_tx: &mpsc::UnboundedSender<SessionCommand>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
) -> watch::Receiver<SessionState> {
    let mut machine = SessionMachine::new();
    // A fresh machine always accepts connect.
    let _ = machine.connect();
    let (state_tx, state_rx) = watch::channel(machine.state().clone());
    let (registry, release_rx) = SubscriptionRegistry::new(config.event_buffer);

    let actor = SessionActor {
        requests: RequestTable::new(config.request_timeout),
        transport,
        config,
        authenticator,
        machine,
        state_tx,
        registry,
        registrations: HashMap::new(),
        queued: VecDeque::new(),
        abandoned_subscribes: HashSet::new(),
        command_tx: command_tx.downgrade(),
        disconnect_waiters: Vec::new(),
    };
    tokio::spawn(actor.run(command_rx, release_rx));
    state_rx
}

struct SessionActor<T: Transport> {
    transport: T,
    config: SessionConfig,
    authenticator: Option<Arc<dyn Authenticator>>,
    machine: SessionMachine,
    state_tx: watch::Sender<SessionState>,
    requests: RequestTable<Pending>,
    registry: SubscriptionRegistry,
    registrations: HashMap<Id, mpsc::Sender<Invocation>>,
    queued: VecDeque<SessionCommand>,
    /// SUBSCRIBE request ids that timed out locally but may still be acknowledged.
    abandoned_subscribes: HashSet<Id>,
    command_tx: mpsc::WeakUnboundedSender<SessionCommand>,
    disconnect_waiters: Vec<oneshot::Sender<()>>,
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl<T: Transport> SessionActor<T> {
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
        mut release_rx: mpsc::UnboundedReceiver<HandleId>,
    ) {
        let mut events = match self.transport.connect().await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!("Connection failed: {}", e);
                self.shutdown();
                return;
            }
        };

        let sweep_period = self.config.sweep_interval;
        let mut sweep = interval_at(Instant::now() + sweep_period, sweep_period);
        let mut keepalive = self
            .config
            .ping_interval
            .map(|period| interval_at(Instant::now() + period, period));

        loop {
            let flow = tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Connected) => self.on_connected().await,
                    Some(TransportEvent::Frame(text)) => self.on_frame(&text).await,
                    Some(TransportEvent::Disconnected(error)) => {
                        match error {
                            Some(e) => tracing::warn!("Transport lost: {}", e),
                            None => tracing::info!("Transport closed"),
                        }
                        Flow::Stop
                    }
                    None => Flow::Stop,
                },
                cmd = command_rx.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd).await,
                    None => self.close(CLOSE_REALM).await,
                },
                Some(handle_id) = release_rx.recv() => self.on_release(handle_id, None).await,
                _ = sweep.tick() => self.expire_requests().await,
                _ = tick(&mut keepalive) => self.ping().await,
            };
            if let Flow::Stop = flow {
                break;
            }
        }

        self.shutdown();
    }

    fn publish_state(&self) {
        let state = self.machine.state().clone();
        tracing::info!("Session {}", state);
        self.state_tx.send_replace(state);
    }

    async fn send(&mut self, message: WampMessage) -> Flow {
        let frame = match message.to_text() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to encode {}: {}", message.message_type(), e);
                return Flow::Continue;
            }
        };
        match self.transport.send(frame).await {
            Ok(()) => Flow::Continue,
            Err(e) => {
                tracing::error!("Failed to send {}: {}", message.message_type(), e);
                Flow::Stop
            }
        }
    }

    fn hello_details(&self) -> Dict {
        let mut details = Dict::new();
        details.insert("agent".into(), Value::from(self.config.agent.as_str()));
        let roles: Dict = self
            .config
            .roles
            .iter()
            .map(|role| (role.clone(), json!({})))
            .collect();
        details.insert("roles".into(), Value::Object(roles));
        if !self.config.authmethods.is_empty() {
            details.insert(
                "authmethods".into(),
                Value::from(self.config.authmethods.clone()),
            );
        }
        if let Some(authid) = &self.config.authid {
            details.insert("authid".into(), Value::from(authid.as_str()));
        }
        if let Some(authrole) = &self.config.authrole {
            details.insert("authrole".into(), Value::from(authrole.as_str()));
        }
        if let Some(authextra) = &self.config.authextra {
            details.insert("authextra".into(), Value::Object(authextra.clone()));
        }
        details
    }

    async fn on_connected(&mut self) -> Flow {
        let hello = WampMessage::Hello {
            realm: self.config.realm.clone(),
            details: self.hello_details(),
        };
        tracing::debug!("Joining realm {}", self.config.realm);
        self.send(hello).await
    }

    async fn on_frame(&mut self, text: &str) -> Flow {
        match parse_frame(text) {
            Ok(message) => self.on_message(message).await,
            Err(e) => {
                let err = ProtocolError::from(e);
                tracing::warn!("Dropping frame: {}", err);
                Flow::Continue
            }
        }
    }

    async fn on_message(&mut self, message: WampMessage) -> Flow {
        match message {
            WampMessage::Challenge { auth_method, extra } => {
                self.on_challenge(&auth_method, &extra).await
            }
            WampMessage::Welcome { session_id, .. } => {
                if let Err(e) = self.machine.welcome(session_id) {
                    tracing::warn!("Ignoring WELCOME: {}", e);
                    return Flow::Continue;
                }
                self.registry.set_session_id(session_id);
                self.publish_state();
                self.flush_queue().await
            }
            WampMessage::Abort { details, reason } => {
                match self.machine.abort(&reason, details) {
                    Ok(()) => {
                        tracing::warn!("Session aborted by router: {}", reason);
                        self.publish_state();
                    }
                    Err(e) => tracing::warn!("ABORT after handshake ({}): {}", reason, e),
                }
                let _ = self.transport.disconnect(&reason).await;
                Flow::Stop
            }
            WampMessage::Goodbye { reason, .. } => {
                tracing::info!("Router said goodbye: {}", reason);
                if reason != GOODBYE_AND_OUT {
                    let _ = self
                        .send(WampMessage::Goodbye {
                            details: Dict::new(),
                            reason: GOODBYE_AND_OUT.to_string(),
                        })
                        .await;
                }
                let _ = self.transport.disconnect(&reason).await;
                Flow::Stop
            }
            WampMessage::Event {
                subscription_id,
                publication_id,
                details,
                payload,
            } => {
                let event = SubscriptionEvent {
                    publication_id,
                    details,
                    payload,
                };
                if !self.registry.dispatch(subscription_id, event) {
                    tracing::debug!("EVENT for unknown subscription {}", subscription_id);
                }
                Flow::Continue
            }
            WampMessage::Invocation {
                request_id,
                registration_id,
                details,
                payload,
            } => {
                self.on_invocation(request_id, registration_id, details, payload)
                    .await
            }
            WampMessage::Unsubscribed {
                request_id: 0,
                details,
            } => {
                self.on_revoked(&details);
                Flow::Continue
            }
            message @ (WampMessage::Subscribed { .. }
            | WampMessage::Unsubscribed { .. }
            | WampMessage::Published { .. }
            | WampMessage::Result { .. }
            | WampMessage::Registered { .. }
            | WampMessage::Unregistered { .. }
            | WampMessage::Error { .. }) => self.on_response(message).await,
            other => {
                tracing::warn!("Unexpected {} from router", other.message_type());
                Flow::Continue
            }
        }
    }

    fn on_revoked(&mut self, details: &Dict) {
        let Some(subscription_id) = details.get("subscription").and_then(Value::as_u64) else {
            tracing::warn!("Revocation without a subscription id: {:?}", details);
            return;
        };
        let reason = details
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("wamp.error.revoked");
        if !self.registry.revoke(subscription_id, reason) {
            tracing::debug!("Revocation for unknown subscription {}", subscription_id);
        }
    }

    async fn on_challenge(&mut self, auth_method: &str, extra: &Dict) -> Flow {
        if let Err(e) = self.machine.challenge() {
            tracing::warn!("Ignoring CHALLENGE: {}", e);
            return Flow::Continue;
        }
        self.publish_state();

        let signature = self
            .authenticator
            .as_ref()
            .and_then(|auth| auth.respond(auth_method, extra));
        match signature {
            Some(signature) => {
                let flow = self
                    .send(WampMessage::Authenticate {
                        signature,
                        extra: Dict::new(),
                    })
                    .await;
                if let Flow::Stop = flow {
                    return flow;
                }
                let _ = self.machine.authenticated();
                self.publish_state();
                Flow::Continue
            }
            None => {
                tracing::warn!("No response to {} challenge, aborting", auth_method);
                let mut details = Dict::new();
                details.insert(
                    "message".into(),
                    Value::from(format!("cannot answer {} challenge", auth_method)),
                );
                let _ = self
                    .send(WampMessage::Abort {
                        details: details.clone(),
                        reason: AUTHENTICATION_FAILED.to_string(),
                    })
                    .await;
                let _ = self.machine.abort(AUTHENTICATION_FAILED, details);
                self.publish_state();
                let _ = self.transport.disconnect(AUTHENTICATION_FAILED).await;
                Flow::Stop
            }
        }
    }

    async fn on_response(&mut self, message: WampMessage) -> Flow {
        let request_id = match &message {
            WampMessage::Subscribed { request_id, .. }
            | WampMessage::Unsubscribed { request_id, .. }
            | WampMessage::Published { request_id, .. }
            | WampMessage::Result { request_id, .. }
            | WampMessage::Registered { request_id, .. }
            | WampMessage::Unregistered { request_id }
            | WampMessage::Error { request_id, .. } => *request_id,
            _ => return Flow::Continue,
        };
        match &message {
            WampMessage::Subscribed {
                subscription_id, ..
            } if self.abandoned_subscribes.remove(&request_id) => {
                return self.reclaim(*subscription_id).await;
            }
            WampMessage::Error { request_type, .. }
                if *request_type == MessageType::Subscribe.code()
                    && self.abandoned_subscribes.remove(&request_id) =>
            {
                tracing::debug!("Late ERROR for abandoned subscribe {}", request_id);
                return Flow::Continue;
            }
            _ => {}
        }
        let pending = match self.requests.resolve(request_id, &message) {
            Ok(pending) => pending,
            Err(unmatched) => {
                tracing::warn!(
                    "Dropping unmatched {} for request {}: {:?}",
                    message.message_type(),
                    request_id,
                    unmatched
                );
                return Flow::Continue;
            }
        };

        match (pending.context, message) {
            (Pending::Subscribe { key }, WampMessage::Subscribed { subscription_id, .. }) => {
                tracing::debug!("Subscribed to {} as {}", key, subscription_id);
                match self.registry.on_subscribed(&key, subscription_id) {
                    Some(request) => self.send_unsubscribe(request).await,
                    None => Flow::Continue,
                }
            }
            (Pending::Subscribe { key }, WampMessage::Error { error, .. }) => {
                self.registry.on_subscribe_failed(&key, &error);
                Flow::Continue
            }
            (Pending::Unsubscribe { key }, WampMessage::Unsubscribed { .. }) => {
                tracing::debug!("Unsubscribed from {}", key);
                match self.registry.on_unsubscribed(&key) {
                    Some(request) => self.send_subscribe(request).await,
                    None => Flow::Continue,
                }
            }
            (Pending::Unsubscribe { key }, WampMessage::Error { error, .. }) => {
                match self.registry.on_unsubscribe_failed(&key, &error) {
                    Some(request) => self.send_subscribe(request).await,
                    None => Flow::Continue,
                }
            }
            (Pending::Reclaim { subscription_id }, WampMessage::Unsubscribed { .. }) => {
                tracing::debug!("Reclaimed subscription {}", subscription_id);
                Flow::Continue
            }
            (Pending::Call(reply), WampMessage::Result { details, payload, .. }) => {
                let _ = reply.send(Ok(CallResult { details, payload }));
                Flow::Continue
            }
            (Pending::Publish(reply), WampMessage::Published { publication_id, .. }) => {
                let _ = reply.send(Ok(Some(publication_id)));
                Flow::Continue
            }
            (Pending::Register { procedure, reply }, WampMessage::Registered { registration_id, .. }) => {
                let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
                self.registrations.insert(registration_id, tx);
                let registration = Registration {
                    registration_id,
                    procedure,
                    invocations: rx,
                };
                if reply.send(Ok(registration)).is_err() {
                    tracing::debug!("Register caller went away, unregistering {}", registration_id);
                    let (reply, _) = oneshot::channel();
                    return self.send_unregister(registration_id, reply).await;
                }
                Flow::Continue
            }
            (Pending::Unregister { registration_id, reply }, WampMessage::Unregistered { .. }) => {
                self.registrations.remove(&registration_id);
                let _ = reply.send(Ok(()));
                Flow::Continue
            }
            (pending, WampMessage::Error { error, details, payload, .. }) => {
                let err = RequestError::Remote {
                    error,
                    details,
                    payload,
                };
                match pending {
                    Pending::Call(reply) => {
                        let _ = reply.send(Err(err));
                    }
                    Pending::Publish(reply) => {
                        let _ = reply.send(Err(err));
                    }
                    Pending::Register { reply, .. } => {
                        let _ = reply.send(Err(err));
                    }
                    Pending::Unregister { reply, .. } => {
                        let _ = reply.send(Err(err));
                    }
                    Pending::Reclaim { subscription_id } => {
                        tracing::warn!("Router refused to drop subscription {}: {}", subscription_id, err);
                    }
                    Pending::Subscribe { .. } | Pending::Unsubscribe { .. } => {}
                }
                Flow::Continue
            }
            (_, message) => {
                tracing::warn!("Response {} did not fit its request", message.message_type());
                Flow::Continue
            }
        }
    }

    async fn on_invocation(
        &mut self,
        request_id: Id,
        registration_id: Id,
        details: Dict,
        payload: Payload,
    ) -> Flow {
        let Some(tx) = self.registrations.get(&registration_id) else {
            return self
                .send(WampMessage::Error {
                    request_type: MessageType::Invocation.code(),
                    request_id,
                    details: Dict::new(),
                    error: NO_SUCH_REGISTRATION.to_string(),
                    payload: Payload::new(),
                })
                .await;
        };
        let invocation = Invocation {
            request_id,
            details,
            payload,
            command_tx: self.command_tx.upgrade(),
        };
        // A rejected invocation is dropped here and answers itself as canceled.
        if tx.try_send(invocation).is_err() {
            tracing::warn!(
                "Registration {} cannot take invocation {}",
                registration_id,
                request_id
            );
        }
        Flow::Continue
    }

    async fn on_command(&mut self, cmd: SessionCommand) -> Flow {
        match cmd {
            SessionCommand::Disconnect { reason, reply } => {
                self.disconnect_waiters.push(reply);
                self.close(&reason).await
            }
            SessionCommand::Unsubscribe { handle_id, reply } => {
                self.on_release(handle_id, Some(reply)).await
            }
            SessionCommand::Associate { parent, child } => {
                if !self.registry.associate(parent, child) {
                    tracing::warn!("Cannot associate subscription {} under {}", child, parent);
                }
                Flow::Continue
            }
            SessionCommand::Yield {
                request_id,
                payload,
            } => {
                self.send(WampMessage::Yield {
                    request_id,
                    options: Dict::new(),
                    payload,
                })
                .await
            }
            SessionCommand::InvocationError {
                request_id,
                error,
                payload,
            } => {
                self.send(WampMessage::Error {
                    request_type: MessageType::Invocation.code(),
                    request_id,
                    details: Dict::new(),
                    error,
                    payload,
                })
                .await
            }
            SessionCommand::Unregister {
                registration_id,
                reply,
            } => self.send_unregister(registration_id, reply).await,
            cmd if !self.machine.state().is_established() => {
                self.queued.push_back(cmd);
                Flow::Continue
            }
            cmd => self.dispatch(cmd).await,
        }
    }

    async fn flush_queue(&mut self) -> Flow {
        while let Some(cmd) = self.queued.pop_front() {
            if let Flow::Stop = self.dispatch(cmd).await {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Sends a request that needs an established session.
    async fn dispatch(&mut self, cmd: SessionCommand) -> Flow {
        match cmd {
            SessionCommand::Subscribe { content, reply } => {
                if reply.is_closed() {
                    return Flow::Continue;
                }
                match self.registry.acquire(content, reply) {
                    Some(request) => self.send_subscribe(request).await,
                    None => Flow::Continue,
                }
            }
            SessionCommand::Call {
                procedure,
                options,
                payload,
                reply,
            } => {
                let request_id = self.requests.next_request_id();
                self.requests
                    .register(request_id, RequestKind::Call, Pending::Call(reply));
                tracing::debug!("Calling {} (request {})", procedure, request_id);
                self.send(WampMessage::Call {
                    request_id,
                    options,
                    procedure,
                    payload,
                })
                .await
            }
            SessionCommand::Publish {
                topic,
                mut options,
                payload,
                reply,
            } => {
                let request_id = self.requests.next_request_id();
                if let Some(reply) = reply {
                    options.insert("acknowledge".into(), Value::Bool(true));
                    self.requests
                        .register(request_id, RequestKind::Publish, Pending::Publish(reply));
                }
                self.send(WampMessage::Publish {
                    request_id,
                    options,
                    topic,
                    payload,
                })
                .await
            }
            SessionCommand::Register {
                procedure,
                options,
                reply,
            } => {
                let request_id = self.requests.next_request_id();
                self.requests.register(
                    request_id,
                    RequestKind::Register,
                    Pending::Register {
                        procedure: procedure.clone(),
                        reply,
                    },
                );
                self.send(WampMessage::Register {
                    request_id,
                    options,
                    procedure,
                })
                .await
            }
            // Only queueable requests are routed here.
            _ => Flow::Continue,
        }
    }

    async fn send_subscribe(&mut self, request: SubscribeRequest) -> Flow {
        let request_id = self.requests.next_request_id();
        tracing::debug!("Subscribing to {} (request {})", request.topic, request_id);
        self.requests.register(
            request_id,
            RequestKind::Subscribe,
            Pending::Subscribe { key: request.key },
        );
        self.send(WampMessage::Subscribe {
            request_id,
            options: request.options,
            topic: request.topic,
        })
        .await
    }

    async fn send_unsubscribe(&mut self, request: UnsubscribeRequest) -> Flow {
        let request_id = self.requests.next_request_id();
        tracing::debug!(
            "Unsubscribing {} from {} (request {})",
            request.subscription_id,
            request.key,
            request_id
        );
        self.requests.register(
            request_id,
            RequestKind::Unsubscribe,
            Pending::Unsubscribe { key: request.key },
        );
        self.send(WampMessage::Unsubscribe {
            request_id,
            subscription_id: request.subscription_id,
        })
        .await
    }

    async fn send_unregister(&mut self, registration_id: Id, reply: UnregisterReply) -> Flow {
        if !self.machine.state().is_established() {
            let _ = reply.send(Err(RequestError::SessionClosed));
            return Flow::Continue;
        }
        let request_id = self.requests.next_request_id();
        self.requests.register(
            request_id,
            RequestKind::Unregister,
            Pending::Unregister {
                registration_id,
                reply,
            },
        );
        self.send(WampMessage::Unregister {
            request_id,
            registration_id,
        })
        .await
    }

    async fn on_release(&mut self, handle_id: HandleId, reply: Option<UnsubscribeReply>) -> Flow {
        for request in self.registry.release(handle_id, reply) {
            if let Flow::Stop = self.send_unsubscribe(request).await {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn expire_requests(&mut self) -> Flow {
        for request_id in self.requests.expired(Instant::now()) {
            let Some(failed) = self
                .requests
                .fail(request_id, RequestError::Timeout { request_id })
            else {
                continue;
            };
            tracing::warn!("Request {} ({:?}) timed out", request_id, failed.pending.kind);
            if let Some(request) = self.reject(failed) {
                if let Flow::Stop = self.send_subscribe(request).await {
                    return Flow::Stop;
                }
            }
        }
        Flow::Continue
    }

    /// Completes a request that ended without a response. Returns the
    /// SUBSCRIBE to resend when holders joined a topic while it was closing.
    fn reject(&mut self, failed: FailedRequest<Pending>) -> Option<SubscribeRequest> {
        let FailedRequest { pending, error } = failed;
        match pending.context {
            // On shutdown, topics are settled by `SubscriptionRegistry::clear`.
            Pending::Subscribe { key } => {
                if let RequestError::Timeout { request_id } = error {
                    self.abandoned_subscribes.insert(request_id);
                    self.registry.on_subscribe_failed(&key, &error.to_string());
                }
                None
            }
            Pending::Unsubscribe { key } => match error {
                RequestError::Timeout { .. } => {
                    self.registry.on_unsubscribe_failed(&key, &error.to_string())
                }
                _ => None,
            },
            Pending::Reclaim { subscription_id } => {
                tracing::debug!("Giving up on reclaiming subscription {}: {}", subscription_id, error);
                None
            }
            Pending::Call(reply) => {
                let _ = reply.send(Err(error));
                None
            }
            Pending::Publish(reply) => {
                let _ = reply.send(Err(error));
                None
            }
            Pending::Register { reply, .. } => {
                let _ = reply.send(Err(error));
                None
            }
            Pending::Unregister { reply, .. } => {
                let _ = reply.send(Err(error));
                None
            }
        }
    }

    async fn reclaim(&mut self, subscription_id: Id) -> Flow {
        let request_id = self.requests.next_request_id();
        tracing::debug!(
            "Late SUBSCRIBED for {}, unsubscribing (request {})",
            subscription_id,
            request_id
        );
        self.requests.register(
            request_id,
            RequestKind::Unsubscribe,
            Pending::Reclaim { subscription_id },
        );
        self.send(WampMessage::Unsubscribe {
            request_id,
            subscription_id,
        })
        .await
    }

    async fn ping(&mut self) -> Flow {
        match self.transport.ping().await {
            Ok(()) => Flow::Continue,
            Err(e) => {
                tracing::warn!("Keep-alive failed: {}", e);
                Flow::Stop
            }
        }
    }

    async fn close(&mut self, reason: &str) -> Flow {
        if self.machine.state().is_established() {
            let _ = self
                .send(WampMessage::Goodbye {
                    details: Dict::new(),
                    reason: reason.to_string(),
                })
                .await;
        }
        if let Err(e) = self.transport.disconnect(reason).await {
            tracing::debug!("Transport disconnect: {}", e);
        }
        Flow::Stop
    }

    fn shutdown(&mut self) {
        self.machine.transport_lost();
        self.publish_state();

        for request_id in self.requests.pending_ids() {
            if let Some(failed) = self.requests.fail(request_id, RequestError::SessionClosed) {
                self.reject(failed);
            }
        }
        self.abandoned_subscribes.clear();
        self.registry.clear();
        self.registrations.clear();

        for cmd in self.queued.drain(..) {
            match cmd {
                SessionCommand::Subscribe { reply, .. } => {
                    let _ = reply.send(Err(SubscriptionError::SessionClosed));
                }
                SessionCommand::Call { reply, .. } => {
                    let _ = reply.send(Err(RequestError::SessionClosed));
                }
                SessionCommand::Publish {
                    reply: Some(reply), ..
                } => {
                    let _ = reply.send(Err(RequestError::SessionClosed));
                }
                SessionCommand::Register { reply, .. } => {
                    let _ = reply.send(Err(RequestError::SessionClosed));
                }
                _ => {}
            }
        }

        for waiter in self.disconnect_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }
}
