//! WAMP wire codec.
//!
//! Each message is a JSON array sent as one WebSocket text frame. The first
//! element is the integer message type, the rest are positional fields.

use crate::error::DecodeError;
use serde_json::{Map, Value};
use std::fmt;

pub type Dict = Map<String, Value>;
pub type Id = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Hello,
    Welcome,
    Abort,
    Challenge,
    Authenticate,
    Goodbye,
    Error,
    Publish,
    Published,
    Subscribe,
    Subscribed,
    Unsubscribe,
    Unsubscribed,
    Event,
    Call,
    Result,
    Register,
    Registered,
    Unregister,
    Unregistered,
    Invocation,
    Yield,
}

impl MessageType {
    pub fn code(self) -> u64 {
        match self {
            MessageType::Hello => 1,
            MessageType::Welcome => 2,
            MessageType::Abort => 3,
            MessageType::Challenge => 4,
            MessageType::Authenticate => 5,
            MessageType::Goodbye => 6,
            MessageType::Error => 8,
            MessageType::Publish => 16,
            MessageType::Published => 17,
            MessageType::Subscribe => 32,
            MessageType::Subscribed => 33,
            MessageType::Unsubscribe => 34,
            MessageType::Unsubscribed => 35,
            MessageType::Event => 36,
            MessageType::Call => 48,
            MessageType::Result => 50,
            MessageType::Register => 64,
            MessageType::Registered => 65,
            MessageType::Unregister => 66,
            MessageType::Unregistered => 67,
            MessageType::Invocation => 68,
            MessageType::Yield => 70,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        let kind = match code {
            1 => MessageType::Hello,
            2 => MessageType::Welcome,
            3 => MessageType::Abort,
            4 => MessageType::Challenge,
            5 => MessageType::Authenticate,
            6 => MessageType::Goodbye,
            8 => MessageType::Error,
            16 => MessageType::Publish,
            17 => MessageType::Published,
            32 => MessageType::Subscribe,
            33 => MessageType::Subscribed,
            34 => MessageType::Unsubscribe,
            35 => MessageType::Unsubscribed,
            36 => MessageType::Event,
            48 => MessageType::Call,
            50 => MessageType::Result,
            64 => MessageType::Register,
            65 => MessageType::Registered,
            66 => MessageType::Unregister,
            67 => MessageType::Unregistered,
            68 => MessageType::Invocation,
            70 => MessageType::Yield,
            _ => return None,
        };
        Some(kind)
    }

    /// Minimum array length, type code included.
    pub fn min_len(self) -> usize {
        match self {
            MessageType::Unsubscribed | MessageType::Unregistered => 2,
            MessageType::Error => 5,
            MessageType::Publish
            | MessageType::Subscribe
            | MessageType::Event
            | MessageType::Call
            | MessageType::Register
            | MessageType::Invocation => 4,
            _ => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::Hello => "HELLO",
            MessageType::Welcome => "WELCOME",
            MessageType::Abort => "ABORT",
            MessageType::Challenge => "CHALLENGE",
            MessageType::Authenticate => "AUTHENTICATE",
            MessageType::Goodbye => "GOODBYE",
            MessageType::Error => "ERROR",
            MessageType::Publish => "PUBLISH",
            MessageType::Published => "PUBLISHED",
            MessageType::Subscribe => "SUBSCRIBE",
            MessageType::Subscribed => "SUBSCRIBED",
            MessageType::Unsubscribe => "UNSUBSCRIBE",
            MessageType::Unsubscribed => "UNSUBSCRIBED",
            MessageType::Event => "EVENT",
            MessageType::Call => "CALL",
            MessageType::Result => "RESULT",
            MessageType::Register => "REGISTER",
            MessageType::Registered => "REGISTERED",
            MessageType::Unregister => "UNREGISTER",
            MessageType::Unregistered => "UNREGISTERED",
            MessageType::Invocation => "INVOCATION",
            MessageType::Yield => "YIELD",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Trailing positional `args` / `kwargs` of a message.
///
/// An empty list and an absent list are the same thing on the wire, so the
/// encoder omits both when empty and emits an empty `args` placeholder when
/// only `kwargs` is present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub args: Vec<Value>,
    pub kwargs: Dict,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_args(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Dict::new(),
        }
    }

    pub fn with_kwargs(kwargs: Dict) -> Self {
        Self {
            args: Vec::new(),
            kwargs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    fn append_to(&self, out: &mut Vec<Value>) {
        if !self.kwargs.is_empty() {
            out.push(Value::Array(self.args.clone()));
            out.push(Value::Object(self.kwargs.clone()));
        } else if !self.args.is_empty() {
            out.push(Value::Array(self.args.clone()));
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WampMessage {
    Hello {
        realm: String,
        details: Dict,
    },
    Welcome {
        session_id: Id,
        details: Dict,
    },
    Abort {
        details: Dict,
        reason: String,
    },
    Challenge {
        auth_method: String,
        extra: Dict,
    },
    Authenticate {
        signature: String,
        extra: Dict,
    },
    Goodbye {
        details: Dict,
        reason: String,
    },
    Error {
        request_type: u64,
        request_id: Id,
        details: Dict,
        error: String,
        payload: Payload,
    },
    Publish {
        request_id: Id,
        options: Dict,
        topic: String,
        payload: Payload,
    },
    Published {
        request_id: Id,
        publication_id: Id,
    },
    Subscribe {
        request_id: Id,
        options: Dict,
        topic: String,
    },
    Subscribed {
        request_id: Id,
        subscription_id: Id,
    },
    Unsubscribe {
        request_id: Id,
        subscription_id: Id,
    },
    /// `request_id` 0 with `details.subscription` set is a router-side revocation.
    Unsubscribed {
        request_id: Id,
        details: Dict,
    },
    Event {
        subscription_id: Id,
        publication_id: Id,
        details: Dict,
        payload: Payload,
    },
    Call {
        request_id: Id,
        options: Dict,
        procedure: String,
        payload: Payload,
    },
    Result {
        request_id: Id,
        details: Dict,
        payload: Payload,
    },
    Register {
        request_id: Id,
        options: Dict,
        procedure: String,
    },
    Registered {
        request_id: Id,
        registration_id: Id,
    },
    Unregister {
        request_id: Id,
        registration_id: Id,
    },
    Unregistered {
        request_id: Id,
    },
    Invocation {
        request_id: Id,
        registration_id: Id,
        details: Dict,
        payload: Payload,
    },
    Yield {
        request_id: Id,
        options: Dict,
        payload: Payload,
    },
}

impl WampMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            WampMessage::Hello { .. } => MessageType::Hello,
            WampMessage::Welcome { .. } => MessageType::Welcome,
            WampMessage::Abort { .. } => MessageType::Abort,
            WampMessage::Challenge { .. } => MessageType::Challenge,
            WampMessage::Authenticate { .. } => MessageType::Authenticate,
            WampMessage::Goodbye { .. } => MessageType::Goodbye,
            WampMessage::Error { .. } => MessageType::Error,
            WampMessage::Publish { .. } => MessageType::Publish,
            WampMessage::Published { .. } => MessageType::Published,
            WampMessage::Subscribe { .. } => MessageType::Subscribe,
            WampMessage::Subscribed { .. } => MessageType::Subscribed,
            WampMessage::Unsubscribe { .. } => MessageType::Unsubscribe,
            WampMessage::Unsubscribed { .. } => MessageType::Unsubscribed,
            WampMessage::Event { .. } => MessageType::Event,
            WampMessage::Call { .. } => MessageType::Call,
            WampMessage::Result { .. } => MessageType::Result,
            WampMessage::Register { .. } => MessageType::Register,
            WampMessage::Registered { .. } => MessageType::Registered,
            WampMessage::Unregister { .. } => MessageType::Unregister,
            WampMessage::Unregistered { .. } => MessageType::Unregistered,
            WampMessage::Invocation { .. } => MessageType::Invocation,
            WampMessage::Yield { .. } => MessageType::Yield,
        }
    }

    pub fn encode(&self) -> Vec<Value> {
        let mut out = vec![Value::from(self.message_type().code())];
        match self {
            WampMessage::Hello { realm, details } => {
                out.push(Value::from(realm.as_str()));
                out.push(Value::Object(details.clone()));
            }
            WampMessage::Welcome {
                session_id,
                details,
            } => {
                out.push(Value::from(*session_id));
                out.push(Value::Object(details.clone()));
            }
            WampMessage::Abort { details, reason } | WampMessage::Goodbye { details, reason } => {
                out.push(Value::Object(details.clone()));
                out.push(Value::from(reason.as_str()));
            }
            WampMessage::Challenge { auth_method, extra } => {
                out.push(Value::from(auth_method.as_str()));
                out.push(Value::Object(extra.clone()));
            }
            WampMessage::Authenticate { signature, extra } => {
                out.push(Value::from(signature.as_str()));
                out.push(Value::Object(extra.clone()));
            }
            WampMessage::Error {
                request_type,
                request_id,
                details,
                error,
                payload,
            } => {
                out.push(Value::from(*request_type));
                out.push(Value::from(*request_id));
                out.push(Value::Object(details.clone()));
                out.push(Value::from(error.as_str()));
                payload.append_to(&mut out);
            }
            WampMessage::Publish {
                request_id,
                options,
                topic,
                payload,
            } => {
                out.push(Value::from(*request_id));
                out.push(Value::Object(options.clone()));
                out.push(Value::from(topic.as_str()));
                payload.append_to(&mut out);
            }
            WampMessage::Published {
                request_id,
                publication_id,
            } => {
                out.push(Value::from(*request_id));
                out.push(Value::from(*publication_id));
            }
            WampMessage::Subscribe {
                request_id,
                options,
                topic,
            } => {
                out.push(Value::from(*request_id));
                out.push(Value::Object(options.clone()));
                out.push(Value::from(topic.as_str()));
            }
            WampMessage::Subscribed {
                request_id,
                subscription_id,
            }
            | WampMessage::Unsubscribe {
                request_id,
                subscription_id,
            } => {
                out.push(Value::from(*request_id));
                out.push(Value::from(*subscription_id));
            }
            WampMessage::Unsubscribed {
                request_id,
                details,
            } => {
                out.push(Value::from(*request_id));
                if !details.is_empty() {
                    out.push(Value::Object(details.clone()));
                }
            }
            WampMessage::Unregistered { request_id } => {
                out.push(Value::from(*request_id));
            }
            WampMessage::Event {
                subscription_id,
                publication_id,
                details,
                payload,
            } => {
                out.push(Value::from(*subscription_id));
                out.push(Value::from(*publication_id));
                out.push(Value::Object(details.clone()));
                payload.append_to(&mut out);
            }
            WampMessage::Call {
                request_id,
                options,
                procedure,
                payload,
            } => {
                out.push(Value::from(*request_id));
                out.push(Value::Object(options.clone()));
                out.push(Value::from(procedure.as_str()));
                payload.append_to(&mut out);
            }
            WampMessage::Result {
                request_id,
                details,
                payload,
            } => {
                out.push(Value::from(*request_id));
                out.push(Value::Object(details.clone()));
                payload.append_to(&mut out);
            }
            WampMessage::Register {
                request_id,
                options,
                procedure,
            } => {
                out.push(Value::from(*request_id));
                out.push(Value::Object(options.clone()));
                out.push(Value::from(procedure.as_str()));
            }
            WampMessage::Registered {
                request_id,
                registration_id,
            }
            | WampMessage::Unregister {
                request_id,
                registration_id,
            } => {
                out.push(Value::from(*request_id));
                out.push(Value::from(*registration_id));
            }
            WampMessage::Invocation {
                request_id,
                registration_id,
                details,
                payload,
            } => {
                out.push(Value::from(*request_id));
                out.push(Value::from(*registration_id));
                out.push(Value::Object(details.clone()));
                payload.append_to(&mut out);
            }
            WampMessage::Yield {
                request_id,
                options,
                payload,
            } => {
                out.push(Value::from(*request_id));
                out.push(Value::Object(options.clone()));
                payload.append_to(&mut out);
            }
        }
        out
    }

    pub fn decode(items: &[Value]) -> Result<Self, DecodeError> {
        let code = items
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| DecodeError::MalformedPayload("missing message type code".into()))?;
        let kind = MessageType::from_code(code).ok_or(DecodeError::UnknownType(code))?;
        if items.len() < kind.min_len() {
            return Err(DecodeError::MalformedPayload(format!(
                "{} needs at least {} elements, got {}",
                kind,
                kind.min_len(),
                items.len()
            )));
        }

        let f = Fields { kind, items };
        let message = match kind {
            MessageType::Hello => WampMessage::Hello {
                realm: f.string(1)?,
                details: f.dict(2)?,
            },
            MessageType::Welcome => WampMessage::Welcome {
                session_id: f.id(1)?,
                details: f.dict(2)?,
            },
            MessageType::Abort => WampMessage::Abort {
                details: f.dict(1)?,
                reason: f.string(2)?,
            },
            MessageType::Challenge => WampMessage::Challenge {
                auth_method: f.string(1)?,
                extra: f.dict(2)?,
            },
            MessageType::Authenticate => WampMessage::Authenticate {
                signature: f.string(1)?,
                extra: f.dict(2)?,
            },
            MessageType::Goodbye => WampMessage::Goodbye {
                details: f.dict(1)?,
                reason: f.string(2)?,
            },
            MessageType::Error => WampMessage::Error {
                request_type: f.id(1)?,
                request_id: f.id(2)?,
                details: f.dict(3)?,
                error: f.string(4)?,
                payload: f.payload(5)?,
            },
            MessageType::Publish => WampMessage::Publish {
                request_id: f.id(1)?,
                options: f.dict(2)?,
                topic: f.string(3)?,
                payload: f.payload(4)?,
            },
            MessageType::Published => WampMessage::Published {
                request_id: f.id(1)?,
                publication_id: f.id(2)?,
            },
            MessageType::Subscribe => WampMessage::Subscribe {
                request_id: f.id(1)?,
                options: f.dict(2)?,
                topic: f.string(3)?,
            },
            MessageType::Subscribed => WampMessage::Subscribed {
                request_id: f.id(1)?,
                subscription_id: f.id(2)?,
            },
            MessageType::Unsubscribe => WampMessage::Unsubscribe {
                request_id: f.id(1)?,
                subscription_id: f.id(2)?,
            },
            MessageType::Unsubscribed => WampMessage::Unsubscribed {
                request_id: f.id(1)?,
                details: f.optional_dict(2)?,
            },
            MessageType::Event => WampMessage::Event {
                subscription_id: f.id(1)?,
                publication_id: f.id(2)?,
                details: f.dict(3)?,
                payload: f.payload(4)?,
            },
            MessageType::Call => WampMessage::Call {
                request_id: f.id(1)?,
                options: f.dict(2)?,
                procedure: f.string(3)?,
                payload: f.payload(4)?,
            },
            MessageType::Result => WampMessage::Result {
                request_id: f.id(1)?,
                details: f.dict(2)?,
                payload: f.payload(3)?,
            },
            MessageType::Register => WampMessage::Register {
                request_id: f.id(1)?,
                options: f.dict(2)?,
                procedure: f.string(3)?,
            },
            MessageType::Registered => WampMessage::Registered {
                request_id: f.id(1)?,
                registration_id: f.id(2)?,
            },
            MessageType::Unregister => WampMessage::Unregister {
                request_id: f.id(1)?,
                registration_id: f.id(2)?,
            },
            MessageType::Unregistered => WampMessage::Unregistered {
                request_id: f.id(1)?,
            },
            MessageType::Invocation => WampMessage::Invocation {
                request_id: f.id(1)?,
                registration_id: f.id(2)?,
                details: f.dict(3)?,
                payload: f.payload(4)?,
            },
            MessageType::Yield => WampMessage::Yield {
                request_id: f.id(1)?,
                options: f.dict(2)?,
                payload: f.payload(3)?,
            },
        };
        Ok(message)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.encode())
    }
}

/// Decodes one text frame into a message.
pub fn parse_frame(text: &str) -> Result<WampMessage, DecodeError> {
    match serde_json::from_str::<Value>(text)? {
        Value::Array(items) => WampMessage::decode(&items),
        _ => Err(DecodeError::MalformedPayload("frame is not a JSON array".into())),
    }
}

struct Fields<'a> {
    kind: MessageType,
    items: &'a [Value],
}

impl Fields<'_> {
    fn get(&self, idx: usize) -> Result<&Value, DecodeError> {
        self.items.get(idx).ok_or_else(|| {
            DecodeError::MalformedPayload(format!("{} is missing field {}", self.kind, idx))
        })
    }

    fn mistyped(&self, idx: usize, expected: &str) -> DecodeError {
        DecodeError::MalformedPayload(format!(
            "{} field {} must be {}",
            self.kind, idx, expected
        ))
    }

    fn id(&self, idx: usize) -> Result<Id, DecodeError> {
        self.get(idx)?
            .as_u64()
            .ok_or_else(|| self.mistyped(idx, "an unsigned integer"))
    }

    fn string(&self, idx: usize) -> Result<String, DecodeError> {
        self.get(idx)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.mistyped(idx, "a string"))
    }

    fn dict(&self, idx: usize) -> Result<Dict, DecodeError> {
        self.get(idx)?
            .as_object()
            .cloned()
            .ok_or_else(|| self.mistyped(idx, "an object"))
    }

    fn optional_dict(&self, idx: usize) -> Result<Dict, DecodeError> {
        match self.items.get(idx) {
            None => Ok(Dict::new()),
            Some(_) => self.dict(idx),
        }
    }

    fn payload(&self, idx: usize) -> Result<Payload, DecodeError> {
        let args = match self.items.get(idx) {
            None => Vec::new(),
            Some(Value::Array(args)) => args.clone(),
            Some(_) => return Err(self.mistyped(idx, "an array")),
        };
        let kwargs = match self.items.get(idx + 1) {
            None => Dict::new(),
            Some(Value::Object(kwargs)) => kwargs.clone(),
            Some(_) => return Err(self.mistyped(idx + 1, "an object")),
        };
        Ok(Payload { args, kwargs })
    }
}
