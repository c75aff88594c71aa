//! Frame transports.
//!
//! A transport moves text frames and reports connection lifecycle. It never
//! looks inside a frame; decoding belongs to the session.

use crate::config::{TransportConfig, SUBPROTOCOL};
use crate::error::TransportError;
use crate::message::{parse_frame, WampMessage};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{
    HeaderValue, ORIGIN, SEC_WEBSOCKET_PROTOCOL, USER_AGENT,
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

#[derive(Debug)]
pub enum TransportEvent {
    Connected,
    Frame(String),
    Disconnected(Option<TransportError>),
}

#[async_trait]
pub trait Transport: Send + 'static {
    /// Opens the connection and returns the inbound event stream.
    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    async fn disconnect(&mut self, reason: &str) -> Result<(), TransportError>;

    async fn ping(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    config: TransportConfig,
    sink: Option<SplitSink<WsStream, Message>>,
    reader: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            sink: None,
            reader: None,
        }
    }

    fn handshake_request(&self) -> Result<Request, TransportError> {
        let mut request = self.config.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
        if let Some(user_agent) = &self.config.user_agent {
            headers.insert(USER_AGENT, header_value(user_agent)?);
        }
        if let Some(origin) = &self.config.origin {
            headers.insert(ORIGIN, header_value(origin)?);
        }
        Ok(request)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value).map_err(|e| TransportError::InvalidRequest(e.to_string()))
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        if self.sink.is_some() {
            return Err(TransportError::ConnectionFailed(
                "transport is already connected".into(),
            ));
        }

        let request = self.handshake_request()?;
        let (ws, response) = connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let negotiated = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        if negotiated != Some(SUBPROTOCOL) {
            tracing::warn!("router negotiated sub-protocol {:?}", negotiated);
        }
        tracing::info!("connected to {}", self.config.url);

        let (sink, mut stream) = ws.split();
        let (events_tx, events_rx) = mpsc::channel(self.config.frame_buffer.max(1));
        let _ = events_tx.send(TransportEvent::Connected).await;

        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => TransportEvent::Frame(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(_) => {
                            tracing::warn!("dropping non UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::debug!("router closed the connection: {:?}", frame);
                        let _ = events_tx.send(TransportEvent::Disconnected(None)).await;
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = events_tx
                            .send(TransportEvent::Disconnected(Some(e.into())))
                            .await;
                        return;
                    }
                };
                if events_tx.send(event).await.is_err() {
                    return;
                }
            }
            let _ = events_tx
                .send(TransportEvent::Disconnected(Some(
                    TransportError::ConnectionClosed,
                )))
                .await;
        });

        self.sink = Some(sink);
        self.reader = Some(reader);
        Ok(events_rx)
    }

    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let sink = self.sink.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(Message::Text(frame)).await?;
        Ok(())
    }

    async fn disconnect(&mut self, reason: &str) -> Result<(), TransportError> {
        let Some(mut sink) = self.sink.take() else {
            return Ok(());
        };
        let close = CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::Owned(reason.to_string()),
        };
        let result = sink.send(Message::Close(Some(close))).await;
        let _ = sink.close().await;
        result.map_err(TransportError::from)
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        let sink = self.sink.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(Message::Ping(Vec::new())).await?;
        Ok(())
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Creates an in-memory transport and the router end that drives it.
pub fn loopback() -> (LoopbackTransport, LoopbackRouter) {
    let (events_tx, events_rx) = mpsc::channel(1024);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let transport = LoopbackTransport {
        events_tx: events_tx.clone(),
        events_rx: Some(events_rx),
        outbound_tx,
        connected: false,
    };
    let router = LoopbackRouter {
        events_tx,
        outbound_rx,
    };
    (transport, router)
}

pub struct LoopbackTransport {
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Option<mpsc::Receiver<TransportEvent>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    connected: bool,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let events_rx = self.events_rx.take().ok_or_else(|| {
            TransportError::ConnectionFailed("loopback transport already used".into())
        })?;
        self.events_tx
            .send(TransportEvent::Connected)
            .await
            .map_err(|_| TransportError::ConnectionClosed)?;
        self.connected = true;
        Ok(events_rx)
    }

    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.outbound_tx
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn disconnect(&mut self, _reason: &str) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }
}

/// Router side of a loopback transport.
pub struct LoopbackRouter {
    events_tx: mpsc::Sender<TransportEvent>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
}

impl LoopbackRouter {
    /// Next message written by the client, skipping frames that do not decode.
    pub async fn recv(&mut self) -> Option<WampMessage> {
        while let Some(frame) = self.outbound_rx.recv().await {
            match parse_frame(&frame) {
                Ok(message) => return Some(message),
                Err(e) => tracing::warn!("loopback router dropped frame: {}", e),
            }
        }
        None
    }

    pub fn try_recv(&mut self) -> Option<WampMessage> {
        while let Ok(frame) = self.outbound_rx.try_recv() {
            if let Ok(message) = parse_frame(&frame) {
                return Some(message);
            }
        }
        None
    }

    pub async fn send(&self, message: WampMessage) -> Result<(), TransportError> {
        let frame = message
            .to_text()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        self.send_raw(frame).await
    }

    pub async fn send_raw(&self, frame: impl Into<String>) -> Result<(), TransportError> {
        self.events_tx
            .send(TransportEvent::Frame(frame.into()))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    pub async fn drop_connection(&self, error: Option<TransportError>) {
        let _ = self
            .events_tx
            .send(TransportEvent::Disconnected(error))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Dict;

    #[tokio::test]
    async fn test_loopback_carries_frames_both_ways() {
        let (mut transport, mut router) = loopback();
        let mut events = transport.connect().await.unwrap();
        assert!(matches!(events.recv().await, Some(TransportEvent::Connected)));

        transport.send("[35,7]".to_string()).await.unwrap();
        assert_eq!(
            router.recv().await,
            Some(WampMessage::Unsubscribed {
                request_id: 7,
                details: Dict::new(),
            })
        );

        router
            .send(WampMessage::Welcome {
                session_id: 1,
                details: Dict::new(),
            })
            .await
            .unwrap();
        match events.recv().await {
            Some(TransportEvent::Frame(text)) => assert_eq!(text, "[2,1,{}]"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_loopback_connects_once() {
        let (mut transport, _router) = loopback();
        transport.connect().await.unwrap();
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let (mut transport, _router) = loopback();
        assert!(matches!(
            transport.send("[1]".into()).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn test_handshake_request_headers() {
        let transport = WebSocketTransport::new(
            TransportConfig::new("wss://sportsapi.example.com/v2")
                .with_user_agent("wampsync-test")
                .with_origin("https://example.com"),
        );
        let request = transport.handshake_request().unwrap();
        let headers = request.headers();
        assert_eq!(headers.get(SEC_WEBSOCKET_PROTOCOL).unwrap(), "wamp.2.json");
        assert_eq!(headers.get(USER_AGENT).unwrap(), "wampsync-test");
        assert_eq!(headers.get(ORIGIN).unwrap(), "https://example.com");
    }
}
