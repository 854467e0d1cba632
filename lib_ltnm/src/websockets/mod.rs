//! Secure WebSockets transport.
//!
//! The STOMP client is generic over [`WsClient`], a narrow capability trait
//! covering exactly what the messaging layer needs: open, send, receive,
//! close. The production implementation is [`TlsWebSocketClient`]; tests
//! inject an in-memory fake.

pub mod client;

use async_trait::async_trait;
use thiserror::Error;

pub use client::TlsWebSocketClient;

/// Transport-level failures. Each stage of the connection setup and each
/// operation reports its own kind so callers can tell them apart.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WebSocketsError {
    #[error("could not resolve the server hostname")]
    DnsResolve,
    #[error("could not open a TCP connection to the server")]
    TcpConnect,
    #[error("TLS handshake failed")]
    TlsHandshake,
    #[error("WebSockets handshake failed")]
    WsHandshake,
    #[error("the server closed the connection unexpectedly")]
    PeerClosed,
    #[error("could not send the message")]
    SendFailed,
    #[error("could not close the WebSockets connection")]
    CloseFailed,
    #[error("the WebSockets connection is not open")]
    NotOpen,
    #[error("received a non-text message")]
    UnexpectedMessageType,
}

/// Minimal async surface of a WebSockets connection carrying text messages.
///
/// `recv` returns `None` when the stream has ended; transport failures and
/// non-text payloads come back as `Some(Err(_))`. Implementations deliver
/// messages in receive order.
#[async_trait]
pub trait WsClient: Send + 'static {
    async fn connect(&mut self) -> Result<(), WebSocketsError>;
    async fn send(&mut self, payload: String) -> Result<(), WebSocketsError>;
    async fn recv(&mut self) -> Option<Result<String, WebSocketsError>>;
    async fn close(&mut self) -> Result<(), WebSocketsError>;
}
