//! TLS WebSockets client built on tokio-tungstenite and rustls.
//!
//! The connection is established in explicit stages (DNS, TCP, TLS,
//! WebSockets upgrade) so that a failure in any stage maps to its own
//! [`WebSocketsError`] kind. Server certificates are verified against the
//! trust anchors in a caller-provided PEM file rather than the system store.

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{client_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use super::{WebSocketsError, WsClient};

pub struct TlsWebSocketClient {
    url: String,
    port: u16,
    endpoint: String,
    ca_cert_file: PathBuf,
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl TlsWebSocketClient {
    pub fn new(
        url: impl Into<String>,
        port: u16,
        endpoint: impl Into<String>,
        ca_cert_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            url: url.into(),
            port,
            endpoint: endpoint.into(),
            ca_cert_file: ca_cert_file.into(),
            stream: None,
        }
    }

    fn tls_connector(&self) -> Result<Connector, WebSocketsError> {
        let roots = load_root_store(&self.ca_cert_file)?;
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| {
                log::error!("Unsupported TLS protocol configuration: {}", e);
                WebSocketsError::TlsHandshake
            })?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Connector::Rustls(Arc::new(config)))
    }
}

#[async_trait]
impl WsClient for TlsWebSocketClient {
    async fn connect(&mut self) -> Result<(), WebSocketsError> {
        let authority = format!("{}:{}", self.url, self.port);
        let mut addresses = tokio::net::lookup_host(&authority).await.map_err(|e| {
            log::error!("Could not resolve {}: {}", self.url, e);
            WebSocketsError::DnsResolve
        })?;
        let address = addresses.next().ok_or_else(|| {
            log::error!("No addresses found for {}", self.url);
            WebSocketsError::DnsResolve
        })?;

        let tcp = TcpStream::connect(address).await.map_err(|e| {
            log::error!("Could not connect to {}: {}", address, e);
            WebSocketsError::TcpConnect
        })?;

        let connector = self.tls_connector()?;
        let request = format!("wss://{}{}", authority, self.endpoint);
        let (stream, _response) =
            client_async_tls_with_config(request, tcp, None, Some(connector))
                .await
                .map_err(|e| match e {
                    WsError::Tls(e) => {
                        log::error!("TLS handshake with {} failed: {}", self.url, e);
                        WebSocketsError::TlsHandshake
                    }
                    e => {
                        log::error!("WebSockets handshake with {} failed: {}", self.url, e);
                        WebSocketsError::WsHandshake
                    }
                })?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, payload: String) -> Result<(), WebSocketsError> {
        let stream = self.stream.as_mut().ok_or(WebSocketsError::NotOpen)?;
        stream.send(Message::Text(payload)).await.map_err(|e| {
            log::error!("WebSockets send failed: {}", e);
            WebSocketsError::SendFailed
        })
    }

    async fn recv(&mut self) -> Option<Result<String, WebSocketsError>> {
        let stream = self.stream.as_mut()?;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(Message::Binary(_))) => {
                    return Some(Err(WebSocketsError::UnexpectedMessageType));
                }
                // Control frames are transparent to the messaging layer.
                Some(Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Err(e)) => {
                    log::error!("WebSockets read failed: {}", e);
                    return Some(Err(WebSocketsError::PeerClosed));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), WebSocketsError> {
        let mut stream = self.stream.take().ok_or(WebSocketsError::NotOpen)?;
        stream.close(None).await.map_err(|e| {
            log::error!("WebSockets close failed: {}", e);
            WebSocketsError::CloseFailed
        })
    }
}

fn load_root_store(ca_cert_file: &Path) -> Result<rustls::RootCertStore, WebSocketsError> {
    let file = std::fs::File::open(ca_cert_file).map_err(|e| {
        log::error!("Could not open {}: {}", ca_cert_file.display(), e);
        WebSocketsError::TlsHandshake
    })?;
    let mut reader = BufReader::new(file);
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| {
            log::error!("Invalid certificate in {}: {}", ca_cert_file.display(), e);
            WebSocketsError::TlsHandshake
        })?;
        roots.add(cert).map_err(|e| {
            log::error!("Rejected trust anchor in {}: {}", ca_cert_file.display(), e);
            WebSocketsError::TlsHandshake
        })?;
    }
    if roots.is_empty() {
        log::error!("No trust anchors found in {}", ca_cert_file.display());
        return Err(WebSocketsError::TlsHandshake);
    }
    Ok(roots)
}
