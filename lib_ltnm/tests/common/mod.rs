//! In-memory WebSockets fake that speaks just enough STOMP to stand in for
//! the network-events service. Behavior is explicit per-instance
//! configuration on [`MockBehavior`]; there is no shared state between
//! instances.
#![allow(dead_code)]

use async_trait::async_trait;
use tokio::sync::mpsc;

use lib_ltnm::stomp::{StompCommand, StompFrame, StompHeader};
use lib_ltnm::websockets::{WebSocketsError, WsClient};

pub const TEST_URL: &str = "ltnm.learncppthroughprojects.com";
pub const TEST_USERNAME: &str = "some_username";
pub const TEST_PASSWORD: &str = "some_password_123";

/// What the fake server should do. Defaults to a healthy server accepting
/// the test credentials on `/passengers` with no queued messages.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Subscription endpoint the server accepts.
    pub endpoint: String,
    pub username: String,
    pub password: String,
    /// Fail the WebSockets connection attempt with this error.
    pub connect_error: Option<WebSocketsError>,
    /// Fail every send with this error.
    pub send_error: Option<WebSocketsError>,
    /// Fail the close call with this error.
    pub close_error: Option<WebSocketsError>,
    /// Close the connection from the server side right after the handshake.
    pub trigger_disconnection: bool,
    /// Message bodies streamed on the subscription once it is accepted.
    pub subscription_messages: Vec<String>,
    /// Override the destination header on streamed MESSAGE frames.
    pub message_destination: Option<String>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            endpoint: "/passengers".to_string(),
            username: TEST_USERNAME.to_string(),
            password: TEST_PASSWORD.to_string(),
            connect_error: None,
            send_error: None,
            close_error: None,
            trigger_disconnection: false,
            subscription_messages: Vec::new(),
            message_destination: None,
        }
    }
}

pub struct MockWsClient {
    behavior: MockBehavior,
    server_tx: Option<mpsc::UnboundedSender<String>>,
    server_rx: Option<mpsc::UnboundedReceiver<String>>,
    open: bool,
    next_message_id: usize,
}

impl MockWsClient {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            server_tx: None,
            server_rx: None,
            open: false,
            next_message_id: 0,
        }
    }

    fn queue(&mut self, frame: String) {
        if let Some(tx) = &self.server_tx {
            let _ = tx.send(frame);
        }
    }

    /// Drop the server side: queued frames still drain, then the stream
    /// ends.
    fn server_close(&mut self) {
        self.server_tx = None;
    }

    fn handle_stomp(&mut self, frame: &StompFrame) {
        let login = frame.header(StompHeader::Login).unwrap_or_default();
        let passcode = frame.header(StompHeader::Passcode).unwrap_or_default();
        if login == self.behavior.username && passcode == self.behavior.password {
            let connected = StompFrame::new(
                StompCommand::Connected,
                vec![(StompHeader::Version, "1.2".to_string())],
                "",
            )
            .expect("CONNECTED frame");
            self.queue(connected.to_wire());
        } else {
            self.queue_error("Authentication failed");
            self.server_close();
        }
    }

    fn handle_subscribe(&mut self, frame: &StompFrame) {
        let destination = frame
            .header(StompHeader::Destination)
            .unwrap_or_default()
            .to_string();
        let id = frame.header(StompHeader::Id).unwrap_or_default().to_string();
        let receipt = frame.header(StompHeader::Receipt).map(str::to_string);
        if destination != self.behavior.endpoint {
            self.queue_error("Invalid subscription endpoint");
            self.server_close();
            return;
        }
        if let Some(receipt) = receipt {
            let receipt_frame = StompFrame::new(
                StompCommand::Receipt,
                vec![(StompHeader::ReceiptId, receipt)],
                "",
            )
            .expect("RECEIPT frame");
            self.queue(receipt_frame.to_wire());
        }
        let message_destination = self
            .behavior
            .message_destination
            .clone()
            .unwrap_or(destination);
        for body in self.behavior.subscription_messages.clone() {
            self.next_message_id += 1;
            let message = StompFrame::new(
                StompCommand::Message,
                vec![
                    (StompHeader::Subscription, id.clone()),
                    (StompHeader::Destination, message_destination.clone()),
                    (StompHeader::MessageId, self.next_message_id.to_string()),
                ],
                body,
            )
            .expect("MESSAGE frame");
            self.queue(message.to_wire());
        }
    }

    fn queue_error(&mut self, body: &str) {
        let error = StompFrame::new(StompCommand::Error, Vec::new(), body).expect("ERROR frame");
        self.queue(error.to_wire());
    }
}

#[async_trait]
impl WsClient for MockWsClient {
    async fn connect(&mut self) -> Result<(), WebSocketsError> {
        if let Some(e) = self.behavior.connect_error {
            return Err(e);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.server_tx = Some(tx);
        self.server_rx = Some(rx);
        self.open = true;
        if self.behavior.trigger_disconnection {
            self.server_close();
        }
        Ok(())
    }

    async fn send(&mut self, payload: String) -> Result<(), WebSocketsError> {
        if !self.open {
            return Err(WebSocketsError::NotOpen);
        }
        if let Some(e) = self.behavior.send_error {
            return Err(e);
        }
        match StompFrame::parse(&payload) {
            Ok(frame) => match frame.command() {
                StompCommand::Stomp | StompCommand::Connect => self.handle_stomp(&frame),
                StompCommand::Subscribe => self.handle_subscribe(&frame),
                _ => {}
            },
            Err(_) => {
                self.queue_error("Malformed frame");
                self.server_close();
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, WebSocketsError>> {
        let rx = self.server_rx.as_mut()?;
        rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), WebSocketsError> {
        if let Some(e) = self.behavior.close_error {
            return Err(e);
        }
        if !self.open {
            return Err(WebSocketsError::NotOpen);
        }
        self.open = false;
        self.server_tx = None;
        self.server_rx = None;
        Ok(())
    }
}
