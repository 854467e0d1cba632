//! STOMP client for the network-events service.
//!
//! The client layers a messaging state machine over an injected
//! [`WsClient`] transport. A spawned session task owns the transport and
//! drives it with a `tokio::select!` loop: it reads inbound frames and
//! consumes commands (`subscribe`, `close`) sent by the public methods over
//! an mpsc channel.
//!
//! User handlers never run on the session task. They are posted to a second,
//! serial dispatch task, so a handler can never race the socket reader and
//! is never invoked re-entrantly from inside `subscribe` or `close`.
//! Handlers therefore observe callbacks in the exact order the session
//! produced them: a subscription's acknowledgement before its first message,
//! and the disconnect notification after every already-queued message.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::stomp::frame::{StompCommand, StompFrame, StompHeader};
use crate::websockets::{WebSocketsError, WsClient};

/// Error codes surfaced by the STOMP client callbacks.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StompClientError {
    #[error("undefined STOMP client error")]
    Undefined,
    #[error("could not close the WebSockets connection")]
    CouldNotCloseWebSocketsConnection,
    #[error("could not connect to the WebSockets server")]
    CouldNotConnectToWebSocketsServer,
    #[error("could not send the STOMP frame")]
    CouldNotSendStompFrame,
    #[error("could not send the SUBSCRIBE frame")]
    CouldNotSendSubscribeFrame,
    #[error("could not create a valid STOMP frame")]
    UnexpectedCouldNotCreateValidFrame,
    #[error("unexpected message content type")]
    UnexpectedMessageContentType,
    #[error("subscription endpoint mismatch")]
    UnexpectedSubscriptionMismatch,
    #[error("the WebSockets server disconnected")]
    WebSocketsServerDisconnected,
}

/// Fires once, when the STOMP connection is established or has failed.
pub type OnConnect = Box<dyn FnOnce(Result<(), StompClientError>) + Send>;
/// Fires once, when the connection drops without a local `close`.
pub type OnDisconnect = Box<dyn FnOnce(Result<(), StompClientError>) + Send>;
/// Fires once, when a local `close` has completed.
pub type OnClose = Box<dyn FnOnce(Result<(), StompClientError>) + Send>;
/// Fires once per subscription, with the acknowledged subscription id.
pub type OnSubscribe = Box<dyn FnOnce(Result<String, StompClientError>) + Send>;
/// Fires for every message delivered on a subscription.
pub type OnMessage = Box<dyn FnMut(Result<String, StompClientError>) + Send>;

type Task = Box<dyn FnOnce() + Send>;
type SharedOnMessage = Arc<Mutex<OnMessage>>;

struct Subscription {
    endpoint: String,
    on_subscribe: Option<OnSubscribe>,
    on_message: Option<SharedOnMessage>,
}

enum Command {
    Subscribe {
        id: String,
        frame: String,
        subscription: Subscription,
    },
    Close {
        on_close: Option<OnClose>,
    },
}

/// Outcome of one turn of the session select loop.
enum Step {
    Command(Option<Command>),
    Inbound(Option<Result<String, WebSocketsError>>),
}

/// STOMP client implementing the subset of commands needed by the
/// network-events service, generic over the WebSockets transport.
pub struct StompClient<W: WsClient> {
    url: String,
    transport: Option<W>,
    cmd_tx: Option<mpsc::UnboundedSender<Command>>,
    cb_tx: mpsc::UnboundedSender<Task>,
    cb_handle: JoinHandle<()>,
    ended_tx: Option<watch::Sender<bool>>,
    ended_rx: watch::Receiver<bool>,
    session_handle: Option<JoinHandle<()>>,
}

impl<W: WsClient> StompClient<W> {
    /// Create a client targeting the given server URL over the given
    /// transport. Nothing happens on the network until [`Self::connect`].
    pub fn new(url: impl Into<String>, transport: W) -> Self {
        let (cb_tx, mut cb_rx) = mpsc::unbounded_channel::<Task>();
        let cb_handle = tokio::spawn(async move {
            while let Some(task) = cb_rx.recv().await {
                task();
            }
        });
        let (ended_tx, ended_rx) = watch::channel(false);
        Self {
            url: url.into(),
            transport: Some(transport),
            cmd_tx: None,
            cb_tx,
            cb_handle,
            ended_tx: Some(ended_tx),
            ended_rx,
            session_handle: None,
        }
    }

    /// Connect to the STOMP server: open the WebSockets transport, then
    /// authenticate with a STOMP frame carrying the user credentials.
    ///
    /// `on_connect` fires with the outcome of the STOMP connection setup; it
    /// also fires on any failure before a successful connection.
    /// `on_disconnect` fires when the connection drops without a local
    /// `close` — including a server that closes in response to bad
    /// credentials or a rejected subscription.
    pub fn connect(
        &mut self,
        username: &str,
        password: &str,
        on_connect: Option<OnConnect>,
        on_disconnect: Option<OnDisconnect>,
    ) {
        let (transport, ended_tx) = match (self.transport.take(), self.ended_tx.take()) {
            (Some(t), Some(e)) => (t, e),
            _ => {
                log::error!("StompClient: connect called twice, ignoring");
                return;
            }
        };
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        self.cmd_tx = Some(cmd_tx);
        let session = Session {
            url: self.url.clone(),
            username: username.to_string(),
            password: password.to_string(),
            transport,
            cmd_rx,
            cb_tx: self.cb_tx.clone(),
            on_connect,
            on_disconnect,
            subscriptions: HashMap::new(),
            state: SessionState::WsConnecting,
        };
        self.session_handle = Some(tokio::spawn(async move {
            session.run().await;
            let _ = ended_tx.send(true);
        }));
    }

    /// Subscribe to a STOMP endpoint and return the new subscription id.
    ///
    /// The id is returned synchronously and is empty only when the SUBSCRIBE
    /// frame could not be constructed. `on_subscribe` fires when the server
    /// acknowledges the subscription with a RECEIPT, or with
    /// `CouldNotSendSubscribeFrame` when the frame could not be sent.
    /// `on_message` fires for every message on the subscription endpoint.
    pub fn subscribe(
        &self,
        endpoint: &str,
        on_subscribe: Option<OnSubscribe>,
        on_message: Option<OnMessage>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        // The subscription id doubles as the receipt token, so the server
        // acknowledgement routes straight back to this subscription.
        let frame = StompFrame::new(
            StompCommand::Subscribe,
            vec![
                (StompHeader::Id, id.clone()),
                (StompHeader::Destination, endpoint.to_string()),
                (StompHeader::Ack, "auto".to_string()),
                (StompHeader::Receipt, id.clone()),
            ],
            "",
        );
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("StompClient: could not build the SUBSCRIBE frame: {}", e);
                if let Some(cb) = on_subscribe {
                    self.post(move || {
                        cb(Err(StompClientError::UnexpectedCouldNotCreateValidFrame))
                    });
                }
                return String::new();
            }
        };

        let subscription = Subscription {
            endpoint: endpoint.to_string(),
            on_subscribe,
            on_message: on_message.map(|cb| Arc::new(Mutex::new(cb))),
        };
        let command = Command::Subscribe {
            id: id.clone(),
            frame: frame.to_wire(),
            subscription,
        };
        match &self.cmd_tx {
            Some(tx) => {
                if let Err(mpsc::error::SendError(command)) = tx.send(command) {
                    self.fail_subscribe(command);
                }
            }
            None => self.fail_subscribe(command),
        }
        id
    }

    /// Close the STOMP and WebSockets connection. The subscription registry
    /// is cleared before the transport goes down, so any in-flight RECEIPT
    /// is dropped as an unknown subscription.
    pub fn close(&self, on_close: Option<OnClose>) {
        let command = Command::Close { on_close };
        match &self.cmd_tx {
            Some(tx) => {
                if let Err(mpsc::error::SendError(command)) = tx.send(command) {
                    self.fail_close(command);
                }
            }
            None => self.fail_close(command),
        }
    }

    /// Watch for the end of the client session. The value flips to `true`
    /// once the session task has finished, for any reason.
    pub fn finished(&self) -> watch::Receiver<bool> {
        self.ended_rx.clone()
    }

    /// Wait until every callback queued so far has run.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        let _ = self.cb_tx.send(Box::new(move || {
            let _ = tx.send(());
        }));
        let _ = rx.await;
    }

    fn post(&self, task: impl FnOnce() + Send + 'static) {
        let _ = self.cb_tx.send(Box::new(task));
    }

    fn fail_subscribe(&self, command: Command) {
        if let Command::Subscribe { subscription, .. } = command {
            log::error!("StompClient: no open session to send the SUBSCRIBE frame on");
            if let Some(cb) = subscription.on_subscribe {
                self.post(move || cb(Err(StompClientError::CouldNotSendSubscribeFrame)));
            }
        }
    }

    fn fail_close(&self, command: Command) {
        if let Command::Close { on_close } = command {
            if let Some(cb) = on_close {
                self.post(move || {
                    cb(Err(StompClientError::CouldNotCloseWebSocketsConnection))
                });
            }
        }
    }
}

impl<W: WsClient> Drop for StompClient<W> {
    fn drop(&mut self) {
        if let Some(handle) = self.session_handle.take() {
            handle.abort();
        }
        self.cb_handle.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    WsConnecting,
    StompHello,
    AwaitingConnected,
    Ready,
}

/// The task that owns the transport. Everything here runs on a single task,
/// so the subscription registry needs no locking.
struct Session<W: WsClient> {
    url: String,
    username: String,
    password: String,
    transport: W,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    cb_tx: mpsc::UnboundedSender<Task>,
    on_connect: Option<OnConnect>,
    on_disconnect: Option<OnDisconnect>,
    subscriptions: HashMap<String, Subscription>,
    state: SessionState,
}

impl<W: WsClient> Session<W> {
    async fn run(mut self) {
        if self.establish().await.is_err() {
            return;
        }
        self.event_loop().await;
    }

    /// Open the transport and send the STOMP connection frame. Any failure
    /// here surfaces through `on_connect` and ends the session.
    async fn establish(&mut self) -> Result<(), ()> {
        if let Err(e) = self.transport.connect().await {
            log::error!("StompClient: WebSockets connection failed: {}", e);
            self.post_connect(Err(StompClientError::CouldNotConnectToWebSocketsServer));
            return Err(());
        }
        self.state = SessionState::StompHello;

        let frame = StompFrame::new(
            StompCommand::Stomp,
            vec![
                (StompHeader::AcceptVersion, "1.2".to_string()),
                (StompHeader::Host, self.url.clone()),
                (StompHeader::Login, self.username.clone()),
                (StompHeader::Passcode, self.password.clone()),
            ],
            "",
        );
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("StompClient: could not build the STOMP frame: {}", e);
                self.post_connect(Err(StompClientError::UnexpectedCouldNotCreateValidFrame));
                return Err(());
            }
        };
        if let Err(e) = self.transport.send(frame.to_wire()).await {
            // The frame left the building only if the send succeeded; whether
            // we are authenticated is decided by the next inbound frame.
            log::error!("StompClient: could not send the STOMP frame: {}", e);
            self.post_connect(Err(StompClientError::CouldNotSendStompFrame));
            return Err(());
        }
        self.state = SessionState::AwaitingConnected;
        Ok(())
    }

    async fn event_loop(&mut self) {
        loop {
            // Resolve the select into a plain value first so the borrows of
            // the command channel and the transport end before we act.
            let step = tokio::select! {
                command = self.cmd_rx.recv() => Step::Command(command),
                message = self.transport.recv() => Step::Inbound(message),
            };
            match step {
                Step::Command(Some(Command::Subscribe { id, frame, subscription })) => {
                    self.handle_subscribe(id, frame, subscription).await;
                }
                Step::Command(Some(Command::Close { on_close })) => {
                    self.handle_close(on_close).await;
                    return;
                }
                // The client handle is gone; nobody is left to observe
                // callbacks, so just stop.
                Step::Command(None) => return,
                Step::Inbound(Some(Ok(text))) => self.on_ws_message(&text),
                Step::Inbound(Some(Err(WebSocketsError::UnexpectedMessageType))) => {
                    log::error!(
                        "StompClient: {}, dropping the message",
                        StompClientError::UnexpectedMessageContentType
                    );
                }
                Step::Inbound(Some(Err(e))) => {
                    log::error!("StompClient: transport failure: {}", e);
                    self.post_disconnect(Err(StompClientError::WebSocketsServerDisconnected));
                    return;
                }
                Step::Inbound(None) => {
                    log::warn!("StompClient: the server closed the connection");
                    self.post_disconnect(Err(StompClientError::WebSocketsServerDisconnected));
                    return;
                }
            }
        }
    }

    async fn handle_subscribe(&mut self, id: String, frame: String, subscription: Subscription) {
        // Sending the frame only proves the SUBSCRIBE left this side; the
        // subscription is acknowledged once the matching RECEIPT arrives.
        if let Err(e) = self.transport.send(frame).await {
            log::error!("StompClient: could not send the SUBSCRIBE frame: {}", e);
            if let Some(cb) = subscription.on_subscribe {
                self.post(move || cb(Err(StompClientError::CouldNotSendSubscribeFrame)));
            }
            return;
        }
        self.subscriptions.insert(id, subscription);
    }

    async fn handle_close(&mut self, on_close: Option<OnClose>) {
        self.subscriptions.clear();
        let result = self
            .transport
            .close()
            .await
            .map_err(|_| StompClientError::CouldNotCloseWebSocketsConnection);
        if let Some(cb) = on_close {
            self.post(move || cb(result));
        }
    }

    /// Closed dispatch over the inbound STOMP command set.
    fn on_ws_message(&mut self, text: &str) {
        let frame = match StompFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("StompClient: dropping malformed frame: {}", e);
                return;
            }
        };
        log::debug!("StompClient: received {}", frame.command());
        match frame.command() {
            StompCommand::Connected => self.handle_connected(),
            StompCommand::Message => self.handle_subscription_message(&frame),
            StompCommand::Receipt => self.handle_subscription_receipt(&frame),
            StompCommand::Error => {
                // Logged only: the server closes the transport after an ERROR
                // frame, which surfaces through the disconnect path.
                log::error!("StompClient: server ERROR frame: {}", frame.body());
            }
            other => {
                log::error!("StompClient: unexpected STOMP command: {}", other);
            }
        }
    }

    fn handle_connected(&mut self) {
        if self.state == SessionState::Ready {
            log::warn!("StompClient: duplicate CONNECTED frame");
            return;
        }
        self.state = SessionState::Ready;
        self.post_connect(Ok(()));
    }

    fn handle_subscription_message(&mut self, frame: &StompFrame) {
        // The codec guarantees the subscription header on MESSAGE frames.
        let id = frame.header(StompHeader::Subscription).unwrap_or_default();
        let Some(subscription) = self.subscriptions.get(id) else {
            log::error!("StompClient: MESSAGE for unknown subscription {}", id);
            return;
        };
        let destination = frame.header(StompHeader::Destination).unwrap_or_default();
        if destination != subscription.endpoint {
            log::error!(
                "StompClient: MESSAGE destination {} does not match subscription endpoint {}",
                destination,
                subscription.endpoint
            );
            if let Some(cb) = &subscription.on_message {
                let cb = Arc::clone(cb);
                self.post(move || {
                    if let Ok(mut cb) = cb.lock() {
                        cb(Err(StompClientError::UnexpectedSubscriptionMismatch));
                    }
                });
            }
            return;
        }
        if let Some(cb) = &subscription.on_message {
            let cb = Arc::clone(cb);
            let body = frame.body().to_string();
            self.post(move || {
                if let Ok(mut cb) = cb.lock() {
                    cb(Ok(body));
                }
            });
        }
    }

    fn handle_subscription_receipt(&mut self, frame: &StompFrame) {
        // SUBSCRIBE frames request a receipt with the subscription id, so the
        // receipt-id maps straight back to the registry key.
        let id = frame.header(StompHeader::ReceiptId).unwrap_or_default();
        let Some(subscription) = self.subscriptions.get_mut(id) else {
            log::error!("StompClient: RECEIPT for unknown subscription {}", id);
            return;
        };
        if let Some(cb) = subscription.on_subscribe.take() {
            let id = id.to_string();
            self.post(move || cb(Ok(id)));
        }
    }

    fn post(&self, task: impl FnOnce() + Send + 'static) {
        let _ = self.cb_tx.send(Box::new(task));
    }

    fn post_connect(&mut self, result: Result<(), StompClientError>) {
        if let Some(cb) = self.on_connect.take() {
            self.post(move || cb(result));
        }
    }

    fn post_disconnect(&mut self, result: Result<(), StompClientError>) {
        if let Some(cb) = self.on_disconnect.take() {
            self.post(move || cb(result));
        }
    }
}
