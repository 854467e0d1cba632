//! Live transport network monitor.
//!
//! The monitor owns the network model and a STOMP client, and wires the two
//! together: configuration loads the layout (downloading it if no local file
//! is given) and connects the client; the run loop applies decoded passenger
//! events to the network and tracks the last error it saw.
//!
//! The STOMP client's callback task only forwards events into a channel; the
//! run loop is the single place where the network model is mutated.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::network::{NetworkLayout, PassengerEvent, TransportNetwork};
use crate::retrieve;
use crate::stomp::{StompClient, StompClientError};
use crate::websockets::{TlsWebSocketClient, WsClient};

/// STOMP messaging channel on the server.
const NETWORK_EVENTS_ENDPOINT: &str = "/network-events";
/// Path of the downloadable network layout document.
const NETWORK_LAYOUT_ENDPOINT: &str = "/network-layout.json";
/// STOMP destination carrying the passenger events.
const PASSENGER_EVENTS_DESTINATION: &str = "/passengers";

/// Configuration for the monitor process.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub url: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// PEM trust anchors used to verify the server, for both the layout
    /// download and the WebSockets connection.
    pub ca_cert_file: PathBuf,
    /// Local layout file. When absent the layout is downloaded from the
    /// server into the temp directory.
    pub network_layout_file: Option<PathBuf>,
}

/// Error codes recorded by the monitor. The exit code of the process is the
/// code of the last recorded error, or 0 for a clean run.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MonitorError {
    #[error("undefined error")]
    Undefined = 1,
    #[error("could not connect to the STOMP server")]
    CouldNotConnectToStompClient = 2,
    #[error("could not parse a passenger event")]
    CouldNotParsePassengerEvent = 3,
    #[error("could not record a passenger event")]
    CouldNotRecordPassengerEvent = 4,
    #[error("could not subscribe to the passenger events")]
    CouldNotSubscribeToPassengerEvents = 5,
    #[error("could not download the network layout file")]
    FailedNetworkLayoutFileDownload = 6,
    #[error("could not parse the network layout file")]
    FailedNetworkLayoutFileParsing = 7,
    #[error("could not construct the transport network")]
    FailedTransportNetworkConstruction = 8,
    #[error("missing CA certificate file")]
    MissingCaCertFile = 9,
    #[error("missing network layout file")]
    MissingNetworkLayoutFile = 10,
    #[error("the STOMP client disconnected")]
    StompClientDisconnected = 11,
}

impl MonitorError {
    pub fn exit_code(&self) -> i32 {
        *self as i32
    }
}

/// Events forwarded from the STOMP client callbacks into the run loop.
enum MonitorEvent {
    Connect(Result<(), StompClientError>),
    Disconnect(Result<(), StompClientError>),
    Subscribe(Result<String, StompClientError>),
    Message(Result<String, StompClientError>),
}

/// Live transport network monitor, generic over the WebSockets transport so
/// tests can run it against an in-memory fake.
pub struct NetworkMonitor<W: WsClient> {
    client: Option<StompClient<W>>,
    network: TransportNetwork,
    event_tx: Option<mpsc::UnboundedSender<MonitorEvent>>,
    event_rx: Option<mpsc::UnboundedReceiver<MonitorEvent>>,
    stop_tx: broadcast::Sender<()>,
    // Subscribed at construction so a stop requested before the run loop
    // starts is not lost.
    stop_rx: Option<broadcast::Receiver<()>>,
    last_error: Option<MonitorError>,
}

impl<W: WsClient> Default for NetworkMonitor<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: WsClient> NetworkMonitor<W> {
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = broadcast::channel(1);
        Self {
            client: None,
            network: TransportNetwork::default(),
            event_tx: None,
            event_rx: None,
            stop_tx,
            stop_rx: Some(stop_rx),
            last_error: Some(MonitorError::Undefined),
        }
    }

    /// Set up the monitor: check the input files, load (or download) the
    /// network layout, build the network model and start connecting the
    /// STOMP client over the given transport.
    ///
    /// Nothing is processed until [`Self::run`] or [`Self::run_for`] is
    /// called.
    pub async fn configure_with(
        &mut self,
        config: &MonitorConfig,
        transport: W,
    ) -> Result<(), MonitorError> {
        log::info!("Configuring the live transport network monitor");

        if !config.ca_cert_file.exists() {
            log::error!("Could not find {}", config.ca_cert_file.display());
            return Err(MonitorError::MissingCaCertFile);
        }
        let layout = self.load_layout(config).await?;
        self.network = TransportNetwork::from_layout(&layout).map_err(|e| {
            log::error!("Could not construct the transport network: {}", e);
            MonitorError::FailedTransportNetworkConstruction
        })?;

        let mut client = StompClient::new(&config.url, transport);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let connect_tx = event_tx.clone();
        let disconnect_tx = event_tx.clone();
        client.connect(
            &config.username,
            &config.password,
            Some(Box::new(move |result| {
                let _ = connect_tx.send(MonitorEvent::Connect(result));
            })),
            Some(Box::new(move |result| {
                let _ = disconnect_tx.send(MonitorEvent::Disconnect(result));
            })),
        );
        self.client = Some(client);
        self.event_tx = Some(event_tx);
        self.event_rx = Some(event_rx);

        log::info!("Monitor successfully configured");
        Ok(())
    }

    /// Run until the STOMP session is over and every pending callback has
    /// been processed, or until [`Self::stop`] is called.
    pub async fn run(&mut self) {
        self.run_until(None).await;
    }

    /// Run for at most `duration`, regardless of outstanding work.
    pub async fn run_for(&mut self, duration: Duration) {
        self.run_until(Some(duration)).await;
    }

    /// Ask a running monitor to terminate. In-flight work is abandoned; the
    /// last error code is left untouched so callers can still inspect it.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }

    /// The last error recorded before the run loop ran out of work. `None`
    /// means the run terminated normally.
    pub fn last_error(&self) -> Option<MonitorError> {
        self.last_error
    }

    /// Read access to the network representation. Shares the monitor's
    /// lifetime; counters move only while the monitor runs.
    pub fn network(&self) -> &TransportNetwork {
        &self.network
    }

    async fn run_until(&mut self, duration: Option<Duration>) {
        let Some(client) = self.client.take() else {
            log::error!("Monitor: run called before configure");
            return;
        };
        let Some(mut event_rx) = self.event_rx.take() else {
            log::error!("Monitor: run called twice");
            return;
        };
        log::info!("Running the live transport network monitor");
        self.last_error = None;

        let mut stop_rx = match self.stop_rx.take() {
            Some(rx) => rx,
            None => self.stop_tx.subscribe(),
        };
        let mut finished = client.finished();
        let deadline = tokio::time::sleep(duration.unwrap_or(Duration::ZERO));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    log::info!("Monitor: stop requested");
                    return;
                }
                _ = &mut deadline, if duration.is_some() => {
                    log::info!("Monitor: run deadline reached");
                    break;
                }
                _ = finished.wait_for(|ended| *ended) => {
                    // The session is over; drain below so the disconnect and
                    // any queued messages settle the last error code.
                    break;
                }
                event = event_rx.recv() => match event {
                    Some(event) => self.handle_event(&client, event),
                    None => break,
                },
            }
        }

        // Let every queued callback run, then consume the events it
        // produced. Handling an event can queue further callbacks (e.g. a
        // subscribe failure), so iterate until nothing new shows up.
        loop {
            client.flush().await;
            let mut drained = false;
            while let Ok(event) = event_rx.try_recv() {
                drained = true;
                self.handle_event(&client, event);
            }
            if !drained {
                break;
            }
        }
    }

    fn handle_event(&mut self, client: &StompClient<W>, event: MonitorEvent) {
        match event {
            MonitorEvent::Connect(Ok(())) => {
                log::info!("Monitor: STOMP client connected");
                self.subscribe(client);
            }
            MonitorEvent::Connect(Err(e)) => {
                log::error!("Monitor: STOMP client connection failed: {}", e);
                self.last_error = Some(MonitorError::CouldNotConnectToStompClient);
                client.close(None);
            }
            MonitorEvent::Disconnect(result) => {
                log::error!(
                    "Monitor: STOMP client disconnected: {}",
                    result.err().unwrap_or(StompClientError::Undefined)
                );
                self.last_error = Some(MonitorError::StompClientDisconnected);
            }
            MonitorEvent::Subscribe(Ok(id)) => {
                log::info!(
                    "Monitor: subscribed to {} with id {}",
                    PASSENGER_EVENTS_DESTINATION,
                    id
                );
            }
            MonitorEvent::Subscribe(Err(e)) => {
                log::error!(
                    "Monitor: could not subscribe to {}: {}",
                    PASSENGER_EVENTS_DESTINATION,
                    e
                );
                self.last_error = Some(MonitorError::CouldNotSubscribeToPassengerEvents);
            }
            MonitorEvent::Message(Ok(payload)) => self.handle_passenger_event(&payload),
            MonitorEvent::Message(Err(e)) => {
                log::error!("Monitor: subscription delivered an error: {}", e);
                self.last_error = Some(MonitorError::CouldNotParsePassengerEvent);
            }
        }
    }

    fn subscribe(&mut self, client: &StompClient<W>) {
        log::info!("Monitor: subscribing to {}", PASSENGER_EVENTS_DESTINATION);
        let Some(event_tx) = self.event_tx.clone() else {
            return;
        };
        let subscribe_tx = event_tx.clone();
        let message_tx = event_tx;
        let id = client.subscribe(
            PASSENGER_EVENTS_DESTINATION,
            Some(Box::new(move |result| {
                let _ = subscribe_tx.send(MonitorEvent::Subscribe(result));
            })),
            Some(Box::new(move |result| {
                let _ = message_tx.send(MonitorEvent::Message(result));
            })),
        );
        if id.is_empty() {
            log::error!("Monitor: STOMP client subscription failed");
            self.last_error = Some(MonitorError::CouldNotSubscribeToPassengerEvents);
            client.close(None);
        }
    }

    fn handle_passenger_event(&mut self, payload: &str) {
        let event: PassengerEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                log::error!("Monitor: could not parse passenger event: {} ({})", payload, e);
                self.last_error = Some(MonitorError::CouldNotParsePassengerEvent);
                return;
            }
        };
        if let Err(e) = self.network.record_passenger_event(&event) {
            log::error!("Monitor: could not record passenger event: {}", e);
            self.last_error = Some(MonitorError::CouldNotRecordPassengerEvent);
        } else {
            log::debug!(
                "Monitor: recorded {:?} at {}",
                event.kind,
                event.station_id
            );
        }
    }

    async fn load_layout(&self, config: &MonitorConfig) -> Result<NetworkLayout, MonitorError> {
        let layout_file = match &config.network_layout_file {
            Some(path) => {
                if !path.exists() {
                    log::error!("Could not find {}", path.display());
                    return Err(MonitorError::MissingNetworkLayoutFile);
                }
                path.clone()
            }
            None => {
                let destination = std::env::temp_dir().join("network-layout.json");
                let url = format!("https://{}{}", config.url, NETWORK_LAYOUT_ENDPOINT);
                log::info!("Downloading the network layout to {}", destination.display());
                retrieve::download_file(&url, &destination, &config.ca_cert_file)
                    .await
                    .map_err(|e| {
                        log::error!("Could not download {}: {}", url, e);
                        MonitorError::FailedNetworkLayoutFileDownload
                    })?;
                destination
            }
        };
        parse_layout_file(&layout_file)
    }
}

impl NetworkMonitor<TlsWebSocketClient> {
    /// Set up the monitor against the real secure WebSockets transport.
    pub async fn configure(&mut self, config: &MonitorConfig) -> Result<(), MonitorError> {
        let transport = TlsWebSocketClient::new(
            &config.url,
            config.port,
            NETWORK_EVENTS_ENDPOINT,
            &config.ca_cert_file,
        );
        self.configure_with(config, transport).await
    }
}

fn parse_layout_file(path: &Path) -> Result<NetworkLayout, MonitorError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        log::error!("Could not read {}: {}", path.display(), e);
        MonitorError::FailedNetworkLayoutFileParsing
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        log::error!("Could not parse {}: {}", path.display(), e);
        MonitorError::FailedNetworkLayoutFileParsing
    })
}
