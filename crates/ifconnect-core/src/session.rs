//! Session actor owning the TCP connection.
//!
//! One task holds every piece of mutable session state: the socket, the
//! pending connect attempt, the poll scheduler and the discovery listener.
//! [`IfcClient`](crate::IfcClient) talks to it through [`SessionCommand`]s and
//! observes it through the event bus, the state watch and the shared cache.
//!
//! ```text
//! Idle -> Connecting -> Connected -> Idle (remote close, disconnect)
//!             |
//!             +-> Idle (handshake failed, host undefined)
//! any -> Closed (shutdown)
//! ```

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use ifconnect_rpc::{CodecError, Datagram, FrameCodec, OversizePolicy};
use ifconnect_types::{Category, ClientEvent, Command, DataEnvelope, HostEndpoint, SessionState};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;
use crate::discovery::DiscoveryListener;
use crate::poll::{PollScheduler, PollTick};
use crate::state::LastKnownState;

type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send>>;

/// Requests handled by the session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Start the discovery listener unless one is running
    SearchHost {
        reply: oneshot::Sender<io::Result<SocketAddr>>,
    },
    SetHost(HostEndpoint),
    Connect(HostEndpoint),
    /// Connect to the host from [`SetHost`](Self::SetHost) or discovery
    ConnectConfigured,
    Disconnect,
    Send(Command),
    SetIntervals(Vec<(Category, u32)>),
    ResetIntervals(Vec<(Category, u32)>),
    Shutdown,
}

/// Settings the session needs from [`ClientConfig`](crate::config::ClientConfig).
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub discovery_port: u16,
    pub close_on_discover: bool,
    pub connect_on_discover: bool,
    pub oversize: OversizePolicy,
}

struct PendingConnect {
    endpoint: HostEndpoint,
    future: ConnectFuture,
}

struct Connection {
    endpoint: HostEndpoint,
    sink: SplitSink<Framed<TcpStream, FrameCodec>, Command>,
    stream: SplitStream<Framed<TcpStream, FrameCodec>>,
}

struct Discovery {
    listener: DiscoveryListener,
    rx: mpsc::UnboundedReceiver<Datagram>,
}

pub struct Session {
    options: SessionOptions,
    host: Option<HostEndpoint>,
    bus: EventBus,
    cache: LastKnownState,
    state: watch::Sender<SessionState>,
    scheduler: PollScheduler,
    ticks: mpsc::UnboundedReceiver<PollTick>,
    pending: Option<PendingConnect>,
    connection: Option<Connection>,
    discovery: Option<Discovery>,
}

impl Session {
    #[must_use]
    pub fn new(
        options: SessionOptions,
        bus: EventBus,
        cache: LastKnownState,
        state: watch::Sender<SessionState>,
    ) -> Self {
        let (tick_tx, ticks) = mpsc::unbounded_channel();
        Self {
            options,
            host: None,
            bus,
            cache,
            state,
            scheduler: PollScheduler::new(tick_tx),
            ticks,
            pending: None,
            connection: None,
            discovery: None,
        }
    }

    /// Seed poll rules before the task starts.
    #[must_use]
    pub fn with_intervals<I>(mut self, intervals: I) -> Self
    where
        I: IntoIterator<Item = (Category, u32)>,
    {
        self.scheduler.set_intervals(intervals);
        self
    }

    #[must_use]
    pub fn with_host(mut self, host: Option<HostEndpoint>) -> Self {
        self.host = host;
        self
    }

    /// Process commands until [`SessionCommand::Shutdown`] or every sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(tick) = self.ticks.recv() => {
                    if let Some(command) = self.scheduler.accept(tick) {
                        self.send(command).await;
                    }
                }
                result = next_connect(&mut self.pending) => self.on_connect_result(result),
                frame = next_frame(&mut self.connection) => self.on_frame(frame),
                datagram = next_datagram(&mut self.discovery) => self.on_datagram(datagram),
            }
        }

        self.shutdown();
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SearchHost { reply } => {
                let result = self.search_host().await;
                if reply.send(result).is_err() {
                    debug!("Search requester went away");
                }
            }
            SessionCommand::SetHost(endpoint) => self.host = Some(endpoint),
            SessionCommand::Connect(endpoint) => self.connect(endpoint),
            SessionCommand::ConnectConfigured => match self.host.clone() {
                Some(endpoint) => self.connect(endpoint),
                None => {
                    warn!("Connect requested but no host is known");
                    self.bus.publish(ClientEvent::HostUndefined);
                }
            },
            SessionCommand::Disconnect => self.disconnect(),
            SessionCommand::Send(command) => self.send(command).await,
            SessionCommand::SetIntervals(intervals) => self.scheduler.set_intervals(intervals),
            SessionCommand::ResetIntervals(intervals) => {
                self.scheduler.reset_intervals(intervals);
            }
            // handled by the run loop
            SessionCommand::Shutdown => {}
        }
    }

    async fn search_host(&mut self) -> io::Result<SocketAddr> {
        if let Some(discovery) = &self.discovery {
            debug!("Discovery already running on {}", discovery.listener.local_addr());
            return Ok(discovery.listener.local_addr());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let spawned = DiscoveryListener::spawn(
            self.options.discovery_port,
            self.options.close_on_discover,
            tx,
        )
        .await;

        match spawned {
            Ok(listener) => {
                let listen = listener.local_addr();
                self.discovery = Some(Discovery { listener, rx });
                self.bus.publish(ClientEvent::HostSearchStarted { listen });
                Ok(listen)
            }
            Err(e) => {
                error!(
                    "Failed to bind discovery port {}: {}",
                    self.options.discovery_port, e
                );
                self.bus.publish(ClientEvent::DiscoveryFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn connect(&mut self, endpoint: HostEndpoint) {
        self.close_connection();
        self.pending = None;

        info!("Connecting to {}", endpoint);
        self.bus.publish(ClientEvent::Connecting {
            endpoint: endpoint.clone(),
        });

        if !endpoint.is_defined() {
            warn!("Host undefined");
            self.set_state(SessionState::Idle);
            self.bus.publish(ClientEvent::HostUndefined);
            return;
        }

        self.host = Some(endpoint.clone());
        self.set_state(SessionState::Connecting);

        let target = (endpoint.address.clone(), endpoint.port);
        self.pending = Some(PendingConnect {
            endpoint,
            future: Box::pin(TcpStream::connect(target)),
        });
    }

    fn on_connect_result(&mut self, result: (HostEndpoint, io::Result<TcpStream>)) {
        self.pending = None;
        let (endpoint, result) = result;

        match result {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY: {}", e);
                }
                let framed = Framed::new(
                    stream,
                    FrameCodec::with_oversize_policy(self.options.oversize),
                );
                let (sink, stream) = framed.split();

                info!("Connected to {}", endpoint);
                self.connection = Some(Connection {
                    endpoint: endpoint.clone(),
                    sink,
                    stream,
                });
                self.set_state(SessionState::Connected);
                self.scheduler.arm_all();
                self.bus.publish(ClientEvent::Connected { endpoint });
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", endpoint, e);
                self.set_state(SessionState::Idle);
                self.bus.publish(ClientEvent::ConnectionError {
                    endpoint,
                    message: e.to_string(),
                });
            }
        }
    }

    fn on_frame(&mut self, frame: Option<Result<DataEnvelope, CodecError>>) {
        match frame {
            Some(Ok(envelope)) => self.on_data_received(envelope),
            Some(Err(e)) => {
                let Some(connection) = self.teardown() else {
                    return;
                };
                warn!("Connection to {} broke: {}", connection.endpoint, e);
                self.bus.publish(ClientEvent::ConnectionError {
                    endpoint: connection.endpoint.clone(),
                    message: e.to_string(),
                });
                self.bus.publish(ClientEvent::Disconnected {
                    endpoint: connection.endpoint,
                });
            }
            None => {
                if let Some(connection) = self.teardown() {
                    info!("Host {} closed the connection", connection.endpoint);
                    self.bus.publish(ClientEvent::Disconnected {
                        endpoint: connection.endpoint,
                    });
                }
            }
        }
    }

    fn on_datagram(&mut self, datagram: Option<Datagram>) {
        match datagram {
            Some(Datagram::Announcement(endpoint)) => {
                self.bus.publish(ClientEvent::HostDiscovered {
                    endpoint: endpoint.clone(),
                });
                self.host = Some(endpoint.clone());
                if self.is_current(&endpoint) {
                    debug!("Already connected or connecting to {}", endpoint);
                } else if self.options.connect_on_discover {
                    self.connect(endpoint);
                }
            }
            Some(Datagram::Unusable { reason }) => {
                self.bus.publish(ClientEvent::DiscoveryFailed { reason });
            }
            Some(Datagram::Data(envelope)) => self.on_data_received(envelope),
            Some(Datagram::Malformed) => {}
            None => {
                debug!("Discovery listener stopped");
                self.discovery = None;
            }
        }
    }

    /// Whether `endpoint` is the host of the open socket or the pending connect.
    fn is_current(&self, endpoint: &HostEndpoint) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.endpoint == *endpoint)
            || self
                .pending
                .as_ref()
                .is_some_and(|pending| pending.endpoint == *endpoint)
    }

    fn on_data_received(&mut self, envelope: DataEnvelope) {
        if self.cache.record(&envelope) {
            debug!("Storing {}", envelope.type_name().unwrap_or_default());
        }
        self.bus.publish(ClientEvent::Data { envelope });
    }

    async fn send(&mut self, command: Command) {
        debug!("Sending command {}", command);

        let Some(connection) = self.connection.as_mut() else {
            warn!("Cannot send {}: not connected", command);
            self.bus.publish(ClientEvent::CommandError { command });
            return;
        };

        match connection.sink.send(command.clone()).await {
            Ok(()) => self.bus.publish(ClientEvent::CommandSent { command }),
            Err(e) => {
                warn!("Failed to send {}: {}", command, e);
                self.bus.publish(ClientEvent::CommandError { command });
            }
        }
    }

    fn disconnect(&mut self) {
        if self.pending.take().is_some() {
            info!("Connect attempt abandoned");
            self.set_state(SessionState::Idle);
        }
        self.close_connection();
    }

    /// Close the open socket, if any, and report it.
    fn close_connection(&mut self) {
        if let Some(connection) = self.teardown() {
            info!("Closing connection to {}", connection.endpoint);
            self.bus.publish(ClientEvent::Disconnected {
                endpoint: connection.endpoint,
            });
        }
    }

    /// Drop the socket and stop polling. The cache is kept.
    fn teardown(&mut self) -> Option<Connection> {
        let connection = self.connection.take()?;
        self.scheduler.cancel_all();
        self.set_state(SessionState::Idle);
        Some(connection)
    }

    fn shutdown(&mut self) {
        self.pending = None;
        self.close_connection();
        self.scheduler.cancel_all();
        if let Some(discovery) = self.discovery.take() {
            discovery.listener.stop();
        }
        self.set_state(SessionState::Closed);
        info!("Session closed");
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Session state {} -> {}", previous, state);
        }
    }
}

async fn next_connect(
    pending: &mut Option<PendingConnect>,
) -> (HostEndpoint, io::Result<TcpStream>) {
    match pending {
        Some(pending) => {
            let result = pending.future.as_mut().await;
            (pending.endpoint.clone(), result)
        }
        None => std::future::pending().await,
    }
}

async fn next_frame(
    connection: &mut Option<Connection>,
) -> Option<Result<DataEnvelope, CodecError>> {
    match connection {
        Some(connection) => connection.stream.next().await,
        None => std::future::pending().await,
    }
}

async fn next_datagram(discovery: &mut Option<Discovery>) -> Option<Datagram> {
    match discovery {
        Some(discovery) => discovery.rx.recv().await,
        None => std::future::pending().await,
    }
}
