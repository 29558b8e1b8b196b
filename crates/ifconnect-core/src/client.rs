//! Public entry point: one `IfcClient` per simulation host.

use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

use ifconnect_rpc::SentenceParser;
use ifconnect_types::{Category, ClientEvent, Command, DataEnvelope, HostEndpoint, SessionState};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::{EventBus, EventSubscription};
use crate::config::ClientConfig;
use crate::session::{Session, SessionCommand, SessionOptions};
use crate::state::LastKnownState;
use crate::telemetry::TelemetryListener;
use crate::{Error, Result};

/// Handle to a running session.
///
/// Each client owns its own session task, cache and event bus; clients never
/// share state. Methods only enqueue work, outcomes arrive as [`ClientEvent`]s.
#[derive(Debug)]
pub struct IfcClient {
    config: ClientConfig,
    commands: mpsc::UnboundedSender<SessionCommand>,
    bus: EventBus,
    cache: LastKnownState,
    state: watch::Receiver<SessionState>,
    telemetry: Mutex<Option<TelemetryListener>>,
    session: JoinHandle<()>,
}

impl IfcClient {
    /// Spawn the session task for `config`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let bus = EventBus::new();
        let cache = LastKnownState::new();
        let (state_tx, state) = watch::channel(SessionState::Idle);
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let options = SessionOptions {
            discovery_port: config.discovery.port,
            close_on_discover: config.discovery.close_on_discover,
            connect_on_discover: config.discovery.connect_on_discover,
            oversize: config.frame.oversize,
        };
        let session = Session::new(options, bus.clone(), cache.clone(), state_tx)
            .with_intervals(config.poll_intervals())
            .with_host(config.explicit_endpoint());
        let session = tokio::spawn(session.run(commands_rx));

        Self {
            config,
            commands,
            bus,
            cache,
            state,
            telemetry: Mutex::new(None),
            session,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect to the configured host, or search for one when none is configured.
    /// Also starts the telemetry listener when it is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener socket cannot be bound or the session has shut down.
    pub async fn init(&self) -> Result<()> {
        if self.config.telemetry.enabled {
            self.start_telemetry().await?;
        }

        match self.config.explicit_endpoint() {
            Some(endpoint) => {
                info!("Using configured host {}", endpoint);
                self.connect(endpoint)
            }
            None => self.search_host().await.map(|_| ()),
        }
    }

    /// [`init`](Self::init) with callbacks for the outcome of the first connection attempt.
    ///
    /// `on_connected` receives the endpoint; `on_error` receives the
    /// `ConnectionError` or `HostUndefined` event. At most one of them runs, once.
    ///
    /// # Errors
    ///
    /// Same as [`init`](Self::init).
    pub async fn init_with_callbacks<F, G>(&self, on_connected: F, on_error: G) -> Result<()>
    where
        F: FnOnce(HostEndpoint) + Send + 'static,
        G: FnOnce(ClientEvent) + Send + 'static,
    {
        let mut events = self.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ClientEvent::Connected { endpoint } => {
                        on_connected(endpoint);
                        return;
                    }
                    ClientEvent::ConnectionError { .. } | ClientEvent::HostUndefined => {
                        on_error(event);
                        return;
                    }
                    _ => {}
                }
            }
        });

        self.init().await
    }

    /// Start listening for host announcements. A no-op while a search is running.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the discovery port cannot be bound.
    pub async fn search_host(&self) -> Result<SocketAddr> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::SearchHost { reply })?;
        let listen = rx.await.map_err(|_| Error::SessionClosed)??;
        Ok(listen)
    }

    /// Remember `endpoint` for [`connect_configured`](Self::connect_configured).
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` after shutdown.
    pub fn set_host(&self, endpoint: HostEndpoint) -> Result<()> {
        self.request(SessionCommand::SetHost(endpoint))
    }

    /// Open the TCP session, closing any current one first.
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` after shutdown.
    pub fn connect(&self, endpoint: HostEndpoint) -> Result<()> {
        self.request(SessionCommand::Connect(endpoint))
    }

    /// Connect to the last configured or discovered host.
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` after shutdown.
    pub fn connect_configured(&self) -> Result<()> {
        self.request(SessionCommand::ConnectConfigured)
    }

    /// # Errors
    ///
    /// Returns `Error::SessionClosed` after shutdown.
    pub fn disconnect(&self) -> Result<()> {
        self.request(SessionCommand::Disconnect)
    }

    /// Queue a command. The outcome is published as `CommandSent` or `CommandError`.
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` after shutdown.
    pub fn send(&self, command: Command) -> Result<()> {
        self.request(SessionCommand::Send(command))
    }

    /// Send `Commands.<name>` with no parameters.
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` after shutdown.
    pub fn cmd(&self, name: &str) -> Result<()> {
        self.send(Command::shortcut(name))
    }

    /// # Errors
    ///
    /// Returns `Error::SessionClosed` after shutdown.
    pub fn get_airplane_state(&self) -> Result<()> {
        self.send(Command::get_airplane_state())
    }

    /// Update poll intervals; takes effect immediately while connected.
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` after shutdown.
    pub fn set_poll_intervals<I>(&self, intervals: I) -> Result<()>
    where
        I: IntoIterator<Item = (Category, u32)>,
    {
        self.request(SessionCommand::SetIntervals(intervals.into_iter().collect()))
    }

    /// Update poll intervals and restart every timer.
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` after shutdown.
    pub fn reset_poll_intervals<I>(&self, intervals: I) -> Result<()>
    where
        I: IntoIterator<Item = (Category, u32)>,
    {
        self.request(SessionCommand::ResetIntervals(
            intervals.into_iter().collect(),
        ))
    }

    /// Start the sentence feed listener with the built-in sentence models.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the telemetry port cannot be bound.
    pub async fn start_telemetry(&self) -> Result<SocketAddr> {
        self.start_telemetry_with(SentenceParser::new()).await
    }

    /// Start the sentence feed listener with custom models. A no-op when already running.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the telemetry port cannot be bound.
    pub async fn start_telemetry_with(&self, parser: SentenceParser) -> Result<SocketAddr> {
        if let Some(listener) = self.telemetry_slot().as_ref() {
            return Ok(listener.local_addr());
        }

        let listener =
            TelemetryListener::spawn(self.config.telemetry.port, parser, self.bus.clone()).await?;
        let listen = listener.local_addr();

        let mut slot = self.telemetry_slot();
        if slot.is_none() {
            *slot = Some(listener);
            Ok(listen)
        } else {
            // lost a race with a concurrent start
            listener.stop();
            Ok(slot.as_ref().map_or(listen, TelemetryListener::local_addr))
        }
    }

    pub fn stop_telemetry(&self) {
        if let Some(listener) = self.telemetry_slot().take() {
            debug!("Stopping telemetry listener");
            listener.stop();
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    /// Latest envelope for a category.
    #[must_use]
    pub fn last_known(&self, category: Category) -> Option<DataEnvelope> {
        self.cache.get(category)
    }

    #[must_use]
    pub fn last_known_type(&self, type_name: &str) -> Option<DataEnvelope> {
        self.cache.get_type(type_name)
    }

    #[must_use]
    pub fn cache(&self) -> &LastKnownState {
        &self.cache
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch channel following every state transition.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Close everything and wait for the session task to finish.
    pub async fn shutdown(self) {
        self.stop_telemetry();
        if self.commands.send(SessionCommand::Shutdown).is_err() {
            debug!("Session task already stopped");
        }
        if let Err(e) = self.session.await {
            debug!("Session task ended abnormally: {}", e);
        }
    }

    fn request(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::SessionClosed)
    }

    fn telemetry_slot(&self) -> std::sync::MutexGuard<'_, Option<TelemetryListener>> {
        self.telemetry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
