//! UDP listener for the comma-separated sentence feed.
//!
//! Runs independently of the session and only talks to the event bus.

use crate::bus::EventBus;
use ifconnect_rpc::SentenceParser;
use ifconnect_types::ClientEvent;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{error, info, trace};

const MAX_SENTENCE_SIZE: usize = 2048;

#[derive(Debug)]
pub struct TelemetryListener {
    local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TelemetryListener {
    /// Bind `0.0.0.0:port` and publish one [`ClientEvent::Telemetry`] per decoded sentence.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub async fn spawn(port: u16, parser: SentenceParser, bus: EventBus) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await?;
        let local_addr = socket.local_addr()?;
        info!("Telemetry listening on {}", local_addr);
        bus.publish(ClientEvent::TelemetryListening { listen: local_addr });

        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_SENTENCE_SIZE];
            loop {
                let len = match socket.recv_from(&mut buf).await {
                    Ok((len, _)) => len,
                    Err(e) => {
                        error!("Telemetry socket error: {}", e);
                        break;
                    }
                };

                if let Some(record) = parser.parse_bytes(&buf[..len]) {
                    trace!("Telemetry {}: {:?}", record.name, record.fields);
                    bus.publish(ClientEvent::Telemetry { record });
                }
            }
        });

        Ok(Self { local_addr, handle })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for TelemetryListener {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
