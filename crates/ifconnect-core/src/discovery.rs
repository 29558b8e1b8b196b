//! UDP listener for host announcements.

use ifconnect_rpc::{Datagram, parse_datagram};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Announcements are small; anything larger is truncated and fails to parse.
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Background task forwarding classified datagrams from the discovery port.
///
/// The task ends after the first announcement when `close_on_discover` is set,
/// when the receiving side is dropped, or on a socket error. The forwarding
/// channel closes with it, which is how the owner learns it has stopped.
#[derive(Debug)]
pub struct DiscoveryListener {
    local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl DiscoveryListener {
    /// Bind `0.0.0.0:port` and start forwarding datagrams to `tx`.
    ///
    /// Malformed datagrams are logged and not forwarded.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub async fn spawn(
        port: u16,
        close_on_discover: bool,
        tx: mpsc::UnboundedSender<Datagram>,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await?;
        let local_addr = socket.local_addr()?;
        info!("Discovery listening on {}", local_addr);

        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                let (len, from) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        error!("Discovery socket error: {}", e);
                        break;
                    }
                };

                let datagram = parse_datagram(&buf[..len]);
                let announced = matches!(datagram, Datagram::Announcement(_));
                match &datagram {
                    Datagram::Malformed => {
                        debug!("Ignoring malformed datagram from {}", from);
                        continue;
                    }
                    Datagram::Announcement(endpoint) => {
                        info!("Host discovered at {} (announced by {})", endpoint, from);
                    }
                    Datagram::Unusable { .. } | Datagram::Data(_) => {}
                }

                if tx.send(datagram).is_err() {
                    debug!("Discovery receiver dropped");
                    break;
                }

                if announced && close_on_discover {
                    info!("Closing discovery socket");
                    break;
                }
            }
        });

        Ok(Self { local_addr, handle })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for DiscoveryListener {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
