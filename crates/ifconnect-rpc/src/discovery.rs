//! Host discovery announcements.
//!
//! A running simulator broadcasts `{"Addresses": [...], "Port": n}` on UDP
//! port 15000. The same port also carries ordinary data objects, so every
//! datagram is classified rather than assumed to be an announcement.

use std::net::Ipv4Addr;

use ifconnect_types::{DataEnvelope, HostEndpoint};
use serde_json::Value;
use tracing::{debug, warn};

use crate::transport::{latin1, normalize_nan};

/// Well-known UDP port for host announcements
pub const DISCOVERY_PORT: u16 = 15000;

const ADDRESSES_FIELD: &str = "Addresses";
const PORT_FIELD: &str = "Port";

/// Classification of one discovery-port datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Datagram {
    /// Announcement with a usable IPv4 address
    Announcement(HostEndpoint),
    /// Announcement that cannot be connected to
    Unusable { reason: String },
    /// Any other JSON object
    Data(DataEnvelope),
    /// Not a JSON object
    Malformed,
}

/// First IPv4-formatted entry; IPv6 and garbage entries are skipped.
#[must_use]
pub fn select_ipv4<'a, I>(addresses: I) -> Option<Ipv4Addr>
where
    I: IntoIterator<Item = &'a str>,
{
    addresses
        .into_iter()
        .find_map(|candidate| candidate.trim().parse::<Ipv4Addr>().ok())
}

/// Classify a datagram received on the discovery port.
#[must_use]
pub fn parse_datagram(bytes: &[u8]) -> Datagram {
    let text = latin1(bytes);
    let value = match serde_json::from_str::<Value>(&normalize_nan(&text)) {
        Ok(value) => value,
        Err(e) => {
            debug!("Discovery datagram is not JSON: {}", e);
            return Datagram::Malformed;
        }
    };

    let Some(envelope) = DataEnvelope::from_value(value) else {
        debug!("Discovery datagram is not an object");
        return Datagram::Malformed;
    };

    let Some(addresses) = envelope.get(ADDRESSES_FIELD).and_then(Value::as_array) else {
        return Datagram::Data(envelope);
    };

    let Some(port) = envelope
        .get(PORT_FIELD)
        .and_then(Value::as_u64)
        .and_then(|p| u16::try_from(p).ok())
        .filter(|p| *p != 0)
    else {
        let reason = format!("announcement has no valid port: {:?}", envelope.get(PORT_FIELD));
        warn!("{}", reason);
        return Datagram::Unusable { reason };
    };

    match select_ipv4(addresses.iter().filter_map(Value::as_str)) {
        Some(ip) => Datagram::Announcement(HostEndpoint::new(ip.to_string(), port)),
        None => {
            let reason = format!("announcement has no IPv4 address: {addresses:?}");
            warn!("{}", reason);
            Datagram::Unusable { reason }
        }
    }
}
