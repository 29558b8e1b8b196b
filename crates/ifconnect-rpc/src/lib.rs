//! Wire protocol for the simulator Connect API.
//!
//! This crate holds everything that turns bytes into typed values and back,
//! without owning any sockets:
//!
//! - [`transport`]: command frame encoder and the incremental JSON stream decoder
//! - [`discovery`]: UDP announcement parsing and host selection
//! - [`sentence`]: comma-separated telemetry sentence models and parser
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use ifconnect_rpc::FrameCodec;
//! use tokio_util::codec::Decoder;
//!
//! let mut codec = FrameCodec::new();
//! let mut buf = BytesMut::from(&br#"{"Type":"Fds.IFAPI.IFAPIStatus"}{"A":1}"#[..]);
//!
//! let first = codec.decode(&mut buf).unwrap().unwrap();
//! assert_eq!(first.type_name(), Some("Fds.IFAPI.IFAPIStatus"));
//! assert!(codec.decode(&mut buf).unwrap().is_some());
//! ```

pub mod discovery;
pub mod sentence;
pub mod transport;

pub use discovery::{DISCOVERY_PORT, Datagram, parse_datagram, select_ipv4};
pub use sentence::{SentenceModel, SentenceParser, TELEMETRY_PORT};
pub use transport::{
    CodecError, FrameCodec, LENGTH_PREFIX_SIZE, MAX_FRAME_PAYLOAD, OversizePolicy, encode_payload,
};

pub use ifconnect_types::{Command, DataEnvelope, HostEndpoint, TelemetryRecord};
