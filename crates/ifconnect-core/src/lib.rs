//! Runtime for the simulator Connect API.
//!
//! [`IfcClient`] owns one session with one simulation host: it discovers the
//! host over UDP (or takes it from [`ClientConfig`]), keeps a TCP session
//! open, polls data categories on their configured intervals and publishes
//! everything it learns on an [`EventBus`]. The most recent message of each
//! category stays readable through [`LastKnownState`].
//!
//! ```no_run
//! use ifconnect_core::{Category, ClientConfig, ClientEvent, IfcClient};
//!
//! # async fn example() -> ifconnect_core::Result<()> {
//! let client = IfcClient::new(ClientConfig::default());
//! let mut events = client.subscribe();
//! client.init().await?;
//! client.set_poll_intervals([(Category::AircraftState, 500)])?;
//!
//! while let Some(event) = events.recv().await {
//!     if let ClientEvent::Data { envelope } = event {
//!         println!("{:?}", envelope.type_name());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod discovery;
pub mod poll;
pub mod state;
pub mod telemetry;

mod client;
mod error;
mod session;

#[cfg(test)]
mod tests;

pub use bus::{EventBus, EventSubscription};
pub use client::IfcClient;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use poll::{PollRule, PollScheduler, PollTick};
pub use state::LastKnownState;

pub use ifconnect_types::*;
