//! braid-relay library.
//!
//! Talks to the relay network: the JSON array wire protocol, WebSocket
//! connections, and a coordinator that fans one set of filters out to every
//! configured relay and merges what comes back into a single validated,
//! deduplicated stream.
//!
//! # Conventions
//!
//! - **Errors**: [`RelayError`] for everything that crosses a socket.
//! - **Logging**: `tracing` macros; a relay going away is `warn!`, a
//!   duplicate delivery is `trace!`.
//! - **Transport**: all I/O goes through the [`connection::Connector`] and
//!   [`connection::RelayTransport`] traits so tests can run in memory.

pub mod connection;
pub mod coordinator;
pub mod error;
pub mod info;
pub mod message;

pub use connection::{Connector, RelayTransport, WsConnector};
pub use coordinator::{
    Coordinator, CoordinatorConfig, DeliveryStats, FetchResult, PublishReport, SettleReason,
    Settlement, Subscription,
};
pub use error::RelayError;
pub use info::{RelayInfo, fetch_info, fetch_info_blocking};
pub use message::{ClientMessage, Filter, RelayMessage};
