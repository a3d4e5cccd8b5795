//! braid-core library.
//!
//! The reconciliation engine for a relay-replicated issue tracker: signed
//! events come in from any number of relays, get validated, parsed into typed
//! records, and folded into a convergent SQLite projection.
//!
//! # Conventions
//!
//! - **Errors**: module-level `thiserror` enums for domain failures,
//!   `anyhow::Result` for the projection database layer.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).
//! - **Merges**: every reducer is commutative and idempotent; equal
//!   `created_at` values are broken by the lexicographically smaller event id.

pub mod activity;
pub mod bounty;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod lock;
pub mod model;
pub mod resolve;
pub mod status;
pub mod tags;
pub mod thread;
