//! # tether-client
//!
//! The connection state machine: negotiate, pick a transport, keep it alive.
//!
//! ```text
//! Disconnected ──start──▶ Connecting ──ok──▶ Connected ──stop──▶ Disconnecting ──▶ Disconnected
//!       ▲                     │                  │
//!       └──── failure ────────┘            drop  │ (policy set)
//!       ▲                                        ▼
//!       └──── exhausted / stop ──────────── Reconnecting ──ok──▶ Connected
//! ```
//!
//! [`HttpConnection`] is a cheap handle to a driver task that owns the state
//! and the active transport. Lifecycle and data events arrive on
//! [`ConnectionEvents`]; `Closed` fires exactly once per completed lifecycle.
//!
//! ## Crate Position
//!
//! Depends on: tether-core, tether-settings, tether-transport.
//! Depended on by: tether (binary).

#![deny(unsafe_code)]

mod connection;
mod driver;
pub mod events;
pub mod options;

#[cfg(test)]
mod testutil;

pub use connection::HttpConnection;
pub use driver::Snapshot;
pub use events::{ConnectionEvent, ConnectionEvents};
pub use options::HttpConnectionOptions;
