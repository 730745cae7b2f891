//! # tether-core
//!
//! Foundation types, errors, retry policies, and logging for the Tether client.
//!
//! This crate provides the shared vocabulary that the other Tether crates depend on:
//!
//! - **Identity**: [`ids::ConnectionId`] and [`ids::ConnectionToken`] as newtypes
//! - **Transfer**: [`transfer::TransportKind`], [`transfer::HttpTransportType`],
//!   [`transfer::TransferFormat`], and the [`transfer::Payload`] frame type
//! - **Lifecycle**: [`state::ConnectionState`]
//! - **Errors**: [`errors::ConnectionError`] hierarchy via `thiserror`
//! - **Retry**: [`retry::RetryPolicy`], [`retry::RetryContext`], and the default table
//! - **Auth**: [`auth::AccessTokenProvider`] for bearer tokens
//! - **Logging**: [`logging::init_subscriber`] for binaries and tests
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other tether crates.

#![deny(unsafe_code)]

pub mod auth;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod state;
pub mod transfer;

pub use errors::{
    ConnectionError, FailedToStartTransportError, NegotiationError, TransportError,
    TransportFailure,
};
pub use ids::{ConnectionId, ConnectionToken};
pub use retry::{DefaultReconnectPolicy, ElapsedTimePolicy, RetryContext, RetryPolicy};
pub use state::ConnectionState;
pub use transfer::{HttpTransportType, Payload, TransferFormat, TransportKind};
