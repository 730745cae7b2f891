//! # tether-transport
//!
//! Everything between "here is a base URL" and "here is an open transport":
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `endpoint` | Negotiate/connect URL construction |
//! | `negotiate` | `POST /negotiate` handshake with redirect following |
//! | `selector` | Candidate list computation and sequential fallback |
//! | `transport` | [`Transport`] trait, [`TransportFactory`], shared request helpers |
//! | `sink` | Single-consumer inbound event channel with exactly-once close |
//! | `websocket` | Full-duplex socket transport (`tokio-tungstenite`) |
//! | `sse` | Server-push event stream + POST sends (`eventsource-stream`) |
//! | `long_polling` | Poll loop + POST sends (`reqwest`) |
//!
//! ## Crate Position
//!
//! Depends on: tether-core.
//! Depended on by: tether-client.

#![deny(unsafe_code)]

pub mod endpoint;
pub mod long_polling;
pub mod negotiate;
pub mod selector;
pub mod sink;
pub mod sse;
pub mod transport;
pub mod websocket;

pub use negotiate::{AvailableTransport, NegotiateResponse, Negotiation, Negotiator};
pub use selector::{CandidatePlan, ConnectArgs, ConnectedTransport, TransportCandidate, TransportSelector};
pub use sink::{EventSink, TransportEvent};
pub use transport::{DefaultTransportFactory, Transport, TransportFactory, TransportOptions};
