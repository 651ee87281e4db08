//! Burrow Broker - namespace brokering over a handle-passing channel
//!
//! A broker session pairs a client with a service loop over a connected
//! local socket. The client asks for new namespaces; the service creates
//! them and hands back open namespace handles out-of-band. Hierarchical
//! (user/PID) namespaces are served by a child broker process started inside
//! them, reachable through a channel end handed back with the response.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod api;
pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod service;
pub mod shutdown;
pub mod spacemaker;

pub use api::{Request, Response, RoomsRequest, SubspaceRequest, Subspaces};
pub use channel::HandleChannel;
pub use client::BrokerSession;
pub use config::BrokerConfig;
pub use service::{Termination, serve};
pub use shutdown::Shutdown;
pub use spacemaker::{Spacemaker, Spacer};
