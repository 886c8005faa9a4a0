//! Slow Tunnel
//!
//! A bidirectional message tunnel between a client and a server that share
//! nothing but a state-synchronization transport. The transport mirrors one
//! `(version, payload)` slot per direction and may coalesce or reorder
//! updates; explicit versions recover request/reply correlation on top.
//!
//! - [`tunnel`] - Tunnel endpoints, versioned channels and receive callbacks
//! - [`transport`] - The transport contract plus loopback and WebSocket adapters
//! - [`protocol`] - Wire types and identifiers

#![deny(clippy::correctness)]
#![warn(clippy::suspicious)]
#![warn(clippy::style)]
#![warn(clippy::complexity)]
#![warn(clippy::perf)]

pub mod error;
pub mod protocol;
pub(crate) mod sync;
pub mod transport;
pub mod tunnel;

pub use error::{Result, TunnelError};
pub use protocol::{TunnelId, Version, VersionedMessage};
pub use transport::{LoopbackTransport, SyncTransport, WsTransport};
pub use tunnel::{ReplyFilter, Side, Tunnel};
