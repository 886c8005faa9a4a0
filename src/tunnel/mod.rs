//! Versioned request/response tunnel.
//!
//! - [`Tunnel`] - One endpoint (client or server side) of a tunnel
//! - [`VersionedChannel`] - Last-write-wins slot for one direction
//! - [`CallbackRegistry`] - Single replaceable receive handler
//! - [`ReplyFilter`] - Caller-side stale reply check
//!
//! Each side sends only on its outbound channel and observes only its
//! inbound one. Ordering between the two channels is never relied on;
//! request/reply correlation goes through the explicit versions.

mod callback;
mod channel;
mod endpoint;
mod reply;

pub use callback::{CallbackRegistry, ReceiveHandler};
pub use channel::VersionedChannel;
pub use endpoint::{Direction, Side, Tunnel};
pub use reply::ReplyFilter;
