//! Wire types shared by both ends of a tunnel.
//!
//! - [`VersionedMessage`] - The `(version, payload)` slot value mirrored per direction
//! - [`SyncFrame`] - JSON frames used to mirror fields over a WebSocket
//!
//! Also provides the [`TunnelId`] newtype and the mirrored field names.

mod ids;
mod messages;

pub use ids::*;
pub use messages::*;

/// Field carrying client -> server messages
pub const CLIENT_TO_SERVER_FIELD: &str = "client_to_server";

/// Field carrying server -> client messages
pub const SERVER_TO_CLIENT_FIELD: &str = "server_to_client";

/// Field carrying the tunnel identity
pub const TUNNEL_ID_FIELD: &str = "tunnel_id";
