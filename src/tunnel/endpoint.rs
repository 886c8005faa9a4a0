use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::callback::{CallbackRegistry, ReceiveHandler};
use super::channel::VersionedChannel;
use crate::protocol::{
    TunnelId, Version, VersionedMessage, CLIENT_TO_SERVER_FIELD, SERVER_TO_CLIENT_FIELD,
    TUNNEL_ID_FIELD,
};
use crate::sync::lock;
use crate::transport::{FieldChange, Origin, SyncTransport};

/// Which end of the tunnel an endpoint drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Server,
}

/// One of the two unidirectional channels of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Side {
    /// The channel this side writes
    pub fn outbound(self) -> Direction {
        match self {
            Side::Client => Direction::ClientToServer,
            Side::Server => Direction::ServerToClient,
        }
    }

    /// The channel this side observes
    pub fn inbound(self) -> Direction {
        match self {
            Side::Client => Direction::ServerToClient,
            Side::Server => Direction::ClientToServer,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => write!(f, "client"),
            Side::Server => write!(f, "server"),
        }
    }
}

impl Direction {
    pub fn field(self) -> &'static str {
        match self {
            Direction::ClientToServer => CLIENT_TO_SERVER_FIELD,
            Direction::ServerToClient => SERVER_TO_CLIENT_FIELD,
        }
    }
}

/// State reached from transport notifications
struct Inbound {
    side: Side,
    id: TunnelId,
    /// Mirror of the last message accepted from the remote side
    channel: VersionedChannel,
    registry: CallbackRegistry,
    /// Held from the staleness check through the handler call, so overlapping
    /// deliveries reach the handler in version order
    deliver: Mutex<()>,
    peer_id: Mutex<Option<TunnelId>>,
}

impl Inbound {
    fn on_inbound_change(&self, change: &FieldChange) {
        if change.origin == Origin::Local {
            return;
        }

        let msg = match VersionedMessage::from_value(&change.field, &change.value) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("[{} {}] {}", self.side, self.id, e);
                return;
            }
        };

        let _delivering = lock(&self.deliver);
        // Drops duplicates and updates that arrive after a newer one
        if !self.channel.write_if_newer(msg.version, msg.payload.clone()) {
            debug!(
                "[{} {}] dropped stale inbound v{} (have v{})",
                self.side,
                self.id,
                msg.version,
                self.channel.read().version
            );
            return;
        }

        debug!("[{} {}] received v{}", self.side, self.id, msg.version);
        self.registry.invoke(msg.version, &msg.payload);
    }

    fn on_identity_change(&self, change: &FieldChange) {
        if change.origin == Origin::Local {
            return;
        }

        let Value::String(peer) = &change.value else {
            warn!("[{} {}] ignoring non-string tunnel id", self.side, self.id);
            return;
        };

        let peer = TunnelId::from(peer.as_str());
        if peer == self.id {
            info!("[{} {}] peer attached", self.side, self.id);
        } else {
            warn!("[{} {}] peer reports tunnel id {}", self.side, self.id, peer);
        }
        *lock(&self.peer_id) = Some(peer);
    }
}

/// One side of a bidirectional tunnel.
///
/// Each side owns its outbound channel and observes the other side's
/// channel through the transport. Both sides expose the same operations.
pub struct Tunnel {
    transport: Arc<dyn SyncTransport>,
    outbound: VersionedChannel,
    inbound: Arc<Inbound>,
    /// Serialises version assignment with publication, so two senders on
    /// this side cannot publish out of version order
    send_guard: Mutex<()>,
}

impl Tunnel {
    /// Attach `side` of a tunnel to `transport`. A random id is generated
    /// when none is given.
    pub fn create(side: Side, transport: Arc<dyn SyncTransport>, id: Option<TunnelId>) -> Self {
        Self::attach(side, transport, id, CallbackRegistry::new())
    }

    /// Like [`Tunnel::create`], with the receive handler in place before the
    /// endpoint subscribes, so no early message reaches the no-op default.
    pub fn with_handler<F>(
        side: Side,
        transport: Arc<dyn SyncTransport>,
        id: Option<TunnelId>,
        handler: F,
    ) -> Self
    where
        F: Fn(Version, &str) + Send + Sync + 'static,
    {
        let registry = CallbackRegistry::new();
        registry.set(Arc::new(handler));
        Self::attach(side, transport, id, registry)
    }

    fn attach(
        side: Side,
        transport: Arc<dyn SyncTransport>,
        id: Option<TunnelId>,
        registry: CallbackRegistry,
    ) -> Self {
        let id = id.unwrap_or_else(TunnelId::generate);
        let initial = VersionedMessage::default().to_value();

        for direction in [side.outbound(), side.inbound()] {
            if let Err(e) = transport.declare(direction.field(), initial.clone()) {
                warn!("[{} {}] failed to declare {}: {}", side, id, direction.field(), e);
            }
        }

        let inbound = Arc::new(Inbound {
            side,
            id: id.clone(),
            channel: VersionedChannel::new(),
            registry,
            deliver: Mutex::new(()),
            peer_id: Mutex::new(None),
        });

        let observer = inbound.clone();
        transport.subscribe(
            side.inbound().field(),
            Arc::new(move |change: &FieldChange| observer.on_inbound_change(change)),
        );
        let observer = inbound.clone();
        transport.subscribe(
            TUNNEL_ID_FIELD,
            Arc::new(move |change: &FieldChange| observer.on_identity_change(change)),
        );

        // Values mirrored before we subscribed produced no notification
        for field in [side.inbound().field(), TUNNEL_ID_FIELD] {
            if let Some(value) = transport.get_value(field) {
                let change = FieldChange {
                    field: field.to_string(),
                    value,
                    origin: Origin::Remote,
                };
                if field == TUNNEL_ID_FIELD {
                    inbound.on_identity_change(&change);
                } else {
                    inbound.on_inbound_change(&change);
                }
            }
        }

        if let Err(e) = transport.set_value(TUNNEL_ID_FIELD, Value::String(id.to_string())) {
            warn!("[{} {}] failed to publish tunnel id: {}", side, id, e);
        }

        info!("[{} {}] tunnel endpoint created", side, id);

        Tunnel {
            transport,
            outbound: VersionedChannel::new(),
            inbound,
            send_guard: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &TunnelId {
        &self.inbound.id
    }

    pub fn side(&self) -> Side {
        self.inbound.side
    }

    /// Send `payload` at the next outbound version. Returns that version so
    /// a later reply can be correlated with it.
    pub fn send_message(&self, payload: &str) -> Version {
        let _guard = lock(&self.send_guard);
        let version = self.outbound.bump_and_write(payload);
        self.publish(&VersionedMessage::new(version, payload));
        version
    }

    /// Send `payload` at an explicit version, typically the version of the
    /// request being answered. Does nothing if a message at the same or a
    /// newer version was already sent. Returns whether it was sent.
    pub fn send_message_with_version(&self, version: Version, payload: &str) -> bool {
        let _guard = lock(&self.send_guard);
        if !self.outbound.write_if_newer(version, payload) {
            debug!(
                "[{} {}] not sending v{}, outbound already at v{}",
                self.side(),
                self.id(),
                version,
                self.outbound.read().version
            );
            return false;
        }
        self.publish(&VersionedMessage::new(version, payload));
        true
    }

    /// Register the handler called with `(version, payload)` for every new
    /// inbound message. Replaces the previous handler.
    ///
    /// Calls never overlap and their versions strictly increase. The handler
    /// may send or re-register, but must not synchronously drive delivery
    /// into this same endpoint.
    pub fn on_receive<F>(&self, handler: F)
    where
        F: Fn(Version, &str) + Send + Sync + 'static,
    {
        let handler: ReceiveHandler = Arc::new(handler);
        self.inbound.registry.set(handler);
    }

    /// Like [`Tunnel::on_receive`] for handlers that don't need the version
    pub fn on_receive_payload<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_receive(move |_: Version, payload: &str| handler(payload));
    }

    /// Last message this side sent
    pub fn last_sent(&self) -> VersionedMessage {
        self.outbound.read()
    }

    /// Last message accepted from the remote side
    pub fn last_received(&self) -> VersionedMessage {
        self.inbound.channel.read()
    }

    /// Tunnel id announced by the remote side, once seen
    pub fn peer_id(&self) -> Option<TunnelId> {
        lock(&self.inbound.peer_id).clone()
    }

    /// Whether the remote side announced the same tunnel id
    pub fn is_confirmed(&self) -> bool {
        self.peer_id().as_ref() == Some(self.id())
    }

    fn publish(&self, msg: &VersionedMessage) {
        let field = self.side().outbound().field();
        debug!("[{} {}] sending v{}", self.side(), self.id(), msg.version);
        if let Err(e) = self.transport.set_value(field, msg.to_value()) {
            warn!(
                "[{} {}] transport rejected v{}: {}",
                self.side(),
                self.id(),
                msg.version,
                e
            );
        }
    }
}

impl fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tunnel")
            .field("id", self.id())
            .field("side", &self.side())
            .field("last_sent", &self.last_sent())
            .field("last_received", &self.last_received())
            .finish()
    }
}
