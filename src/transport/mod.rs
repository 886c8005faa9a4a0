//! State-synchronization transports.
//!
//! A transport mirrors named fields between two sides and fires change
//! notifications. The tunnel only relies on the [`SyncTransport`] trait:
//! - [`LoopbackTransport`] - In-process pair, deterministic or latency-driven
//! - [`WsTransport`] - Fields mirrored over a WebSocket connection
//!
//! Delivery is at-least-once with single-slot semantics per field and no
//! ordering guarantee across fields.

mod loopback;
mod ws;

pub use loopback::{Delivery, LoopbackTransport};
pub use ws::WsTransport;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::sync::lock;

/// Where a field change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Set by this side
    Local,
    /// Mirrored from the remote side
    Remote,
}

/// A change notification for one mirrored field
#[derive(Debug, Clone)]
pub struct FieldChange {
    pub field: String,
    pub value: Value,
    pub origin: Origin,
}

pub type FieldHandler = Arc<dyn Fn(&FieldChange) + Send + Sync>;

pub trait SyncTransport: Send + Sync {
    /// Declare a mirrored field. Keeps an existing local value.
    fn declare(&self, field: &str, initial: Value) -> Result<()>;

    /// Update the local copy and propagate it to the remote side
    fn set_value(&self, field: &str, value: Value) -> Result<()>;

    /// Current local copy of a field
    fn get_value(&self, field: &str) -> Option<Value>;

    /// Register a handler fired whenever `field` changes, locally or remotely
    fn subscribe(&self, field: &str, handler: FieldHandler);
}

/// Local copy of the mirrored fields plus their subscribers.
///
/// Handlers are always run after the locks are released, so a handler may
/// freely set values or subscribe.
#[derive(Default)]
pub(crate) struct FieldTable {
    values: Mutex<HashMap<String, Value>>,
    subscribers: Mutex<HashMap<String, Vec<FieldHandler>>>,
}

impl FieldTable {
    /// Insert `value` unless the field already exists. Returns whether it was inserted.
    pub(crate) fn declare(&self, field: &str, value: Value) -> bool {
        let mut values = lock(&self.values);
        if values.contains_key(field) {
            return false;
        }
        values.insert(field.to_string(), value);
        true
    }

    pub(crate) fn get(&self, field: &str) -> Option<Value> {
        lock(&self.values).get(field).cloned()
    }

    pub(crate) fn subscribe(&self, field: &str, handler: FieldHandler) {
        lock(&self.subscribers)
            .entry(field.to_string())
            .or_default()
            .push(handler);
    }

    /// Store the value and notify the field's subscribers
    pub(crate) fn apply(&self, field: &str, value: Value, origin: Origin) {
        lock(&self.values).insert(field.to_string(), value.clone());
        self.notify(field, value, origin);
    }

    /// Apply a remote declaration. Only a field unknown on this side is
    /// stored and notified.
    pub(crate) fn apply_declare(&self, field: &str, value: Value) -> bool {
        if !self.declare(field, value.clone()) {
            return false;
        }
        self.notify(field, value, Origin::Remote);
        true
    }

    fn notify(&self, field: &str, value: Value, origin: Origin) {
        let handlers = lock(&self.subscribers)
            .get(field)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            return;
        }

        let change = FieldChange {
            field: field.to_string(),
            value,
            origin,
        };
        for handler in handlers {
            handler(&change);
        }
    }
}
