//! In-process transport pair.
//!
//! Each half queues outgoing field updates in its peer's mailbox. Nothing
//! is applied until the receiving half delivers, either on demand with
//! [`LoopbackTransport::deliver_pending`] or continuously with
//! [`LoopbackTransport::run`]. This makes reordering and coalescing
//! reproducible.

use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{FieldHandler, FieldTable, Origin, SyncTransport};
use crate::error::Result;
use crate::sync::lock;

/// How queued updates are handed to the receiving side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// In the order they were sent
    Fifo,
    /// Newest first
    Reversed,
    /// Only the last update of each field, in send order
    Coalesced,
}

#[derive(Debug, Clone)]
struct Update {
    field: String,
    value: Value,
    declare: bool,
}

#[derive(Default)]
struct Mailbox {
    pending: Mutex<VecDeque<Update>>,
    notify: Notify,
}

pub struct LoopbackTransport {
    label: &'static str,
    fields: FieldTable,
    inbox: Arc<Mailbox>,
    peer: Arc<Mailbox>,
}

impl LoopbackTransport {
    /// Create two connected halves, conventionally (client, server)
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let a = Arc::new(Mailbox::default());
        let b = Arc::new(Mailbox::default());

        let client = LoopbackTransport {
            label: "client",
            fields: FieldTable::default(),
            inbox: a.clone(),
            peer: b.clone(),
        };
        let server = LoopbackTransport {
            label: "server",
            fields: FieldTable::default(),
            inbox: b,
            peer: a,
        };

        (Arc::new(client), Arc::new(server))
    }

    /// Number of updates waiting to be applied on this side
    pub fn pending(&self) -> usize {
        lock(&self.inbox.pending).len()
    }

    /// Apply every queued update from the peer. Returns how many were applied.
    pub fn deliver_pending(&self, delivery: Delivery) -> usize {
        let queued: Vec<Update> = lock(&self.inbox.pending).drain(..).collect();

        let updates = match delivery {
            Delivery::Fifo => queued,
            Delivery::Reversed => queued.into_iter().rev().collect(),
            Delivery::Coalesced => coalesce(queued),
        };

        let count = updates.len();
        for update in updates {
            trace!("[{}] applying {}", self.label, update.field);
            if update.declare {
                self.fields.apply_declare(&update.field, update.value);
            } else {
                self.fields.apply(&update.field, update.value, Origin::Remote);
            }
        }
        count
    }

    /// Deliver continuously until `shutdown` fires. After each wake-up the
    /// pump waits `latency` before delivering, so every update sent in
    /// that window is coalesced into one change per field.
    pub async fn run(&self, latency: Duration, shutdown: CancellationToken) {
        debug!("[{}] loopback pump started ({:?} latency)", self.label, latency);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.inbox.notify.notified() => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(latency) => {}
            }

            let applied = self.deliver_pending(Delivery::Coalesced);
            debug!("[{}] delivered {} update(s)", self.label, applied);
        }

        debug!("[{}] loopback pump stopped", self.label);
    }

    fn push(&self, field: &str, value: Value, declare: bool) {
        lock(&self.peer.pending).push_back(Update {
            field: field.to_string(),
            value,
            declare,
        });
        self.peer.notify.notify_one();
    }
}

fn coalesce(updates: Vec<Update>) -> Vec<Update> {
    let mut seen = HashSet::new();
    let mut latest: Vec<Update> = updates
        .into_iter()
        .rev()
        .filter(|u| seen.insert(u.field.clone()))
        .collect();
    latest.reverse();
    latest
}

impl SyncTransport for LoopbackTransport {
    fn declare(&self, field: &str, initial: Value) -> Result<()> {
        if self.fields.declare(field, initial.clone()) {
            self.push(field, initial, true);
        }
        Ok(())
    }

    fn set_value(&self, field: &str, value: Value) -> Result<()> {
        self.fields.apply(field, value.clone(), Origin::Local);
        self.push(field, value, false);
        Ok(())
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        self.fields.get(field)
    }

    fn subscribe(&self, field: &str, handler: FieldHandler) {
        self.fields.subscribe(field, handler);
    }
}
