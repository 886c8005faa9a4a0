use std::sync::Mutex;

use crate::protocol::{Version, VersionedMessage};
use crate::sync::lock;

/// Single-slot mailbox holding the latest message of one direction.
///
/// Writes overwrite, nothing is queued. The mutex is the exclusive guard
/// that keeps concurrent writers on the same side from interleaving a
/// read-modify-write.
#[derive(Debug, Default)]
pub struct VersionedChannel {
    slot: Mutex<VersionedMessage>,
}

impl VersionedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditionally overwrite the slot
    pub fn write(&self, version: Version, payload: impl Into<String>) {
        *lock(&self.slot) = VersionedMessage::new(version, payload);
    }

    /// Overwrite only if `version` is strictly newer than the stored one.
    /// Returns whether the write happened.
    pub fn write_if_newer(&self, version: Version, payload: impl Into<String>) -> bool {
        let mut slot = lock(&self.slot);
        if version <= slot.version {
            return false;
        }
        *slot = VersionedMessage::new(version, payload);
        true
    }

    pub fn read(&self) -> VersionedMessage {
        lock(&self.slot).clone()
    }

    /// Write `payload` at the next version and return that version.
    ///
    /// Saturates at `Version::MAX`; the stored version never goes backwards.
    pub fn bump_and_write(&self, payload: impl Into<String>) -> Version {
        let mut slot = lock(&self.slot);
        let version = slot.version.saturating_add(1);
        *slot = VersionedMessage::new(version, payload);
        version
    }
}
