//! Type-safe identifiers for tunnel protocol values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic message version within one channel
pub type Version = u64;

/// Unique identifier for a tunnel.
///
/// This is the only thing correlating the two endpoints, which otherwise
/// share no state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TunnelId(pub String);

impl TunnelId {
    /// Generate a fresh random (UUID v4) identifier
    pub fn generate() -> Self {
        TunnelId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TunnelId {
    fn from(s: String) -> Self {
        TunnelId(s)
    }
}

impl From<&str> for TunnelId {
    fn from(s: &str) -> Self {
        TunnelId(s.to_string())
    }
}
