use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::Version;

/// Caller-side guard for request/reply use of a tunnel.
///
/// Records the version of the newest request and accepts only replies at
/// that version or later, so a slow answer to a superseded request is
/// ignored. The tunnel itself never applies this check.
#[derive(Debug, Default)]
pub struct ReplyFilter {
    latest: AtomicU64,
}

impl ReplyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request sent at `version`
    pub fn issued(&self, version: Version) {
        self.latest.fetch_max(version, Ordering::SeqCst);
    }

    /// Version of the newest request issued so far
    pub fn latest(&self) -> Version {
        self.latest.load(Ordering::SeqCst)
    }

    pub fn accepts(&self, reply_version: Version) -> bool {
        reply_version >= self.latest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_reply_to_superseded_request() {
        let filter = ReplyFilter::new();
        filter.issued(1);
        filter.issued(2);

        assert!(!filter.accepts(1));
        assert!(filter.accepts(2));
    }

    #[test]
    fn test_issued_never_moves_backwards() {
        let filter = ReplyFilter::new();
        filter.issued(5);
        filter.issued(3);

        assert_eq!(filter.latest(), 5);
        assert!(!filter.accepts(3));
    }

    #[test]
    fn test_accepts_anything_before_first_request() {
        assert!(ReplyFilter::new().accepts(0));
    }
}
