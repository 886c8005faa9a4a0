use std::fmt;
use std::sync::{Arc, Mutex};

use crate::protocol::Version;
use crate::sync::lock;

pub type ReceiveHandler = Arc<dyn Fn(Version, &str) + Send + Sync>;

/// Holds the single receive handler of one tunnel endpoint.
///
/// Starts with its own no-op handler, so invoking before registration is safe.
pub struct CallbackRegistry {
    handler: Mutex<ReceiveHandler>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        CallbackRegistry {
            handler: Mutex::new(Arc::new(|_: Version, _: &str| {})),
        }
    }

    /// Replace the current handler
    pub fn set(&self, handler: ReceiveHandler) {
        *lock(&self.handler) = handler;
    }

    pub fn invoke(&self, version: Version, payload: &str) {
        // Run outside the lock so the handler may call `set`
        let handler = lock(&self.handler).clone();
        handler(version, payload);
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoke_before_set_is_noop() {
        let registry = CallbackRegistry::new();
        registry.invoke(1, "ignored");
    }

    #[test]
    fn test_set_replaces_previous_handler() {
        let registry = CallbackRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let first = calls.clone();
        registry.set(Arc::new(move |v: Version, p: &str| {
            lock(&first).push(format!("first {} {}", v, p))
        }));
        registry.invoke(1, "a");

        let second = calls.clone();
        registry.set(Arc::new(move |v: Version, p: &str| {
            lock(&second).push(format!("second {} {}", v, p))
        }));
        registry.invoke(2, "b");

        assert_eq!(*lock(&calls), vec!["first 1 a", "second 2 b"]);
    }

    #[test]
    fn test_handler_may_reassign_itself() {
        let registry = Arc::new(CallbackRegistry::new());
        let calls = Arc::new(Mutex::new(0));

        let inner = registry.clone();
        let counter = calls.clone();
        registry.set(Arc::new(move |_: Version, _: &str| {
            *lock(&counter) += 1;
            inner.set(Arc::new(|_: Version, _: &str| {}));
        }));

        registry.invoke(1, "a");
        registry.invoke(2, "b");

        assert_eq!(*lock(&calls), 1);
    }
}
