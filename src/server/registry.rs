use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Live client connections of the current run, keyed by connection id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, CancellationToken>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, CancellationToken>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new connection whose token is a child of `parent`.
    pub fn register(self: &Arc<Self>, parent: &CancellationToken) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let token = parent.child_token();
        self.lock().insert(id, token.clone());

        Registration {
            id,
            token,
            registry: Arc::clone(self),
        }
    }

    /// Cancel every live connection and return how many there were.
    /// Cancelling an already finished connection is a no-op.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(u64, CancellationToken)> = self.lock().drain().collect();
        for (id, token) in &drained {
            debug!("Cancelling connection #{}", id);
            token.cancel();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn release(&self, id: u64) {
        self.lock().remove(&id);
    }
}

/// Removes its connection from the registry when dropped.
#[derive(Debug)]
pub struct Registration {
    id: u64,
    token: CancellationToken,
    registry: Arc<ConnectionRegistry>,
}

impl Registration {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_is_released_on_drop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let root = CancellationToken::new();

        let first = registry.register(&root);
        let second = registry.register(&root);
        assert_ne!(first.id(), second.id());
        assert_eq!(registry.len(), 2);

        drop(first);
        assert_eq!(registry.len(), 1);
        drop(second);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_all_cancels_and_clears() {
        let registry = Arc::new(ConnectionRegistry::new());
        let root = CancellationToken::new();
        let registration = registry.register(&root);
        let token = registration.token();

        assert_eq!(registry.cancel_all(), 1);
        assert!(token.is_cancelled());
        assert!(!root.is_cancelled());
        assert_eq!(registry.cancel_all(), 0);

        // 이미 취소된 연결의 해제도 문제 없음
        drop(registration);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_parent_cancel_reaches_children() {
        let registry = Arc::new(ConnectionRegistry::new());
        let root = CancellationToken::new();
        let registration = registry.register(&root);

        root.cancel();
        assert!(registration.token().is_cancelled());
    }
}
