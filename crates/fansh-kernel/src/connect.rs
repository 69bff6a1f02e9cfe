//! Live connection records and the shared pool.
//!
//! The pool is read-often, written-rarely: stages take an `Arc` snapshot at
//! launch and hold their own session handles, while the supervisor swaps
//! the whole list atomically when peers die. A swap never disturbs stages
//! already in flight.

use std::sync::Arc;

use tokio::sync::RwLock;

use fansh_types::SessionFactory;

use crate::output::Decorator;

/// One named remote endpoint: a factory for authenticated sessions plus
/// the decorator that labels its output lines.
pub struct Connection {
    pub name: String,
    pub factory: Arc<dyn SessionFactory>,
    pub decorator: Decorator,
}

impl Connection {
    pub fn new(name: impl Into<String>, factory: Arc<dyn SessionFactory>, decorator: Decorator) -> Self {
        Self {
            name: name.into(),
            factory,
            decorator,
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("name", &self.name).finish()
    }
}

/// The shell's active connection list.
pub struct ConnectionPool {
    inner: RwLock<Arc<Vec<Arc<Connection>>>>,
}

impl ConnectionPool {
    pub fn new(connections: Vec<Arc<Connection>>) -> Self {
        Self {
            inner: RwLock::new(Arc::new(connections)),
        }
    }

    /// Cheap snapshot; holders keep the list they saw even across a swap.
    pub async fn snapshot(&self) -> Arc<Vec<Arc<Connection>>> {
        self.inner.read().await.clone()
    }

    /// Replace the whole list. Future stages see the new list.
    pub async fn replace(&self, connections: Vec<Arc<Connection>>) {
        *self.inner.write().await = Arc::new(connections);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::DEFAULT_OPROMPT;
    use crate::testing::MockFactory;

    fn conn(name: &str) -> Arc<Connection> {
        let factory = Arc::new(MockFactory::with_output(name, b"".to_vec()));
        Arc::new(Connection::new(
            name,
            factory,
            Decorator::new(name, DEFAULT_OPROMPT, false, 0),
        ))
    }

    #[tokio::test]
    async fn snapshot_survives_replace() {
        let pool = ConnectionPool::new(vec![conn("h1"), conn("h2")]);
        let before = pool.snapshot().await;
        pool.replace(vec![conn("h1")]).await;

        assert_eq!(before.len(), 2);
        assert_eq!(pool.len().await, 1);
        assert!(!pool.is_empty().await);

        pool.replace(Vec::new()).await;
        assert!(pool.is_empty().await);
    }
}
