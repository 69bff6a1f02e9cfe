//! Connection liveness supervision.
//!
//! A background task probes every connection in parallel on a fixed
//! interval and swaps the survivor list into the pool. Stages already in
//! flight hold their own session handles and never notice a swap; only
//! future lines see the pruned list. When nothing survives, the shell has
//! no work left and terminates.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::connect::ConnectionPool;
use crate::term::Term;

/// Time between probe rounds.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(3);

/// Probe every connection in parallel, report and evict the dead, swap the
/// survivors in. Returns the evicted names.
pub async fn prune_dead(pool: &ConnectionPool, term: &Arc<dyn Term>) -> Vec<String> {
    let snapshot = pool.snapshot().await;
    let probes = snapshot.iter().map(|conn| {
        let conn = Arc::clone(conn);
        async move {
            let result = conn.factory.check_alive().await;
            (conn, result)
        }
    });

    let mut survivors = Vec::new();
    let mut evicted = Vec::new();
    for (conn, result) in join_all(probes).await {
        match result {
            Ok(()) => survivors.push(conn),
            Err(e) => {
                let _ = term
                    .write_err(format!("Exit Connect {}, Error: {e}\n", conn.name).as_bytes())
                    .await;
                evicted.push(conn.name.clone());
            }
        }
    }
    pool.replace(survivors).await;
    evicted
}

/// Probe loop. `on_empty` fires once, after a round leaves the pool empty.
pub async fn run_supervisor<F>(pool: Arc<ConnectionPool>, term: Arc<dyn Term>, on_empty: F)
where
    F: FnOnce() + Send,
{
    loop {
        tokio::time::sleep(PROBE_INTERVAL).await;
        prune_dead(&pool, &term).await;
        if pool.is_empty().await {
            on_empty();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::Connection;
    use crate::output::{Decorator, DEFAULT_OPROMPT};
    use crate::testing::{CaptureTerm, MockFactory};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn connection(factory: Arc<MockFactory>) -> Arc<Connection> {
        let name = factory.server().to_string();
        Arc::new(Connection::new(
            name.clone(),
            factory,
            Decorator::new(name, DEFAULT_OPROMPT, false, 0),
        ))
    }

    #[tokio::test]
    async fn dead_peers_are_evicted_and_reported() {
        let h1 = Arc::new(MockFactory::echoing("h1"));
        let h2 = Arc::new(MockFactory::echoing("h2"));
        h2.set_alive(false);
        let pool = ConnectionPool::new(vec![connection(h1), connection(h2)]);
        let capture = Arc::new(CaptureTerm::new(""));
        let term: Arc<dyn Term> = capture.clone();

        let evicted = prune_dead(&pool, &term).await;

        assert_eq!(evicted, ["h2"]);
        assert_eq!(pool.len().await, 1);
        assert!(capture.err_string().await.contains("Exit Connect h2"));
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_fires_on_empty_within_an_interval() {
        let h1 = Arc::new(MockFactory::echoing("h1"));
        let pool = Arc::new(ConnectionPool::new(vec![connection(h1.clone())]));
        let term: Arc<dyn Term> = Arc::new(CaptureTerm::new(""));

        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let supervisor = tokio::spawn(run_supervisor(pool.clone(), term, move || {
            flag.store(true, Ordering::SeqCst);
        }));

        // First round: healthy, nothing happens.
        tokio::time::sleep(PROBE_INTERVAL + Duration::from_millis(10)).await;
        assert!(!fired.load(Ordering::SeqCst));

        // Peer dies; the next round evicts it and the supervisor fires.
        h1.set_alive(false);
        tokio::time::sleep(PROBE_INTERVAL + Duration::from_millis(10)).await;
        supervisor.await.unwrap();
        assert!(fired.load(Ordering::SeqCst));
        assert!(pool.is_empty().await);
    }
}
