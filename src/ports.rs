//! Host port leasing for sandbox containers.
//!
//! Each user leases exactly one port from a bounded range. A previously
//! held port is preferred on re-acquire so sandbox URLs stay stable
//! across restarts. Every candidate is bind-probed against the live
//! socket table because the persisted lease file can lag reality (a
//! crashed container may still hold its port, another process may have
//! grabbed one).

use std::net::TcpListener;
use tracing::{debug, info, warn};

use crate::lifecycle::error::{LifecycleError, Result};
use crate::store::PortStore;

/// Leases ports from `[base_port, max_port]` against a [`PortStore`].
#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    base_port: u16,
    max_port: u16,
}

impl PortAllocator {
    pub fn new(base_port: u16, max_port: u16) -> Self {
        Self {
            base_port,
            max_port,
        }
    }

    /// Lease a port for `user_id`, preferring the user's previous port.
    ///
    /// The probe-then-persist gap means two racing acquires can in
    /// principle pick the same candidate; the real bind during container
    /// creation arbitrates, and only one of them will succeed.
    pub fn acquire(&self, store: &dyn PortStore, user_id: i64) -> Result<u16> {
        if let Some(previous) = store.get(user_id)? {
            if self.in_range(previous) && port_is_free(previous) {
                debug!("Reusing previous port {} for user {}", previous, user_id);
                return Ok(previous);
            }
            // Either the port is held by something else or the configured
            // range moved out from under the lease. Drop it and rescan.
            warn!(
                "Previous port {} for user {} is unavailable, reallocating",
                previous, user_id
            );
            store.clear(user_id)?;
        }

        let leased_to_others: Vec<u16> = store
            .list_all()?
            .into_iter()
            .filter(|(uid, _)| *uid != user_id)
            .map(|(_, port)| port)
            .collect();

        for port in self.base_port..=self.max_port {
            if leased_to_others.contains(&port) {
                continue;
            }
            if port_is_free(port) {
                store.set(user_id, port)?;
                info!("Leased port {} to user {}", port, user_id);
                return Ok(port);
            }
        }

        Err(LifecycleError::PoolExhausted {
            base_port: self.base_port,
            max_port: self.max_port,
        })
    }

    /// Return the user's lease to the pool. The record keeps its history;
    /// only the assignment is cleared.
    pub fn release(&self, store: &dyn PortStore, user_id: i64) -> Result<()> {
        store.clear(user_id)?;
        debug!("Released port lease for user {}", user_id);
        Ok(())
    }

    fn in_range(&self, port: u16) -> bool {
        (self.base_port..=self.max_port).contains(&port)
    }
}

/// Liveness probe: open-then-drop a listener on all interfaces.
fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FilePortStore;
    use tempfile::tempdir;

    fn store(dir: &tempfile::TempDir) -> FilePortStore {
        FilePortStore::open(dir.path().join("ports.toml")).unwrap()
    }

    // Ranges high in the dynamic port space to avoid colliding with
    // anything the test host is actually running.
    const BASE: u16 = 42330;

    #[test]
    fn test_acquire_returns_port_in_range() {
        let dir = tempdir().unwrap();
        let store = store(&dir);
        let allocator = PortAllocator::new(BASE, BASE + 9);

        let port = allocator.acquire(&store, 1).unwrap();
        assert!((BASE..=BASE + 9).contains(&port));
        assert_eq!(store.get(1).unwrap(), Some(port));
    }

    #[test]
    fn test_distinct_users_get_distinct_ports() {
        let dir = tempdir().unwrap();
        let store = store(&dir);
        let allocator = PortAllocator::new(BASE + 10, BASE + 19);

        let a = allocator.acquire(&store, 1).unwrap();
        let b = allocator.acquire(&store, 2).unwrap();
        let c = allocator.acquire(&store, 3).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn test_reacquire_is_stable() {
        let dir = tempdir().unwrap();
        let store = store(&dir);
        let allocator = PortAllocator::new(BASE + 20, BASE + 29);

        let first = allocator.acquire(&store, 7).unwrap();
        let again = allocator.acquire(&store, 7).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_stale_lease_is_cleared_when_port_held() {
        let dir = tempdir().unwrap();
        let store = store(&dir);
        let allocator = PortAllocator::new(BASE + 30, BASE + 39);

        let first = allocator.acquire(&store, 7).unwrap();
        // Simulate another process holding the user's old port
        let _holder = TcpListener::bind(("0.0.0.0", first)).unwrap();

        let second = allocator.acquire(&store, 7).unwrap();
        assert_ne!(first, second);
        assert_eq!(store.get(7).unwrap(), Some(second));
    }

    #[test]
    fn test_out_of_range_lease_is_reallocated() {
        let dir = tempdir().unwrap();
        let store = store(&dir);
        // Lease recorded under an older, different range
        store.set(4, BASE + 5).unwrap();

        let allocator = PortAllocator::new(BASE + 40, BASE + 49);
        let port = allocator.acquire(&store, 4).unwrap();
        assert!((BASE + 40..=BASE + 49).contains(&port));
    }

    #[test]
    fn test_pool_exhaustion_fails_explicitly() {
        let dir = tempdir().unwrap();
        let store = store(&dir);
        let allocator = PortAllocator::new(BASE + 50, BASE + 52);

        // Three users hold the full range
        store.set(1, BASE + 50).unwrap();
        store.set(2, BASE + 51).unwrap();
        store.set(3, BASE + 52).unwrap();

        let err = allocator.acquire(&store, 4).unwrap_err();
        assert!(err.is_pool_exhausted());
    }

    #[test]
    fn test_release_frees_port_for_others() {
        let dir = tempdir().unwrap();
        let store = store(&dir);
        let allocator = PortAllocator::new(BASE + 60, BASE + 60);

        let port = allocator.acquire(&store, 1).unwrap();
        // Single-port pool is now spent
        assert!(allocator.acquire(&store, 2).unwrap_err().is_pool_exhausted());

        allocator.release(&store, 1).unwrap();
        assert_eq!(allocator.acquire(&store, 2).unwrap(), port);
    }

    #[test]
    fn test_scan_skips_bound_ports() {
        let dir = tempdir().unwrap();
        let store = store(&dir);
        let allocator = PortAllocator::new(BASE + 70, BASE + 72);

        let _holder = TcpListener::bind(("0.0.0.0", BASE + 70)).unwrap();
        let port = allocator.acquire(&store, 1).unwrap();
        assert_ne!(port, BASE + 70);
    }
}
