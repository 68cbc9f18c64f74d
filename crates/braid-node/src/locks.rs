//! Concurrency arbiter: the named locks (`write`, `handle_joint`,
//! `catchup_request`, `get_history_request`, per-address buckets) plus a
//! watchdog that warns when one is held past `T_LOCK_SECS`.
//!
//! `braid-validator` and `braid-consensus` take no locks of their own —
//! admitting a unit or recomputing the main chain are plain synchronous
//! calls against `StorageEngine`; this registry is what `braid-node::main`
//! holds around those calls, so lock discipline lives entirely at this
//! arbiter layer rather than leaking into the crates it protects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use braid_core::constants::T_LOCK_SECS;
use braid_core::types::Address;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::warn;

/// A held lock paired with its watchdog. Dropping this releases the lock
/// and cancels the watchdog in the same step.
pub struct Guard<'a> {
    _inner: MutexGuard<'a, ()>,
    watchdog: JoinHandle<()>,
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        self.watchdog.abort();
    }
}

pub struct LockRegistry {
    pub write: Mutex<()>,
    pub handle_joint: Mutex<()>,
    pub catchup_request: Mutex<()>,
    pub get_history_request: Mutex<()>,
    address_buckets: RwLock<HashMap<Address, Arc<Mutex<()>>>>,
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self {
            write: Mutex::new(()),
            handle_joint: Mutex::new(()),
            catchup_request: Mutex::new(()),
            get_history_request: Mutex::new(()),
            address_buckets: RwLock::new(HashMap::new()),
        }
    }
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires `mutex`, arming a watchdog under `name` that fires a
    /// `tracing::warn!` if the guard is still alive after `T_LOCK_SECS`.
    pub async fn guarded<'a>(&self, name: &'static str, mutex: &'a Mutex<()>) -> Guard<'a> {
        let inner = mutex.lock().await;
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(T_LOCK_SECS)).await;
            warn!(lock = name, seconds = T_LOCK_SECS, "lock held past T_LOCK_SECS — possible deadlock");
        });
        Guard { _inner: inner, watchdog }
    }

    /// The per-address bucket lock for `address`, created on first use.
    /// Guards operations that touch one address's outputs/definition
    /// without serializing unrelated addresses against each other.
    pub async fn address_bucket(&self, address: &Address) -> Arc<Mutex<()>> {
        if let Some(existing) = self.address_buckets.read().await.get(address) {
            return existing.clone();
        }
        let mut buckets = self.address_buckets.write().await;
        buckets.entry(address.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}
