//! Per-key lease locks with TTL, owner tokens, and conditional release.
//!
//! Leases live in the `locks` tree. Release and extend succeed only when the
//! caller's token matches the stored owner (check-and-swap). When the backend
//! is disabled or unavailable the manager degrades to a no-op: `acquire` logs
//! a one-shot warning and returns a sentinel token, so callers keep working
//! without serialization guarantees and must be idempotent.

use crate::config::LockBackend;
use crate::store::{Store, StoreError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};
use uuid::Uuid;

/// Default TTL for per-workspace hydration locks.
pub const WORKSPACE_LOCK_TTL_SECS: u64 = 60 * 60 * 2;

const NOOP_PREFIX: &str = "noop-";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Lease {
    token: String,
    expires_at_ms: i64,
}

/// Lease-based lock manager over the shared [`Store`].
pub struct LockManager {
    store: Store,
    backend: LockBackend,
    degraded_warned: AtomicBool,
}

impl LockManager {
    pub fn new(store: Store, backend: LockBackend) -> Self {
        Self {
            store,
            backend,
            degraded_warned: AtomicBool::new(false),
        }
    }

    /// Attempt to acquire the lock for `key` with the given TTL.
    ///
    /// Returns `Some(token)` when acquired (or when degraded, a sentinel
    /// token), `None` when another live owner holds the lease.
    pub fn acquire(&self, key: &str, ttl_secs: u64) -> Option<String> {
        if self.backend == LockBackend::Disabled {
            return Some(self.noop_token("lock backend disabled"));
        }

        let tree = match self.store.tree("locks") {
            Ok(tree) => tree,
            Err(err) => return Some(self.noop_token(&format!("lock tree unavailable: {err}"))),
        };

        let token = Uuid::new_v4().to_string();
        let now_ms = Utc::now().timestamp_millis();
        let lease = Lease {
            token: token.clone(),
            expires_at_ms: now_ms + (ttl_secs.max(1) as i64) * 1000,
        };
        let new_bytes = match serde_json::to_vec(&lease) {
            Ok(bytes) => bytes,
            Err(err) => return Some(self.noop_token(&format!("lease encode failed: {err}"))),
        };

        // Claim when absent or expired; otherwise report the holder.
        loop {
            let current = match tree.get(key) {
                Ok(current) => current,
                Err(err) => return Some(self.noop_token(&format!("lock read failed: {err}"))),
            };
            if let Some(bytes) = &current {
                if let Ok(existing) = serde_json::from_slice::<Lease>(bytes) {
                    if existing.expires_at_ms > now_ms {
                        debug!(target: "warden::locks", key, "lock held by another owner");
                        return None;
                    }
                }
            }
            let swap = tree.compare_and_swap(key, current.as_deref(), Some(new_bytes.clone()));
            match swap {
                Ok(Ok(())) => {
                    debug!(target: "warden::locks", key, ttl_secs, "lock acquired");
                    return Some(token);
                }
                Ok(Err(_)) => continue,
                Err(err) => return Some(self.noop_token(&format!("lock swap failed: {err}"))),
            }
        }
    }

    /// Release the lock if `token` still owns it.
    pub fn release(&self, key: &str, token: &str) -> bool {
        if token.starts_with(NOOP_PREFIX) {
            return true;
        }
        match self.with_owner(key, token, |tree, current| {
            matches!(
                tree.compare_and_swap(key, Some(current), None::<Vec<u8>>),
                Ok(Ok(()))
            )
        }) {
            Ok(released) => released,
            Err(err) => {
                warn!(target: "warden::locks", key, error = %err, "lock release failed");
                false
            }
        }
    }

    /// Extend the lease TTL if `token` still owns it.
    pub fn extend(&self, key: &str, token: &str, ttl_secs: u64) -> bool {
        if token.starts_with(NOOP_PREFIX) {
            return true;
        }
        let renewed = Lease {
            token: token.to_string(),
            expires_at_ms: Utc::now().timestamp_millis() + (ttl_secs.max(1) as i64) * 1000,
        };
        let Ok(new_bytes) = serde_json::to_vec(&renewed) else {
            return false;
        };
        match self.with_owner(key, token, |tree, current| {
            matches!(
                tree.compare_and_swap(key, Some(current), Some(new_bytes.clone())),
                Ok(Ok(()))
            )
        }) {
            Ok(extended) => extended,
            Err(err) => {
                warn!(target: "warden::locks", key, error = %err, "lock extend failed");
                false
            }
        }
    }

    fn with_owner(
        &self,
        key: &str,
        token: &str,
        op: impl FnOnce(&sled::Tree, &[u8]) -> bool,
    ) -> Result<bool, StoreError> {
        let tree = self.store.tree("locks")?;
        let Some(current) = tree.get(key)? else {
            return Ok(false);
        };
        let lease: Lease = serde_json::from_slice(&current)?;
        if lease.token != token {
            return Ok(false);
        }
        Ok(op(&tree, &current))
    }

    fn noop_token(&self, reason: &str) -> String {
        if !self.degraded_warned.swap(true, Ordering::SeqCst) {
            warn!(
                target: "warden::locks",
                reason,
                "lock backend degraded; proceeding without serialization guarantees"
            );
        }
        format!("{NOOP_PREFIX}{}", Uuid::new_v4().simple())
    }
}
