//! warden-core: backplane core library (shared types, config, store, locks, queue).
//!
//! Everything above this crate (PDP, hydration, ULE, regression, the gateway)
//! talks to persistence through [`Store`] and coordinates through
//! [`LockManager`] and [`JobQueue`].

mod config;
mod locks;
mod queue;
mod shared;
mod store;

pub use config::CoreConfig;
pub use locks::{LockManager, WORKSPACE_LOCK_TTL_SECS};
pub use queue::{DeliveredJob, Job, JobHeaders, JobQueue, JobType};
pub use shared::{
    BackplaneEvent, EventEmitter, Principal, PrincipalRepo, Project, ProjectRepo, Role,
};
pub use config::LockBackend;
pub use store::{be_key, get_json, put_json, scan_json, Store, StoreError};

/// Builds the per-workspace hydration lock key.
pub fn workspace_lock_key(workspace_id: &str) -> String {
    format!("lock:workspace:{workspace_id}:hydration")
}
