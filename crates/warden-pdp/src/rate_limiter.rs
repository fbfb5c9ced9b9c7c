//! Fixed-window rate limiting per (principal, endpoint).
//!
//! A counter row is created lazily. When the window has aged past
//! `window_seconds`, both the count and the window start are reset before the
//! operation applies. `check` never increments; the engine increments once
//! per evaluation after a passing check.

use crate::models::RateCounter;
use crate::PdpError;
use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use warden_core::{get_json, put_json, Store};

const TREE: &str = "rate_counters";

/// Per-endpoint window configuration.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window_seconds: i64,
}

/// Point-in-time counter status for one endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub current: u32,
    pub remaining: u32,
    pub reset_in_seconds: i64,
    pub window_seconds: i64,
}

fn default_table() -> BTreeMap<String, RateLimitConfig> {
    let mut table = BTreeMap::new();
    for (endpoint, limit) in [
        ("default", 100),
        ("chat", 50),
        ("search", 30),
        ("export", 10),
        ("upload", 20),
        ("ai", 50),
        ("api", 100),
    ] {
        table.insert(
            endpoint.to_string(),
            RateLimitConfig {
                limit,
                window_seconds: 60,
            },
        );
    }
    table
}

pub struct RateLimiter {
    store: Store,
    table: BTreeMap<String, RateLimitConfig>,
}

impl RateLimiter {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            table: default_table(),
        }
    }

    /// Override or extend the endpoint table. Zero-width windows are invalid.
    pub fn with_endpoint(
        mut self,
        endpoint: &str,
        config: RateLimitConfig,
    ) -> Result<Self, PdpError> {
        if config.window_seconds <= 0 {
            return Err(PdpError::InvalidInput(format!(
                "rate window for '{endpoint}' must be positive"
            )));
        }
        self.table.insert(endpoint.to_string(), config);
        Ok(self)
    }

    fn config_for(&self, endpoint: &str) -> RateLimitConfig {
        self.table
            .get(endpoint)
            .or_else(|| self.table.get("default"))
            .copied()
            .unwrap_or(RateLimitConfig {
                limit: 100,
                window_seconds: 60,
            })
    }

    fn key(principal_id: i64, endpoint: &str) -> String {
        format!("{principal_id}/{endpoint}")
    }

    /// Returns `(allowed, remaining)` without consuming budget.
    pub fn check(&self, principal_id: i64, endpoint: &str) -> Result<(bool, u32), PdpError> {
        let config = self.config_for(endpoint);
        let tree = self.store.tree(TREE)?;
        let key = Self::key(principal_id, endpoint);
        let now = Utc::now();

        let mut counter: RateCounter = match get_json(&tree, &key)? {
            Some(counter) => counter,
            None => {
                let counter = RateCounter {
                    principal_id,
                    endpoint: endpoint.to_string(),
                    limit: config.limit,
                    window_seconds: config.window_seconds,
                    current_count: 0,
                    window_start: now,
                };
                put_json(&tree, &key, &counter)?;
                return Ok((true, config.limit));
            }
        };

        let window_age = (now - counter.window_start).num_seconds();
        if window_age >= counter.window_seconds {
            counter.window_start = now;
            counter.current_count = 0;
            counter.limit = config.limit;
            counter.window_seconds = config.window_seconds;
            put_json(&tree, &key, &counter)?;
            return Ok((true, counter.limit));
        }

        if counter.current_count >= counter.limit {
            return Ok((false, 0));
        }
        Ok((true, counter.limit - counter.current_count))
    }

    /// Consume one unit of budget; returns the count after the increment.
    pub fn increment(&self, principal_id: i64, endpoint: &str) -> Result<u32, PdpError> {
        let config = self.config_for(endpoint);
        let tree = self.store.tree(TREE)?;
        let key = Self::key(principal_id, endpoint);
        let now = Utc::now();

        let mut counter: RateCounter = match get_json(&tree, &key)? {
            Some(counter) => counter,
            None => {
                let counter = RateCounter {
                    principal_id,
                    endpoint: endpoint.to_string(),
                    limit: config.limit,
                    window_seconds: config.window_seconds,
                    current_count: 1,
                    window_start: now,
                };
                put_json(&tree, &key, &counter)?;
                return Ok(1);
            }
        };

        let window_age = (now - counter.window_start).num_seconds();
        if window_age >= counter.window_seconds {
            counter.window_start = now;
            counter.current_count = 1;
        } else {
            counter.current_count += 1;
        }
        put_json(&tree, &key, &counter)?;
        Ok(counter.current_count)
    }

    /// Zero the counter for one (principal, endpoint).
    pub fn reset(&self, principal_id: i64, endpoint: &str) -> Result<bool, PdpError> {
        let tree = self.store.tree(TREE)?;
        let key = Self::key(principal_id, endpoint);
        let Some(mut counter) = get_json::<RateCounter>(&tree, &key)? else {
            return Ok(false);
        };
        counter.window_start = Utc::now();
        counter.current_count = 0;
        put_json(&tree, &key, &counter)?;
        Ok(true)
    }

    /// Current status for every endpoint a principal has touched.
    pub fn limits_for(
        &self,
        principal_id: i64,
    ) -> Result<BTreeMap<String, RateLimitStatus>, PdpError> {
        let tree = self.store.tree(TREE)?;
        let prefix = format!("{principal_id}/");
        let now = Utc::now();
        let mut out = BTreeMap::new();
        for counter in warden_core::scan_json::<RateCounter>(&tree, &prefix)? {
            let window_age = (now - counter.window_start).num_seconds();
            let expired = window_age >= counter.window_seconds;
            let remaining = if expired {
                counter.limit
            } else {
                counter.limit.saturating_sub(counter.current_count)
            };
            let reset_in = if expired {
                counter.window_seconds
            } else {
                counter.window_seconds - window_age
            };
            out.insert(
                counter.endpoint.clone(),
                RateLimitStatus {
                    limit: counter.limit,
                    current: counter.current_count,
                    remaining,
                    reset_in_seconds: reset_in,
                    window_seconds: counter.window_seconds,
                },
            );
        }
        Ok(out)
    }

    /// Remove counter rows whose window started more than `older_than_hours`
    /// ago. Returns the number of rows deleted.
    pub fn cleanup(&self, older_than_hours: i64) -> Result<usize, PdpError> {
        let tree = self.store.tree(TREE)?;
        let cutoff = Utc::now() - Duration::hours(older_than_hours);
        let mut deleted = 0;
        let mut stale_keys = Vec::new();
        for entry in tree.iter() {
            let (key, bytes) = entry.map_err(warden_core::StoreError::from)?;
            let counter: RateCounter =
                serde_json::from_slice(&bytes).map_err(warden_core::StoreError::from)?;
            if counter.window_start < cutoff {
                stale_keys.push(key);
            }
        }
        for key in stale_keys {
            if tree
                .remove(key)
                .map_err(warden_core::StoreError::from)?
                .is_some()
            {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
