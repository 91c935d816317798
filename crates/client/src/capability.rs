//! Session cache of optional endpoints the API server does not provide.
//!
//! When an optional endpoint answers 404 it is recorded here so consumers stop
//! calling it and substitute an empty result. Entries expire after a TTL and
//! can be invalidated explicitly (e.g. after a server upgrade or re-login).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::sync::lock;

#[derive(Debug)]
pub struct CapabilityRegistry {
    ttl: Duration,
    /// Expiry per endpoint; `None` when the TTL runs past the clock's range.
    absent: Mutex<HashMap<String, Option<Instant>>>,
}

impl CapabilityRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            absent: Mutex::new(HashMap::new()),
        }
    }

    /// Record that `endpoint` answered 404.
    pub fn mark_absent(&self, endpoint: &str) {
        tracing::info!(endpoint, ttl_secs = self.ttl.as_secs(), "endpoint marked absent");
        let expires_at = Instant::now().checked_add(self.ttl);
        lock(&self.absent).insert(endpoint.to_string(), expires_at);
    }

    /// Whether `endpoint` is known to be absent. Expired entries are dropped.
    pub fn is_absent(&self, endpoint: &str) -> bool {
        let mut absent = lock(&self.absent);
        match absent.get(endpoint) {
            Some(expires_at) if unexpired(*expires_at, Instant::now()) => true,
            Some(_) => {
                absent.remove(endpoint);
                false
            }
            None => false,
        }
    }

    /// Forget what we know about `endpoint`. Returns true if it was marked.
    pub fn invalidate(&self, endpoint: &str) -> bool {
        lock(&self.absent).remove(endpoint).is_some()
    }

    pub fn clear(&self) {
        lock(&self.absent).clear();
    }

    /// Endpoints currently marked absent, sorted.
    pub fn absent_endpoints(&self) -> Vec<String> {
        let now = Instant::now();
        let mut absent = lock(&self.absent);
        absent.retain(|_, expires_at| unexpired(*expires_at, now));
        let mut endpoints: Vec<String> = absent.keys().cloned().collect();
        endpoints.sort();
        endpoints
    }
}

fn unexpired(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.map_or(true, |at| now < at)
}
