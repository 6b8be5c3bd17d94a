//! TTL cache for RCA results.
//!
//! Incidents with the same shape (type, namespace, source, distinct signal
//! types) collapse to one fingerprint, so a flapping pod does not trigger a
//! fresh analysis every detection cycle.

use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use super::RcaResult;
use crate::signals::IncidentCandidate;

/// Stable fingerprint of an incident's shape. Signal order and repetition do
/// not affect the key.
#[must_use]
pub fn fingerprint(incident: &IncidentCandidate) -> String {
    let mut types: Vec<&str> = incident
        .signals
        .iter()
        .map(|s| s.signal_type.as_str())
        .collect();
    types.sort_unstable();
    types.dedup();

    let material = format!(
        "{}|{}|{}|{}",
        incident.incident_type,
        incident.namespace,
        incident.source,
        types.join(",")
    );
    let digest = Sha1::digest(material.as_bytes());
    hex::encode(digest)
}

/// Fingerprint-keyed result cache with lazy TTL eviction.
pub struct RcaCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (RcaResult, Instant)>>,
}

impl RcaCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a cached result, evicting it if expired.
    pub fn get(&self, incident: &IncidentCandidate) -> Option<RcaResult> {
        let key = fingerprint(incident);
        let Ok(mut entries) = self.entries.lock() else {
            return None;
        };
        match entries.get(&key) {
            Some((result, inserted)) if inserted.elapsed() < self.ttl => Some(result.clone()),
            Some(_) => {
                debug!(key = %key, "Evicting expired RCA cache entry");
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Store a result under the incident's fingerprint.
    pub fn set(&self, incident: &IncidentCandidate, result: RcaResult) {
        let key = fingerprint(incident);
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, (result, Instant::now()));
        }
    }

    /// Drop all entries.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}
