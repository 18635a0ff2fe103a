//! # Repeat-result gate
//!
//! Remembers which result sets have already been shown and, when an
//! identical set comes back, reverses its presentation order. This is an
//! anti-repetition nudge, not a re-ranking.
//!
//! A result set is identified by a blake3 fingerprint of its **sorted**
//! product ids, so the same products in a different order count as a repeat.
//! Fingerprints live in an explicitly constructed, bounded cache with a TTL
//! ([`SeenResults`]); the cache is passed to whoever needs it instead of
//! living in a global. Its check-then-insert is a single atomic cache entry
//! operation, so two concurrent identical requests cannot both be "first".

use moka::sync::Cache;
use std::time::Duration;
use tracing::debug;

use crate::config::DedupConfig;

pub type Fingerprint = [u8; 32];

/// Anything that belongs to one product.
pub trait HasProductId {
    fn product_id(&self) -> u32;
}

impl HasProductId for crate::product::ScoredProduct {
    fn product_id(&self) -> u32 {
        self.id()
    }
}

/// Stable fingerprint over the set of ids (order-insensitive).
pub fn fingerprint(ids: impl IntoIterator<Item = u32>) -> Fingerprint {
    let mut ids: Vec<u32> = ids.into_iter().collect();
    ids.sort_unstable();
    let mut hasher = blake3::Hasher::new();
    for id in ids {
        hasher.update(&id.to_le_bytes());
    }
    *hasher.finalize().as_bytes()
}

/// Process-lifetime memory of fingerprints already produced.
#[derive(Clone)]
pub struct SeenResults {
    cache: Cache<Fingerprint, ()>,
}

impl SeenResults {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(config.max_entries, Duration::from_secs(config.ttl_secs))
    }

    /// Record `fp`; returns `true` if it had been recorded before.
    pub fn check_and_record(&self, fp: Fingerprint) -> bool {
        !self.cache.entry(fp).or_insert(()).is_fresh()
    }
}

/// Post-filter that reverses a repeated result set.
#[derive(Clone)]
pub struct DedupGate {
    seen: SeenResults,
}

impl DedupGate {
    pub fn new(seen: SeenResults) -> Self {
        Self { seen }
    }

    /// Returns `true` when `items` was a repeat and has been reversed.
    /// Empty sets are neither recorded nor changed.
    pub fn apply<T: HasProductId>(&self, items: &mut [T]) -> bool {
        if items.is_empty() {
            return false;
        }
        let fp = fingerprint(items.iter().map(|i| i.product_id()));
        if self.seen.check_and_record(fp) {
            debug!("Repeated result set of {} items; reversing", items.len());
            items.reverse();
            true
        } else {
            false
        }
    }
}
