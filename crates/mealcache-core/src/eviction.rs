//! Size bounds and staleness checks for tiers.
//!
//! Trimming is strict FIFO over insertion order. Reads never update any
//! ordering, so a hit costs no write.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::entry::CacheEntry;
use crate::store::{StorageError, TierStore};
use crate::tier::Tier;

#[derive(Clone)]
pub struct EvictionManager {
    store: TierStore,
}

impl EvictionManager {
    pub fn new(store: TierStore) -> Self {
        Self { store }
    }

    /// Delete the oldest entries of `tier` until at most `max_entries` remain.
    ///
    /// Returns the number of entries deleted. A put racing with a trim on the
    /// same tier can leave one extra entry until the next trim.
    pub async fn trim(&self, tier: &Tier) -> Result<usize, StorageError> {
        let keys = self.store.keys(tier).await?;
        if keys.len() <= tier.max_entries {
            return Ok(0);
        }

        let excess = keys.len() - tier.max_entries;
        let mut deleted = 0;
        for key in keys.iter().take(excess) {
            match self.store.delete(tier, key).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(tier = %tier.name, key = %key, error = %e, "Failed to evict entry");
                }
            }
        }
        debug!(tier = %tier.name, deleted, remaining = keys.len() - deleted, "Trimmed tier");
        Ok(deleted)
    }

    pub fn is_stale(entry: &CacheEntry, tier: &Tier) -> bool {
        Self::is_stale_at(entry, tier, Utc::now())
    }

    /// True when the entry is strictly older than the tier's max age at `now`.
    pub fn is_stale_at(entry: &CacheEntry, tier: &Tier, now: DateTime<Utc>) -> bool {
        let age = now - entry.stored_at;
        match age.to_std() {
            Ok(age) => age > tier.max_age,
            // stored_at in the future: clock skew, treat as fresh
            Err(_) => false,
        }
    }
}
