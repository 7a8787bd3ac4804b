// flagforge-edge/src/cache.rs
// ============================================================================
// Module: Edge Cache (C8)
// Description: Bounded, atomically-swapped local cache of precomputed flags
//              and API key scopes, fed by the Sync Client (C9).
// Purpose: Serve evaluation RPCs without a round trip to the Hub.
// Dependencies: arc-swap, im, lru, flagforge-core
// ============================================================================

//! ## Overview
//! Grounded on the same `ArcSwap<im::HashMap<...>>` idiom the Hub's
//! Preloaded Table (C6) uses: readers never block a writer and never see a
//! torn map, since every mutation publishes a whole new persistent map via
//! one atomic pointer swap. The API key side is a bounded LRU (the `lru`
//! crate), since an Edge may see many more distinct keys over its lifetime
//! than a (project, env) has flags. A `ready` flag gates evaluation until
//! the first bootstrap snapshot has been fully applied; a separate
//! `resync_requested` flag lets a hard-to-apply delta (a segment or API key
//! change, which this cache cannot patch incrementally) ask the Sync
//! Client to re-bootstrap without tearing down already-served traffic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use arc_swap::ArcSwap;
use flagforge_core::model::ApiKeyScope;
use flagforge_core::model::EdgeCacheEntry;
use flagforge_core::model::EnvironmentKey;
use flagforge_core::model::FlagKey;
use flagforge_core::model::PrecomputedFlag;
use flagforge_core::model::ProjectId;
use lru::LruCache;

// ============================================================================
// SECTION: Keys
// ============================================================================

/// Key a [`EdgeCache`] indexes precomputed flags by.
pub type FlagScopeKey = (ProjectId, EnvironmentKey, FlagKey);

// ============================================================================
// SECTION: Edge Cache
// ============================================================================

/// The Edge's entire local view of the Hub: precomputed flags plus API key
/// scopes, both bounded and both served without touching the network.
pub struct EdgeCache {
    flags: ArcSwap<im::HashMap<FlagScopeKey, EdgeCacheEntry>>,
    api_keys: Mutex<LruCache<String, ApiKeyScope>>,
    ready: AtomicBool,
    resync_requested: AtomicBool,
    last_applied_version: AtomicI64,
    default_ttl_ms: u64,
}

impl EdgeCache {
    /// Builds an empty, not-yet-ready cache. `api_key_capacity` bounds the
    /// API key LRU; `default_ttl_ms` is the TTL stamped onto entries
    /// applied from a bootstrap snapshot or delta.
    #[must_use]
    pub fn new(api_key_capacity: usize, default_ttl_ms: u64) -> Self {
        let capacity = NonZeroUsize::new(api_key_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            flags: ArcSwap::from_pointee(im::HashMap::new()),
            api_keys: Mutex::new(LruCache::new(capacity)),
            ready: AtomicBool::new(false),
            resync_requested: AtomicBool::new(false),
            last_applied_version: AtomicI64::new(-1),
            default_ttl_ms,
        }
    }

    /// Returns `true` once a bootstrap snapshot has been fully applied.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Returns `true` if a structural change (segment or API key) could
    /// not be applied incrementally and a fresh bootstrap is warranted.
    #[must_use]
    pub fn resync_requested(&self) -> bool {
        self.resync_requested.load(Ordering::Acquire)
    }

    /// Returns the last change version applied via [`Self::apply_snapshot`]
    /// or [`Self::upsert_flag`], or `-1` if nothing has been applied yet.
    #[must_use]
    pub fn last_applied_version(&self) -> i64 {
        self.last_applied_version.load(Ordering::Acquire)
    }

    /// Clears the resync request, e.g. once the Sync Client has acted on
    /// it.
    pub fn clear_resync_request(&self) {
        self.resync_requested.store(false, Ordering::Release);
    }

    /// Flags that the next convenient moment, the Sync Client should
    /// re-bootstrap rather than keep applying deltas.
    pub fn request_resync(&self) {
        self.resync_requested.store(true, Ordering::Release);
    }

    /// Looks up a flag's cache entry.
    #[must_use]
    pub fn get(&self, key: &FlagScopeKey) -> Option<EdgeCacheEntry> {
        self.flags.load().get(key).cloned()
    }

    /// Replaces the entire flag map from a bootstrap snapshot, marks the
    /// cache ready, and records `version` as the last applied version.
    pub fn apply_snapshot(&self, entries: Vec<PrecomputedFlag>, now_ms: i64, version: u64) {
        let mut next = im::HashMap::new();
        for snapshot in entries {
            let key = snapshot.key();
            let entry = EdgeCacheEntry { snapshot, last_refreshed_ms: now_ms, applied_version: version, ttl_ms: self.default_ttl_ms };
            next.insert(key, entry);
        }
        self.flags.store(std::sync::Arc::new(next));
        self.last_applied_version.store(i64::try_from(version).unwrap_or(i64::MAX), Ordering::Release);
        self.ready.store(true, Ordering::Release);
        self.resync_requested.store(false, Ordering::Release);
    }

    /// Applies an incremental flag/rollout change: upserts the flattened
    /// snapshot under its key, refreshing `last_refreshed_ms`.
    pub fn upsert_flag(&self, snapshot: PrecomputedFlag, now_ms: i64, version: u64) {
        let key = snapshot.key();
        let entry = EdgeCacheEntry { snapshot, last_refreshed_ms: now_ms, applied_version: version, ttl_ms: self.default_ttl_ms };
        loop {
            let current = self.flags.load();
            let mut next = im::HashMap::clone(&current);
            next.insert(key.clone(), entry.clone());
            let previous = self.flags.compare_and_swap(&current, std::sync::Arc::new(next));
            if std::sync::Arc::ptr_eq(&previous, &current) {
                break;
            }
        }
        self.last_applied_version.store(i64::try_from(version).unwrap_or(i64::MAX), Ordering::Release);
    }

    /// Removes a flag's cache entry, e.g. on a `Deleted` delta.
    pub fn remove_flag(&self, key: &FlagScopeKey) {
        loop {
            let current = self.flags.load();
            if !current.contains_key(key) {
                return;
            }
            let mut next = im::HashMap::clone(&current);
            next.remove(key);
            let previous = self.flags.compare_and_swap(&current, std::sync::Arc::new(next));
            if std::sync::Arc::ptr_eq(&previous, &current) {
                return;
            }
        }
    }

    /// Sweeps every entry whose TTL has elapsed as of `now_ms`, returning
    /// the number evicted.
    pub fn sweep_expired(&self, now_ms: i64) -> usize {
        let current = self.flags.load();
        let mut evicted = 0usize;
        let mut next = im::HashMap::clone(&current);
        for (key, entry) in current.iter() {
            if entry.is_expired(now_ms) {
                next.remove(key);
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.flags.store(std::sync::Arc::new(next));
        }
        evicted
    }

    /// Number of flags currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.load().len()
    }

    /// Returns `true` if no flags are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up a cached API key scope by the salted hash of its
    /// plaintext.
    #[must_use]
    pub fn api_key_scope(&self, hash: &str) -> Option<ApiKeyScope> {
        self.api_keys.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(hash).cloned()
    }

    /// Caches an API key scope, keyed by its hash.
    pub fn cache_api_key_scope(&self, hash: String, scope: ApiKeyScope) {
        self.api_keys.lock().unwrap_or_else(std::sync::PoisonError::into_inner).put(hash, scope);
    }

    /// Evicts an API key scope, e.g. on a `Deleted` delta for that key.
    pub fn evict_api_key_scope(&self, hash: &str) {
        self.api_keys.lock().unwrap_or_else(std::sync::PoisonError::into_inner).pop(hash);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "Unit tests use expect for setup clarity.")]

    use flagforge_core::model::ApiKeyId;
    use flagforge_core::model::Flag;
    use flagforge_core::model::FlagValue;
    use flagforge_core::model::Permission;
    use flagforge_core::model::TargetingBlock;
    use flagforge_core::model::ValueType;

    use super::*;

    fn sample_precomputed(key: &str) -> PrecomputedFlag {
        PrecomputedFlag {
            project_id: ProjectId::new("proj"),
            environment_key: EnvironmentKey::new("prod"),
            flag_key: FlagKey::new(key),
            flag: Flag {
                project_id: ProjectId::new("proj"),
                environment_key: EnvironmentKey::new("prod"),
                key: FlagKey::new(key),
                name: key.to_string(),
                description: None,
                value_type: ValueType::Bool,
                enabled: true,
                default: FlagValue::Bool(false),
                variations: Vec::new(),
                targeting: TargetingBlock::default(),
                created_at: flagforge_core::model::Timestamp::now(),
                updated_at: flagforge_core::model::Timestamp::now(),
            },
            rollout: None,
            segments: std::collections::BTreeMap::new(),
            version: 0,
        }
    }

    #[test]
    fn not_ready_until_a_snapshot_is_applied() {
        let cache = EdgeCache::new(16, 30_000);
        assert!(!cache.is_ready());
        cache.apply_snapshot(vec![sample_precomputed("beta-ui")], 1_000, 1);
        assert!(cache.is_ready());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let cache = EdgeCache::new(16, 30_000);
        let snapshot = sample_precomputed("beta-ui");
        let key = snapshot.key();
        cache.upsert_flag(snapshot, 1_000, 2);
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn remove_drops_the_entry() {
        let cache = EdgeCache::new(16, 30_000);
        let snapshot = sample_precomputed("beta-ui");
        let key = snapshot.key();
        cache.upsert_flag(snapshot, 1_000, 1);
        cache.remove_flag(&key);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn sweep_evicts_only_expired_entries() {
        let cache = EdgeCache::new(16, 1_000);
        cache.apply_snapshot(vec![sample_precomputed("beta-ui")], 0, 1);
        assert_eq!(cache.sweep_expired(500), 0);
        assert_eq!(cache.sweep_expired(2_000), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn api_key_scope_round_trips_by_hash() {
        let cache = EdgeCache::new(2, 30_000);
        let scope = ApiKeyScope {
            id: ApiKeyId::new("key-1"),
            project_id: ProjectId::new("proj"),
            environment_key: EnvironmentKey::new("prod"),
            permissions: vec![Permission::Evaluate],
            hash: "deadbeef".to_string(),
        };
        cache.cache_api_key_scope("deadbeef".to_string(), scope);
        assert!(cache.api_key_scope("deadbeef").is_some());
        cache.evict_api_key_scope("deadbeef");
        assert!(cache.api_key_scope("deadbeef").is_none());
    }

    #[test]
    fn last_applied_version_tracks_snapshots_and_deltas() {
        let cache = EdgeCache::new(16, 30_000);
        assert_eq!(cache.last_applied_version(), -1);
        cache.apply_snapshot(vec![sample_precomputed("beta-ui")], 1_000, 5);
        assert_eq!(cache.last_applied_version(), 5);
        cache.upsert_flag(sample_precomputed("beta-ui"), 2_000, 6);
        assert_eq!(cache.last_applied_version(), 6);
    }

    #[test]
    fn resync_request_is_observable_then_clearable() {
        let cache = EdgeCache::new(16, 30_000);
        assert!(!cache.resync_requested());
        cache.request_resync();
        assert!(cache.resync_requested());
        cache.clear_resync_request();
        assert!(!cache.resync_requested());
    }
}
