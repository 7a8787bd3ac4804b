// flagforge-hub/src/cache.rs
// ============================================================================
// Module: Hub Response Cache (C5) and Preloaded Table (C6)
// Description: The two in-memory tiers the RPC surface consults before C3.
// Purpose: Serve the overwhelming majority of evaluations with no store I/O.
// Dependencies: arc-swap, im, flagforge-core
// ============================================================================

//! ## Overview
//! C5 is keyed by a fingerprint over `(project, env, flag, context)` and
//! stores serialized response bytes behind sharded `RwLock`s — multi-writer,
//! multi-reader, matching the specification's "sharded locking" directive.
//! C6 is a single immutable `im::HashMap` behind an `arc_swap::ArcSwap`: the
//! rebuilder constructs a whole new map and swaps the pointer, so readers
//! never observe a partial rebuild and never block the rebuilder.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::RwLock;
use std::time::Duration;
use std::time::Instant;

use arc_swap::ArcSwap;
use flagforge_core::model::EnvironmentKey;
use flagforge_core::model::Flag;
use flagforge_core::model::FlagKey;
use flagforge_core::model::Operator;
use flagforge_core::model::PrecomputedFlag;
use flagforge_core::model::ProjectId;
use flagforge_core::model::Rollout;
use flagforge_core::model::RolloutKind;
use flagforge_core::model::Segment;
use flagforge_core::model::SegmentId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default shard count for the Response Cache.
pub const DEFAULT_SHARD_COUNT: usize = 16;
/// Default response TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// SECTION: Response Cache (C5)
// ============================================================================

struct CacheEntry {
    bytes: Vec<u8>,
    inserted_at: Instant,
}

/// Identifies a Response Cache entry's owning flag, so a mutation can
/// invalidate every entry derived from that flag in O(|affected|) rather
/// than scanning the whole cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlagScope {
    /// Owning project.
    pub project_id: ProjectId,
    /// Owning environment.
    pub environment_key: EnvironmentKey,
    /// Owning flag key.
    pub flag_key: FlagKey,
}

struct Shard {
    entries: HashMap<String, (FlagScope, CacheEntry)>,
    by_scope: HashMap<FlagScope, Vec<String>>,
}

impl Shard {
    fn new() -> Self {
        Self { entries: HashMap::new(), by_scope: HashMap::new() }
    }
}

/// Sharded, TTL'd cache of serialized evaluation responses (C5).
pub struct ResponseCache {
    shards: Vec<RwLock<Shard>>,
    ttl: Duration,
}

impl ResponseCache {
    /// Builds a cache with `shard_count` shards and the given TTL.
    #[must_use]
    pub fn new(shard_count: usize, ttl: Duration) -> Self {
        let shard_count = shard_count.max(1);
        let shards = (0..shard_count).map(|_| RwLock::new(Shard::new())).collect();
        Self { shards, ttl }
    }

    fn shard_for(&self, fingerprint: &str) -> &RwLock<Shard> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        fingerprint.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Looks up a fingerprint, returning `None` on a miss or an expired hit.
    #[must_use]
    pub fn get(&self, fingerprint: &str) -> Option<Vec<u8>> {
        let shard = self.shard_for(fingerprint).read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let (_, entry) = shard.entries.get(fingerprint)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.bytes.clone())
    }

    /// Inserts or replaces a fingerprint's serialized response.
    pub fn put(&self, fingerprint: String, scope: FlagScope, bytes: Vec<u8>) {
        let mut shard = self.shard_for(&fingerprint).write().unwrap_or_else(std::sync::PoisonError::into_inner);
        shard.by_scope.entry(scope.clone()).or_default().push(fingerprint.clone());
        shard.entries.insert(fingerprint, (scope, CacheEntry { bytes, inserted_at: Instant::now() }));
    }

    /// Invalidates every entry derived from `scope`'s flag. A scope's
    /// fingerprints are distributed across shards by fingerprint hash, not
    /// by scope hash, so every shard's `by_scope` index must be checked.
    pub fn invalidate_scope(&self, scope: &FlagScope) {
        for shard_lock in &self.shards {
            let mut shard = shard_lock.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(fingerprints) = shard.by_scope.remove(scope) {
                for fingerprint in fingerprints {
                    shard.entries.remove(&fingerprint);
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Preloaded Table (C6)
// ============================================================================
//
// The entry type is `flagforge_core::model::PrecomputedFlag`, shared with
// the Edge cache (C8) so the Hub and every Edge agree on exactly what a
// "flattened, evaluation-ready flag" looks like.

/// Key into the Preloaded Table.
pub type PreloadKey = (ProjectId, EnvironmentKey, FlagKey);

/// The Hub's single immutable map of precomputed flags, held behind an
/// atomic pointer so a rebuild never blocks a concurrent reader.
pub struct PreloadedTable {
    snapshot: ArcSwap<im::HashMap<PreloadKey, PrecomputedFlag>>,
}

impl PreloadedTable {
    /// Builds an empty table. [`Self::is_ready`] is false until the first
    /// [`Self::swap`].
    #[must_use]
    pub fn empty() -> Self {
        Self { snapshot: ArcSwap::from_pointee(im::HashMap::new()) }
    }

    /// Returns the precomputed entry for a flag, if preloaded.
    #[must_use]
    pub fn get(&self, key: &PreloadKey) -> Option<PrecomputedFlag> {
        self.snapshot.load().get(key).cloned()
    }

    /// Atomically replaces the whole snapshot.
    pub fn swap(&self, next: im::HashMap<PreloadKey, PrecomputedFlag>) {
        self.snapshot.store(std::sync::Arc::new(next));
    }

    /// Replaces a single entry without disturbing the rest of the map,
    /// cloning the persistent map's structure-shared spine rather than
    /// copying every entry.
    pub fn upsert(&self, key: PreloadKey, entry: PrecomputedFlag) {
        let mut next = (**self.snapshot.load()).clone();
        next.insert(key, entry);
        self.snapshot.store(std::sync::Arc::new(next));
    }

    /// Removes a single entry, e.g. on flag deletion.
    pub fn remove(&self, key: &PreloadKey) {
        let mut next = (**self.snapshot.load()).clone();
        next.remove(key);
        self.snapshot.store(std::sync::Arc::new(next));
    }

    /// Whether at least one swap has occurred. `POST /evaluate/ultra`
    /// returns `NOT_READY` before this is true.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.snapshot.load().is_empty()
    }

    /// Number of entries currently preloaded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    /// Whether the table currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }
}

impl Default for PreloadedTable {
    fn default() -> Self {
        Self::empty()
    }
}

// ============================================================================
// SECTION: Segment Resolution
// ============================================================================

/// Returns the ids of every segment `flag`'s rules or `rollout` directly
/// reference. Used to seed a transitive walk via `Segment::referenced_segment_ids`.
#[must_use]
pub fn directly_referenced_segment_ids(flag: &Flag, rollout: Option<&Rollout>) -> Vec<SegmentId> {
    let mut ids = Vec::new();
    for rule in &flag.targeting.rules {
        if rule.operator == Operator::InSegment {
            if let Some(raw) = rule.values.first() {
                ids.push(SegmentId::new(raw.clone()));
            }
        }
    }
    if let Some(RolloutKind::Segment(variant)) = rollout.map(|rollout| &rollout.kind) {
        for route in &variant.routes {
            ids.push(route.segment_id.clone());
        }
    }
    ids
}

/// Resolves every segment transitively referenced by `flag`/`rollout`,
/// via `lookup`, which returns a project's segment by id (typically backed
/// by [`flagforge_core::FlagStore::get_segment`]). Cycles cannot occur:
/// the store rejects them at write time.
///
/// # Errors
///
/// Propagates whatever error `lookup` returns for a missing or
/// unreadable segment.
pub fn resolve_segments<E>(
    flag: &Flag,
    rollout: Option<&Rollout>,
    mut lookup: impl FnMut(&SegmentId) -> Result<Segment, E>,
) -> Result<BTreeMap<SegmentId, Segment>, E> {
    let mut resolved = BTreeMap::new();
    let mut pending = directly_referenced_segment_ids(flag, rollout);
    while let Some(id) = pending.pop() {
        if resolved.contains_key(&id) {
            continue;
        }
        let segment = lookup(&id)?;
        for referenced in segment.referenced_segment_ids() {
            if !resolved.contains_key(referenced) {
                pending.push(referenced.clone());
            }
        }
        resolved.insert(id, segment);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use flagforge_core::model::FlagValue;
    use flagforge_core::model::TargetingBlock;
    use flagforge_core::model::Timestamp;
    use flagforge_core::model::ValueType;

    use super::*;

    fn sample_flag(key: &str) -> Flag {
        Flag {
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
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
        }
    }

    fn sample_precomputed(key: &str) -> PrecomputedFlag {
        PrecomputedFlag {
            project_id: ProjectId::new("proj"),
            environment_key: EnvironmentKey::new("prod"),
            flag_key: FlagKey::new(key),
            flag: sample_flag(key),
            rollout: None,
            segments: BTreeMap::new(),
            version: 0,
        }
    }

    #[test]
    fn response_cache_hit_then_invalidate() {
        let cache = ResponseCache::new(4, Duration::from_secs(60));
        let scope = FlagScope {
            project_id: ProjectId::new("proj"),
            environment_key: EnvironmentKey::new("prod"),
            flag_key: FlagKey::new("beta-ui"),
        };
        cache.put("fp1".to_string(), scope.clone(), b"payload".to_vec());
        assert_eq!(cache.get("fp1"), Some(b"payload".to_vec()));

        cache.invalidate_scope(&scope);
        assert_eq!(cache.get("fp1"), None);
    }

    #[test]
    fn response_cache_expires_by_ttl() {
        let cache = ResponseCache::new(1, Duration::from_millis(1));
        let scope = FlagScope {
            project_id: ProjectId::new("proj"),
            environment_key: EnvironmentKey::new("prod"),
            flag_key: FlagKey::new("beta-ui"),
        };
        cache.put("fp1".to_string(), scope, b"payload".to_vec());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("fp1"), None);
    }

    #[test]
    fn preloaded_table_not_ready_until_first_swap() {
        let table = PreloadedTable::empty();
        assert!(!table.is_ready());

        let key: PreloadKey = (ProjectId::new("proj"), EnvironmentKey::new("prod"), FlagKey::new("beta-ui"));
        table.upsert(key.clone(), sample_precomputed("beta-ui"));

        assert!(table.is_ready());
        assert!(table.get(&key).is_some());
    }

    #[test]
    fn preloaded_table_remove_drops_entry() {
        let table = PreloadedTable::empty();
        let key: PreloadKey = (ProjectId::new("proj"), EnvironmentKey::new("prod"), FlagKey::new("beta-ui"));
        table.upsert(key.clone(), sample_precomputed("beta-ui"));
        table.remove(&key);
        assert!(table.get(&key).is_none());
    }
}
