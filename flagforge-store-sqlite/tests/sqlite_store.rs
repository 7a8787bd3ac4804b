// flagforge-store-sqlite/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Store Tests
// Description: Validate SQLite FlagStore/ApiKeyStore behavior.
// Purpose: Ensure scope isolation, write invariants, and lifecycle rules hold.
// Dependencies: flagforge-store-sqlite, flagforge-core, tempfile
// ============================================================================

//! ## Overview
//! Conformance tests for the SQLite-backed flag, rollout, segment, and
//! API-key stores.

#![allow(clippy::expect_used, reason = "Integration tests use expect for setup clarity.")]

// ============================================================================
// SECTION: Imports
// ============================================================================

use flagforge_core::ApiKeyStore;
use flagforge_core::EnvironmentKey;
use flagforge_core::Flag;
use flagforge_core::FlagKey;
use flagforge_core::FlagStore;
use flagforge_core::FlagValue;
use flagforge_core::Permission;
use flagforge_core::ProjectId;
use flagforge_core::Rollout;
use flagforge_core::RolloutId;
use flagforge_core::RolloutKind;
use flagforge_core::RolloutState;
use flagforge_core::Segment;
use flagforge_core::SegmentPredicate;
use flagforge_core::StoreError;
use flagforge_core::TargetingBlock;
use flagforge_core::Timestamp;
use flagforge_core::Variation;
use flagforge_core::ValueType;
use flagforge_core::interfaces::FlagFilter;
use flagforge_core::model::PercentageVariant;
use flagforge_core::model::VariationId;
use flagforge_store_sqlite::SqliteFlagStore;
use flagforge_store_sqlite::SqliteStoreConfig;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn store_at(dir: &TempDir) -> SqliteFlagStore {
    let config = SqliteStoreConfig {
        path: dir.path().join("flagforge.sqlite3"),
        busy_timeout_ms: 5_000,
        journal_mode: flagforge_store_sqlite::SqliteJournalMode::Wal,
    };
    SqliteFlagStore::open(&config).expect("open store")
}

fn sample_flag(project: &str, env: &str, key: &str) -> Flag {
    Flag {
        project_id: ProjectId::new(project),
        environment_key: EnvironmentKey::new(env),
        key: FlagKey::new(key),
        name: key.to_string(),
        description: None,
        value_type: ValueType::Bool,
        enabled: true,
        default: FlagValue::Bool(false),
        variations: vec![
            Variation {
                id: VariationId::new("on"),
                name: "on".to_string(),
                value: FlagValue::Bool(true),
                description: None,
                weight: None,
            },
            Variation {
                id: VariationId::new("off"),
                name: "off".to_string(),
                value: FlagValue::Bool(false),
                description: None,
                weight: None,
            },
        ],
        targeting: TargetingBlock::default(),
        created_at: Timestamp::now(),
        updated_at: Timestamp::now(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn upsert_then_get_round_trips() {
    let dir = TempDir::new().expect("tempdir");
    let store = store_at(&dir);
    let flag = sample_flag("proj", "prod", "beta-ui");
    store.upsert_flag(&flag).expect("upsert");
    let fetched =
        store.get_flag(&flag.project_id, &flag.environment_key, &flag.key).expect("get");
    assert_eq!(fetched.key, flag.key);
    assert!(fetched.enabled);
}

#[test]
fn scope_isolation_an_environment_never_sees_another_environments_flags() {
    let dir = TempDir::new().expect("tempdir");
    let store = store_at(&dir);
    store.upsert_flag(&sample_flag("proj", "prod", "beta-ui")).expect("upsert prod");
    store.upsert_flag(&sample_flag("proj", "staging", "beta-ui")).expect("upsert staging");
    store.upsert_flag(&sample_flag("other-proj", "prod", "beta-ui")).expect("upsert other project");

    let prod_flags = store
        .list_flags(&ProjectId::new("proj"), &EnvironmentKey::new("prod"), &FlagFilter::default())
        .expect("list prod");
    assert_eq!(prod_flags.len(), 1);
    assert_eq!(prod_flags[0].environment_key, EnvironmentKey::new("prod"));

    let other_project_flags = store
        .list_flags(&ProjectId::new("other-proj"), &EnvironmentKey::new("prod"), &FlagFilter::default())
        .expect("list other project");
    assert_eq!(other_project_flags.len(), 1);
}

#[test]
fn invalid_flag_key_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let store = store_at(&dir);
    let mut flag = sample_flag("proj", "prod", "Bad Key");
    flag.key = FlagKey::new("Has Spaces");
    let err = store.upsert_flag(&flag).expect_err("should reject invalid key");
    assert!(matches!(err, StoreError::InvalidWrite(_)));
}

#[test]
fn targeting_rule_referencing_unknown_variation_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let store = store_at(&dir);
    let mut flag = sample_flag("proj", "prod", "beta-ui");
    flag.targeting.default_rule = Some(VariationId::new("does-not-exist"));
    let err = store.upsert_flag(&flag).expect_err("should reject unknown variation");
    assert!(matches!(err, StoreError::InvalidWrite(_)));
}

#[test]
fn toggle_flips_enabled_without_touching_variations() {
    let dir = TempDir::new().expect("tempdir");
    let store = store_at(&dir);
    let flag = sample_flag("proj", "prod", "beta-ui");
    store.upsert_flag(&flag).expect("upsert");
    store
        .toggle_flag(&flag.project_id, &flag.environment_key, &flag.key, false)
        .expect("toggle");
    let fetched =
        store.get_flag(&flag.project_id, &flag.environment_key, &flag.key).expect("get");
    assert!(!fetched.enabled);
    assert_eq!(fetched.variations.len(), 2);
}

#[test]
fn percentage_rollout_upsert_is_accepted() {
    let dir = TempDir::new().expect("tempdir");
    let store = store_at(&dir);
    let flag = sample_flag("proj", "prod", "beta-ui");
    store.upsert_flag(&flag).expect("upsert flag");
    let rollout = Rollout {
        id: RolloutId::new("rollout-1"),
        state: RolloutState::Draft,
        kind: RolloutKind::Percentage(PercentageVariant {
            percent: 50.0,
            variation: VariationId::new("on"),
        }),
        sticky_bucketing: true,
        bucket_by: flagforge_core::model::BucketBy::default(),
        traffic_allocation: 100.0,
    };
    store
        .upsert_rollout(&flag.project_id, &flag.environment_key, &flag.key, &rollout)
        .expect("percentage rollout accepted");
}

#[test]
fn experiment_weights_not_summing_to_100_are_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let store = store_at(&dir);
    let flag = sample_flag("proj", "prod", "beta-ui");
    store.upsert_flag(&flag).expect("upsert flag");
    let rollout = Rollout {
        id: RolloutId::new("rollout-1"),
        state: RolloutState::Draft,
        kind: RolloutKind::Experiment(flagforge_core::model::ExperimentVariant {
            weights: vec![
                flagforge_core::model::ExperimentWeight {
                    variation: VariationId::new("on"),
                    weight: 40.0,
                },
                flagforge_core::model::ExperimentWeight {
                    variation: VariationId::new("off"),
                    weight: 40.0,
                },
            ],
        }),
        sticky_bucketing: true,
        bucket_by: flagforge_core::model::BucketBy::default(),
        traffic_allocation: 100.0,
    };
    let err = store
        .upsert_rollout(&flag.project_id, &flag.environment_key, &flag.key, &rollout)
        .expect_err("weights summing to 80 should be rejected");
    assert!(matches!(err, StoreError::InvalidWrite(_)));
}

#[test]
fn rollout_transition_rejects_illegal_jump() {
    let dir = TempDir::new().expect("tempdir");
    let store = store_at(&dir);
    let flag = sample_flag("proj", "prod", "beta-ui");
    store.upsert_flag(&flag).expect("upsert flag");
    let rollout = Rollout {
        id: RolloutId::new("rollout-1"),
        state: RolloutState::Draft,
        kind: RolloutKind::Percentage(PercentageVariant {
            percent: 50.0,
            variation: VariationId::new("on"),
        }),
        sticky_bucketing: true,
        bucket_by: flagforge_core::model::BucketBy::default(),
        traffic_allocation: 100.0,
    };
    store
        .upsert_rollout(&flag.project_id, &flag.environment_key, &flag.key, &rollout)
        .expect("upsert rollout");
    let err = store
        .transition_rollout(&flag.project_id, &flag.environment_key, &rollout.id, RolloutState::Completed)
        .expect_err("draft -> completed is illegal");
    assert!(matches!(err, StoreError::InvalidWrite(_)));
}

#[test]
fn segment_cycle_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let store = store_at(&dir);
    let project = ProjectId::new("proj");
    let segment_a = Segment {
        id: flagforge_core::SegmentId::new("a"),
        name: "a".to_string(),
        predicates: vec![SegmentPredicate::InSegment(flagforge_core::SegmentId::new("b"))],
    };
    let segment_b = Segment {
        id: flagforge_core::SegmentId::new("b"),
        name: "b".to_string(),
        predicates: vec![SegmentPredicate::InSegment(flagforge_core::SegmentId::new("a"))],
    };
    store.upsert_segment(&project, &segment_a).expect("first segment has no cycle yet");
    let err = store.upsert_segment(&project, &segment_b).expect_err("should detect cycle");
    assert!(matches!(err, StoreError::InvalidWrite(_)));
}

#[test]
fn api_key_create_then_lookup_by_hash() {
    let dir = TempDir::new().expect("tempdir");
    let config = SqliteStoreConfig {
        path: dir.path().join("flagforge.sqlite3"),
        busy_timeout_ms: 5_000,
        journal_mode: flagforge_store_sqlite::SqliteJournalMode::Wal,
    };
    let (_flags, keys) =
        flagforge_store_sqlite::open_stores(&config, None).expect("open stores");
    let created = keys
        .create_api_key(
            &ProjectId::new("proj"),
            &EnvironmentKey::new("prod"),
            &[Permission::Evaluate],
            None,
        )
        .expect("create key");
    assert_eq!(created.plaintext.len(), 43);
    let fetched = keys.get_api_key(&created.record.hash).expect("lookup").expect("present");
    assert_eq!(fetched.id, created.record.id);
    assert!(fetched.has_permission(Permission::Evaluate));
}

#[test]
fn api_key_lookup_by_unknown_hash_returns_none() {
    let dir = TempDir::new().expect("tempdir");
    let config = SqliteStoreConfig {
        path: dir.path().join("flagforge.sqlite3"),
        busy_timeout_ms: 5_000,
        journal_mode: flagforge_store_sqlite::SqliteJournalMode::Wal,
    };
    let (_flags, keys) =
        flagforge_store_sqlite::open_stores(&config, None).expect("open stores");
    assert!(keys.get_api_key("not-a-real-hash").expect("lookup ok").is_none());
}
