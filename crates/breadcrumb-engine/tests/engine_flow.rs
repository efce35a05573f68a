//! End-to-end tests for the collection engine.
//!
//! These drive the engine through scripted sensors and check what lands in
//! the ledger.

use std::sync::Arc;
use std::time::Duration;

use breadcrumb_core::{cell_of_point, center_of, DropBasis, GeoPoint, Resolution};
use breadcrumb_engine::store::{LedgerStore, MemoryStore, SqliteStore};
use breadcrumb_engine::{
    CollectionEngine, DropResult, EngineConfig, EngineError, EngineState, FixError, LocationFix,
    MemoryKeyStore, MotionSnapshot, RejectReason,
};
use breadcrumb_testkit::{
    at, fix_at, fixes_along, origin, track, EngineHarness, FixedMotion, ScriptedLocation,
    TestFixture, TrustWriteFailingStore,
};
use proptest::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Center of the cell containing `origin()`, so repeated drops share a cell.
fn home() -> GeoPoint {
    center_of(&cell_of_point(&origin(), Resolution::DEFAULT))
}

async fn ready_harness() -> EngineHarness<MemoryStore> {
    init_tracing();
    let harness = EngineHarness::new();
    harness.engine.initialize().await.unwrap();
    harness
}

fn rejection(result: &DropResult) -> RejectReason {
    result
        .rejection()
        .unwrap_or_else(|| panic!("expected rejection, got {:?}", result))
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialization
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_initialize_generates_and_stores_identity() {
    init_tracing();
    let keystore = Arc::new(MemoryKeyStore::new());
    let engine = CollectionEngine::builder(
        MemoryStore::new(),
        Arc::new(ScriptedLocation::new()),
        keystore.clone(),
    )
    .build();

    assert!(engine.public_key().await.is_none());
    engine.initialize().await.unwrap();

    let generated = engine.public_key().await.unwrap();
    let stored = breadcrumb_engine::KeyStore::load(keystore.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.public_key(), generated);
    assert_eq!(engine.state(), EngineState::Idle);

    // Idempotent: the identity does not change.
    engine.initialize().await.unwrap();
    assert_eq!(engine.public_key().await, Some(generated));
}

#[tokio::test]
async fn test_uninitialized_engine_refuses_work() {
    let harness = EngineHarness::new();
    assert!(matches!(
        harness.engine.drop_breadcrumb(true).await,
        Err(EngineError::NotInitialized)
    ));
    assert!(matches!(
        harness.engine.start_collection(Duration::from_secs(1)).await,
        Err(EngineError::NotInitialized)
    ));
    // Reads do not need an identity.
    assert_eq!(harness.engine.get_stats().await.unwrap().count, 0);
}

#[tokio::test]
async fn test_corrupted_key_is_fatal() {
    init_tracing();
    let engine = CollectionEngine::builder(
        MemoryStore::new(),
        Arc::new(ScriptedLocation::new()),
        Arc::new(MemoryKeyStore::with_contents("definitely not hex")),
    )
    .build();
    let mut states = engine.subscribe();

    let err = engine.initialize().await.unwrap_err();
    assert!(matches!(err, EngineError::KeyCorrupted(_)));
    assert_eq!(engine.state(), EngineState::Error);
    assert_eq!(*states.borrow_and_update(), EngineState::Error);

    // The error is sticky and surfaced on every later call.
    assert!(matches!(
        engine.initialize().await,
        Err(EngineError::Faulted(_))
    ));
    assert!(matches!(
        engine.drop_breadcrumb(true).await,
        Err(EngineError::Faulted(_))
    ));
}

#[tokio::test]
async fn test_foreign_ledger_is_identity_mismatch() {
    init_tracing();
    let other = TestFixture::with_seed([0x11; 32]);
    other.fill(&[origin(), origin().offset_m(800.0, 0.0)], 600).await;

    let harness = EngineHarness::with_store(other.store, EngineConfig::testing());
    let err = harness.engine.initialize().await.unwrap_err();

    assert!(matches!(err, EngineError::IdentityMismatch { .. }));
    assert_eq!(harness.engine.state(), EngineState::Error);
}

#[tokio::test]
async fn test_invalid_config_is_not_fatal() {
    let mut config = EngineConfig::testing();
    config.policy.max_same_location_drops = 0;
    let harness = EngineHarness::with_store(MemoryStore::new(), config);

    let err = harness.engine.initialize().await.unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    assert_eq!(harness.engine.state(), EngineState::Idle);
}

// ─────────────────────────────────────────────────────────────────────────────
// Drops and the policy
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_genesis_drop() {
    let harness = ready_harness().await;
    let result = harness.drop_at(fix_at(origin(), 0).with_accuracy(7.6)).await;

    let block = result.block().expect("genesis accepted").clone();
    assert_eq!(block.index(), 0);
    assert!(block.previous_hash().is_none());
    assert!(block.verify_chain_link(None));
    assert_eq!(block.identity(), &harness.keypair.public_key());
    assert_eq!(block.timestamp(), at(0));
    assert_eq!(block.meta().basis, DropBasis::Genesis);
    assert_eq!(block.meta().accuracy_m, Some(8));
    assert!(block.meta().manual);

    assert_eq!(
        harness.engine.get_latest_block().await.unwrap(),
        Some(block)
    );
    assert_eq!(harness.engine.state(), EngineState::Idle);
}

#[tokio::test]
async fn test_policy_scenarios() {
    let harness = ready_harness().await;
    let start = home();
    assert!(harness.drop_at(fix_at(start, 0)).await.is_accepted());

    // 10 m away, one second later.
    let nearby = start.offset_m(10.0, 0.0);
    let result = harness.drop_at(fix_at(nearby, 1)).await;
    assert_eq!(rejection(&result), RejectReason::TooSoon);

    // 5 km away, one second later.
    let far = start.offset_m(5_000.0, 0.0);
    let result = harness.drop_at(fix_at(far, 1)).await;
    assert_eq!(rejection(&result), RejectReason::ImplausibleSpeed);

    // Same nearby spot, four minutes later.
    let result = harness.drop_at(fix_at(nearby, 240)).await;
    let block = result.block().expect("time fallback accepted");
    assert_eq!(block.meta().basis, DropBasis::TimeFallback);
    assert_eq!(block.index(), 1);

    // Rejections never touched the ledger.
    assert_eq!(harness.engine.store().count().await.unwrap(), 2);
    assert!(harness.engine.verify_chain().await.unwrap().valid);
}

#[tokio::test]
async fn test_older_fix_never_extends_chain() {
    init_tracing();
    let mut config = EngineConfig::testing();
    config.policy.min_time_between_drops_secs = 0;
    let harness = EngineHarness::with_store(MemoryStore::new(), config);
    harness.engine.initialize().await.unwrap();

    assert!(harness.drop_at(fix_at(home(), 600)).await.is_accepted());

    let nearby = harness.drop_at(fix_at(home().offset_m(5.0, 0.0), 0)).await;
    assert_eq!(rejection(&nearby), RejectReason::TooSoon);

    let far = harness.drop_at(fix_at(home().offset_m(3_000.0, 0.0), 0)).await;
    assert_eq!(rejection(&far), RejectReason::ImplausibleSpeed);

    // Same timestamp as the tip is fine with no minimum interval.
    let same = harness.drop_at(fix_at(home(), 600)).await;
    assert_eq!(same.block().unwrap().meta().basis, DropBasis::TimeFallback);

    assert_eq!(harness.engine.store().count().await.unwrap(), 2);
    assert!(harness.engine.verify_chain().await.unwrap().valid);
}

#[tokio::test]
async fn test_same_location_limit() {
    let harness = ready_harness().await;
    let limit = harness.engine.config().policy.max_same_location_drops;

    let mut secs = 0;
    for _ in 0..limit {
        assert!(harness.drop_at(fix_at(home(), secs)).await.is_accepted());
        secs += 240;
    }

    // A full day later, still the same cell: capped.
    let result = harness.drop_at(fix_at(home(), secs + 86_400)).await;
    assert_eq!(rejection(&result), RejectReason::SameLocationLimitReached);

    let cell = cell_of_point(&home(), Resolution::DEFAULT);
    let store = harness.engine.store();
    assert_eq!(store.accepted_count_at(&cell).await.unwrap(), limit);
    assert_eq!(store.unique_cell_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_movement_chain() {
    let harness = ready_harness().await;
    let mut point = origin();

    for i in 0..8 {
        let result = harness.drop_at(fix_at(point, i * 600)).await;
        let block = result.block().expect("movement accepted");
        assert_eq!(block.index(), i as u64);
        if i > 0 {
            assert_eq!(block.meta().basis, DropBasis::Movement);
        }
        point = point.offset_m(300.0, 150.0);
    }

    let store = harness.engine.store();
    let blocks = store.all().await.unwrap();
    for pair in blocks.windows(2) {
        assert_eq!(pair[1].previous_hash(), Some(pair[0].block_hash()));
    }
    assert_eq!(store.unique_cell_count().await.unwrap(), 8);

    let stats = harness.engine.get_stats().await.unwrap();
    assert_eq!(stats.count, 8);
    assert!(stats.chain_valid);
    assert!(stats.issues.is_empty());
    assert_eq!(stats.unique_locations, 8);
    assert_eq!(stats.first_at, Some(at(0)));
    assert_eq!(stats.last_at, Some(at(7 * 600)));
}

#[tokio::test]
async fn test_trust_score_recomputed_and_persisted() {
    let harness = ready_harness().await;

    let first = harness.drop_at(fix_at(origin(), 0)).await;
    let second = harness
        .drop_at(fix_at(origin().offset_m(0.0, 900.0), 900))
        .await;

    let (
        DropResult::Accepted { trust_score: Some(s1), .. },
        DropResult::Accepted { trust_score: Some(s2), .. },
    ) = (&first, &second)
    else {
        panic!("both drops should be accepted");
    };
    assert!(s2 > s1);
    assert!((0.0..=100.0).contains(s2));

    let record = harness.engine.trust_record().await.unwrap().unwrap();
    assert_eq!(record.score, *s2);
    assert_eq!(record.breadcrumb_count, 2);
    assert_eq!(record.unique_cells, 2);
}

#[tokio::test]
async fn test_trust_refresh_failure_keeps_accepted_block() {
    init_tracing();
    let harness = EngineHarness::with_store(TrustWriteFailingStore::new(), EngineConfig::testing());
    harness.engine.initialize().await.unwrap();

    let first = harness.drop_at(fix_at(origin(), 0)).await;
    assert!(matches!(first, DropResult::Accepted { trust_score: Some(_), .. }));
    let saved = harness.engine.trust_record().await.unwrap().unwrap();

    harness.engine.store().set_failing(true);
    let second = harness
        .drop_at(fix_at(origin().offset_m(0.0, 900.0), 900))
        .await;
    let DropResult::Accepted { block, trust_score: None } = &second else {
        panic!("expected acceptance without a score, got {:?}", second);
    };
    assert_eq!(block.index(), 1);

    assert_eq!(harness.engine.store().count().await.unwrap(), 2);
    assert_eq!(harness.engine.trust_record().await.unwrap(), Some(saved));
    assert_eq!(harness.engine.state(), EngineState::Idle);
    assert!(harness.engine.verify_chain().await.unwrap().valid);

    // The next successful refresh catches up.
    harness.engine.store().set_failing(false);
    let third = harness
        .drop_at(fix_at(origin().offset_m(0.0, 1_800.0), 1_800))
        .await;
    assert!(matches!(third, DropResult::Accepted { trust_score: Some(_), .. }));
    let record = harness.engine.trust_record().await.unwrap().unwrap();
    assert_eq!(record.breadcrumb_count, 3);
}

#[tokio::test]
async fn test_fix_failures_are_rejections() {
    let harness = ready_harness().await;

    harness.location.push_error(FixError::PermissionDenied);
    let result = harness.engine.drop_breadcrumb(false).await.unwrap();
    assert_eq!(rejection(&result), RejectReason::PermissionDenied);

    harness.location.push_error(FixError::Unavailable);
    let result = harness.engine.drop_breadcrumb(false).await.unwrap();
    assert_eq!(rejection(&result), RejectReason::NoFix);

    // Empty script.
    let result = harness.engine.drop_breadcrumb(false).await.unwrap();
    assert_eq!(rejection(&result), RejectReason::NoFix);

    let result = harness
        .drop_at(LocationFix::new(95.0, 4.0, at(0)))
        .await;
    assert_eq!(rejection(&result), RejectReason::InvalidCoordinate);

    let result = harness
        .drop_at(LocationFix::new(f64::NAN, 4.0, at(0)))
        .await;
    assert_eq!(rejection(&result), RejectReason::InvalidCoordinate);

    assert_eq!(harness.engine.store().count().await.unwrap(), 0);
    assert_eq!(harness.engine.state(), EngineState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_slow_fix_times_out_as_no_fix() {
    let harness = ready_harness().await;
    harness.location.set_delay(Some(Duration::from_secs(60)));
    harness.location.push_fix(fix_at(origin(), 0));

    let result = harness.engine.drop_breadcrumb(true).await.unwrap();
    assert_eq!(rejection(&result), RejectReason::NoFix);
    assert_eq!(harness.engine.store().count().await.unwrap(), 0);
    assert_eq!(harness.engine.state(), EngineState::Idle);
}

#[tokio::test]
async fn test_motion_recorded_in_meta() {
    init_tracing();
    let location = Arc::new(ScriptedLocation::with_fixes([fix_at(origin(), 0)]));
    let engine = CollectionEngine::builder(
        MemoryStore::new(),
        location,
        Arc::new(MemoryKeyStore::new()),
    )
    .motion(Arc::new(FixedMotion::walking()))
    .config(EngineConfig::testing())
    .build();
    engine.initialize().await.unwrap();

    let result = engine.drop_breadcrumb(false).await.unwrap();
    let block = result.block().unwrap();
    let expected = MotionSnapshot::new([2.5, 1.0, 11.8], [0.6, 0.3, 0.2]).classify();
    assert_eq!(block.meta().motion, Some(expected));
    assert!(!block.meta().manual);
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency and lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_manual_drops_are_serialized() {
    let harness = ready_harness().await;
    let mut point = origin();
    for i in 0..6 {
        harness.location.push_fix(fix_at(point, i * 600));
        point = point.offset_m(0.0, 400.0);
    }

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let engine = harness.engine.clone();
        tasks.push(tokio::spawn(async move { engine.drop_breadcrumb(true).await }));
    }
    for task in tasks {
        assert!(task.await.unwrap().unwrap().is_accepted());
    }

    let blocks = harness.engine.store().all().await.unwrap();
    let indices: Vec<u64> = blocks.iter().map(|b| b.index()).collect();
    assert_eq!(indices, (0..6).collect::<Vec<_>>());
    assert!(harness.engine.verify_chain().await.unwrap().valid);
}

#[tokio::test]
async fn test_periodic_collection() {
    let harness = ready_harness().await;
    let steps: Vec<_> = (0..4)
        .map(|_| breadcrumb_testkit::TrackStep {
            north_m: 250.0,
            east_m: 0.0,
            after_secs: 600,
        })
        .collect();
    for fix in fixes_along(origin(), at(0), &steps) {
        harness.location.push_fix(fix);
    }

    let mut states = harness.engine.subscribe();
    harness
        .engine
        .start_collection(Duration::from_millis(20))
        .await
        .unwrap();
    assert!(matches!(
        harness.engine.state(),
        EngineState::Collecting | EngineState::Dropping
    ));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while harness.location.remaining() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "collector stalled");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // A manual drop is still allowed while collecting; the script is empty.
    let manual = harness.engine.drop_breadcrumb(true).await.unwrap();
    assert_eq!(rejection(&manual), RejectReason::NoFix);

    harness.engine.stop_collection().await;
    assert_eq!(harness.engine.state(), EngineState::Idle);
    assert_eq!(*states.borrow_and_update(), EngineState::Idle);

    assert_eq!(harness.engine.store().count().await.unwrap(), 5);
    assert!(harness.engine.verify_chain().await.unwrap().valid);

    // Stopping twice is harmless.
    harness.engine.stop_collection().await;
}

/// Testing preset with a fix timeout long enough for a 5 s fix.
fn slow_fix_harness() -> EngineHarness<MemoryStore> {
    init_tracing();
    let config = EngineConfig {
        fix_timeout_ms: 30_000,
        ..EngineConfig::testing()
    };
    let harness = EngineHarness::with_store(MemoryStore::new(), config);
    harness.location.set_delay(Some(Duration::from_secs(5)));
    harness.location.push_fix(fix_at(origin(), 0));
    harness
}

#[tokio::test(start_paused = true)]
async fn test_stop_collection_while_manual_drop_in_flight() {
    let harness = slow_fix_harness();
    harness.engine.initialize().await.unwrap();

    let engine = harness.engine.clone();
    let manual = tokio::spawn(async move { engine.drop_breadcrumb(true).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(harness.location.calls(), 1);
    assert_eq!(harness.engine.state(), EngineState::Dropping);

    // Every tick lands while the manual drop holds the lock and is skipped.
    harness
        .engine
        .start_collection(Duration::from_secs(1))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(harness.location.calls(), 1);
    assert_eq!(harness.engine.state(), EngineState::Dropping);

    harness.engine.stop_collection().await;
    assert_eq!(harness.engine.state(), EngineState::Dropping);

    let result = manual.await.unwrap().unwrap();
    assert!(result.is_accepted());
    assert_eq!(harness.engine.state(), EngineState::Idle);
    assert_eq!(harness.location.calls(), 1);
    assert_eq!(harness.engine.store().count().await.unwrap(), 1);
    assert!(harness.engine.verify_chain().await.unwrap().valid);
}

#[tokio::test(start_paused = true)]
async fn test_default_collection_stop_waits_for_periodic_drop() {
    let harness = slow_fix_harness();
    harness.engine.initialize().await.unwrap();

    harness.engine.start_default_collection().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(harness.location.calls(), 1);
    assert_eq!(harness.engine.state(), EngineState::Dropping);

    harness.engine.stop_collection().await;
    assert_eq!(harness.engine.state(), EngineState::Idle);
    assert_eq!(harness.location.calls(), 1);
    assert_eq!(harness.engine.store().count().await.unwrap(), 1);
    assert!(harness.engine.verify_chain().await.unwrap().valid);

    // Collection can be restarted after a stop.
    harness.engine.start_default_collection().await.unwrap();
    assert!(matches!(
        harness.engine.state(),
        EngineState::Collecting | EngineState::Dropping
    ));
    harness.engine.stop_collection().await;
    assert_eq!(harness.engine.state(), EngineState::Idle);
}

#[tokio::test]
async fn test_start_collection_rejects_zero_interval() {
    let harness = ready_harness().await;
    assert!(matches!(
        harness.engine.start_collection(Duration::ZERO).await,
        Err(EngineError::Config(_))
    ));
    assert_eq!(harness.engine.state(), EngineState::Idle);
}

#[tokio::test]
async fn test_reset_ledger() {
    let harness = ready_harness().await;
    harness.drop_at(fix_at(origin(), 0)).await;
    harness
        .drop_at(fix_at(origin().offset_m(700.0, 0.0), 600))
        .await;

    harness.engine.reset_ledger().await.unwrap();
    assert!(harness.engine.get_latest_block().await.unwrap().is_none());
    assert!(harness.engine.trust_record().await.unwrap().is_none());

    let result = harness.drop_at(fix_at(origin(), 1_200)).await;
    assert_eq!(result.block().unwrap().index(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Durability
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sqlite_restart_keeps_chain_and_cell_counts() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let limit;

    {
        let store = SqliteStore::open(&path).unwrap();
        let harness = EngineHarness::with_store(store, EngineConfig::testing());
        harness.engine.initialize().await.unwrap();
        limit = harness.engine.config().policy.max_same_location_drops;

        for i in 0..limit as i64 {
            assert!(harness.drop_at(fix_at(home(), i * 240)).await.is_accepted());
        }
    }

    // A fresh engine over the same file and the same identity.
    let store = SqliteStore::open(&path).unwrap();
    let harness = EngineHarness::with_store(store, EngineConfig::testing());
    harness.engine.initialize().await.unwrap();

    let latest = harness.engine.get_latest_block().await.unwrap().unwrap();
    assert_eq!(latest.index(), limit - 1);

    // The per-cell count survived the restart.
    let result = harness.drop_at(fix_at(home(), 100_000)).await;
    assert_eq!(rejection(&result), RejectReason::SameLocationLimitReached);

    // Moving on extends the existing chain.
    let result = harness
        .drop_at(fix_at(home().offset_m(2_000.0, 0.0), 100_600))
        .await;
    assert_eq!(result.block().unwrap().index(), limit);
    assert!(harness.engine.verify_chain().await.unwrap().valid);
}

// ─────────────────────────────────────────────────────────────────────────────
// Properties
// ─────────────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_accepted_chains_always_verify(steps in track(20)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let harness = EngineHarness::new();
            harness.engine.initialize().await.unwrap();
            let policy = harness.engine.config().policy.clone();

            let mut accepted = 0u64;
            for fix in fixes_along(origin(), at(0), &steps) {
                if let DropResult::Accepted { block, .. } = harness.drop_at(fix).await {
                    assert_eq!(block.index(), accepted);
                    accepted += 1;
                }
            }

            let store = harness.engine.store();
            let blocks = store.all().await.unwrap();
            assert_eq!(blocks.len() as u64, accepted);
            assert!(accepted >= 1, "genesis is always accepted");
            for block in &blocks {
                assert!(block.hash_matches());
                let at_cell = store.accepted_count_at(block.cell()).await.unwrap();
                assert!(at_cell <= policy.max_same_location_drops);
            }

            let report = harness.engine.verify_chain().await.unwrap();
            assert!(report.valid, "{:?}", report.issues);
            assert_eq!(harness.engine.verify_chain().await.unwrap(), report);
        });
    }
}
