//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use breadcrumb_core::{
    cell_of_point, BlockBuilder, CellId, ChainBlock, Ed25519PublicKey, GeoPoint, Keypair,
    Resolution,
};
use breadcrumb_engine::{CollectionEngine, EngineConfig, LocationFix, MemoryKeyStore};
use breadcrumb_store::{LedgerStore, MemoryStore};

use crate::generators::TrackStep;
use crate::sensors::ScriptedLocation;

/// Fixed reference instant so that tests are reproducible.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
}

/// `base_time()` plus `secs` seconds.
pub fn at(secs: i64) -> DateTime<Utc> {
    base_time() + Duration::seconds(secs)
}

/// A point in central Amsterdam.
pub fn origin() -> GeoPoint {
    GeoPoint::new(52.3702, 4.8952).unwrap()
}

/// A fix at `point` taken `secs` after `base_time()`.
pub fn fix_at(point: GeoPoint, secs: i64) -> LocationFix {
    LocationFix::new(point.lat, point.lon, at(secs))
}

/// Turn relative steps into absolute fixes, starting at `origin` at `start`.
pub fn fixes_along(origin: GeoPoint, start: DateTime<Utc>, steps: &[TrackStep]) -> Vec<LocationFix> {
    let mut point = origin;
    let mut time = start;
    let mut fixes = vec![LocationFix::new(point.lat, point.lon, time)];
    for step in steps {
        point = point.offset_m(step.north_m, step.east_m);
        time += Duration::seconds(step.after_secs);
        fixes.push(LocationFix::new(point.lat, point.lon, time));
    }
    fixes
}

/// A test fixture with a keypair and memory store.
pub struct TestFixture {
    pub keypair: Keypair,
    pub store: MemoryStore,
}

impl TestFixture {
    /// Create a new test fixture with a random keypair.
    pub fn new() -> Self {
        Self::with_keypair(Keypair::generate())
    }

    /// Create with a deterministic keypair from seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self::with_keypair(Keypair::from_seed(&seed))
    }

    fn with_keypair(keypair: Keypair) -> Self {
        Self {
            keypair,
            store: MemoryStore::new(),
        }
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    /// Cell of `point` at the default resolution.
    pub fn cell(&self, point: &GeoPoint) -> CellId {
        cell_of_point(point, Resolution::DEFAULT)
    }

    /// Sign a chain visiting `points`, one block every `spacing_secs`.
    ///
    /// The blocks are not appended to the store.
    pub fn make_chain(&self, points: &[GeoPoint], spacing_secs: i64) -> Vec<ChainBlock> {
        let mut blocks: Vec<ChainBlock> = Vec::new();
        for (i, point) in points.iter().enumerate() {
            let block = BlockBuilder::next(blocks.last(), self.cell(point))
                .timestamp(at(i as i64 * spacing_secs))
                .sign(&self.keypair);
            blocks.push(block);
        }
        blocks
    }

    /// Sign a chain and append it to the fixture's store.
    pub async fn fill(&self, points: &[GeoPoint], spacing_secs: i64) -> Vec<ChainBlock> {
        let blocks = self.make_chain(points, spacing_secs);
        for block in &blocks {
            self.store.append(block).await.unwrap();
        }
        blocks
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// An engine wired to scripted sensors and an in-memory keystore.
pub struct EngineHarness<S> {
    pub engine: CollectionEngine<S>,
    pub location: Arc<ScriptedLocation>,
    pub keystore: Arc<MemoryKeyStore>,
    pub keypair: Keypair,
}

impl EngineHarness<MemoryStore> {
    /// Memory-backed engine with the testing policy preset.
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new(), EngineConfig::testing())
    }
}

impl<S: LedgerStore + 'static> EngineHarness<S> {
    /// Engine over `store` whose keystore already holds a fixed identity.
    pub fn with_store(store: S, config: EngineConfig) -> Self {
        let keypair = Keypair::from_seed(&[0x5a; 32]);
        let location = Arc::new(ScriptedLocation::new());
        let keystore = Arc::new(MemoryKeyStore::with_keypair(&keypair));
        let engine = CollectionEngine::builder(store, location.clone(), keystore.clone())
            .config(config)
            .build();
        Self {
            engine,
            location,
            keystore,
            keypair,
        }
    }

    /// Queue `fix` and run one manual drop.
    pub async fn drop_at(&self, fix: LocationFix) -> breadcrumb_engine::DropResult {
        self.location.push_fix(fix);
        self.engine.drop_breadcrumb(true).await.unwrap()
    }
}

impl Default for EngineHarness<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}
