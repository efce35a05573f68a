//! The collection engine: sensor input to signed, persisted breadcrumbs.
//!
//! Each drop runs the same pipeline: acquire a fix (bounded by a timeout),
//! quantize it, ask the drop policy, sign the block off the async runtime,
//! append it, then recompute and persist the trust score.
//!
//! Only one drop is ever in flight. Manual drops wait their turn; periodic
//! ticks that find a drop in progress are skipped.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use breadcrumb_core::{
    evaluate, trust_score, BlockBuilder, ChainBlock, ChainVerification,
    DropCandidate, DropDecision, Ed25519PublicKey, GeoPoint, Keypair, MetaFlags, RejectReason,
    TrustInputs, TrustRecord,
};
use breadcrumb_store::LedgerStore;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::keystore::KeyStore;
use crate::sensors::{LocationProvider, MotionProvider};

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Initialized (or not yet), no periodic collection.
    Idle,
    /// Loading the identity and checking it against the ledger.
    Initializing,
    /// Periodic collection is running.
    Collecting,
    /// A drop is in flight.
    Dropping,
    /// A fatal error occurred. Terminal.
    Error,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Collecting => "collecting",
            Self::Dropping => "dropping",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Outcome of one drop attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DropResult {
    /// A block was appended. Carries the trust score recomputed after it,
    /// or `None` if that refresh failed; the block is persisted either way.
    Accepted {
        block: ChainBlock,
        trust_score: Option<f64>,
    },
    /// No block was appended.
    Rejected(RejectReason),
}

impl DropResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn block(&self) -> Option<&ChainBlock> {
        match self {
            Self::Accepted { block, .. } => Some(block),
            Self::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<RejectReason> {
        match self {
            Self::Accepted { .. } => None,
            Self::Rejected(reason) => Some(*reason),
        }
    }
}

/// Summary of the ledger for display and scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerStats {
    pub count: u64,
    pub trust_score: f64,
    pub first_at: Option<DateTime<Utc>>,
    pub last_at: Option<DateTime<Utc>>,
    pub chain_valid: bool,
    pub issues: Vec<String>,
    pub unique_locations: u64,
}

struct Collector {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct Inner<S> {
    store: S,
    location: Arc<dyn LocationProvider>,
    motion: Option<Arc<dyn MotionProvider>>,
    keystore: Arc<dyn KeyStore>,
    config: EngineConfig,
    keypair: RwLock<Option<Keypair>>,
    state: watch::Sender<EngineState>,
    /// Reason for entering `Error`, once set.
    fault: RwLock<Option<String>>,
    /// Serializes drops: the ledger has exactly one writer.
    drop_lock: Mutex<()>,
    collector: Mutex<Option<Collector>>,
    collecting: AtomicBool,
}

/// Builder for a [`CollectionEngine`].
pub struct EngineBuilder<S> {
    store: S,
    location: Arc<dyn LocationProvider>,
    keystore: Arc<dyn KeyStore>,
    motion: Option<Arc<dyn MotionProvider>>,
    config: EngineConfig,
}

impl<S: LedgerStore + 'static> EngineBuilder<S> {
    pub fn motion(mut self, provider: Arc<dyn MotionProvider>) -> Self {
        self.motion = Some(provider);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> CollectionEngine<S> {
        let (state, _) = watch::channel(EngineState::Idle);
        CollectionEngine {
            inner: Arc::new(Inner {
                store: self.store,
                location: self.location,
                motion: self.motion,
                keystore: self.keystore,
                config: self.config,
                keypair: RwLock::new(None),
                state,
                fault: RwLock::new(None),
                drop_lock: Mutex::new(()),
                collector: Mutex::new(None),
                collecting: AtomicBool::new(false),
            }),
        }
    }
}

/// The collection engine.
///
/// Cheap to clone; clones share the same state, store and identity.
/// Call [`CollectionEngine::stop_collection`] before dropping the last
/// handle if periodic collection was started.
pub struct CollectionEngine<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for CollectionEngine<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: LedgerStore + 'static> CollectionEngine<S> {
    /// Start building an engine over `store`.
    pub fn builder(
        store: S,
        location: Arc<dyn LocationProvider>,
        keystore: Arc<dyn KeyStore>,
    ) -> EngineBuilder<S> {
        EngineBuilder {
            store,
            location,
            keystore,
            motion: None,
            config: EngineConfig::default(),
        }
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.inner.state.subscribe()
    }

    /// The identity public key, once initialized.
    pub async fn public_key(&self) -> Option<Ed25519PublicKey> {
        self.inner.keypair.read().await.as_ref().map(Keypair::public_key)
    }

    // Lifecycle

    /// Load (or generate and store) the identity and check it against the
    /// ledger. Idempotent once it has succeeded.
    ///
    /// Key corruption, unavailable key storage and an identity mismatch are
    /// fatal: the engine enters `Error` and stays there.
    pub async fn initialize(&self) -> Result<()> {
        self.check_fault().await?;
        if self.inner.keypair.read().await.is_some() {
            return Ok(());
        }

        self.set_state(EngineState::Initializing);
        match self.load_identity().await {
            Ok(keypair) => {
                info!(identity = ?keypair.public_key(), "engine initialized");
                *self.inner.keypair.write().await = Some(keypair);
                self.set_state(EngineState::Idle);
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                self.fault(&e).await;
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "initialization failed");
                self.set_state(EngineState::Idle);
                Err(e)
            }
        }
    }

    async fn load_identity(&self) -> Result<Keypair> {
        self.inner.config.validate()?;

        let keypair = match self.inner.keystore.load().await? {
            Some(keypair) => keypair,
            None => {
                let keypair = Keypair::generate();
                self.inner.keystore.store(&keypair).await?;
                info!(identity = ?keypair.public_key(), "generated new identity");
                keypair
            }
        };

        if let Some(genesis) = self.inner.store.first().await? {
            let loaded = keypair.public_key();
            if genesis.identity() != &loaded {
                return Err(EngineError::IdentityMismatch {
                    ledger: genesis.identity().to_hex(),
                    loaded: loaded.to_hex(),
                });
            }
        }

        Ok(keypair)
    }

    /// Start periodic drops every `period`. The first tick fires at once.
    ///
    /// Does nothing if collection is already running.
    pub async fn start_collection(&self, period: Duration) -> Result<()> {
        self.ensure_ready().await?;
        if period.is_zero() {
            return Err(EngineError::Config(
                "collection interval must be positive".into(),
            ));
        }

        let mut collector = self.inner.collector.lock().await;
        if collector.is_some() {
            return Ok(());
        }

        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(self.clone().collect_loop(period, stop_rx));
        *collector = Some(Collector { stop, handle });
        self.inner.collecting.store(true, Ordering::SeqCst);

        // An in-flight drop picks up `Collecting` when it settles.
        self.transition(|state| (state == EngineState::Idle).then_some(EngineState::Collecting));
        info!(period_secs = period.as_secs_f64(), "collection started");
        Ok(())
    }

    /// Start periodic drops at the configured interval.
    pub async fn start_default_collection(&self) -> Result<()> {
        self.start_collection(self.inner.config.collection_interval())
            .await
    }

    /// Stop periodic drops and return to `Idle`.
    ///
    /// Waits for a periodic drop already in flight. A manual drop in flight
    /// is not waited for; the state stays `Dropping` until it settles.
    pub async fn stop_collection(&self) {
        self.inner.collecting.store(false, Ordering::SeqCst);
        let collector = self.inner.collector.lock().await.take();

        if let Some(Collector { stop, handle }) = collector {
            let _ = stop.send(());
            if let Err(e) = handle.await {
                warn!(error = %e, "collector task ended abnormally");
            }
            info!("collection stopped");
        }

        self.transition(|state| (state == EngineState::Collecting).then_some(EngineState::Idle));
    }

    async fn collect_loop(self, period: Duration, mut stop: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    match self.periodic_drop().await {
                        Ok(Some(result)) => {
                            debug!(accepted = result.is_accepted(), "periodic drop finished");
                        }
                        Ok(None) => debug!("drop already in flight, tick skipped"),
                        Err(e) if e.is_fatal() || matches!(e, EngineError::Faulted(_)) => {
                            error!(error = %e, "periodic collection halted");
                            break;
                        }
                        Err(e) => warn!(error = %e, "periodic drop failed"),
                    }
                }
            }
        }
    }

    // Drops

    /// Attempt one drop now. Waits for any drop already in flight.
    ///
    /// Works whether or not periodic collection is running.
    pub async fn drop_breadcrumb(&self, manual: bool) -> Result<DropResult> {
        self.ensure_ready().await?;
        let _guard = self.inner.drop_lock.lock().await;
        self.run_drop(manual).await
    }

    async fn periodic_drop(&self) -> Result<Option<DropResult>> {
        let Ok(_guard) = self.inner.drop_lock.try_lock() else {
            return Ok(None);
        };
        self.ensure_ready().await?;
        self.run_drop(false).await.map(Some)
    }

    /// Caller must hold `drop_lock`.
    async fn run_drop(&self, manual: bool) -> Result<DropResult> {
        self.transition(|state| (state != EngineState::Error).then_some(EngineState::Dropping));
        let outcome = self.attempt_drop(manual).await;

        match &outcome {
            Err(e) if e.is_fatal() => self.fault(e).await,
            _ => self.settle_state(),
        }
        outcome
    }

    async fn attempt_drop(&self, manual: bool) -> Result<DropResult> {
        let keypair = self
            .inner
            .keypair
            .read()
            .await
            .clone()
            .ok_or(EngineError::NotInitialized)?;

        let fix = match tokio::time::timeout(
            self.inner.config.fix_timeout(),
            self.inner.location.current_fix(),
        )
        .await
        {
            Ok(Ok(fix)) => fix,
            Ok(Err(e)) => {
                debug!(error = %e, "no location fix");
                return Ok(DropResult::Rejected(e.into()));
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.inner.config.fix_timeout_ms,
                    "location fix timed out"
                );
                return Ok(DropResult::Rejected(RejectReason::NoFix));
            }
        };

        let point = match GeoPoint::new(fix.lat, fix.lon) {
            Ok(point) => point,
            Err(e) => {
                debug!(error = %e, "fix rejected");
                return Ok(DropResult::Rejected(RejectReason::InvalidCoordinate));
            }
        };

        let candidate = DropCandidate::new(point, fix.timestamp, self.inner.config.resolution);
        let previous = self.inner.store.latest().await?;
        let accepted_at_cell = self.inner.store.accepted_count_at(&candidate.cell).await?;

        let assessment = evaluate(
            Some(&candidate),
            previous.as_ref(),
            accepted_at_cell,
            &self.inner.config.policy,
        );

        let basis = match assessment.decision {
            DropDecision::Accept(basis) => basis,
            DropDecision::Reject(reason) => {
                debug!(
                    %reason,
                    cell = %candidate.cell,
                    distance_m = ?assessment.distance_m,
                    elapsed_secs = ?assessment.elapsed_secs,
                    speed_kmh = ?assessment.speed_kmh,
                    "drop rejected"
                );
                return Ok(DropResult::Rejected(reason));
            }
        };

        let snapshot = match &self.inner.motion {
            Some(provider) => provider.snapshot().await,
            None => None,
        };

        let meta = MetaFlags {
            accuracy_m: fix.accuracy_m.and_then(MetaFlags::accuracy_from_meters),
            basis,
            manual,
            motion: None,
        };

        let mut builder = BlockBuilder::next(previous.as_ref(), candidate.cell.clone())
            .timestamp(candidate.timestamp)
            .meta(meta);
        if let Some(snapshot) = snapshot {
            builder = builder.motion(snapshot);
        }

        // Signing is CPU work; keep it off the async workers.
        let block = tokio::task::spawn_blocking(move || builder.sign(&keypair))
            .await
            .map_err(|e| EngineError::KeyUnavailable(format!("signing failed: {}", e)))?;

        self.inner.store.append(&block).await?;
        info!(
            index = block.index(),
            cell = %block.cell(),
            %basis,
            manual,
            "breadcrumb accepted"
        );

        let trust_score = match self.refresh_trust().await {
            Ok(score) => Some(score),
            Err(e) => {
                warn!(index = block.index(), error = %e, "trust refresh failed after append");
                None
            }
        };
        Ok(DropResult::Accepted { block, trust_score })
    }

    async fn refresh_trust(&self) -> Result<f64> {
        let stats = self.get_stats().await?;
        let record = TrustRecord {
            score: stats.trust_score,
            breadcrumb_count: stats.count,
            unique_cells: stats.unique_locations,
            computed_at: Utc::now(),
        };
        self.inner.store.save_trust_record(&record).await?;
        Ok(stats.trust_score)
    }

    // Queries

    /// Compute ledger statistics and the trust score from scratch.
    ///
    /// A ledger with unreadable rows still produces stats; the rows show up
    /// as issues and the chain counts as invalid.
    pub async fn get_stats(&self) -> Result<LedgerStats> {
        let summary = self.inner.store.summary().await?;
        let verification = summary.verification;

        if !verification.valid {
            warn!(issues = verification.issues.len(), "ledger failed verification");
        }

        let inputs = TrustInputs {
            breadcrumb_count: summary.count,
            unique_cell_count: summary.unique_cells,
            days_since_first: TrustInputs::days_between(summary.first_at, Utc::now()),
            chain_valid: verification.valid,
        };

        Ok(LedgerStats {
            count: summary.count,
            trust_score: trust_score(&inputs),
            first_at: summary.first_at,
            last_at: summary.last_at,
            chain_valid: verification.valid,
            issues: verification.messages(),
            unique_locations: summary.unique_cells,
        })
    }

    pub async fn get_latest_block(&self) -> Result<Option<ChainBlock>> {
        Ok(self.inner.store.latest().await?)
    }

    pub async fn verify_chain(&self) -> Result<ChainVerification> {
        Ok(self.inner.store.verify().await?)
    }

    /// The last persisted trust record.
    pub async fn trust_record(&self) -> Result<Option<TrustRecord>> {
        Ok(self.inner.store.trust_record().await?)
    }

    /// Irreversibly wipe the ledger. The identity is kept.
    pub async fn reset_ledger(&self) -> Result<()> {
        let _guard = self.inner.drop_lock.lock().await;
        self.inner.store.delete_all().await?;
        warn!("ledger reset");
        Ok(())
    }

    // State helpers

    fn set_state(&self, next: EngineState) {
        let previous = self.inner.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "engine state");
        }
    }

    /// Apply `next` to the current state under the channel lock, so racing
    /// transitions never overwrite each other's result.
    fn transition(&self, next: impl FnOnce(EngineState) -> Option<EngineState>) {
        self.inner.state.send_if_modified(|state| match next(*state) {
            Some(to) if to != *state => {
                debug!(from = %state, to = %to, "engine state");
                *state = to;
                true
            }
            _ => false,
        });
    }

    /// Leave `Dropping` for whatever the collection flag says. `Error` sticks.
    fn settle_state(&self) {
        let collecting = &self.inner.collecting;
        self.transition(|state| match state {
            EngineState::Error => None,
            _ if collecting.load(Ordering::SeqCst) => Some(EngineState::Collecting),
            _ => Some(EngineState::Idle),
        });
    }

    async fn fault(&self, e: &EngineError) {
        error!(error = %e, "engine entered error state");
        *self.inner.fault.write().await = Some(e.to_string());
        self.inner.collecting.store(false, Ordering::SeqCst);
        self.set_state(EngineState::Error);
    }

    async fn check_fault(&self) -> Result<()> {
        match self.inner.fault.read().await.as_ref() {
            Some(reason) => Err(EngineError::Faulted(reason.clone())),
            None => Ok(()),
        }
    }

    async fn ensure_ready(&self) -> Result<()> {
        self.check_fault().await?;
        if self.inner.keypair.read().await.is_none() {
            return Err(EngineError::NotInitialized);
        }
        Ok(())
    }
}
