//! Scripted sensor providers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use breadcrumb_core::MotionSnapshot;
use breadcrumb_engine::{FixError, LocationFix, LocationProvider, MotionProvider};

/// Location provider that replays a queue of results.
///
/// Once the queue is empty every call fails with `Unavailable`.
#[derive(Default)]
pub struct ScriptedLocation {
    script: Mutex<VecDeque<Result<LocationFix, FixError>>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl ScriptedLocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fixes(fixes: impl IntoIterator<Item = LocationFix>) -> Self {
        let provider = Self::new();
        for fix in fixes {
            provider.push_fix(fix);
        }
        provider
    }

    pub fn push_fix(&self, fix: LocationFix) {
        self.script.lock().unwrap().push_back(Ok(fix));
    }

    pub fn push_error(&self, error: FixError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    /// Make every subsequent call take `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Number of fixes requested so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl LocationProvider for ScriptedLocation {
    async fn current_fix(&self) -> Result<LocationFix, FixError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(FixError::Unavailable));

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        next
    }
}

/// Motion provider that always returns the same snapshot.
pub struct FixedMotion(pub Option<MotionSnapshot>);

impl FixedMotion {
    /// A device lying still: gravity on z, no rotation.
    pub fn at_rest() -> Self {
        Self(Some(MotionSnapshot::new([0.0, 0.0, 9.81], [0.0, 0.0, 0.0])))
    }

    /// Strong, jerky acceleration typical of walking.
    pub fn walking() -> Self {
        Self(Some(MotionSnapshot::new([2.5, 1.0, 11.8], [0.6, 0.3, 0.2])))
    }
}

#[async_trait]
impl MotionProvider for FixedMotion {
    async fn snapshot(&self) -> Option<MotionSnapshot> {
        self.0
    }
}
