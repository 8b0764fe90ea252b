//! Injectable time source so the scheduler, rate limiter, and monitor can
//! be driven by virtual time in tests instead of real sleeps.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::sync::watch;

/// A cancellable sleep: resolves early if `cancel` fires, otherwise after
/// `dur` elapses.
pub async fn sleep_cancellable(dur: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(dur) => true,
        _ = cancel.changed() => false,
    }
}

/// Monotonic "now" plus uniform randomness, injectable for tests.
///
/// `Instant`-based durations drive scheduling; `unix_seconds` is used only
/// by the monitor's gauge, which reports wall-clock expiry timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> std::time::Instant;
    fn unix_seconds(&self) -> u64;
    fn uniform(&self, low: Duration, high: Duration) -> Duration;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> std::time::Instant {
        std::time::Instant::now()
    }

    fn unix_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn uniform(&self, low: Duration, high: Duration) -> Duration {
        if low >= high {
            return low;
        }
        rand::rng().random_range(low..=high)
    }
}

/// A deterministic clock for tests: `now`/`unix_seconds` only advance when
/// `advance` is called, and `uniform` always returns the midpoint of the
/// range (matching the deterministic RNG used by spec scenario S1).
pub struct VirtualClock {
    inner: Mutex<VirtualState>,
}

struct VirtualState {
    instant: std::time::Instant,
    unix: u64,
}

impl VirtualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VirtualState {
                instant: std::time::Instant::now(),
                unix: 0,
            }),
        })
    }

    pub fn advance(&self, dur: Duration) {
        let mut state = self.inner.lock().unwrap();
        state.instant += dur;
        state.unix += dur.as_secs();
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> std::time::Instant {
        self.inner.lock().unwrap().instant
    }

    fn unix_seconds(&self) -> u64 {
        self.inner.lock().unwrap().unix
    }

    fn uniform(&self, low: Duration, high: Duration) -> Duration {
        if low >= high {
            return low;
        }
        low + (high - low) / 2
    }
}

/// A `BoxFuture` shorthand used by the link adapter trait, which needs to
/// return futures across a trait-object boundary (closed-world but still
/// dynamically dispatched, as the plugin chain is).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
