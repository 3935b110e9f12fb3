//! Process-wide points-per-second limiter.
//!
//! Every worker adds the size of the batch it is about to send. Once the
//! running total reaches the capacity the calling worker parks a release
//! handle in a single-slot queue and waits for it to be drained. While it
//! waits it keeps holding the counter lock, so all other workers stall as
//! well. A background ticker drains at most one parked caller per tick.
//!
//! This is a coarse throttle, not a token bucket: one batch larger than the
//! capacity still goes out in one piece and then blocks until the next tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// How often the background ticker drains the bucket.
pub const DRAIN_INTERVAL: Duration = Duration::from_secs(1);

/// Cloneable handle to the shared limiter. All clones share one counter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Option<Arc<Inner>>,
}

#[derive(Debug)]
struct Inner {
    capacity: u64,
    accumulated: Mutex<u64>,
    full_tx: mpsc::Sender<oneshot::Sender<()>>,
    full_rx: parking_lot::Mutex<mpsc::Receiver<oneshot::Sender<()>>>,
    full_events: AtomicU64,
}

impl Inner {
    fn new(capacity: u64) -> Self {
        let (full_tx, full_rx) = mpsc::channel(1);
        Self {
            capacity,
            accumulated: Mutex::new(0),
            full_tx,
            full_rx: parking_lot::Mutex::new(full_rx),
            full_events: AtomicU64::new(0),
        }
    }

    fn drain(&self) -> bool {
        let parked = self.full_rx.lock().try_recv();
        match parked {
            Ok(release) => {
                // The waiter may have been cancelled; nothing to release then.
                let _ = release.send(());
                true
            }
            Err(_) => false,
        }
    }
}

impl RateLimiter {
    /// Creates a limiter allowing roughly `points_per_second` points per second.
    ///
    /// A value of 0 returns a disabled limiter. Otherwise this spawns the
    /// drain ticker and must be called from within a tokio runtime.
    pub fn new(points_per_second: u64) -> Self {
        Self::with_drain_interval(points_per_second, DRAIN_INTERVAL)
    }

    pub fn with_drain_interval(points_per_second: u64, drain_interval: Duration) -> Self {
        if points_per_second == 0 {
            return Self::disabled();
        }

        let inner = Arc::new(Inner::new(points_per_second));
        spawn_drainer(Arc::downgrade(&inner), drain_interval);
        debug!(capacity = points_per_second, "Rate limiter enabled");

        Self { inner: Some(inner) }
    }

    /// A limiter whose [`limit`](Self::limit) never blocks.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Points per drain interval, 0 when disabled.
    pub fn capacity(&self) -> u64 {
        self.inner.as_ref().map_or(0, |inner| inner.capacity)
    }

    /// Points counted since the last time the bucket filled up.
    ///
    /// Waits for the counter lock, so this blocks while a caller is parked.
    pub async fn accumulated(&self) -> u64 {
        match &self.inner {
            Some(inner) => *inner.accumulated.lock().await,
            None => 0,
        }
    }

    /// How many times the bucket filled up and blocked a caller.
    pub fn full_events(&self) -> u64 {
        self.inner
            .as_ref()
            .map_or(0, |inner| inner.full_events.load(Ordering::Relaxed))
    }

    /// Accounts for `n` points, blocking while the bucket is full.
    pub async fn limit(&self, n: u64) {
        let Some(inner) = &self.inner else {
            return;
        };

        let mut accumulated = inner.accumulated.lock().await;
        *accumulated = accumulated.saturating_add(n);
        if *accumulated < inner.capacity {
            return;
        }

        inner.full_events.fetch_add(1, Ordering::Relaxed);
        trace!(
            accumulated = *accumulated,
            capacity = inner.capacity,
            "Rate limiter full, waiting for drain"
        );

        let (release_tx, release_rx) = oneshot::channel();
        if inner.full_tx.send(release_tx).await.is_ok() {
            let _ = release_rx.await;
        }
        *accumulated = 0;
    }

    /// Releases one parked caller, if any. Returns whether one was released.
    ///
    /// The background ticker calls this once per interval.
    pub fn drain(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.drain())
    }
}

fn spawn_drainer(inner: Weak<Inner>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if inner.drain() {
                trace!("Rate limiter drained");
            }
        }
        trace!("Rate limiter dropped, drain ticker stopped");
    });
}
