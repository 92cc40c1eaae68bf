//! Time and suspension.
//!
//! Every wait in the lister goes through a `Timer`: a `Clock` for the
//! current time and the sleep itself, raced against a shutdown signal.

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone, Timelike};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{ListerError, ListerResult};

const HOUR: Duration = Duration::from_secs(3600);

/// Time until the next top-of-hour boundary. On the hour itself this is a
/// full hour.
pub fn until_next_hour<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let into_hour = Duration::from_secs(u64::from(now.minute() * 60 + now.second()))
        + Duration::from_nanos(u64::from(now.nanosecond().min(999_999_999)));
    HOUR.saturating_sub(into_hour)
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time in the local zone.
    fn now(&self) -> DateTime<Local>;

    async fn sleep(&self, duration: Duration);
}

/// Real time, backed by tokio's timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Simulated time. Sleeping advances the clock instantly and records the
/// requested duration.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Local>>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every duration slept so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }

    pub fn advance(&self, duration: Duration) {
        if let Ok(mut now) = self.now.lock() {
            let step = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
            *now += step;
        }
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        self.now.lock().map(|n| *n).unwrap_or_else(|_| Local::now())
    }

    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Receiving side of the cooperative shutdown flag.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sending side; dropping it never triggers shutdown.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl Shutdown {
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Shutdown { rx })
    }

    /// A signal that never fires.
    pub fn never() -> Shutdown {
        let (_, shutdown) = Self::channel();
        shutdown
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested. Pends forever if the trigger
    /// was dropped without firing.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

/// A clock paired with the shutdown signal.
#[derive(Clone)]
pub struct Timer {
    clock: Arc<dyn Clock>,
    shutdown: Shutdown,
}

impl Timer {
    pub fn new(clock: Arc<dyn Clock>, shutdown: Shutdown) -> Self {
        Self { clock, shutdown }
    }

    pub fn now(&self) -> DateTime<Local> {
        self.clock.now()
    }

    /// Suspend for `duration`, or fail with `Cancelled` on shutdown.
    pub async fn sleep(&self, duration: Duration) -> ListerResult<()> {
        let mut shutdown = self.shutdown.clone();
        if shutdown.is_triggered() {
            return Err(ListerError::Cancelled);
        }
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.clock.sleep(duration) => Ok(()),
            _ = shutdown.triggered() => Err(ListerError::Cancelled),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_triggered()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
