//! Clock abstraction for testable timing behavior.
//!
//! Freshness windows, lease deadlines, retry visibility, and circuit
//! cooldowns all read time through [`Clock`] so tests can drive them
//! deterministically with [`TestClock`].

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};

/// Time source injected into every time-dependent component.
///
/// Production code uses [`RealClock`]; tests use [`TestClock`] to
/// advance time without sleeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleeps for the given duration.
    ///
    /// Maps to `tokio::time::sleep` in production; test clocks return
    /// immediately after advancing virtual time.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Production clock backed by the system time and tokio's timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Deterministic clock for tests.
///
/// Starts at a fixed base time and only moves when [`advance`] is
/// called. `sleep` advances virtual time and resolves immediately, so
/// worker poll loops never stall a test.
///
/// [`advance`]: TestClock::advance
#[derive(Debug, Clone)]
pub struct TestClock {
    base: DateTime<Utc>,
    offset_ms: Arc<AtomicI64>,
}

impl TestClock {
    /// Creates a test clock starting at the current system time.
    pub fn new() -> Self {
        Self { base: Utc::now(), offset_ms: Arc::new(AtomicI64::new(0)) }
    }

    /// Creates a test clock starting at a specific time.
    pub fn starting_at(base: DateTime<Utc>) -> Self {
        Self { base, offset_ms: Arc::new(AtomicI64::new(0)) }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.offset_ms.fetch_add(ms, Ordering::AcqRel);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        let offset = self.offset_ms.load(Ordering::Acquire);
        self.base + chrono::Duration::milliseconds(offset)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(async {})
    }
}
