//! Wall-clock source for ticket names, comment names and sync markers.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Second resolution.
#[derive(Debug, Default)]
pub struct ManualClock {
    epoch: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub const fn at(epoch: i64) -> Self {
        Self {
            epoch: AtomicI64::new(epoch),
        }
    }

    pub fn advance(&self, seconds: i64) {
        self.epoch.fetch_add(seconds, Ordering::SeqCst);
    }

    pub fn set(&self, epoch: i64) {
        self.epoch.store(epoch, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        Utc.timestamp_opt(epoch, 0).single().unwrap_or_default()
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}
