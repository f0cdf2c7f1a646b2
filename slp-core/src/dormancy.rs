//! Advisory dormancy policies.
//!
//! Dormancy answers "has the device been idle since the last issuance". It
//! is a local hint for callers and is not part of any token commitment.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

pub trait DormancyPolicy: Send + Sync {
    fn is_dormant(&self) -> bool;

    /// Called after every counter advance, including ones whose token could
    /// not be sealed.
    fn record_issuance(&self) {}
}

/// Always reports dormancy.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeDormant;

impl DormancyPolicy for AssumeDormant {
    fn is_dormant(&self) -> bool {
        true
    }
}

/// Dormant once `min_idle` has elapsed since the last issuance.
///
/// Uses the monotonic clock, so wall-clock changes cannot fake idleness.
#[derive(Debug)]
pub struct IdleWindow {
    min_idle: Duration,
    last_issuance: Mutex<Option<Instant>>,
}

impl IdleWindow {
    pub fn new(min_idle: Duration) -> Self {
        Self {
            min_idle,
            last_issuance: Mutex::new(None),
        }
    }
}

impl DormancyPolicy for IdleWindow {
    fn is_dormant(&self) -> bool {
        match *self.last_issuance.lock() {
            None => true,
            Some(at) => at.elapsed() >= self.min_idle,
        }
    }

    fn record_issuance(&self) {
        *self.last_issuance.lock() = Some(Instant::now());
    }
}
