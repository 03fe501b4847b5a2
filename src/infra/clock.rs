//! Injected time source
//!
//! All wall-clock reads in the counting path go through a `Clock` so
//! retention-window behavior is deterministic under test. Production code
//! uses the system clock; tests use a manually advanced one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current epoch milliseconds from the system clock
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Millisecond clock, system-backed or manually driven
#[derive(Debug, Clone, Default)]
pub struct Clock {
    manual: Option<Arc<AtomicU64>>,
}

impl Clock {
    /// System wall clock.
    pub fn system() -> Self {
        Self { manual: None }
    }

    /// Manually driven clock starting at `start_ms`. Reads return the set
    /// value until `advance`/`set` move it.
    pub fn manual(start_ms: u64) -> Self {
        Self { manual: Some(Arc::new(AtomicU64::new(start_ms))) }
    }

    pub fn now_ms(&self) -> u64 {
        match &self.manual {
            Some(ms) => ms.load(Ordering::Relaxed),
            None => epoch_ms(),
        }
    }

    /// Advance a manual clock; no-op on the system clock.
    pub fn advance(&self, delta_ms: u64) {
        if let Some(ms) = &self.manual {
            ms.fetch_add(delta_ms, Ordering::Relaxed);
        }
    }

    /// Set a manual clock; no-op on the system clock.
    pub fn set(&self, now_ms: u64) {
        if let Some(ms) = &self.manual {
            ms.store(now_ms, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = Clock::manual(1000);
        let handle = clock.clone();
        assert_eq!(clock.now_ms(), 1000);

        handle.advance(500);
        assert_eq!(clock.now_ms(), 1500);

        handle.set(10_000);
        assert_eq!(clock.now_ms(), 10_000);
    }

    #[test]
    fn test_system_clock_is_epoch_based() {
        let clock = Clock::system();
        // Well past 2020-01-01 in epoch milliseconds.
        assert!(clock.now_ms() > 1_577_836_800_000);
    }
}
