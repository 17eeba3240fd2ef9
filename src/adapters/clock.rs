//! Clock Adapters

use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use parking_lot::RwLock;

use crate::domain::ports::Clock;

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
///
/// The default starts on a whole second, so deadlines rendered as HTTP
/// dates round-trip exactly.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        let now = Utc::now();
        Self::at(now.with_nanosecond(0).unwrap_or(now))
    }
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        *self.now.write() += by;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::default();
        let start = clock.now();
        clock.advance(Duration::from_secs(3));
        assert_eq!(clock.now() - start, chrono::Duration::seconds(3));

        clock.set(start);
        assert_eq!(clock.now(), start);
        assert_eq!(start.nanosecond(), 0);
    }
}
