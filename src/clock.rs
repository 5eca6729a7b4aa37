use chrono::DateTime;
use chrono::Utc;

/// Source of "now". Production code injects `SystemClock`; tests inject a
/// clock they can move forward, so that token expiry can be exercised without
/// sleeping for a day.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> { Utc::now() }
}

#[cfg(test)]
pub use mock::MockClock;
