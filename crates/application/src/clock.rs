use std::sync::Mutex;

use chrono::{Duration, SubsecRound, Utc};
use domain::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// 严格递增的时钟，精度为微秒（与 PostgreSQL timestamptz 一致）。
///
/// 同一微秒内的多次调用会被推到上一次结果之后，分页游标因此不会出现并列。
#[derive(Debug)]
pub struct MonotonicClock {
    last: Mutex<Option<Timestamp>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        let candidate = Utc::now().trunc_subsecs(6);
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = match *last {
            Some(previous) if candidate <= previous => previous + Duration::microseconds(1),
            _ => candidate,
        };
        *last = Some(next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_never_repeats() {
        let clock = MonotonicClock::new();
        let mut previous = clock.now();
        for _ in 0..10_000 {
            let next = clock.now();
            assert!(next > previous);
            previous = next;
        }
    }
}
