use std::time::{Duration, Instant};

/// Fixed-rate tick deadlines.
///
/// Ticks missed because the previous one ran late are skipped rather than
/// run back to back.
#[derive(Debug)]
pub(crate) struct Ticker {
    interval: Duration,
    next: Instant,
}

impl Ticker {
    pub(crate) fn new(interval: Duration, now: Instant) -> Self {
        debug_assert!(!interval.is_zero());

        Self {
            interval,
            next: now + interval,
        }
    }

    /// Time left before the next tick is due. Zero once due.
    pub(crate) fn remaining(&self, now: Instant) -> Duration {
        self.next.saturating_duration_since(now)
    }

    /// Consumes the due tick and moves the deadline forward. Returns the
    /// number of ticks skipped.
    pub(crate) fn advance(&mut self, now: Instant) -> u32 {
        let late = now.saturating_duration_since(self.next);
        let skipped = u32::try_from(late.as_nanos() / self.interval.as_nanos()).unwrap_or(u32::MAX);

        self.next = match self.interval.checked_mul(skipped.saturating_add(1)) {
            Some(step) => self.next + step,
            None => now + self.interval,
        };

        skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const INTERVAL: Duration = Duration::from_millis(50);

    #[test]
    fn test_first_tick_due_after_one_interval() {
        let start = Instant::now();
        let ticker = Ticker::new(INTERVAL, start);

        assert_eq!(ticker.remaining(start), INTERVAL);
        assert_eq!(ticker.remaining(start + Duration::from_millis(20)), Duration::from_millis(30));
        assert_eq!(ticker.remaining(start + INTERVAL), Duration::ZERO);
    }

    #[rstest]
    #[case::on_time(50, 0, 50)]
    #[case::slightly_late(70, 0, 30)]
    #[case::one_missed(100, 1, 50)]
    #[case::many_missed(290, 4, 10)]
    fn test_advance_skips_missed_ticks(
        #[case] elapsed_ms: u64,
        #[case] expected_skipped: u32,
        #[case] expected_remaining_ms: u64,
    ) {
        let start = Instant::now();
        let mut ticker = Ticker::new(INTERVAL, start);
        let now = start + Duration::from_millis(elapsed_ms);

        assert_eq!(ticker.advance(now), expected_skipped);
        assert_eq!(ticker.remaining(now), Duration::from_millis(expected_remaining_ms));
    }
}
