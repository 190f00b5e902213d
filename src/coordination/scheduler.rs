//! Deadline and retry scheduling
//!
//! A min-heap of `(deadline, swap, kind)` entries. The coordinator pops due
//! entries on every tick and turns them into state machine ticks or submission
//! retries.

use super::machine::ActionKey;
use crate::swap::{SwapId, SwapOrder};

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

/// What a scheduled entry is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeadlineKind {
    DestTimeout,
    SourceTimeout,
    /// Resubmit or re-check an in-flight action
    Retry(ActionKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    /// UNIX seconds
    pub at: u64,
    pub swap_id: SwapId,
    pub kind: DeadlineKind,
}

/// Priority queue of swap deadlines
#[derive(Debug, Default)]
pub struct Scheduler {
    queue: BinaryHeap<Reverse<Deadline>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, swap_id: SwapId, at: u64, kind: DeadlineKind) {
        self.queue.push(Reverse(Deadline { at, swap_id, kind }));
    }

    /// Arm both timelock checks for an order
    pub fn schedule_timeouts(&mut self, order: &SwapOrder) {
        self.schedule(order.swap_id, order.dest_timeout, DeadlineKind::DestTimeout);
        self.schedule(order.swap_id, order.source_timeout, DeadlineKind::SourceTimeout);
    }

    /// Remove and return every entry due at or before `now`, earliest first
    pub fn pop_due(&mut self, now: u64) -> Vec<Deadline> {
        let mut due = Vec::new();
        while let Some(Reverse(next)) = self.queue.peek() {
            if next.at > now {
                break;
            }
            if let Some(Reverse(deadline)) = self.queue.pop() {
                due.push(deadline);
            }
        }
        due
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.queue.peek().map(|Reverse(d)| d.at)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Capped exponential back-off
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before attempt number `attempt + 1`; `attempt` starts at 1
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << shift)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Delay rounded up to whole seconds, matching the scheduler's clock
    pub fn delay_secs(&self, attempt: u32) -> u64 {
        let delay = self.delay(attempt);
        delay.as_secs() + u64::from(delay.subsec_nanos() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::machine::ActionKind;
    use crate::swap::fixtures::{self, T};
    use crate::swap::ChainSide;

    #[test]
    fn test_pop_due_in_deadline_order() {
        let order = fixtures::order();
        let mut scheduler = Scheduler::new();
        scheduler.schedule_timeouts(&order);
        let key = ActionKey {
            side: ChainSide::Source,
            kind: ActionKind::Reveal,
        };
        scheduler.schedule(order.swap_id, T + 60, DeadlineKind::Retry(key));

        assert!(scheduler.pop_due(T).is_empty());
        assert_eq!(scheduler.next_deadline(), Some(T + 60));

        let due = scheduler.pop_due(T + 1800);
        let kinds: Vec<_> = due.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![DeadlineKind::Retry(key), DeadlineKind::DestTimeout]
        );
        assert_eq!(scheduler.len(), 1);

        let due = scheduler.pop_due(T + 10_000);
        assert_eq!(due[0].kind, DeadlineKind::SourceTimeout);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(5));
        assert_eq!(backoff.delay(1), Duration::from_millis(500));
        assert_eq!(backoff.delay(2), Duration::from_secs(1));
        assert_eq!(backoff.delay(4), Duration::from_secs(4));
        assert_eq!(backoff.delay(5), Duration::from_secs(5));
        assert_eq!(backoff.delay(64), Duration::from_secs(5));
        assert_eq!(backoff.delay_secs(1), 1);
    }
}
