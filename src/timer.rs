//! Monotonic clock and the timer min-heap.
//!
//! Deadlines are monotonic nanoseconds since an arbitrary epoch
//! (`Instant`-based); seconds-as-f64 are converted once, at the API
//! boundary.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use crate::coroutine::CoroId;

/// Converts a seconds-as-f64 timeout into an absolute deadline relative to
/// `now`. `timeout <= 0.0` means "already expired" (poll without
/// blocking); a negative or non-finite timeout is clamped to zero.
pub(crate) fn deadline_from(now: Instant, timeout_s: f64) -> Instant {
    if !timeout_s.is_finite() || timeout_s <= 0.0 {
        now
    } else {
        now + Duration::from_secs_f64(timeout_s)
    }
}

/// One entry in the timer heap: a deadline, the waiting coroutine, and the
/// generation the waiter had when this entry was inserted. If the
/// coroutine's current generation (tracked in its `CoroSlot`) has since
/// moved on, the entry is stale and is discarded rather than acted on.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct TimerEntry {
    pub deadline: Instant,
    pub coro: CoroId,
    pub generation: u64,
}

// BinaryHeap is a max-heap; we want the earliest deadline first, so the
// ordering is reversed.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.coro.cmp(&self.coro))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of pending timer entries, ordered by deadline.
#[derive(Debug, Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
}

impl TimerHeap {
    pub fn new() -> TimerHeap {
        TimerHeap { heap: BinaryHeap::new() }
    }

    pub fn insert(&mut self, deadline: Instant, coro: CoroId, generation: u64) {
        self.heap.push(TimerEntry { deadline, coro, generation });
    }

    pub fn peek_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Pop every entry whose deadline is `<= now`, skipping stale entries
    /// (those whose `generation` no longer matches `current_generation`).
    pub fn drain_expired(
        &mut self,
        now: Instant,
        mut current_generation: impl FnMut(CoroId) -> Option<u64>,
    ) -> Vec<CoroId> {
        let mut fired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = self.heap.pop().unwrap();
            match current_generation(entry.coro) {
                Some(gen) if gen == entry.generation => fired.push(entry.coro),
                _ => { /* stale: coroutine already woke some other way */ }
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_deadline_order() {
        let base = Instant::now();
        let mut heap = TimerHeap::new();
        heap.insert(base + Duration::from_millis(30), CoroId(3), 0);
        heap.insert(base + Duration::from_millis(10), CoroId(1), 0);
        heap.insert(base + Duration::from_millis(20), CoroId(2), 0);

        let fired = heap.drain_expired(base + Duration::from_millis(25), |_| Some(0));
        assert_eq!(fired, vec![CoroId(1), CoroId(2)]);
        assert_eq!(heap.peek_deadline(), Some(base + Duration::from_millis(30)));
    }

    #[test]
    fn stale_generation_is_discarded() {
        let base = Instant::now();
        let mut heap = TimerHeap::new();
        heap.insert(base, CoroId(1), 0);
        // Coroutine's generation has since moved to 1 (e.g. its fd became
        // ready first and cancelled this timer entry).
        let fired = heap.drain_expired(base, |_| Some(1));
        assert!(fired.is_empty());
    }
}
