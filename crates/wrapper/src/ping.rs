//! Ping-queue liveness tracker: an ordered queue of outstanding pings used to
//! detect slow, lost, and reordered responses. A single-slot simplification
//! would lose the ability to detect reordering/loss when ping intervals are
//! shorter than the alert threshold, so pings really do queue up in flight
//! (spec.md §9 Design Notes).

use std::collections::VecDeque;

use wrapper_core::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// The response's tick matched the queue head exactly.
    Expected,
    /// The response's tick was later than the head's: the head was never
    /// answered and is dropped as lost. The queue is re-checked against the
    /// new head by the caller (see `match_response`'s loop).
    Lost,
    /// The response's tick was earlier than the head (a stale duplicate), or
    /// the queue was empty.
    Unexpected,
}

#[derive(Debug, Default)]
pub struct PingQueue {
    pending: VecDeque<Tick>,
    capacity: usize,
    overflow: bool,
    overflow_emptied: bool,
}

impl PingQueue {
    pub fn new(capacity: usize) -> Self {
        PingQueue {
            pending: VecDeque::new(),
            capacity,
            overflow: false,
            overflow_emptied: false,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn overflow(&self) -> bool {
        self.overflow
    }

    /// The oldest outstanding ping's send tick, if any.
    pub fn pending_head(&self) -> Option<Tick> {
        self.pending.front().copied()
    }

    /// Transient flag: the queue just drained after being at capacity. The
    /// caller should suppress "lost"/"unexpected" warnings until the next
    /// `Expected` match clears it.
    pub fn overflow_emptied(&self) -> bool {
        self.overflow_emptied
    }

    /// Record that a `PING` was sent at `tick`. If the queue is already at
    /// capacity, sets `overflow` and the ping is *not* enqueued.
    pub fn record_send(&mut self, tick: Tick) {
        if self.capacity != 0 && self.pending.len() >= self.capacity {
            self.overflow = true;
            return;
        }
        self.pending.push_back(tick);
    }

    /// Match an incoming ping response carrying tick `r` against the queue.
    /// Returns the result for the *final* comparison after dropping any
    /// intervening lost pings (see spec.md §4.3's algorithm).
    ///
    /// `r == None` models a malformed response with no tick payload; per
    /// spec.md §9's Open Question resolution, such a response is treated as
    /// `Expected` against the queue head to avoid livelock.
    pub fn match_response(&mut self, r: Option<Tick>) -> MatchResult {
        // If overflow-emptied suppression was already in effect before this
        // call, this arriving Expected match is what lifts it.
        let suppression_was_active = self.overflow_emptied;

        let r = match r {
            Some(r) => r,
            None => {
                self.pending.pop_front();
                self.after_pop();
                if suppression_was_active {
                    self.overflow_emptied = false;
                }
                return MatchResult::Expected;
            }
        };

        loop {
            let head = match self.pending.front().copied() {
                Some(h) => h,
                None => return MatchResult::Unexpected,
            };

            // Signed comparison so this stays correct across a tick wrap.
            let diff = wrapper_core::tick::age_ticks(head, r);
            if diff == 0 {
                self.pending.pop_front();
                self.after_pop();
                if suppression_was_active {
                    self.overflow_emptied = false;
                }
                return MatchResult::Expected;
            } else if diff > 0 {
                // r is later than head: head was never answered.
                self.pending.pop_front();
                self.after_pop();
                // loop again against the new head
                continue;
            } else {
                // r is earlier than head: stale/duplicate response.
                return MatchResult::Unexpected;
            }
        }
    }

    /// Called after every pop to notice the queue has just gone from "at
    /// capacity" to "empty", entering overflow-recovery.
    fn after_pop(&mut self) {
        if self.pending.is_empty() && self.overflow {
            self.overflow = false;
            self.overflow_emptied = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_is_expected_and_pops_head() {
        let mut q = PingQueue::new(4);
        q.record_send(10);
        assert_eq!(q.match_response(Some(10)), MatchResult::Expected);
        assert!(q.is_empty());
    }

    #[test]
    fn later_tick_drops_head_as_lost_then_matches_new_head() {
        let mut q = PingQueue::new(4);
        q.record_send(10);
        q.record_send(20);
        // Response for 20 arrives; 10 was never answered and is dropped.
        assert_eq!(q.match_response(Some(20)), MatchResult::Expected);
        assert!(q.is_empty());
    }

    #[test]
    fn earlier_tick_is_unexpected_and_leaves_head_in_place() {
        let mut q = PingQueue::new(4);
        q.record_send(20);
        assert_eq!(q.match_response(Some(10)), MatchResult::Unexpected);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn response_against_empty_queue_is_unexpected() {
        let mut q = PingQueue::new(4);
        assert_eq!(q.match_response(Some(1)), MatchResult::Unexpected);
    }

    #[test]
    fn overflow_sets_flag_and_stops_enqueueing() {
        let mut q = PingQueue::new(2);
        q.record_send(1);
        q.record_send(2);
        q.record_send(3); // capacity 2: dropped, overflow set
        assert!(q.overflow());
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn draining_from_overflow_sets_overflow_emptied() {
        let mut q = PingQueue::new(1);
        q.record_send(1);
        q.record_send(2); // dropped: overflow
        assert!(q.overflow());

        // The response that drains the last pending ping while overflow was
        // set clears `overflow` and raises `overflow_emptied`.
        assert_eq!(q.match_response(Some(1)), MatchResult::Expected);
        assert!(q.is_empty());
        assert!(!q.overflow());
        assert!(q.overflow_emptied());

        // The next Expected match lifts the suppression.
        q.record_send(3);
        assert_eq!(q.match_response(Some(3)), MatchResult::Expected);
        assert!(!q.overflow_emptied());
    }

    #[test]
    fn malformed_response_with_no_tick_matches_head_to_avoid_livelock() {
        let mut q = PingQueue::new(4);
        q.record_send(5);
        assert_eq!(q.match_response(None), MatchResult::Expected);
        assert!(q.is_empty());
    }

    #[test]
    fn match_respects_tick_wraparound() {
        let mut q = PingQueue::new(4);
        let near_wrap = u32::MAX - 2;
        q.record_send(near_wrap);
        q.record_send(2); // sent after the clock wrapped past u32::MAX
        // near_wrap is "earlier" than 2 once wraparound is accounted for, so
        // it's dropped as lost and the response matches the wrapped entry.
        assert_eq!(q.match_response(Some(2)), MatchResult::Expected);
        assert!(q.is_empty());
    }
}
