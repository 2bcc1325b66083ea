//! Per-process deadline queue
//!
//! A min-heap of deadlines polled by the owning event loop. Cancelled timers
//! stay in the heap and are skipped when they reach the top.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

/// Handle returned by [`TimerQueue::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Deadline queue carrying a payload per timer.
#[derive(Debug)]
pub struct TimerQueue<K> {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    live: HashMap<u64, K>,
    next_id: u64,
}

impl<K> TimerQueue<K> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
            next_id: 0,
        }
    }

    /// Arms a timer firing at `deadline`.
    pub fn schedule(&mut self, deadline: Instant, key: K) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse((deadline, id)));
        self.live.insert(id, key);
        TimerId(id)
    }

    /// Disarms a timer, returning its payload if it had not fired yet.
    pub fn cancel(&mut self, id: TimerId) -> Option<K> {
        self.live.remove(&id.0)
    }

    /// Earliest live deadline.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.heap.peek() {
            if self.live.contains_key(id) {
                return Some(*deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Removes and returns every timer due at `now`, earliest first.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<K> {
        let mut expired = Vec::new();
        while let Some(Reverse((deadline, id))) = self.heap.peek() {
            if *deadline > now {
                break;
            }
            let id = *id;
            self.heap.pop();
            if let Some(key) = self.live.remove(&id) {
                expired.push(key);
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Current time on the tokio clock, so paused test clocks apply.
pub fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Sleeps until `deadline`, or forever when there is none.
pub async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}
