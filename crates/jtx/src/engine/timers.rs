//! Virtual-time timer wheel.
//!
//! The engine owns time: the embedder advances it explicitly, due timers
//! fire in deadline order, and interval timers re-arm immediately so
//! cascading fires land inside a single `advance` call. Timers are tied to
//! their owning element and die with it.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::FxHashSet;

use crate::dom::NodeId;

use super::registry::DefId;
use super::HandlerId;

pub type TimerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// A `jtx-on="every ...:"` handler.
    RunHandler(HandlerId),
    /// An `every <duration>` source fetch.
    FetchSource(DefId),
    /// Short-timeout fallback for an `idle` fetch that never saw idleness.
    IdleFallback(DefId),
}

#[derive(Debug, Clone)]
struct TimerEntry {
    fire_at_ms: u64,
    id: TimerId,
    interval_ms: Option<u64>,
    owner: NodeId,
    action: TimerAction,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at_ms == other.fire_at_ms && self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: earliest deadline first, id as the tiebreak
        other
            .fire_at_ms
            .cmp(&self.fire_at_ms)
            .then(other.id.cmp(&self.id))
    }
}

#[derive(Default)]
pub struct Timers {
    now_ms: u64,
    next_id: TimerId,
    pending: BinaryHeap<TimerEntry>,
    cancelled: FxHashSet<TimerId>,
}

impl Timers {
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn schedule(
        &mut self,
        delay_ms: u64,
        interval_ms: Option<u64>,
        owner: NodeId,
        action: TimerAction,
    ) -> TimerId {
        self.next_id += 1;
        self.pending.push(TimerEntry {
            fire_at_ms: self.now_ms + delay_ms,
            id: self.next_id,
            interval_ms,
            owner,
            action,
        });
        self.next_id
    }

    pub fn cancel(&mut self, id: TimerId) {
        self.cancelled.insert(id);
    }

    /// Advance virtual time, returning the fired (owner, action) pairs in
    /// deadline order. Intervals are re-armed immediately so they can fire
    /// multiple times within one advance.
    pub fn advance(&mut self, ms: u64) -> Vec<(NodeId, TimerAction)> {
        let target = self.now_ms + ms;
        let mut fired = Vec::new();

        while let Some(entry) = self.pending.peek() {
            if entry.fire_at_ms > target {
                break;
            }
            let entry = self.pending.pop().expect("peeked entry");
            if self.cancelled.contains(&entry.id) {
                self.cancelled.remove(&entry.id);
                continue;
            }
            fired.push((entry.owner, entry.action));
            if let Some(interval) = entry.interval_ms {
                self.pending.push(TimerEntry {
                    fire_at_ms: entry.fire_at_ms + interval.max(1),
                    ..entry
                });
            }
        }

        self.now_ms = target;
        fired
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeId {
        NodeId {
            index: 1,
            generation: 0,
        }
    }

    #[test]
    fn fires_at_deadline() {
        let mut timers = Timers::default();
        timers.schedule(1_000, None, node(), TimerAction::FetchSource(DefId(0)));

        assert!(timers.advance(500).is_empty());
        let fired = timers.advance(500);
        assert_eq!(fired.len(), 1);
        assert_eq!(timers.now_ms(), 1_000);
        assert!(!timers.has_pending());
    }

    #[test]
    fn interval_fires_repeatedly_within_one_advance() {
        let mut timers = Timers::default();
        timers.schedule(100, Some(100), node(), TimerAction::FetchSource(DefId(0)));

        // 100, 200, 300 all fall inside the advance
        let fired = timers.advance(350);
        assert_eq!(fired.len(), 3);
        assert!(timers.has_pending());
    }

    #[test]
    fn cancelled_timers_do_not_fire() {
        let mut timers = Timers::default();
        let id = timers.schedule(100, Some(100), node(), TimerAction::FetchSource(DefId(0)));
        timers.cancel(id);
        assert!(timers.advance(1_000).is_empty());
    }

    #[test]
    fn deadline_order() {
        let mut timers = Timers::default();
        timers.schedule(300, None, node(), TimerAction::FetchSource(DefId(2)));
        timers.schedule(100, None, node(), TimerAction::FetchSource(DefId(1)));

        let fired = timers.advance(400);
        assert_eq!(fired[0].1, TimerAction::FetchSource(DefId(1)));
        assert_eq!(fired[1].1, TimerAction::FetchSource(DefId(2)));
    }
}
