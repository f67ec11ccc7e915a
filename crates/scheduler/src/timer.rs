use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

use vitalscope_core::EpochId;

use crate::cancel::CancellationToken;

/// A due timer handed back to the owner.
#[derive(Debug)]
pub struct Timer<A> {
    pub deadline: Duration,
    /// Epoch that armed the timer; `None` for timers that outlive epochs.
    pub epoch: Option<EpochId>,
    pub action: A,
}

struct Entry<A> {
    deadline: Duration,
    seq: u64,
    epoch: Option<EpochId>,
    token: Option<CancellationToken>,
    action: A,
}

impl<A> PartialEq for Entry<A> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<A> Eq for Entry<A> {}

impl<A> PartialOrd for Entry<A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<A> Ord for Entry<A> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Priority queue of `(deadline, epoch, action)` entries.
///
/// Ties on deadline fire in scheduling order.
pub struct TimerQueue<A> {
    heap: BinaryHeap<Reverse<Entry<A>>>,
    next_seq: u64,
}

impl<A> TimerQueue<A> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    fn push(&mut self, deadline: Duration, epoch: Option<EpochId>, token: Option<CancellationToken>, action: A) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Entry {
            deadline,
            seq,
            epoch,
            token,
            action,
        }));
    }

    pub fn schedule(&mut self, deadline: Duration, epoch: Option<EpochId>, action: A) {
        self.push(deadline, epoch, None, action);
    }

    /// Schedules a timer that is silently dropped once the token is cancelled.
    pub fn schedule_cancellable(
        &mut self,
        deadline: Duration,
        epoch: Option<EpochId>,
        action: A,
    ) -> CancellationToken {
        let token = CancellationToken::new();
        self.push(deadline, epoch, Some(token.clone()), action);
        token
    }

    /// Pops the earliest timer due at `now`, skipping cancelled ones.
    pub fn pop_due(&mut self, now: Duration) -> Option<Timer<A>> {
        loop {
            let due = self.heap.peek().is_some_and(|Reverse(e)| e.deadline <= now);
            if !due {
                return None;
            }
            let Reverse(entry) = self.heap.pop()?;
            if entry.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
                continue;
            }
            return Some(Timer {
                deadline: entry.deadline,
                epoch: entry.epoch,
                action: entry.action,
            });
        }
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.heap
            .iter()
            .filter(|Reverse(e)| !e.token.as_ref().is_some_and(CancellationToken::is_cancelled))
            .map(|Reverse(e)| e.deadline)
            .min()
    }

    /// Drops every timer armed by an epoch other than `current`.
    pub fn retain_epoch(&mut self, current: EpochId) {
        let entries = std::mem::take(&mut self.heap);
        self.heap = entries
            .into_iter()
            .filter(|Reverse(e)| e.epoch.is_none_or(|epoch| epoch == current))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

impl<A> Default for TimerQueue<A> {
    fn default() -> Self {
        Self::new()
    }
}
