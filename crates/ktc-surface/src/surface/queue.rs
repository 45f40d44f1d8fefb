//! Per-surface FIFO of sealed snapshots waiting for their buffer to become
//! safe to read.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Weak;

use super::state::SurfaceState;
use super::SurfaceId;
use crate::sync::{Timeline, WaiterId};

/// Names one queued snapshot; what readiness callbacks carry back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadyToken {
    pub surface: SurfaceId,
    pub seq: u64,
}

struct Entry {
    seq: u64,
    state: SurfaceState,
    ready: bool,
    waiter: Option<(Weak<RefCell<Timeline>>, WaiterId)>,
}

impl Entry {
    fn cancel_waiter(&mut self) {
        if let Some((timeline, id)) = self.waiter.take() {
            if let Some(timeline) = timeline.upgrade() {
                timeline.borrow_mut().remove_waiter(id);
            }
        }
    }
}

#[derive(Default)]
pub struct CommitQueue {
    entries: VecDeque<Entry>,
    next_seq: u64,
}

impl CommitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The sequence number the next `push` will use.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn push(&mut self, state: SurfaceState, ready: bool) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(Entry {
            seq,
            state,
            ready,
            waiter: None,
        });
        seq
    }

    pub fn set_waiter(&mut self, seq: u64, timeline: Weak<RefCell<Timeline>>, id: WaiterId) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.seq == seq) {
            entry.waiter = Some((timeline, id));
        }
    }

    /// Removes the entry `seq`, everything queued ahead of it whether ready
    /// or not, and the run of already-ready entries right behind it. Returns
    /// them in submission order. Unknown `seq` (already flushed or
    /// cancelled) yields nothing.
    pub fn take_through(&mut self, seq: u64) -> Vec<SurfaceState> {
        let Some(pos) = self.entries.iter().position(|e| e.seq == seq) else {
            return Vec::new();
        };

        let mut end = pos + 1;
        while end < self.entries.len() && self.entries[end].ready {
            end += 1;
        }

        let mut out = Vec::with_capacity(end);
        for mut entry in self.entries.drain(..end) {
            if entry.seq != seq {
                entry.cancel_waiter();
            }
            entry.waiter = None;
            out.push(entry.state);
        }
        out
    }

    /// Drops every entry unpromoted, removing their timeline waiters.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.entries.len();
        for mut entry in self.entries.drain(..) {
            entry.cancel_waiter();
        }
        count
    }
}
