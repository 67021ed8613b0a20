use log::debug;

use crate::alloc::packet::{PortId, Transaction};
use crate::timeq::{Cycle, QueueConfig, Stamped, TimedQueue};

/// Front end of one requestor: an admission pipeline of `latency` stages.
///
/// The head only becomes visible to arbitration once it has spent `latency` cycles in the queue
/// and the port is not parked on an LL lock.
#[derive(Debug)]
pub struct RequestorPort {
    id: PortId,
    queue: TimedQueue<Transaction>,
    needs_retry: bool,
    locked: bool,
}

impl RequestorPort {
    pub fn new(id: PortId, latency: Cycle) -> Self {
        Self {
            id,
            queue: TimedQueue::new(QueueConfig::pipelined(latency)),
            needs_retry: false,
            locked: false,
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn latency(&self) -> Cycle {
        self.queue.latency()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn needs_retry(&self) -> bool {
        self.needs_retry
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn push(&mut self, now: Cycle, txn: Transaction) -> bool {
        match self.queue.try_push(now, txn) {
            Ok(()) => true,
            Err(_) => {
                debug!("port {} is full ({} entries)", self.id, self.queue.capacity());
                self.needs_retry = true;
                false
            }
        }
    }

    pub fn is_head_ready(&self, now: Cycle) -> bool {
        !self.locked && self.queue.is_head_ready(now)
    }

    pub fn peek_head(&self, now: Cycle) -> Option<&Transaction> {
        if self.locked {
            return None;
        }
        self.queue.peek_ready(now)
    }

    pub fn pop_head(&mut self, now: Cycle) -> Option<Stamped<Transaction>> {
        if self.locked {
            return None;
        }
        self.queue.pop_ready(now)
    }

    /// Oldest queued transaction whether or not it is ready or locked.
    pub fn front(&self) -> Option<&Stamped<Transaction>> {
        self.queue.front()
    }

    pub fn queued(&self) -> impl Iterator<Item = &Transaction> {
        self.queue.iter().map(|entry| &entry.payload)
    }

    /// Clears a pending retry. Returns true if the requestor is owed a `notify_retry`.
    pub fn take_retry(&mut self) -> bool {
        std::mem::take(&mut self.needs_retry)
    }
}
