/*
Time-queue for the allocator pipeline.

Every latency the allocator models is a fixed number of cycles between an entry arriving at a
queue and the entry becoming visible at the head.  A `TimedQueue` is a bounded FIFO that stamps
each entry with its arrival cycle and only exposes the head once `arrived_at + latency <= now`.

Sizing a queue at `latency + 1` entries models an N-stage pipeline without bubbles: a new entry
is pushed at the start of a cycle while the head is only popped at the end of it, so one extra
slot is needed to sustain one entry per cycle.

When the queue cannot accept more work it returns a Backpressure carrying the rejected payload
back to the caller, which then owns the retry.
*/

use std::collections::VecDeque;

pub type Cycle = u64;

// An entry together with the cycle it entered the queue
#[derive(Debug, Clone)]
pub struct Stamped<T> {
    pub arrived_at: Cycle,
    pub payload: T,
}

impl<T> Stamped<T> {
    // Whether this entry has spent `latency` cycles in the queue by `now`.
    pub fn is_ready(&self, now: Cycle, latency: Cycle) -> bool {
        self.arrived_at.saturating_add(latency) <= now
    }

    // Number of cycles this entry has been waiting at `now`.
    pub fn age(&self, now: Cycle) -> Cycle {
        now.saturating_sub(self.arrived_at)
    }
}

// Reasons why the queue rejected an entry
#[derive(Debug)]
pub enum Backpressure<T> {
    // The bounded FIFO is full
    QueueFull { payload: T, capacity: usize },
}

impl<T> Backpressure<T> {
    // Recover the rejected payload so it can be retried later.
    pub fn into_payload(self) -> T {
        match self {
            Backpressure::QueueFull { payload, .. } => payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    // Cycles between arrival and visibility at the head
    pub latency: Cycle,
    // Maximum number of entries held at once
    pub capacity: usize,
}

impl QueueConfig {
    // A queue deep enough to model a `latency`-stage pipeline at full throughput.
    pub fn pipelined(latency: Cycle) -> Self {
        Self {
            latency,
            capacity: latency as usize + 1,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::pipelined(0)
    }
}

#[derive(Debug)]
pub struct TimedQueue<T> {
    config: QueueConfig,
    entries: VecDeque<Stamped<T>>,
}

impl<T> TimedQueue<T> {
    pub fn new(config: QueueConfig) -> Self {
        assert!(config.capacity > 0, "queue capacity must be > 0");
        Self {
            config,
            entries: VecDeque::with_capacity(config.capacity),
        }
    }

    pub fn latency(&self) -> Cycle {
        self.config.latency
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.config.capacity
    }

    // Attempt to enqueue an entry arriving at `now`.
    pub fn try_push(&mut self, now: Cycle, payload: T) -> Result<(), Backpressure<T>> {
        if self.is_full() {
            return Err(Backpressure::QueueFull {
                payload,
                capacity: self.config.capacity,
            });
        }
        self.entries.push_back(Stamped {
            arrived_at: now,
            payload,
        });
        Ok(())
    }

    // Oldest entry regardless of whether its latency has elapsed.
    pub fn front(&self) -> Option<&Stamped<T>> {
        self.entries.front()
    }

    pub fn is_head_ready(&self, now: Cycle) -> bool {
        self.entries
            .front()
            .is_some_and(|head| head.is_ready(now, self.config.latency))
    }

    pub fn peek_ready(&self, now: Cycle) -> Option<&T> {
        self.entries
            .front()
            .filter(|head| head.is_ready(now, self.config.latency))
            .map(|head| &head.payload)
    }

    pub fn pop_ready(&mut self, now: Cycle) -> Option<Stamped<T>> {
        if !self.is_head_ready(now) {
            return None;
        }
        self.entries.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stamped<T>> {
        self.entries.iter()
    }
}
