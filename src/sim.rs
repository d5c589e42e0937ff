//! A discrete-event scheduler that drives a [`ManualClock`].

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use token_bucket::ManualClock;

pub trait Handler<S> {
    /// Runs the event at `now` and returns any follow-up events.
    fn call(self: Box<Self>, now: Instant, state: &mut S) -> Vec<Event<S>>;
}

pub struct Event<S> {
    pub ready_at: Instant,
    pub handler: Box<dyn Handler<S>>,
}

impl<S> Event<S> {
    pub fn new(ready_at: Instant, handler: impl Handler<S> + 'static) -> Self {
        Self {
            ready_at,
            handler: Box::new(handler),
        }
    }
}

// Events at the same instant run in the order they were scheduled.
struct Queued<S> {
    seq: u64,
    event: Event<S>,
}

impl<S> Queued<S> {
    fn key(&self) -> (Instant, u64) {
        (self.event.ready_at, self.seq)
    }
}

impl<S> Eq for Queued<S> {}

impl<S> PartialEq for Queued<S> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<S> Ord for Queued<S> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; earliest first.
        other.key().cmp(&self.key())
    }
}

impl<S> PartialOrd for Queued<S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Runs events in time order until the queue drains or the next event is
/// after `finish_at`. The clock is moved to each event's time before it runs.
/// Returns how many events ran.
pub fn execute<S>(
    clock: &ManualClock,
    state: &mut S,
    init_events: Vec<Event<S>>,
    finish_at: Instant,
) -> u64 {
    let mut heap = BinaryHeap::new();
    let mut seq = 0;
    for event in init_events {
        heap.push(Queued { seq, event });
        seq += 1;
    }

    let mut ran = 0;
    while let Some(Queued { event, .. }) = heap.pop() {
        if event.ready_at > finish_at {
            break;
        }
        clock.advance_to(event.ready_at);
        for new_event in event.handler.call(event.ready_at, state) {
            heap.push(Queued {
                seq,
                event: new_event,
            });
            seq += 1;
        }
        ran += 1;
    }
    ran
}
