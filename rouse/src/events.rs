//! Event scheduling for the reactor's deadline queue.
//!
//! Timer completions are the only reactor events that need a time-ordered
//! queue; process exits and pipe deliveries are detected by polling and
//! delivered immediately. Events at the same deadline are ordered by a
//! monotonically increasing sequence number so wake order stays FIFO.

use std::{cmp::Ordering, collections::BinaryHeap, time::Instant};

use crate::actor::ActorId;

/// Events that can be scheduled against a deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A timer actor's deadline elapsed; rouse it.
    TimerFired {
        /// The timer actor to rouse.
        actor: ActorId,
    },

    /// Teardown: wake every parked waiter so no context stays parked.
    Shutdown,
}

/// A deadline entry: the event plus when it becomes due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEvent {
    time: Instant,
    event: Event,
    // Breaks deadline ties in schedule order.
    sequence: u64,
}

impl ScheduledEvent {
    /// Pairs `event` with its deadline and tie-break sequence.
    pub fn new(time: Instant, event: Event, sequence: u64) -> Self {
        Self {
            time,
            event,
            sequence,
        }
    }

    /// When this entry becomes due.
    pub fn time(&self) -> Instant {
        self.time
    }

    /// Borrows the pending event.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Unwraps the entry into its event.
    pub fn into_event(self) -> Event {
        self.event
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Both comparisons run backwards: the heap hands out its maximum,
        // and the queue must yield the earliest deadline, equal deadlines in
        // the order they were scheduled.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Deadline-ordered queue of pending reactor events.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
}

impl EventQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    /// Queues an entry.
    pub fn schedule(&mut self, event: ScheduledEvent) {
        self.heap.push(event);
    }

    /// Takes the entry with the earliest deadline.
    pub fn pop_earliest(&mut self) -> Option<ScheduledEvent> {
        self.heap.pop()
    }

    /// Peeks the entry with the earliest deadline.
    pub fn peek_earliest(&self) -> Option<&ScheduledEvent> {
        self.heap.peek()
    }

    /// `true` when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn earliest_event_pops_first() {
        let base = Instant::now();
        let mut queue = EventQueue::new();
        queue.schedule(ScheduledEvent::new(
            base + Duration::from_millis(20),
            Event::TimerFired { actor: ActorId(2) },
            0,
        ));
        queue.schedule(ScheduledEvent::new(
            base + Duration::from_millis(10),
            Event::TimerFired { actor: ActorId(1) },
            1,
        ));

        let first = queue.pop_earliest().unwrap();
        assert_eq!(first.event(), &Event::TimerFired { actor: ActorId(1) });
        let second = queue.pop_earliest().unwrap();
        assert_eq!(second.event(), &Event::TimerFired { actor: ActorId(2) });
        assert!(queue.is_empty());
    }

    #[test]
    fn equal_deadlines_pop_in_schedule_order() {
        let at = Instant::now() + Duration::from_millis(5);
        let mut queue = EventQueue::new();
        for id in 0..4u64 {
            queue.schedule(ScheduledEvent::new(
                at,
                Event::TimerFired {
                    actor: ActorId(id),
                },
                id,
            ));
        }

        for expected in 0..4u64 {
            let popped = queue.pop_earliest().unwrap();
            assert_eq!(
                popped.into_event(),
                Event::TimerFired {
                    actor: ActorId(expected)
                }
            );
        }
    }
}
