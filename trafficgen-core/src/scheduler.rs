use std::any::Any;
use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::rc::Rc;
use tracing::trace;
use uuid::Uuid;

use crate::types::EventId;
use crate::{Key, SimTime};

/// Entry type stored in the scheduler, including the event value, component key, and the time when
/// it is supposed to occur.
///
/// Besides being stored in the scheduler's internal priority queue,
/// event entries are simply passed to [`crate::Components`] object, which unpacks them, and passes them
/// to the correct component.
#[derive(Debug)]
pub struct EventEntry {
    id: EventId,
    time: SimTime,
    pub(crate) component: Uuid,
    pub(crate) inner: Box<dyn Any>,
}

impl EventEntry {
    pub(crate) fn new<E: fmt::Debug + 'static>(
        id: EventId,
        time: SimTime,
        component: Key<E>,
        event: E,
    ) -> Self {
        EventEntry {
            id,
            time,
            component: component.id(),
            inner: Box::new(event),
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Tries to downcast the event entry to one holding an event of type `E`.
    /// If fails, returns `None`.
    #[must_use]
    pub fn downcast<E: fmt::Debug + 'static>(&self) -> Option<EventEntryTyped<'_, E>> {
        self.inner.downcast_ref::<E>().map(|event| EventEntryTyped {
            id: self.id,
            time: self.time,
            component_key: Key::new_with_id(self.component),
            event,
        })
    }
}

impl PartialEq for EventEntry {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for EventEntry {}

impl PartialOrd for EventEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behavior in BinaryHeap; equal times pop in scheduling order.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Debug)]
pub struct EventEntryTyped<'e, E: fmt::Debug> {
    pub id: EventId,
    pub time: SimTime,
    pub component_key: Key<E>,
    pub event: &'e E,
}

type Clock = Rc<Cell<SimTime>>;

/// This struct exposes only immutable access to the simulation clock.
/// The clock itself is owned by the scheduler, while others can obtain `ClockRef`
/// to read the current simulation time.
///
/// # Example
///
/// ```
/// # use trafficgen_core::Scheduler;
/// let scheduler = Scheduler::default();
/// let clock_ref = scheduler.clock();
/// assert_eq!(clock_ref.time(), scheduler.time());
/// ```
#[derive(Clone)]
pub struct ClockRef {
    clock: Clock,
}

impl From<Clock> for ClockRef {
    fn from(clock: Clock) -> Self {
        Self { clock }
    }
}

impl ClockRef {
    /// Return the current simulation time.
    #[must_use]
    pub fn time(&self) -> SimTime {
        self.clock.get()
    }
}

/// Scheduler is used to keep the current time and information about the upcoming events.
///
/// Every scheduled event gets an [`EventId`] which can be passed to [`Scheduler::cancel`]
/// until the event fires. See the [crate-level documentation](index.html) for more information.
pub struct Scheduler {
    next_event_id: u64,
    events: BinaryHeap<EventEntry>,
    /// Ids of scheduled events that have neither fired nor been cancelled.
    live: HashSet<EventId>,
    cancelled: HashSet<EventId>,
    clock: Clock,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            next_event_id: 0,
            events: BinaryHeap::default(),
            live: HashSet::new(),
            cancelled: HashSet::new(),
            clock: Rc::new(Cell::new(SimTime::default())),
        }
    }
}

impl Scheduler {
    /// Schedules `event` to be executed for `component` at `self.time() + delay`.
    pub fn schedule<E: fmt::Debug + 'static>(
        &mut self,
        delay: SimTime,
        component: Key<E>,
        event: E,
    ) -> EventId {
        self.next_event_id += 1;
        let id = EventId(self.next_event_id);
        let time = self.time() + delay;
        trace!(event_id = %id, time = %time, event = ?event, "Event scheduled");
        self.events.push(EventEntry::new(id, time, component, event));
        self.live.insert(id);
        id
    }

    /// Schedules `event` to be executed for `component` at `self.time()`.
    pub fn schedule_now<E: fmt::Debug + 'static>(&mut self, component: Key<E>, event: E) -> EventId {
        self.schedule(SimTime::zero(), component, event)
    }

    /// Cancels a pending event. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, id: EventId) -> bool {
        if !self.live.remove(&id) {
            return false;
        }
        trace!(event_id = %id, "Event cancelled");
        self.cancelled.insert(id)
    }

    /// Returns the current simulation time.
    #[must_use]
    pub fn time(&self) -> SimTime {
        self.clock.get()
    }

    /// Returns a structure with immutable access to the simulation time.
    #[must_use]
    pub fn clock(&self) -> ClockRef {
        ClockRef {
            clock: Rc::clone(&self.clock),
        }
    }

    /// Number of events still due to fire.
    pub fn pending_events(&self) -> usize {
        self.live.len()
    }

    /// Returns the time of the next live event or `None` if none are left.
    pub fn peek_time(&mut self) -> Option<SimTime> {
        self.discard_cancelled_head();
        self.events.peek().map(EventEntry::time)
    }

    /// Removes and returns the next live event, advancing the clock to its time.
    pub fn pop(&mut self) -> Option<EventEntry> {
        self.discard_cancelled_head();
        self.events.pop().inspect(|event| {
            self.live.remove(&event.id);
            self.clock.replace(event.time());
        })
    }

    fn discard_cancelled_head(&mut self) {
        while let Some(head) = self.events.peek() {
            if !self.cancelled.remove(&head.id) {
                break;
            }
            self.events.pop();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, Clone, Eq, PartialEq)]
    struct EventA;
    #[derive(Debug, Clone, Eq, PartialEq)]
    struct EventB(u32);

    #[test]
    fn test_clock_ref() {
        let time = SimTime::from_duration(Duration::from_secs(1));
        let clock = Clock::new(Cell::new(time));
        let clock_ref = ClockRef::from(clock);
        assert_eq!(clock_ref.time(), time);
    }

    #[test]
    fn test_event_entry_downcast() {
        let key = Key::<String>::new_with_id(Uuid::from_u128(1));
        let entry = EventEntry::new(EventId(0), SimTime::from_secs(1), key, String::from("inner"));
        assert!(entry.downcast::<String>().is_some());
        assert!(entry.downcast::<i32>().is_none());
    }

    #[test]
    fn test_scheduler_orders_by_time() {
        let mut scheduler = Scheduler::default();
        let component_a = Key::<EventA>::new_with_id(Uuid::from_u128(1));
        let component_b = Key::<EventB>::new_with_id(Uuid::from_u128(2));

        scheduler.schedule(SimTime::from_secs(1), component_a, EventA);
        scheduler.schedule_now(component_b, EventB(0));
        scheduler.schedule(SimTime::from_secs(2), component_b, EventB(2));

        let entry = scheduler.pop().unwrap();
        assert_eq!(entry.downcast::<EventB>().unwrap().event, &EventB(0));
        assert_eq!(scheduler.time(), SimTime::zero());

        let entry = scheduler.pop().unwrap();
        let typed = entry.downcast::<EventA>().unwrap();
        assert_eq!(typed.time, SimTime::from_secs(1));
        assert_eq!(typed.component_key.id(), component_a.id());
        assert_eq!(scheduler.clock().time(), SimTime::from_secs(1));

        let entry = scheduler.pop().unwrap();
        assert_eq!(entry.downcast::<EventB>().unwrap().event, &EventB(2));
        assert!(scheduler.pop().is_none());
    }

    #[test]
    fn test_same_time_events_fire_in_scheduling_order() {
        let mut scheduler = Scheduler::default();
        let key = Key::<EventB>::new_with_id(Uuid::from_u128(3));
        for i in 0..100 {
            scheduler.schedule(SimTime::from_millis(5), key, EventB(i));
        }
        for i in 0..100 {
            let entry = scheduler.pop().unwrap();
            assert_eq!(entry.downcast::<EventB>().unwrap().event, &EventB(i));
        }
    }

    #[test]
    fn test_cancelled_events_never_fire() {
        let mut scheduler = Scheduler::default();
        let key = Key::<EventB>::new_with_id(Uuid::from_u128(4));
        let first = scheduler.schedule(SimTime::from_millis(1), key, EventB(1));
        scheduler.schedule(SimTime::from_millis(2), key, EventB(2));

        assert!(scheduler.cancel(first));
        assert!(!scheduler.cancel(first));
        assert_eq!(scheduler.pending_events(), 1);
        assert_eq!(scheduler.peek_time(), Some(SimTime::from_millis(2)));

        let entry = scheduler.pop().unwrap();
        assert_eq!(entry.downcast::<EventB>().unwrap().event, &EventB(2));
        assert!(scheduler.pop().is_none());
        // already fired
        assert!(!scheduler.cancel(entry.id()));
    }

    #[test]
    fn test_pending_count_tracks_schedule_cancel_and_pop() {
        let mut scheduler = Scheduler::default();
        let component = Key::<EventB>::new_with_id(Uuid::nil());
        let ids: Vec<EventId> = (0..100)
            .map(|i| scheduler.schedule(SimTime::from_millis(i), component, EventB(i as u32)))
            .collect();
        assert_eq!(scheduler.pending_events(), 100);

        for id in ids.iter().step_by(2) {
            assert!(scheduler.cancel(*id));
        }
        assert_eq!(scheduler.pending_events(), 50);

        let entry = scheduler.pop().unwrap();
        assert_eq!(entry.id(), ids[1]);
        assert_eq!(scheduler.pending_events(), 49);
        // fired, cancelled twice, never scheduled
        assert!(!scheduler.cancel(ids[1]));
        assert!(!scheduler.cancel(ids[0]));
        assert!(!scheduler.cancel(EventId(10_000)));

        let mut fired = 1;
        while scheduler.pop().is_some() {
            fired += 1;
        }
        assert_eq!(fired, 50);
        assert_eq!(scheduler.pending_events(), 0);
    }
}
