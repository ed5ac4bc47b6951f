//! Core discrete event simulation engine for synthetic traffic generation.
//!
//! This crate provides the building blocks the traffic models run on: virtual
//! time, a cancellable event scheduler, a component registry, bounded random
//! variables with reproducible per-variable streams, and logging setup.
//!
//! # Architecture Overview
//!
//! - [`Simulation`]: owns the [`Scheduler`] and the registered components and
//!   drives them one event at a time.
//! - [`Component`]: anything that reacts to typed events. Components are addressed
//!   through a typed [`Key`] returned at registration.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use trafficgen_core::{Executor, SimTime, Simulation};
//!
//! let mut simulation = Simulation::default();
//! // add components, schedule their start events ...
//! simulation.execute(Executor::timed(SimTime::from_secs(60)));
//! ```
//!
//! # Scheduling Events
//!
//! Delays are always relative to the current simulation time, and the returned
//! [`EventId`] cancels the event if it has not fired yet:
//!
//! ```rust,ignore
//! let id = scheduler.schedule(SimTime::from_millis(100), self_id, MyEvent::Tick);
//! scheduler.cancel(id);
//! ```

pub mod dists;
pub mod error;
pub mod execute;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod randomness;
pub mod scheduler;
pub mod time;
pub mod types;
pub mod validate;

use std::any::Any;
use std::collections::HashMap;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

pub use dists::{
    BoundedLogNormal, BoundedPareto, ConstantInteger, Exponential, IntegerSampler,
    NormalizedPareto,
};
pub use error::{DistributionError, SimError};
pub use execute::{Execute, Executor};
pub use logging::{
    init_detailed_simulation_logging, init_simulation_logging, init_simulation_logging_with_level,
    simulation_span,
};
pub use self::metrics::{HistogramSummary, MetricsSummary, SimulationMetrics};
pub use randomness::{stream_rng, RandomStreams, SimRng, StreamBlock, AUTO_STREAM_BASE};
pub use scheduler::{ClockRef, EventEntry, Scheduler};
pub use time::{duration_from_millis_f64, SimTime};
pub use types::EventId;
pub use validate::{Validate, ValidationError, ValidationResult};

/// Typed address of a registered component.
#[derive(Debug)]
pub struct Key<T> {
    id: Uuid,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub fn new_with_id(id: Uuid) -> Self {
        Self {
            id,
            _marker: std::marker::PhantomData,
        }
    }

    /// Get the UUID of this key
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Key<T> {}

impl<T> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl<T> Eq for Key<T> {}

pub trait ProcessEventEntry: Any {
    fn process_event_entry(&mut self, entry: EventEntry, scheduler: &mut Scheduler);
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub trait Component: ProcessEventEntry {
    type Event: 'static;

    fn process_event(
        &mut self,
        self_id: Key<Self::Event>,
        event: &Self::Event,
        scheduler: &mut Scheduler,
    );
}

impl<E, C> ProcessEventEntry for C
where
    E: std::fmt::Debug + 'static,
    C: Component<Event = E> + 'static,
{
    fn process_event_entry(&mut self, entry: EventEntry, scheduler: &mut Scheduler) {
        let key = Key::new_with_id(entry.component);
        match entry.inner.downcast::<E>() {
            Ok(event) => self.process_event(key, &event, scheduler),
            Err(_) => warn!(
                component_id = ?key.id(),
                expected = std::any::type_name::<E>(),
                "Dropping event of unexpected type"
            ),
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Container holding type-erased components.
#[derive(Default)]
pub struct Components {
    components: HashMap<Uuid, Box<dyn ProcessEventEntry>>,
    registered: u64,
}

impl Components {
    /// Process the event on the component given by the event entry.
    pub fn process_event_entry(&mut self, entry: EventEntry, scheduler: &mut Scheduler) {
        if let Some(component) = self.components.get_mut(&entry.component) {
            component.process_event_entry(entry, scheduler);
        } else {
            trace!(component_id = ?entry.component, "Event for removed component dropped");
        }
    }

    /// Registers a new component and returns its ID.
    #[must_use]
    pub fn register<E: std::fmt::Debug + 'static, C: Component<Event = E> + 'static>(
        &mut self,
        component: C,
    ) -> Key<E> {
        self.registered += 1;
        let id = ids::deterministic_uuid(ids::UUID_DOMAIN_COMPONENT, self.registered);
        self.components.insert(id, Box::new(component));
        Key::new_with_id(id)
    }

    pub fn remove<E: 'static, C: Component<Event = E> + 'static>(&mut self, key: Key<E>) -> Option<C> {
        self.components.remove(&key.id).and_then(|boxed_trait| {
            let boxed_any: Box<dyn Any> = boxed_trait;
            boxed_any.downcast::<C>().ok().map(|boxed_c| *boxed_c)
        })
    }

    /// Get mutable access to a component
    pub fn get_component_mut<E: 'static, C: Component<Event = E> + 'static>(
        &mut self,
        key: Key<E>,
    ) -> Option<&mut C> {
        self.components
            .get_mut(&key.id)
            .and_then(|boxed_trait| boxed_trait.as_any_mut().downcast_mut::<C>())
    }
}

/// Simulation struct that puts different parts of the simulation together.
///
/// See the [crate-level documentation](index.html) for more information.
pub struct Simulation {
    pub(crate) scheduler: Scheduler,
    /// Component container.
    pub components: Components,
    name: String,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            scheduler: Scheduler::default(),
            components: Components::default(),
            name: String::from("simulation"),
        }
    }
}

impl Simulation {
    /// Name used in the run's span and start/completion logs.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current simulation time.
    #[must_use]
    pub fn time(&self) -> SimTime {
        self.scheduler.time()
    }

    /// Read-only handle to the simulation clock.
    pub fn clock(&self) -> ClockRef {
        self.scheduler.clock()
    }

    /// Direct access to the scheduler, for setting up collaborators before the run.
    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Performs one step of the simulation. Returns `true` if there was in fact an event
    /// available to process, and `false` otherwise, which signifies that the simulation
    /// ended.
    pub fn step(&mut self) -> bool {
        let Some(event) = self.scheduler.pop() else {
            return false;
        };
        trace!(event_id = %event.id(), event_time = %event.time(), "Processing simulation step");
        self.components.process_event_entry(event, &mut self.scheduler);
        true
    }

    /// Runs the entire simulation.
    ///
    /// The stopping condition and other execution details depend on the executor used.
    /// See [`Execute`] and [`Executor`] for more details.
    pub fn execute<E: Execute>(&mut self, executor: E) {
        let span = simulation_span(&self.name);
        let _guard = span.enter();
        logging::events::simulation_started(&self.name, executor.end_time());
        executor.execute(self);
        logging::events::simulation_completed(&self.name, self.time());
    }

    /// Adds a new component.
    #[must_use]
    #[instrument(skip(self, component), fields(component_type = std::any::type_name::<C>()))]
    pub fn add_component<E: std::fmt::Debug + 'static, C: Component<Event = E> + 'static>(
        &mut self,
        component: C,
    ) -> Key<E> {
        let key = self.components.register(component);
        debug!(component_id = ?key.id(), "Added component to simulation");
        key
    }

    /// Remove a component: usually at the end of the simulation to peek at the state
    #[must_use]
    pub fn remove_component<E: std::fmt::Debug + 'static, C: Component<Event = E> + 'static>(
        &mut self,
        key: Key<E>,
    ) -> Option<C> {
        let result = self.components.remove(key);
        if result.is_none() {
            warn!(component_id = ?key.id(), "Attempted to remove non-existent component");
        }
        result
    }

    /// Get mutable access to a component
    pub fn get_component_mut<E: std::fmt::Debug + 'static, C: Component<Event = E> + 'static>(
        &mut self,
        key: Key<E>,
    ) -> Option<&mut C> {
        self.components.get_component_mut(key)
    }

    /// Schedules a new event to be executed after `delay` in component `component`.
    pub fn schedule<E: std::fmt::Debug + 'static>(
        &mut self,
        delay: SimTime,
        component: Key<E>,
        event: E,
    ) -> EventId {
        self.scheduler.schedule(delay, component, event)
    }
}
