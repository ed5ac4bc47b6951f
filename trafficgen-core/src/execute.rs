use crate::{SimTime, Simulation};

/// Simulation execution trait.
pub trait Execute {
    /// Executes the simulation until some stopping condition is reached.
    /// The condition is implementation-specific.
    fn execute(self, sim: &mut Simulation);

    /// Time the run stops at, when it is bounded by time.
    fn end_time(&self) -> Option<SimTime> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndCondition {
    Time(SimTime),
    NoEvents,
    Steps(usize),
}

/// Executor is used for simple execution of an entire simulation.
///
/// Traffic models keep scheduling work forever, so runs are normally bounded with
/// [`Executor::timed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Executor {
    end_condition: EndCondition,
}

impl Executor {
    /// Simulation will end only once there is no available events in the queue.
    #[must_use]
    pub fn unbound() -> Self {
        Self {
            end_condition: EndCondition::NoEvents,
        }
    }

    /// Simulation will process every event due at or before the given time.
    /// It may terminate early if no events are available.
    #[must_use]
    pub fn timed(time: SimTime) -> Self {
        Self {
            end_condition: EndCondition::Time(time),
        }
    }

    /// Simulation will execute exactly this many steps, unless we run out of events.
    #[must_use]
    pub fn steps(steps: usize) -> Self {
        Self {
            end_condition: EndCondition::Steps(steps),
        }
    }
}

impl Execute for Executor {
    fn end_time(&self) -> Option<SimTime> {
        match self.end_condition {
            EndCondition::Time(time) => Some(time),
            EndCondition::NoEvents | EndCondition::Steps(_) => None,
        }
    }

    fn execute(self, sim: &mut Simulation) {
        match self.end_condition {
            EndCondition::Time(time) => {
                while sim.scheduler.peek_time().is_some_and(|t| t <= time) {
                    sim.step();
                }
            }
            EndCondition::NoEvents => while sim.step() {},
            EndCondition::Steps(steps) => {
                for _ in 0..steps {
                    if !sim.step() {
                        break;
                    }
                }
            }
        }
    }
}
