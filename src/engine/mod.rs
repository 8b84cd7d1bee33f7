// 8.0: the stepper. runs an ordered list of typed stages once per timestep, each stage
// merging its policy outputs and applying its field updates into a new snapshot.
// single threaded per run; runs share nothing.

mod core;
mod history;
mod pipeline;
mod results;
mod stage;

pub use self::core::Simulation;
pub use history::{History, Snapshot};
pub use pipeline::default_pipeline;
pub use results::{BatchReport, RunFailure, RunResult, SimError};
pub use stage::{ErrorObservation, Policy, PolicyFn, PolicyInput, Stage, StageError, StateUpdate, StepContext, UpdateFn};
