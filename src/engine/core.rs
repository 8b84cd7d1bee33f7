// 8.0 engine/core.rs: the stepper. owns the config and stage list, runs one run or a
// batch of isolated runs, and records every substep snapshot.

use super::history::{History, Snapshot};
use super::pipeline::default_pipeline;
use super::results::{BatchReport, RunFailure, RunResult, SimError};
use super::stage::{PolicyInput, Stage, StageError, StepContext};
use crate::config::SimulationConfig;
use crate::events::{EventPayload, FreeMemoryEvent};
use crate::state::SimState;
use crate::types::{RunId, Timestep};
use tracing::{debug, info, info_span, warn};

/** 8.1: one configured model, reusable across runs */
#[derive(Debug, Clone)]
pub struct Simulation {
    config: SimulationConfig,
    stages: Vec<Stage>,
    initial_state: Option<SimState>,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self, SimError> {
        config.validate()?;
        let stages = default_pipeline(&config);
        Ok(Self {
            config,
            stages,
            initial_state: None,
        })
    }

    /// Custom stage list. The config is still validated.
    pub fn with_pipeline(config: SimulationConfig, stages: Vec<Stage>) -> Result<Self, SimError> {
        config.validate()?;
        Ok(Self {
            config,
            stages,
            initial_state: None,
        })
    }

    /// Start every run from `state` instead of genesis.
    pub fn with_initial_state(mut self, state: SimState) -> Self {
        self.initial_state = Some(state);
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    fn initial(&self, run: RunId) -> Result<SimState, SimError> {
        let state = match &self.initial_state {
            Some(state) => state.clone(),
            None => {
                let inputs = self.config.exogenous.resolve(run, 0)?;
                SimState::genesis(&self.config, &inputs)?
            }
        };
        state.require_complete()?;
        Ok(state)
    }

    /// Run `timesteps` steps. A fatal error stops this run only and comes back
    /// with every snapshot recorded before it.
    pub fn run(&self, run: RunId, timesteps: u64) -> RunResult {
        let span = info_span!("run", run = run.0);
        let _enter = span.enter();
        info!(timesteps, stages = self.stages.len(), "run started");

        let state = match self.initial(run) {
            Ok(state) => state,
            Err(error) => {
                let failure = RunFailure {
                    run,
                    timestep: Timestep(0),
                    substep: 0,
                    stage: "genesis",
                    field: None,
                    error,
                };
                warn!(%failure, "run failed");
                return RunResult {
                    run,
                    history: History::default(),
                    failure: Some(failure),
                };
            }
        };

        let mut history = History::new(run, state.clone());
        let mut state = state;
        let mut timestep = Timestep(0);

        for _ in 0..timesteps {
            timestep = timestep.next();
            match self.step(run, timestep, state, &mut history) {
                Ok(next) => state = next,
                Err(failure) => {
                    warn!(%failure, "run failed");
                    return RunResult {
                        run,
                        history,
                        failure: Some(failure),
                    };
                }
            }
        }

        info!(
            timesteps = history.len() - 1,
            target_price = %state.target_price,
            market_price = %state.market_price(),
            "run finished"
        );
        RunResult {
            run,
            history,
            failure: None,
        }
    }

    /// Runs `1..=runs`, each from its own genesis. Failures stay with their run.
    pub fn run_batch(&self, runs: u32, timesteps: u64) -> BatchReport {
        let results: Vec<RunResult> = (1..=runs).map(|r| self.run(RunId(r), timesteps)).collect();
        let failed = results.iter().filter(|r| !r.is_ok()).count();
        info!(runs, failed, "batch finished");
        BatchReport { results }
    }

    // 8.1.1: one timestep. the finished timestep is appended to history whole,
    // or partially when a stage fails.
    fn step(
        &self,
        run: RunId,
        timestep: Timestep,
        mut state: SimState,
        history: &mut History,
    ) -> Result<SimState, RunFailure> {
        let failure = |substep: usize, stage: &'static str, err: StageError| RunFailure {
            run,
            timestep,
            substep,
            stage,
            field: err.field,
            error: err.error,
        };

        let exogenous = self
            .config
            .exogenous
            .resolve(run, timestep.value())
            .map_err(|e| failure(0, "exogenous", SimError::from(e).into()))?;

        let mut snapshots = Vec::with_capacity(self.stages.len());
        for (index, stage) in self.stages.iter().enumerate() {
            let substep = index + 1;

            let mut preset = PolicyInput::new();
            if !stage.evict.is_empty() {
                let cleared = history.evict(&stage.evict);
                if cleared > 0 {
                    preset.events.push(EventPayload::FreeMemory(FreeMemoryEvent {
                        fields: stage.evict.iter().map(|f| f.field().to_string()).collect(),
                        snapshots: cleared,
                    }));
                }
            }

            let ctx = StepContext {
                config: &self.config,
                state: &state,
                history,
                run,
                timestep,
                substep,
                exogenous: &exogenous,
            };
            let updates = match stage.execute(&ctx, preset) {
                Ok(updates) => updates,
                Err(err) => {
                    history.push_timestep(snapshots);
                    return Err(failure(substep, stage.label, err));
                }
            };

            let mut next = state.clone();
            for update in updates {
                next.apply(update);
            }
            debug!(timestep = timestep.value(), substep, stage = stage.label, "stage applied");

            snapshots.push(Snapshot {
                run,
                timestep,
                substep,
                stage: stage.label,
                state: next.clone(),
            });
            state = next;
        }

        history.push_timestep(snapshots);
        Ok(state)
    }
}
