// 8.3 history.rs: append-only snapshot history of one run.
// index 0 holds genesis; index t holds the substep snapshots of timestep t.
// a timestep is appended whole once its stages have run, so stages only ever
// see finished timesteps here.

use crate::state::{HeavyField, SimState};
use crate::types::{RunId, Timestep};

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub run: RunId,
    pub timestep: Timestep,
    pub substep: usize,
    pub stage: &'static str,
    pub state: SimState,
}

#[derive(Debug, Clone, Default)]
pub struct History {
    timesteps: Vec<Vec<Snapshot>>,
}

impl History {
    pub fn new(run: RunId, genesis: SimState) -> Self {
        Self {
            timesteps: vec![vec![Snapshot {
                run,
                timestep: Timestep(0),
                substep: 0,
                stage: "genesis",
                state: genesis,
            }]],
        }
    }

    /// Number of timesteps recorded, genesis included.
    pub fn len(&self) -> usize {
        self.timesteps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timesteps.is_empty()
    }

    pub(crate) fn push_timestep(&mut self, snapshots: Vec<Snapshot>) {
        self.timesteps.push(snapshots);
    }

    pub fn initial(&self) -> Option<&Snapshot> {
        self.timesteps.first().and_then(|t| t.first())
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.timesteps.iter().rev().find_map(|t| t.last())
    }

    /// End state of the timestep `n` back from the end: `lagged(1)` is the
    /// newest finished timestep. Falls back to genesis when the run is younger than `n`.
    pub fn lagged(&self, n: usize) -> Option<&Snapshot> {
        self.timesteps
            .len()
            .checked_sub(n.max(1))
            .and_then(|index| self.timesteps[index].last())
            .or_else(|| self.initial())
    }

    pub fn timestep(&self, t: usize) -> &[Snapshot] {
        self.timesteps.get(t).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Last snapshot of every timestep, genesis first.
    pub fn final_states(&self) -> Vec<&SimState> {
        self.timesteps.iter().filter_map(|t| t.last()).map(|s| &s.state).collect()
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &Snapshot> {
        self.timesteps.iter().flatten()
    }

    /// Drop `fields` from every snapshot of the newest finished timestep except
    /// its last one, which later lags may still read. Returns the snapshots touched.
    pub(crate) fn evict(&mut self, fields: &[HeavyField]) -> usize {
        if fields.is_empty() || self.timesteps.len() < 2 {
            return 0;
        }
        let Some((_, earlier)) = self.timesteps.last_mut().and_then(|t| t.split_last_mut()) else {
            return 0;
        };
        let mut cleared = 0;
        for snapshot in earlier {
            if fields.iter().any(|f| snapshot.state.has(*f)) {
                for field in fields {
                    snapshot.state.evict(*field);
                }
                cleared += 1;
            }
        }
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use rust_decimal::Decimal;

    fn state(target: i64) -> SimState {
        let config = SimulationConfig::default();
        let inputs = config.exogenous.resolve(RunId(1), 0).unwrap();
        let mut state = SimState::genesis(&config, &inputs).unwrap();
        state.target_price = Decimal::from(target);
        state
    }

    fn snapshots(t: u64, n: usize) -> Vec<Snapshot> {
        (1..=n)
            .map(|substep| Snapshot {
                run: RunId(1),
                timestep: Timestep(t),
                substep,
                stage: "test",
                state: state(t as i64),
            })
            .collect()
    }

    #[test]
    fn lag_falls_back_to_genesis() {
        let mut history = History::new(RunId(1), state(0));
        history.push_timestep(snapshots(1, 2));
        history.push_timestep(snapshots(2, 2));

        assert_eq!(history.lagged(1).unwrap().timestep, Timestep(2));
        assert_eq!(history.lagged(2).unwrap().timestep, Timestep(1));
        assert_eq!(history.lagged(3).unwrap().timestep, Timestep(0));
        assert_eq!(history.lagged(10).unwrap().timestep, Timestep(0));
        assert_eq!(history.latest().unwrap().substep, 2);
        assert_eq!(history.final_states().len(), 3);
    }

    #[test]
    fn eviction_keeps_the_last_substep() {
        let mut history = History::new(RunId(1), state(0));
        history.push_timestep(snapshots(1, 3));

        let cleared = history.evict(&[HeavyField::Events, HeavyField::Oracle]);

        assert_eq!(cleared, 2);
        let step = history.timestep(1);
        assert!(step[0].state.events.is_none());
        assert!(step[1].state.oracle.is_none());
        assert!(step[2].state.require_complete().is_ok());
        // already cleared
        assert_eq!(history.evict(&[HeavyField::Events]), 0);
    }

    #[test]
    fn genesis_is_never_evicted() {
        let mut history = History::new(RunId(1), state(0));
        assert_eq!(history.evict(&HeavyField::ALL), 0);
        assert!(history.initial().unwrap().state.require_complete().is_ok());
    }
}
