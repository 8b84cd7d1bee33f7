// 8.1 stage.rs: typed stages.
// a stage runs its policies against one snapshot, merges their outputs into a single
// PolicyInput, then runs every update against that same snapshot and input. updates
// never see each other's results; the stepper applies them together afterwards.

use super::history::History;
use super::results::SimError;
use crate::agents::population::TraderPopulation;
use crate::amm::PoolDelta;
use crate::config::SimulationConfig;
use crate::events::EventPayload;
use crate::exogenous::ExogenousInputs;
use crate::ledger::CdpLedger;
use crate::market::LiquidityEvent;
use crate::oracle::{FeedAnswer, TwapOracle};
use crate::state::{Field, FieldUpdate, HeavyField, SimState};
use crate::types::{RunId, Seconds, Timestep};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use std::sync::Arc;

pub type PolicyFn = fn(&StepContext<'_>) -> Result<PolicyInput, SimError>;
pub type UpdateFn = fn(&StepContext<'_>, &PolicyInput) -> Result<FieldUpdate, SimError>;

/// Controller error observed this timestep, with the lagged one beside it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorObservation {
    pub error: Decimal,
    pub prev_error: Decimal,
}

// 8.1.1: merged policy output. pool deltas and events add up across policies;
// every other slot may be written by one policy only.
#[derive(Debug, Clone, Default)]
pub struct PolicyInput {
    pub pool_delta: PoolDelta,
    pub events: Vec<EventPayload>,

    pub timedelta: Option<Seconds>,
    pub delta_eth_price: Option<Decimal>,
    pub liquidity_event: Option<LiquidityEvent>,
    pub rate_traders: Option<Arc<TraderPopulation>>,
    pub price_traders: Option<Arc<TraderPopulation>>,
    pub cdps: Option<Arc<CdpLedger>>,
    pub accrued_interest: Option<Decimal>,
    pub spot_market_price: Option<Decimal>,
    pub feed: Option<FeedAnswer>,
    pub oracle: Option<Arc<TwapOracle>>,
    pub errors: Option<ErrorObservation>,
    pub controller_enabled: Option<bool>,
}

fn merge_slot<T>(
    slot: &mut Option<T>,
    value: Option<T>,
    key: &'static str,
    policy: &'static str,
) -> Result<(), SimError> {
    match (slot.is_some(), value) {
        (true, Some(_)) => Err(SimError::ConflictingPolicyOutput { key, policy }),
        (false, Some(v)) => {
            *slot = Some(v);
            Ok(())
        }
        (_, None) => Ok(()),
    }
}

impl PolicyInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: PolicyInput, policy: &'static str) -> Result<(), SimError> {
        self.pool_delta += other.pool_delta;
        self.events.extend(other.events);

        merge_slot(&mut self.timedelta, other.timedelta, "timedelta", policy)?;
        merge_slot(&mut self.delta_eth_price, other.delta_eth_price, "delta_eth_price", policy)?;
        merge_slot(&mut self.liquidity_event, other.liquidity_event, "liquidity_event", policy)?;
        merge_slot(&mut self.rate_traders, other.rate_traders, "rate_traders", policy)?;
        merge_slot(&mut self.price_traders, other.price_traders, "price_traders", policy)?;
        merge_slot(&mut self.cdps, other.cdps, "cdps", policy)?;
        merge_slot(&mut self.accrued_interest, other.accrued_interest, "accrued_interest", policy)?;
        merge_slot(&mut self.spot_market_price, other.spot_market_price, "spot_market_price", policy)?;
        merge_slot(&mut self.feed, other.feed, "feed", policy)?;
        merge_slot(&mut self.oracle, other.oracle, "oracle", policy)?;
        merge_slot(&mut self.errors, other.errors, "errors", policy)?;
        merge_slot(&mut self.controller_enabled, other.controller_enabled, "controller_enabled", policy)?;
        Ok(())
    }
}

/// Read-only view handed to every policy and update.
pub struct StepContext<'a> {
    pub config: &'a SimulationConfig,
    pub state: &'a SimState,
    /// finished timesteps only
    pub history: &'a History,
    pub run: RunId,
    pub timestep: Timestep,
    pub substep: usize,
    pub exogenous: &'a ExogenousInputs,
}

impl StepContext<'_> {
    /// Generator for one random process of this step. Same seed, run, timestep
    /// and salt give the same stream.
    pub fn rng(&self, salt: u64) -> StdRng {
        let mut h = self.config.admin.seed;
        for part in [u64::from(self.run.0), self.timestep.value(), salt] {
            h = splitmix(h ^ part);
        }
        StdRng::seed_from_u64(h)
    }
}

fn splitmix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[derive(Clone, Copy)]
pub struct Policy {
    pub name: &'static str,
    pub f: PolicyFn,
}

#[derive(Clone, Copy)]
pub struct StateUpdate {
    pub field: Field,
    pub f: UpdateFn,
}

#[derive(Clone)]
pub struct Stage {
    pub label: &'static str,
    pub policies: Vec<Policy>,
    pub updates: Vec<StateUpdate>,
    /// heavy fields dropped from older snapshots before this stage runs
    pub evict: Vec<HeavyField>,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("label", &self.label)
            .field("policies", &self.policies.iter().map(|p| p.name).collect::<Vec<_>>())
            .field("updates", &self.updates.iter().map(|u| u.field).collect::<Vec<_>>())
            .field("evict", &self.evict)
            .finish()
    }
}

/// Which part of a stage failed.
#[derive(Debug, Clone, PartialEq)]
pub struct StageError {
    pub field: Option<Field>,
    pub error: SimError,
}

impl From<SimError> for StageError {
    fn from(error: SimError) -> Self {
        Self { field: None, error }
    }
}

impl Stage {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            policies: Vec::new(),
            updates: Vec::new(),
            evict: Vec::new(),
        }
    }

    pub fn policy(mut self, name: &'static str, f: PolicyFn) -> Self {
        self.policies.push(Policy { name, f });
        self
    }

    pub fn update(mut self, field: Field, f: UpdateFn) -> Self {
        self.updates.push(StateUpdate { field, f });
        self
    }

    pub fn evicting(mut self, fields: Vec<HeavyField>) -> Self {
        self.evict = fields;
        self
    }

    /// Run policies then updates against `ctx.state`. `preset` seeds the merged
    /// input before any policy contributes.
    pub fn execute(&self, ctx: &StepContext<'_>, preset: PolicyInput) -> Result<Vec<FieldUpdate>, StageError> {
        let mut input = preset;
        for policy in &self.policies {
            let output = (policy.f)(ctx)?;
            input.merge(output, policy.name)?;
        }

        let mut updates = Vec::with_capacity(self.updates.len());
        for update in &self.updates {
            let value = (update.f)(ctx, &input).map_err(|error| StageError {
                field: Some(update.field),
                error,
            })?;
            if value.field() != update.field {
                return Err(StageError {
                    field: Some(update.field),
                    error: SimError::FieldMismatch {
                        expected: update.field,
                        got: value.field(),
                    },
                });
            }
            updates.push(value);
        }
        Ok(updates)
    }
}
