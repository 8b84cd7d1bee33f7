//! Exogenous inputs: ETH price, timestep length, stability fee and the
//! liquidity demand percentages.
//!
//! Every input is a [`Series`] resolved once per `(run, timestep)` before any
//! stage runs. Tables are indexed `[run - 1][timestep]`. Generators build
//! seeded tables for Monte Carlo work.

use crate::types::{decimal_from_f64, RunId, Seconds};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::f64::consts::E;
use std::fmt;
use std::sync::Arc;

/// `(1.02)^(1/SPY) - 1`, a 2% APY per-second stability fee.
pub const DEFAULT_STABILITY_FEE: Decimal = dec!(0.0000000006279371924910298110);

pub type SeriesFn = Arc<dyn Fn(RunId, u64) -> Decimal + Send + Sync>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SeriesError {
    #[error("{series} has no value for run {run} at timestep {timestep}")]
    Missing {
        series: &'static str,
        run: u32,
        timestep: u64,
    },

    #[error("{series} value {value} at timestep {timestep} is not usable")]
    Invalid {
        series: &'static str,
        value: Decimal,
        timestep: u64,
    },

    #[error("Invalid distribution: {0}")]
    Distribution(String),
}

#[derive(Clone, Serialize, Deserialize)]
pub enum Series {
    Constant(Decimal),
    Table(Vec<Vec<Decimal>>),
    /// not serializable, rebuild after loading a config
    #[serde(skip)]
    Function(SeriesFn),
}

impl fmt::Debug for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Series::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Series::Table(cols) => f
                .debug_struct("Table")
                .field("runs", &cols.len())
                .field("len", &cols.first().map(|c| c.len()).unwrap_or(0))
                .finish(),
            Series::Function(_) => f.write_str("Function(..)"),
        }
    }
}

impl Series {
    pub fn function(f: impl Fn(RunId, u64) -> Decimal + Send + Sync + 'static) -> Self {
        Series::Function(Arc::new(f))
    }

    pub fn value(&self, run: RunId, timestep: u64) -> Option<Decimal> {
        match self {
            Series::Constant(v) => Some(*v),
            Series::Table(cols) => {
                let col = cols.get((run.0 as usize).checked_sub(1)?)?;
                col.get(timestep as usize).copied()
            }
            Series::Function(f) => Some(f(run, timestep)),
        }
    }

    pub fn as_constant(&self) -> Option<Decimal> {
        match self {
            Series::Constant(v) => Some(*v),
            _ => None,
        }
    }

    fn resolve(&self, name: &'static str, run: RunId, timestep: u64) -> Result<Decimal, SeriesError> {
        self.value(run, timestep).ok_or(SeriesError::Missing {
            series: name,
            run: run.0,
            timestep,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExogenousParams {
    pub eth_price: Series,
    /// seconds between timesteps
    pub seconds_passed: Series,
    pub stability_fee: Series,
    pub token_swap_pct: Series,
    pub liquidity_demand_pct: Series,
}

impl Default for ExogenousParams {
    fn default() -> Self {
        Self {
            eth_price: Series::Constant(dec!(300)),
            seconds_passed: Series::Constant(dec!(3600)),
            stability_fee: Series::Constant(DEFAULT_STABILITY_FEE),
            token_swap_pct: Series::Constant(Decimal::ZERO),
            liquidity_demand_pct: Series::Constant(Decimal::ZERO),
        }
    }
}

/// One timestep worth of resolved inputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExogenousInputs {
    pub eth_price: Decimal,
    pub seconds_passed: Seconds,
    pub stability_fee: Decimal,
    pub token_swap_pct: Decimal,
    pub liquidity_demand_pct: Decimal,
}

impl ExogenousParams {
    pub fn resolve(&self, run: RunId, timestep: u64) -> Result<ExogenousInputs, SeriesError> {
        let eth_price = self.eth_price.resolve("eth_price", run, timestep)?;
        if eth_price <= Decimal::ZERO {
            return Err(SeriesError::Invalid {
                series: "eth_price",
                value: eth_price,
                timestep,
            });
        }

        let seconds = self.seconds_passed.resolve("seconds_passed", run, timestep)?;
        let seconds_passed = seconds
            .to_u64()
            .filter(|s| *s > 0 && seconds.fract().is_zero())
            .ok_or(SeriesError::Invalid {
                series: "seconds_passed",
                value: seconds,
                timestep,
            })?;

        Ok(ExogenousInputs {
            eth_price,
            seconds_passed,
            stability_fee: self.stability_fee.resolve("stability_fee", run, timestep)?,
            token_swap_pct: self.token_swap_pct.resolve("token_swap_pct", run, timestep)?,
            liquidity_demand_pct: self
                .liquidity_demand_pct
                .resolve("liquidity_demand_pct", run, timestep)?,
        })
    }
}

// generators

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GbmParams {
    pub initial: f64,
    /// annual drift
    pub drift: f64,
    /// annual volatility
    pub volatility: f64,
    /// seconds per step
    pub step_seconds: u64,
}

impl Default for GbmParams {
    fn default() -> Self {
        Self {
            initial: 300.0,
            drift: 0.0,
            volatility: 0.8,
            step_seconds: 3600,
        }
    }
}

/// Geometric Brownian motion, one path per run, `timesteps + 1` points each.
pub fn gbm_paths(
    params: &GbmParams,
    runs: u32,
    timesteps: u64,
    seed: u64,
) -> Result<Series, SeriesError> {
    let normal = Normal::new(0.0, 1.0).map_err(|e| SeriesError::Distribution(e.to_string()))?;
    let dt = params.step_seconds as f64 / crate::types::SECONDS_PER_YEAR as f64;
    let drift = (params.drift - 0.5 * params.volatility.powi(2)) * dt;
    let shock = params.volatility * dt.sqrt();

    let mut columns = Vec::with_capacity(runs as usize);
    for run in 0..runs {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(run as u64));
        let mut price = params.initial;
        let mut column = Vec::with_capacity(timesteps as usize + 1);
        column.push(to_decimal("eth_price", price, 0)?);

        for t in 1..=timesteps {
            let z: f64 = normal.sample(&mut rng);
            price *= E.powf(drift + shock * z);
            column.push(to_decimal("eth_price", price, t)?);
        }
        columns.push(column);
    }
    Ok(Series::Table(columns))
}

/// i.i.d. normal draws, e.g. percentage liquidity events.
pub fn normal_events(
    mean: f64,
    std: f64,
    runs: u32,
    timesteps: u64,
    seed: u64,
) -> Result<Series, SeriesError> {
    let normal = Normal::new(mean, std).map_err(|e| SeriesError::Distribution(e.to_string()))?;

    let mut columns = Vec::with_capacity(runs as usize);
    for run in 0..runs {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(run as u64));
        let column = (0..=timesteps)
            .map(|t| to_decimal("normal_events", normal.sample(&mut rng), t))
            .collect::<Result<Vec<_>, _>>()?;
        columns.push(column);
    }
    Ok(Series::Table(columns))
}

fn to_decimal(series: &'static str, value: f64, timestep: u64) -> Result<Decimal, SeriesError> {
    decimal_from_f64(value).ok_or(SeriesError::Invalid {
        series,
        value: Decimal::ZERO,
        timestep,
    })
}
