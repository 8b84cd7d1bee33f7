// 7.0 config.rs: every knob of a run in one serde record. each section's params type
// lives beside the code that reads it; this file only groups them, names presets and
// checks the combination is consistent.

use crate::agents::leverager::LeveragerParams;
use crate::agents::price_traders::PriceTraderParams;
use crate::agents::rate_traders::RateTraderParams;
use crate::agents::CapitalParams;
use crate::amm::AmmParams;
use crate::cdp::CdpParams;
use crate::controller::{ControllerParams, ErrorTerm, IntegralType, RateLaw};
use crate::exogenous::ExogenousParams;
use crate::market::LiquidityDemandParams;
use crate::oracle::{FeedParams, OracleParams};
use crate::state::HeavyField;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeParams {
    /// wall clock at timestep 0
    pub start: NaiveDateTime,
}

impl Default for TimeParams {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2018, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
        }
    }
}

/** 7.1: run administration. seeding and memory */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminParams {
    pub seed: u64,
    /// heavy fields dropped from all but the last snapshot of each finished timestep
    pub free_memory_states: Vec<HeavyField>,
}

impl Default for AdminParams {
    fn default() -> Self {
        Self {
            seed: 0,
            free_memory_states: vec![HeavyField::Events, HeavyField::Oracle],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub time: TimeParams,
    pub controller: ControllerParams,
    pub cdp: CdpParams,
    pub amm: AmmParams,
    pub oracle: OracleParams,
    pub feed: FeedParams,
    pub rate_traders: RateTraderParams,
    pub price_traders: PriceTraderParams,
    pub leverager: LeveragerParams,
    pub liquidity_demand: LiquidityDemandParams,
    pub capital: CapitalParams,
    pub admin: AdminParams,
    pub exogenous: ExogenousParams,
}

impl SimulationConfig {
    /// Launch parameters: proportional-only controller with a leaky integral,
    /// rate traders and the leverager active.
    pub fn rai_launch() -> Self {
        Self::default()
    }

    /// Full PI controller on a four hour cadence with a 120 day integral half life.
    pub fn pi_controller() -> Self {
        let mut config = Self::default();
        config.controller.kp = dec!(0.00000005);
        config.controller.ki = dec!(0.0000000000001);
        // (0.5)^(1/(120 days)) in RAY
        config.controller.alpha = dec!(999999933150545440563970120);
        config.controller.integral_type = IntegralType::Leaky;
        config.controller.rate_law = RateLaw::Absolute;
        config.controller.error_term = ErrorTerm::TargetMinusMarket;
        config
    }

    /// Controller off: the target never moves and the peg is left to traders.
    pub fn no_controller() -> Self {
        let mut config = Self::default();
        config.controller.enabled = false;
        config.cdp.min_redemption_rate = None;
        config.cdp.max_redemption_rate = None;
        config
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.oracle
            .validate()
            .map_err(|e| ConfigError::InvalidOracle { reason: e.to_string() })?;

        // controller period must land on timestep boundaries
        if let Some(step) = self.exogenous.seconds_passed.as_constant() {
            let step = step.to_u64().filter(|s| *s > 0).ok_or_else(|| ConfigError::InvalidTime {
                reason: format!("timestep of {step} seconds"),
            })?;
            if self.controller.control_period % step != 0 {
                return Err(ConfigError::InvalidController {
                    reason: format!(
                        "control period {} is not a multiple of the {step}s timestep",
                        self.controller.control_period
                    ),
                });
            }
        }

        if self.cdp.liquidation_ratio <= Decimal::ZERO || self.cdp.liquidation_buffer <= Decimal::ZERO {
            return Err(ConfigError::InvalidCdp {
                reason: "liquidation ratio and buffer must be positive".to_string(),
            });
        }
        if let (Some(min), Some(max)) = (self.cdp.min_redemption_rate, self.cdp.max_redemption_rate) {
            if min > max {
                return Err(ConfigError::InvalidCdp {
                    reason: format!("redemption rate floor {min} above cap {max}"),
                });
            }
        }

        if self.amm.fee < Decimal::ZERO || self.amm.fee >= Decimal::ONE {
            return Err(ConfigError::InvalidAmm {
                reason: format!("fee {} outside [0, 1)", self.amm.fee),
            });
        }
        if self.amm.initial_rai_reserve <= Decimal::ZERO {
            return Err(ConfigError::InvalidAmm {
                reason: "initial RAI reserve must be positive".to_string(),
            });
        }

        let bands = [
            ("rate trader band", self.rate_traders.band),
            ("rate trader days", self.rate_traders.days),
            ("price trader band", self.price_traders.band),
        ];
        for (name, band) in bands {
            if band.std < 0.0 {
                return Err(ConfigError::InvalidAgents {
                    reason: format!("{name} has negative std {}", band.std),
                });
            }
            if band.min > band.mean {
                return Err(ConfigError::InvalidAgents {
                    reason: format!("{name} min {} above mean {}", band.min, band.mean),
                });
            }
        }

        if self.leverager.min_collateral_ratio > self.leverager.max_collateral_ratio {
            return Err(ConfigError::InvalidAgents {
                reason: format!(
                    "leverager min ratio {} above max {}",
                    self.leverager.min_collateral_ratio, self.leverager.max_collateral_ratio
                ),
            });
        }

        Ok(())
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid oracle config: {reason}")]
    InvalidOracle { reason: String },

    #[error("Invalid time config: {reason}")]
    InvalidTime { reason: String },

    #[error("Invalid controller config: {reason}")]
    InvalidController { reason: String },

    #[error("Invalid CDP config: {reason}")]
    InvalidCdp { reason: String },

    #[error("Invalid AMM config: {reason}")]
    InvalidAmm { reason: String },

    #[error("Invalid agent config: {reason}")]
    InvalidAgents { reason: String },

    #[error("Config parse error: {0}")]
    Parse(String),
}

// Named presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    RaiLaunch,
    PiController,
    NoController,
}

impl Preset {
    pub fn config(&self) -> SimulationConfig {
        match self {
            Preset::RaiLaunch => SimulationConfig::rai_launch(),
            Preset::PiController => SimulationConfig::pi_controller(),
            Preset::NoController => SimulationConfig::no_controller(),
        }
    }
}
