// 4.0 controller.rs: redemption rate controller.
// 4.1 error observation, 4.2 integral, 4.3 rate laws, 4.4 target price, 4.5 APY conversions.
// errors are in BASE, the integral in BASE * seconds, rates are per second.

use crate::types::{checked_pow, ray, Seconds, SECONDS_PER_YEAR};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControllerError {
    #[error("Target price overflow: price={target_price}, rate={target_rate}, timedelta={timedelta}")]
    TargetOverflow {
        target_price: Decimal,
        target_rate: Decimal,
        timedelta: Seconds,
    },

    #[error("Integral decay overflow: alpha={alpha}, timedelta={timedelta}")]
    IntegralOverflow { alpha: Decimal, timedelta: Seconds },

    #[error("Rate conversion overflow: {0}")]
    RateConversion(Decimal),
}

/// Which side the error is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorTerm {
    TargetMinusMarket,
    MarketMinusTarget,
}

impl ErrorTerm {
    pub fn apply(&self, target: Decimal, market: Decimal) -> Decimal {
        match self {
            ErrorTerm::TargetMinusMarket => target - market,
            ErrorTerm::MarketMinusTarget => market - target,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegralType {
    /// past area decays by (alpha / RAY)^dt
    Leaky,
    Standard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateLaw {
    /// rate = kp*e + ki*I + kd*de
    Absolute,
    /// rate += kp*e + ki*I + kd*de
    Incremental,
    /// rate moves by khow * control_period toward closing the error
    Step,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerParams {
    pub enabled: bool,
    pub kp: Decimal,
    pub ki: Decimal,
    pub kd: Decimal,
    pub khow: Decimal,
    /// leak factor quoted in 1/RAY
    pub alpha: Decimal,
    pub control_period: Seconds,
    pub enable_controller_time: Seconds,
    pub rate_law: RateLaw,
    pub integral_type: IntegralType,
    pub error_term: ErrorTerm,
    /// compare the market against target * liquidation ratio
    pub rescale_target_price: bool,
    /// timesteps back for the derivative term
    pub derivative_lag: usize,
    pub initial_target_price: Decimal,
    pub initial_target_rate: Decimal,
}

impl Default for ControllerParams {
    fn default() -> Self {
        Self {
            enabled: true,
            kp: dec!(0.00000005),
            ki: Decimal::ZERO,
            kd: Decimal::ZERO,
            khow: Decimal::ZERO,
            alpha: Decimal::ZERO,
            control_period: 4 * 3600,
            enable_controller_time: 7 * 24 * 3600,
            rate_law: RateLaw::Absolute,
            integral_type: IntegralType::Leaky,
            error_term: ErrorTerm::TargetMinusMarket,
            rescale_target_price: false,
            derivative_lag: 4,
            initial_target_price: dec!(3.14),
            initial_target_rate: Decimal::ZERO,
        }
    }
}

impl ControllerParams {
    /// Governance gate: switched on in config and past the warm-up.
    pub fn is_enabled(&self, cumulative_time: Seconds) -> bool {
        self.enabled && cumulative_time >= self.enable_controller_time
    }

    pub fn is_control_tick(&self, cumulative_time: Seconds) -> bool {
        self.control_period > 0 && cumulative_time % self.control_period == 0
    }
}

/// The controller's slice of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    pub target_price: Decimal,
    pub target_rate: Decimal,
    pub error: Decimal,
    pub prev_error: Decimal,
    pub error_integral: Decimal,
}

// 4.1: zero twap means no market observation yet.
pub fn observe_error(
    params: &ControllerParams,
    target_price: Decimal,
    market_twap: Decimal,
    liquidation_ratio: Decimal,
) -> Decimal {
    if market_twap.is_zero() {
        return Decimal::ZERO;
    }
    let target = if params.rescale_target_price {
        target_price * liquidation_ratio
    } else {
        target_price
    };
    params.error_term.apply(target, market_twap)
}

// 4.2: trapezoid rule over one timestep, suppressed during warm-up.
pub fn update_integral(
    params: &ControllerParams,
    integral: Decimal,
    old_error: Decimal,
    new_error: Decimal,
    timedelta: Seconds,
    cumulative_time: Seconds,
) -> Result<Decimal, ControllerError> {
    if cumulative_time < params.enable_controller_time {
        return Ok(Decimal::ZERO);
    }

    let area = (old_error + new_error) / Decimal::TWO * Decimal::from(timedelta);

    match params.integral_type {
        IntegralType::Leaky => {
            let remaining = remaining_fraction(params.alpha, timedelta)?;
            Ok(remaining * integral + area)
        }
        IntegralType::Standard => Ok(integral + area),
    }
}

/// `(alpha / RAY)^dt`, the share of the old integral that survives `dt` seconds.
pub fn remaining_fraction(alpha: Decimal, timedelta: Seconds) -> Result<Decimal, ControllerError> {
    checked_pow(alpha / ray(), Decimal::from(timedelta))
        .ok_or(ControllerError::IntegralOverflow { alpha, timedelta })
}

// 4.3
const STEP_RATE_BOUND: Decimal = dec!(1.999999999999999);

pub fn update_target_rate(
    params: &ControllerParams,
    state: &ControllerState,
    cumulative_time: Seconds,
    enabled: bool,
) -> Decimal {
    if !enabled {
        return Decimal::ZERO;
    }
    if !params.is_control_tick(cumulative_time) {
        return state.target_rate;
    }

    let pid = params.kp * state.error
        + params.ki * state.error_integral
        + params.kd * (state.error - state.prev_error);

    match params.rate_law {
        RateLaw::Absolute => pid,
        RateLaw::Incremental => state.target_rate + pid,
        RateLaw::Step => {
            let delta = params.khow * Decimal::from(params.control_period);
            let rate = if state.error > Decimal::ZERO {
                state.target_rate + delta
            } else if state.error < Decimal::ZERO {
                state.target_rate - delta
            } else {
                state.target_rate
            };
            rate.clamp(-STEP_RATE_BOUND, STEP_RATE_BOUND)
        }
    }
}

// 4.4: compounding, floored at zero. overflow is fatal.
pub fn update_target_price(
    target_price: Decimal,
    target_rate: Decimal,
    timedelta: Seconds,
) -> Result<Decimal, ControllerError> {
    let overflow = || ControllerError::TargetOverflow {
        target_price,
        target_rate,
        timedelta,
    };
    let growth = checked_pow(Decimal::ONE + target_rate, Decimal::from(timedelta)).ok_or_else(overflow)?;
    let next = target_price.checked_mul(growth).ok_or_else(overflow)?;

    Ok(next.max(Decimal::ZERO))
}

// 4.5
/// Per-second rate that compounds to `apy` percent over a year.
pub fn apy_to_target_rate(apy: Decimal) -> Result<Decimal, ControllerError> {
    let base = Decimal::ONE + apy / Decimal::ONE_HUNDRED;
    let exp = Decimal::ONE / Decimal::from(SECONDS_PER_YEAR);
    checked_pow(base, exp)
        .map(|g| g - Decimal::ONE)
        .ok_or(ControllerError::RateConversion(apy))
}

/// Annual percentage yield of a per-second rate.
pub fn target_rate_to_apy(rate: Decimal) -> Result<Decimal, ControllerError> {
    checked_pow(Decimal::ONE + rate, Decimal::from(SECONDS_PER_YEAR))
        .map(|g| (g - Decimal::ONE) * Decimal::ONE_HUNDRED)
        .ok_or(ControllerError::RateConversion(rate))
}

/// Market price at which a proportional-only controller would output the
/// rate for `apy`: solving `rate = kp * (target - market)` for market.
pub fn market_price_for_apy(
    apy: Decimal,
    target_price: Decimal,
    kp: Decimal,
) -> Result<Decimal, ControllerError> {
    let rate = apy_to_target_rate(apy)?;
    Ok(target_price - rate / kp)
}
