// 1.0: all the primitives live here. ids, time, owners, unit constants.
// the engine is pure Decimal math, so the helpers for tolerances and powers sit here too.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds since simulation start.
pub type Seconds = u64;

/// Monte Carlo run index, 1-based like the exogenous tables it indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestep(pub u64);

impl Timestep {
    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn is_first(&self) -> bool {
        self.0 == 1
    }
}

impl fmt::Display for Timestep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable index into the position arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionId(pub u64);

// 1.1: which agent class controls a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Owner {
    DebtMarket,
    Leverager,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::DebtMarket => write!(f, "debt_market"),
            Owner::Leverager => write!(f, "leverager"),
        }
    }
}

// 1.2: unit constants.
pub const SECONDS_PER_DAY: Seconds = 86_400;
pub const SECONDS_PER_YEAR: Seconds = 31_536_000;

/// 10^27, the fixed-point unit the leaky integral alpha is quoted in.
pub fn ray() -> Decimal {
    Decimal::from_i128_with_scale(1_000_000_000_000_000_000_000_000_000, 0)
}

/// Tolerance under which a computed CDP delta counts as numerical noise.
pub const DELTA_TOLERANCE: Decimal = dec!(0.001);

/// Tolerance for aggregate collateral/debt non-negativity.
pub const AGGREGATE_TOLERANCE: Decimal = dec!(0.01);

// 1.3: `value >= 0` up to an absolute tolerance.
pub fn approx_ge_zero(value: Decimal, abs_tol: Decimal) -> bool {
    value >= -abs_tol
}

/// Checked `base^exp`. integral exponents take the exact powi path.
pub fn checked_pow(base: Decimal, exp: Decimal) -> Option<Decimal> {
    if exp.fract().is_zero() {
        if let Some(n) = exp.to_i64() {
            return base.checked_powi(n);
        }
    }
    if base <= Decimal::ZERO {
        return None;
    }
    base.checked_powd(exp)
}

/// Decimal from a sampled f64. NaN and infinities have no Decimal form.
pub fn decimal_from_f64(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerance_accepts_small_negative() {
        assert!(approx_ge_zero(dec!(-0.0005), DELTA_TOLERANCE));
        assert!(!approx_ge_zero(dec!(-0.002), DELTA_TOLERANCE));
        assert!(approx_ge_zero(Decimal::ZERO, DELTA_TOLERANCE));
    }

    #[test]
    fn integral_powers_are_exact() {
        assert_eq!(checked_pow(dec!(1.1), dec!(2)), Some(dec!(1.21)));
        assert_eq!(checked_pow(dec!(-2), dec!(3)), Some(dec!(-8)));
    }

    #[test]
    fn fractional_power_of_negative_is_none() {
        assert!(checked_pow(dec!(-2), dec!(0.5)).is_none());
    }

    #[test]
    fn ray_is_ten_to_the_27() {
        assert_eq!(ray() / dec!(1_000_000_000), dec!(1_000_000_000_000_000_000));
    }
}
