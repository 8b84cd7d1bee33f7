//! Collateralized debt positions.
//!
//! A position locks ETH collateral and draws RAI debt. Voluntary repayment
//! (wipe/free) and liquidation (bite) are tracked separately so the audit
//! trail keeps both. This module holds the per-position math: ratio checks,
//! the four to-ratio solvers, opening at a ratio, interest and liquidation.

use crate::types::{approx_ge_zero, checked_pow, Owner, PositionId, DELTA_TOLERANCE};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CdpError {
    #[error("Invalid CDP transaction: {op} = {value}")]
    InvalidTransaction { op: &'static str, value: Decimal },

    #[error("Position {0:?} is closed")]
    PositionClosed(PositionId),

    #[error("Position {0:?} not found")]
    UnknownPosition(PositionId),

    #[error("Interest accrual overflowed: fee={stability_fee}, timedelta={timedelta}")]
    InterestOverflow {
        stability_fee: Decimal,
        timedelta: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdpParams {
    pub liquidation_ratio: Decimal,
    /// multiple of the liquidation ratio that position managers aim for
    pub liquidation_buffer: Decimal,
    pub liquidation_penalty: Decimal,
    /// exponent on the per-second stability fee
    pub rate_adjustment: Decimal,
    /// redemption rate bounds in APY percent; None leaves that side unbounded
    pub min_redemption_rate: Option<Decimal>,
    pub max_redemption_rate: Option<Decimal>,
    pub liquidations_enabled: bool,
    pub liquidity_cdp_count: usize,
}

impl Default for CdpParams {
    fn default() -> Self {
        Self {
            liquidation_ratio: dec!(1.45),
            liquidation_buffer: dec!(2.0),
            liquidation_penalty: Decimal::ZERO,
            rate_adjustment: Decimal::ONE,
            min_redemption_rate: Some(dec!(-50)),
            max_redemption_rate: Some(dec!(50)),
            liquidations_enabled: true,
            liquidity_cdp_count: 100,
        }
    }
}

impl CdpParams {
    /// Ratio position managers rebalance to.
    pub fn buffered_ratio(&self) -> Decimal {
        self.liquidation_ratio * self.liquidation_buffer
    }
}

/// ETH and redemption price, both in BASE.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePair {
    pub eth_price: Decimal,
    pub target_price: Decimal,
}

impl PricePair {
    pub fn new(eth_price: Decimal, target_price: Decimal) -> Self {
        Self {
            eth_price,
            target_price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub owner: Owner,
    pub open: bool,
    pub opened_at: u64,
    pub locked: Decimal,
    pub drawn: Decimal,
    pub wiped: Decimal,
    pub freed: Decimal,
    /// accrued interest wiped
    pub w_wiped: Decimal,
    /// total interest accrued
    pub dripped: Decimal,
    /// collateral seized by liquidation
    pub v_bitten: Decimal,
    /// principal written off by liquidation
    pub u_bitten: Decimal,
    /// interest written off by liquidation
    pub w_bitten: Decimal,
}

impl Position {
    pub fn new(id: PositionId, owner: Owner, terms: OpenTerms, opened_at: u64) -> Self {
        Self {
            id,
            owner,
            open: true,
            opened_at,
            locked: terms.locked,
            drawn: terms.drawn,
            wiped: Decimal::ZERO,
            freed: Decimal::ZERO,
            w_wiped: Decimal::ZERO,
            dripped: Decimal::ZERO,
            v_bitten: Decimal::ZERO,
            u_bitten: Decimal::ZERO,
            w_bitten: Decimal::ZERO,
        }
    }

    pub fn net_collateral(&self) -> Decimal {
        self.locked - self.freed - self.v_bitten
    }

    pub fn net_debt(&self) -> Decimal {
        self.drawn - self.wiped - self.u_bitten
    }

    /// collateral value over debt value, None without debt
    pub fn collateral_ratio(&self, prices: PricePair) -> Option<Decimal> {
        let debt_value = self.net_debt() * prices.target_price;
        if debt_value <= Decimal::ZERO {
            return None;
        }
        Some(self.net_collateral() * prices.eth_price / debt_value)
    }

    pub fn is_above(&self, prices: PricePair, ratio: Decimal) -> bool {
        self.net_collateral() * prices.eth_price
            >= self.net_debt() * prices.target_price * ratio
    }

    pub fn is_liquidatable(&self, prices: PricePair, ratio: Decimal) -> bool {
        self.open && !self.is_above(prices, ratio)
    }

    fn ensure_open(&self) -> Result<(), CdpError> {
        if self.open {
            Ok(())
        } else {
            Err(CdpError::PositionClosed(self.id))
        }
    }

    pub fn draw(&mut self, amount: Decimal) -> Result<(), CdpError> {
        self.ensure_open()?;
        non_negative("draw", amount)?;
        self.drawn += amount;
        Ok(())
    }

    pub fn wipe(&mut self, amount: Decimal) -> Result<(), CdpError> {
        self.ensure_open()?;
        non_negative("wipe", amount)?;
        if amount > self.net_debt() {
            return Err(CdpError::InvalidTransaction {
                op: "wipe",
                value: amount,
            });
        }
        self.wiped += amount;
        Ok(())
    }

    pub fn lock(&mut self, amount: Decimal) -> Result<(), CdpError> {
        self.ensure_open()?;
        non_negative("lock", amount)?;
        self.locked += amount;
        Ok(())
    }

    pub fn free(&mut self, amount: Decimal) -> Result<(), CdpError> {
        self.ensure_open()?;
        non_negative("free", amount)?;
        if amount > self.net_collateral() {
            return Err(CdpError::InvalidTransaction {
                op: "free",
                value: amount,
            });
        }
        self.freed += amount;
        Ok(())
    }

    /// Add interest for `timedelta` seconds on the outstanding principal.
    /// Returns the interest added this call.
    pub fn accrue(
        &mut self,
        stability_fee: Decimal,
        rate_adjustment: Decimal,
        timedelta: u64,
    ) -> Result<Decimal, CdpError> {
        if !self.open {
            return Ok(Decimal::ZERO);
        }
        let interest = accrue_interest(
            self.net_debt(),
            stability_fee,
            rate_adjustment,
            timedelta,
            self.dripped,
        )?;
        self.dripped += interest;
        Ok(interest)
    }
}

fn non_negative(op: &'static str, value: Decimal) -> Result<(), CdpError> {
    if value < Decimal::ZERO {
        return Err(CdpError::InvalidTransaction { op, value });
    }
    Ok(())
}

// small negatives are numerical drift, anything past the tolerance is a bad transaction
fn clamp_delta(op: &'static str, value: Decimal) -> Result<Decimal, CdpError> {
    if !approx_ge_zero(value, DELTA_TOLERANCE) {
        return Err(CdpError::InvalidTransaction { op, value });
    }
    Ok(value.max(Decimal::ZERO))
}

// 3.1: exact deltas that bring a position to `ratio`. every solver needs both prices
// and the ratio strictly positive.

fn priced(op: &'static str, prices: PricePair, ratio: Decimal) -> Result<(), CdpError> {
    let floor = prices.eth_price.min(prices.target_price).min(ratio);
    if floor <= Decimal::ZERO {
        return Err(CdpError::InvalidTransaction { op, value: floor });
    }
    Ok(())
}

/// RAI to repay so the position sits at `ratio`.
pub fn wipe_to_ratio(
    position: &Position,
    prices: PricePair,
    ratio: Decimal,
) -> Result<Decimal, CdpError> {
    priced("wipe", prices, ratio)?;
    let wipe = position.net_debt()
        - position.net_collateral() * prices.eth_price / (ratio * prices.target_price);
    let wipe = clamp_delta("wipe", wipe)?;

    if position.drawn <= position.wiped + wipe + position.u_bitten {
        return Ok(Decimal::ZERO);
    }
    Ok(wipe)
}

/// RAI that can still be drawn at `ratio`.
pub fn draw_to_ratio(
    position: &Position,
    prices: PricePair,
    ratio: Decimal,
) -> Result<Decimal, CdpError> {
    priced("draw", prices, ratio)?;
    let draw = position.net_collateral() * prices.eth_price / (prices.target_price * ratio)
        - position.net_debt();
    clamp_delta("draw", draw)
}

/// ETH to add so the position sits at `ratio`.
pub fn lock_to_ratio(
    position: &Position,
    prices: PricePair,
    ratio: Decimal,
) -> Result<Decimal, CdpError> {
    priced("lock", prices, ratio)?;
    let lock = (position.net_debt() * prices.target_price * ratio
        - position.net_collateral() * prices.eth_price)
        / prices.eth_price;
    clamp_delta("lock", lock)
}

/// ETH that can be withdrawn at `ratio`.
pub fn free_to_ratio(
    position: &Position,
    prices: PricePair,
    ratio: Decimal,
) -> Result<Decimal, CdpError> {
    priced("free", prices, ratio)?;
    let free = (position.net_collateral() * prices.eth_price
        - ratio * position.net_debt() * prices.target_price)
        / prices.eth_price;
    clamp_delta("free", free)
}

// 3.2: opening at an exact ratio, from either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenAmount {
    /// ETH to lock; debt follows
    Lock(Decimal),
    /// RAI to draw; collateral follows
    Draw(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpenTerms {
    pub locked: Decimal,
    pub drawn: Decimal,
}

pub fn open_at_ratio(
    amount: OpenAmount,
    prices: PricePair,
    ratio: Decimal,
) -> Result<OpenTerms, CdpError> {
    priced("open", prices, ratio)?;
    match amount {
        OpenAmount::Lock(lock) => {
            non_negative("lock", lock)?;
            Ok(OpenTerms {
                locked: lock,
                drawn: lock * prices.eth_price / (prices.target_price * ratio),
            })
        }
        OpenAmount::Draw(draw) => {
            non_negative("draw", draw)?;
            Ok(OpenTerms {
                locked: draw * prices.target_price * ratio / prices.eth_price,
                drawn: draw,
            })
        }
    }
}

// 3.3: ((1 + fee)^adj)^dt - 1, applied to principal plus earlier interest.
pub fn accrue_interest(
    principal: Decimal,
    stability_fee: Decimal,
    rate_adjustment: Decimal,
    timedelta: u64,
    previous_accrued: Decimal,
) -> Result<Decimal, CdpError> {
    let overflow = || CdpError::InterestOverflow {
        stability_fee,
        timedelta,
    };
    let per_second = checked_pow(Decimal::ONE + stability_fee, rate_adjustment).ok_or_else(overflow)?;
    let growth = checked_pow(per_second, Decimal::from(timedelta)).ok_or_else(overflow)?;

    Ok((growth - Decimal::ONE) * (principal + previous_accrued))
}

// 3.4: liquidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationOutcome {
    pub id: PositionId,
    /// collateral seized
    pub v_bite: Decimal,
    /// principal written off
    pub u_bite: Decimal,
    /// interest written off
    pub w_bite: Decimal,
    /// excess collateral returned to the owner
    pub free: Decimal,
    /// ETH the bite was short by, if the collateral did not cover it
    pub shortfall: Option<Decimal>,
}

/// Close an undercollateralized position.
///
/// The bite is `debt * target * (1 + penalty) / eth`. When it exceeds the
/// available collateral everything is seized, the gap is recorded as a
/// shortfall and the run carries on.
pub fn liquidate(
    position: &mut Position,
    prices: PricePair,
    penalty: Decimal,
) -> Result<LiquidationOutcome, CdpError> {
    position.ensure_open()?;

    let available = position.net_collateral();
    let debt = position.net_debt();
    if available < Decimal::ZERO || debt < Decimal::ZERO {
        return Err(CdpError::InvalidTransaction {
            op: "liquidate",
            value: available.min(debt),
        });
    }

    let required = debt * prices.target_price * (Decimal::ONE + penalty) / prices.eth_price;
    let (v_bite, free, shortfall) = if required <= available {
        (required, available - required, None)
    } else {
        warn!(
            position = position.id.0,
            required = %required,
            available = %available,
            "liquidation short of collateral"
        );
        (available, Decimal::ZERO, Some(required - available))
    };

    let w_bite = position.dripped;
    position.v_bitten += v_bite;
    position.freed += free;
    position.u_bitten += debt;
    position.w_bitten += w_bite;
    position.open = false;

    Ok(LiquidationOutcome {
        id: position.id,
        v_bite,
        u_bite: debt,
        w_bite,
        free,
        shortfall,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices() -> PricePair {
        PricePair::new(dec!(300), dec!(3.14))
    }

    fn position(locked: Decimal, drawn: Decimal) -> Position {
        Position::new(
            PositionId(0),
            Owner::DebtMarket,
            OpenTerms { locked, drawn },
            0,
        )
    }

    #[test]
    fn open_by_lock_lands_on_ratio() {
        let terms = open_at_ratio(OpenAmount::Lock(dec!(10)), prices(), dec!(1.45)).unwrap();
        let expected = dec!(10) * dec!(300) / (dec!(3.14) * dec!(1.45));

        assert_eq!(terms.locked, dec!(10));
        assert_eq!(terms.drawn, expected);
        assert!((terms.drawn - dec!(658.96)).abs() < dec!(0.1));
    }

    #[test]
    fn open_by_draw_mirrors_open_by_lock() {
        let by_lock = open_at_ratio(OpenAmount::Lock(dec!(10)), prices(), dec!(1.45)).unwrap();
        let by_draw =
            open_at_ratio(OpenAmount::Draw(by_lock.drawn), prices(), dec!(1.45)).unwrap();
        assert!((by_draw.locked - dec!(10)).abs() < dec!(0.000001));
    }

    #[test]
    fn to_ratio_solvers_land_on_ratio() {
        let pos = position(dec!(10), dec!(400));
        let ratio = dec!(1.45);

        let draw = draw_to_ratio(&pos, prices(), ratio).unwrap();
        let mut drawn = pos.clone();
        drawn.draw(draw).unwrap();
        let r = drawn.collateral_ratio(prices()).unwrap();
        assert!((r - ratio).abs() < dec!(0.000001));

        let free = free_to_ratio(&pos, prices(), ratio).unwrap();
        let mut freed = pos.clone();
        freed.free(free).unwrap();
        let r = freed.collateral_ratio(prices()).unwrap();
        assert!((r - ratio).abs() < dec!(0.000001));
    }

    #[test]
    fn wipe_and_lock_restore_ratio() {
        let pos = position(dec!(10), dec!(800));
        let ratio = dec!(1.45);
        assert!(!pos.is_above(prices(), ratio));

        let wipe = wipe_to_ratio(&pos, prices(), ratio).unwrap();
        let mut wiped = pos.clone();
        wiped.wipe(wipe).unwrap();
        assert!(wiped.is_above(prices(), ratio - dec!(0.000001)));

        let lock = lock_to_ratio(&pos, prices(), ratio).unwrap();
        let mut locked = pos.clone();
        locked.lock(lock).unwrap();
        assert!(locked.is_above(prices(), ratio - dec!(0.000001)));
    }

    #[test]
    fn tiny_negative_delta_clamps_to_zero() {
        // exactly at ratio, rounding can leave the delta a hair below zero
        let terms = open_at_ratio(OpenAmount::Lock(dec!(10)), prices(), dec!(1.45)).unwrap();
        let mut pos = position(terms.locked, terms.drawn);
        pos.drawn += dec!(0.0001);
        assert_eq!(draw_to_ratio(&pos, prices(), dec!(1.45)).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn large_negative_delta_is_rejected() {
        let pos = position(dec!(10), dec!(800));
        let result = draw_to_ratio(&pos, prices(), dec!(1.45));
        assert!(matches!(result, Err(CdpError::InvalidTransaction { op: "draw", .. })));
    }

    #[test]
    fn solvers_reject_collapsed_prices() {
        let pos = position(dec!(10), dec!(500));
        let no_target = PricePair::new(dec!(300), Decimal::ZERO);
        let no_eth = PricePair::new(Decimal::ZERO, dec!(3.14));

        for prices in [no_target, no_eth] {
            assert!(matches!(wipe_to_ratio(&pos, prices, dec!(2.9)), Err(CdpError::InvalidTransaction { op: "wipe", .. })));
            assert!(matches!(draw_to_ratio(&pos, prices, dec!(2.9)), Err(CdpError::InvalidTransaction { op: "draw", .. })));
            assert!(matches!(lock_to_ratio(&pos, prices, dec!(2.9)), Err(CdpError::InvalidTransaction { op: "lock", .. })));
            assert!(matches!(free_to_ratio(&pos, prices, dec!(2.9)), Err(CdpError::InvalidTransaction { op: "free", .. })));
        }
        assert!(matches!(
            draw_to_ratio(&pos, prices(), Decimal::ZERO),
            Err(CdpError::InvalidTransaction { op: "draw", .. })
        ));
        assert!(matches!(
            open_at_ratio(OpenAmount::Lock(dec!(10)), no_target, dec!(1.45)),
            Err(CdpError::InvalidTransaction { op: "open", .. })
        ));
    }

    #[test]
    fn liquidation_returns_excess_collateral() {
        let mut pos = position(dec!(10), dec!(800));
        let outcome = liquidate(&mut pos, prices(), Decimal::ZERO).unwrap();

        let expected_bite = dec!(800) * dec!(3.14) / dec!(300);
        assert_eq!(outcome.v_bite, expected_bite);
        assert_eq!(outcome.free, dec!(10) - expected_bite);
        assert_eq!(outcome.u_bite, dec!(800));
        assert!(outcome.shortfall.is_none());
        assert!(!pos.open);
        assert!(pos.net_collateral().abs() < dec!(0.000000001));
        assert_eq!(pos.net_debt(), Decimal::ZERO);
    }

    #[test]
    fn liquidation_shortfall_seizes_everything() {
        let mut pos = position(dec!(1), dec!(800));
        let outcome = liquidate(&mut pos, prices(), dec!(0.1)).unwrap();

        assert_eq!(outcome.v_bite, dec!(1));
        assert_eq!(outcome.free, Decimal::ZERO);
        assert!(outcome.shortfall.unwrap() > Decimal::ZERO);
        assert_eq!(pos.net_collateral(), Decimal::ZERO);
    }

    #[test]
    fn closed_position_rejects_mutation() {
        let mut pos = position(dec!(1), dec!(800));
        liquidate(&mut pos, prices(), Decimal::ZERO).unwrap();

        assert_eq!(pos.draw(dec!(1)), Err(CdpError::PositionClosed(PositionId(0))));
        assert!(liquidate(&mut pos, prices(), Decimal::ZERO).is_err());
    }

    #[test]
    fn interest_compounds_over_timedelta() {
        let fee = dec!(0.0001);
        let interest = accrue_interest(dec!(1000), fee, Decimal::ONE, 2, Decimal::ZERO).unwrap();
        // (1.0001^2 - 1) * 1000
        assert_eq!(interest, dec!(0.20001));
    }

    #[test]
    fn accrual_skips_closed_positions() {
        let mut pos = position(dec!(10), dec!(100));
        pos.open = false;
        assert_eq!(pos.accrue(dec!(0.01), Decimal::ONE, 10).unwrap(), Decimal::ZERO);
        assert_eq!(pos.dripped, Decimal::ZERO);
    }
}
