// 2.0 amm.rs: constant product RAI/ETH pool with fee.
// every solver is a pure function over explicit reserves. callers serialize mutations.
// 2.1 swaps, 2.2 liquidity, 2.3 price targeting, 2.4 pool balances.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AmmError {
    #[error("Invalid trade: {reason}")]
    InvalidTrade { reason: String },

    #[error("Invalid reserves: in={reserve_in}, out={reserve_out}")]
    InvalidReserves {
        reserve_in: Decimal,
        reserve_out: Decimal,
    },

    #[error("Pool {asset} balance would go non-positive: balance={balance}, delta={delta}")]
    NegativeBalance {
        asset: PoolAsset,
        balance: Decimal,
        delta: Decimal,
    },
}

impl AmmError {
    fn invalid_trade(reason: impl Into<String>) -> Self {
        Self::InvalidTrade {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolAsset {
    Rai,
    Eth,
    Uni,
}

impl std::fmt::Display for PoolAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolAsset::Rai => write!(f, "RAI"),
            PoolAsset::Eth => write!(f, "ETH"),
            PoolAsset::Uni => write!(f, "UNI"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmmParams {
    pub fee: Decimal,
    pub initial_rai_reserve: Decimal,
}

impl Default for AmmParams {
    fn default() -> Self {
        Self {
            fee: Decimal::new(3, 3),
            initial_rai_reserve: Decimal::new(5_000_000, 0),
        }
    }
}

fn check_reserves(reserve_in: Decimal, reserve_out: Decimal) -> Result<(), AmmError> {
    if reserve_in <= Decimal::ZERO || reserve_out <= Decimal::ZERO {
        return Err(AmmError::InvalidReserves {
            reserve_in,
            reserve_out,
        });
    }
    Ok(())
}

fn fee_multiplier(fee: Decimal) -> Result<Decimal, AmmError> {
    if fee < Decimal::ZERO || fee >= Decimal::ONE {
        return Err(AmmError::invalid_trade(format!("fee {fee} outside [0, 1)")));
    }
    Ok(Decimal::ONE - fee)
}

// 2.1: sell exactly dx into the pool. returns the pool deltas (dx, dy) with dy <= 0.
pub fn swap_exact_in(
    dx: Decimal,
    reserve_in: Decimal,
    reserve_out: Decimal,
    fee: Decimal,
) -> Result<(Decimal, Decimal), AmmError> {
    check_reserves(reserve_in, reserve_out)?;
    let gamma = fee_multiplier(fee)?;
    if dx < Decimal::ZERO {
        return Err(AmmError::invalid_trade(format!("negative input {dx}")));
    }

    let alpha = dx / reserve_in;
    let dy = (alpha * gamma / (Decimal::ONE + alpha * gamma)) * reserve_out;

    Ok((alpha * reserve_in, -dy))
}

/// Input needed to take exactly `dy_wanted` out of the pool. returns (dx, -dy_wanted).
pub fn swap_exact_out(
    dy_wanted: Decimal,
    reserve_in: Decimal,
    reserve_out: Decimal,
    fee: Decimal,
) -> Result<(Decimal, Decimal), AmmError> {
    check_reserves(reserve_in, reserve_out)?;
    let gamma = fee_multiplier(fee)?;
    if dy_wanted < Decimal::ZERO {
        return Err(AmmError::invalid_trade(format!("negative output {dy_wanted}")));
    }

    let beta = dy_wanted / reserve_out;
    if beta >= Decimal::ONE {
        return Err(AmmError::invalid_trade(format!(
            "insufficient liquidity: wanted {dy_wanted} of {reserve_out}"
        )));
    }

    let dx = (beta / (Decimal::ONE - beta)) * (Decimal::ONE / gamma) * reserve_in;
    Ok((dx, -beta * reserve_out))
}

// 2.2: liquidity events scale reserve, supply and vouchers by one factor, so the pool ratio holds.
// returns (d_reserve, d_supply, d_vouchers).
pub fn add_liquidity(
    reserve_balance: Decimal,
    supply_balance: Decimal,
    voucher_balance: Decimal,
    tokens: Decimal,
    value: Decimal,
) -> (Decimal, Decimal, Decimal) {
    // empty pool: the first provider sets the ratio
    if voucher_balance <= Decimal::ZERO || reserve_balance <= Decimal::ZERO {
        return (value, tokens, tokens);
    }

    let alpha = value / reserve_balance;
    (
        alpha * reserve_balance,
        alpha * supply_balance,
        alpha * voucher_balance,
    )
}

pub fn remove_liquidity(
    reserve_balance: Decimal,
    supply_balance: Decimal,
    voucher_balance: Decimal,
    tokens: Decimal,
) -> Result<(Decimal, Decimal, Decimal), AmmError> {
    if voucher_balance <= Decimal::ZERO {
        return Err(AmmError::invalid_trade("no liquidity vouchers outstanding"));
    }
    if tokens < Decimal::ZERO || tokens > voucher_balance {
        return Err(AmmError::invalid_trade(format!(
            "cannot burn {tokens} of {voucher_balance} vouchers"
        )));
    }

    let alpha = tokens / voucher_balance;
    Ok((
        -alpha * reserve_balance,
        -alpha * supply_balance,
        -alpha * voucher_balance,
    ))
}

// 2.3: how much RAI to trade so the fee-less spot price reaches goal_price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeDirection {
    /// buy RAI out of the pool, pushes the price up
    Buy,
    /// sell RAI into the pool, pushes the price down
    Sell,
}

pub fn trade_to_price(
    direction: TradeDirection,
    rai_balance: Decimal,
    goal_price: Decimal,
    market_price: Decimal,
) -> Result<Decimal, AmmError> {
    if goal_price <= Decimal::ZERO || market_price <= Decimal::ZERO {
        return Err(AmmError::invalid_trade(format!(
            "price target needs positive prices: goal={goal_price}, market={market_price}"
        )));
    }
    let root = (market_price / goal_price)
        .sqrt()
        .ok_or_else(|| AmmError::invalid_trade("price ratio has no square root"))?;
    let a = rai_balance * (root - Decimal::ONE);

    // past the goal already means no trade
    Ok(match direction {
        TradeDirection::Buy => (-a).max(Decimal::ZERO),
        TradeDirection::Sell => a.max(Decimal::ZERO),
    })
}

pub fn buy_to_price(
    rai_balance: Decimal,
    goal_price: Decimal,
    market_price: Decimal,
) -> Result<Decimal, AmmError> {
    trade_to_price(TradeDirection::Buy, rai_balance, goal_price, market_price)
}

pub fn sell_to_price(
    rai_balance: Decimal,
    goal_price: Decimal,
    market_price: Decimal,
) -> Result<Decimal, AmmError> {
    trade_to_price(TradeDirection::Sell, rai_balance, goal_price, market_price)
}

// 2.4: pool deltas accumulate additively across agents and policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolDelta {
    pub rai: Decimal,
    pub eth: Decimal,
    pub uni: Decimal,
}

impl PoolDelta {
    pub fn new(rai: Decimal, eth: Decimal, uni: Decimal) -> Self {
        Self { rai, eth, uni }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.rai.is_zero() && self.eth.is_zero() && self.uni.is_zero()
    }
}

impl AddAssign for PoolDelta {
    fn add_assign(&mut self, other: Self) {
        self.rai += other.rai;
        self.eth += other.eth;
        self.uni += other.uni;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolBalances {
    pub rai: Decimal,
    pub eth: Decimal,
    pub uni_supply: Decimal,
}

impl PoolBalances {
    pub fn new(rai: Decimal, eth: Decimal, uni_supply: Decimal) -> Self {
        Self {
            rai,
            eth,
            uni_supply,
        }
    }

    /// RAI price in BASE implied by the reserves.
    pub fn spot_price(&self, eth_price: Decimal) -> Decimal {
        self.eth / self.rai * eth_price
    }

    pub fn invariant(&self) -> Decimal {
        self.rai * self.eth
    }

    /// Apply a delta. reserves must stay strictly positive, the voucher supply non-negative.
    pub fn apply(&self, delta: &PoolDelta) -> Result<Self, AmmError> {
        let rai = self.rai + delta.rai;
        if rai <= Decimal::ZERO {
            return Err(AmmError::NegativeBalance {
                asset: PoolAsset::Rai,
                balance: self.rai,
                delta: delta.rai,
            });
        }
        let eth = self.eth + delta.eth;
        if eth <= Decimal::ZERO {
            return Err(AmmError::NegativeBalance {
                asset: PoolAsset::Eth,
                balance: self.eth,
                delta: delta.eth,
            });
        }
        let uni_supply = self.uni_supply + delta.uni;
        if uni_supply < Decimal::ZERO {
            return Err(AmmError::NegativeBalance {
                asset: PoolAsset::Uni,
                balance: self.uni_supply,
                delta: delta.uni,
            });
        }
        Ok(Self {
            rai,
            eth,
            uni_supply,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const FEE: Decimal = dec!(0.003);

    fn close(a: Decimal, b: Decimal, tol: Decimal) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn swap_in_matches_formula() {
        let (eth, rai) = (dec!(1000), dec!(3140));
        let dx = dec!(100);
        let (applied, dy) = swap_exact_in(dx, rai, eth, FEE).unwrap();

        let alpha = dx / rai;
        let gamma = Decimal::ONE - FEE;
        let expected = -(gamma * alpha / (Decimal::ONE + gamma * alpha)) * eth;

        assert_eq!(applied, dx);
        assert!(close(dy, expected, dec!(0.01)));
        assert!(dy < Decimal::ZERO);
    }

    #[test]
    fn swap_out_inverts_swap_in() {
        let (eth, rai) = (dec!(1000), dec!(3140));
        let (dx, dy) = swap_exact_in(dec!(25), eth, rai, FEE).unwrap();
        let (dx_back, dy_back) = swap_exact_out(-dy, eth, rai, FEE).unwrap();

        assert!(close(dx_back, dx, dec!(0.000001)));
        assert_eq!(dy_back, dy);
    }

    #[test]
    fn swap_out_rejects_whole_reserve() {
        let result = swap_exact_out(dec!(1000), dec!(10), dec!(1000), FEE);
        assert!(matches!(result, Err(AmmError::InvalidTrade { .. })));

        let result = swap_exact_out(dec!(1500), dec!(10), dec!(1000), FEE);
        assert!(matches!(result, Err(AmmError::InvalidTrade { .. })));
    }

    #[test]
    fn swap_rejects_empty_reserves() {
        let result = swap_exact_in(dec!(1), Decimal::ZERO, dec!(10), FEE);
        assert!(matches!(result, Err(AmmError::InvalidReserves { .. })));
    }

    #[test]
    fn constant_product_grows_with_fee() {
        let pool = PoolBalances::new(dec!(3140), dec!(1000), dec!(3140));
        let (dx, dy) = swap_exact_in(dec!(300), pool.rai, pool.eth, FEE).unwrap();
        let after = pool.apply(&PoolDelta::new(dx, dy, Decimal::ZERO)).unwrap();

        assert!(after.invariant() >= pool.invariant());
    }

    #[test]
    fn liquidity_keeps_ratio() {
        let (eth, rai, uni) = (dec!(1000), dec!(3140), dec!(3140));
        let (de, dr, du) = add_liquidity(eth, rai, uni, dec!(314), dec!(100));
        assert_eq!(de, dec!(100));
        assert_eq!((rai + dr) / (eth + de), rai / eth);
        assert_eq!(du, dec!(314));

        let (de, dr, du) = remove_liquidity(eth, rai, uni, dec!(314)).unwrap();
        assert_eq!(de, dec!(-100));
        assert_eq!(dr, dec!(-314));
        assert_eq!(du, dec!(-314));
    }

    #[test]
    fn remove_more_than_supply_fails() {
        let result = remove_liquidity(dec!(1000), dec!(3140), dec!(3140), dec!(4000));
        assert!(result.is_err());
    }

    #[test]
    fn sell_to_price_hits_goal_without_fee() {
        let pool = PoolBalances::new(dec!(3140), dec!(1000), dec!(3140));
        let eth_price = dec!(10);
        let market = pool.spot_price(eth_price);
        let goal = market * dec!(0.9);

        let a = sell_to_price(pool.rai, goal, market).unwrap();
        let (dx, dy) = swap_exact_in(a, pool.rai, pool.eth, Decimal::ZERO).unwrap();
        let after = pool.apply(&PoolDelta::new(dx, dy, Decimal::ZERO)).unwrap();

        assert!(close(after.spot_price(eth_price), goal, dec!(0.0000001)));
    }

    #[test]
    fn trade_to_price_clamps_past_goal() {
        // already below the goal, selling more is never needed
        assert_eq!(sell_to_price(dec!(100), dec!(3), dec!(2)).unwrap(), Decimal::ZERO);
        assert_eq!(buy_to_price(dec!(100), dec!(2), dec!(3)).unwrap(), Decimal::ZERO);
        assert!(buy_to_price(dec!(100), dec!(3), dec!(2)).unwrap() > Decimal::ZERO);
    }

    #[test]
    fn apply_rejects_drained_reserve() {
        let pool = PoolBalances::new(dec!(100), dec!(10), dec!(100));
        let result = pool.apply(&PoolDelta::new(dec!(-100), Decimal::ZERO, Decimal::ZERO));
        assert!(matches!(
            result,
            Err(AmmError::NegativeBalance { asset: PoolAsset::Rai, .. })
        ));
    }
}
