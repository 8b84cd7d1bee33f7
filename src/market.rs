//! Secondary market processes around the pool: exogenous liquidity demand,
//! slippage, and the spot price the feed samples.

use crate::amm::{add_liquidity, remove_liquidity, swap_exact_in, swap_exact_out, AmmError, PoolBalances, PoolDelta};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityDemandParams {
    pub enabled: bool,
    /// allow shocks up to `shock_percentage` of the RAI reserve
    pub shock: bool,
    pub max_percentage: Decimal,
    pub shock_percentage: Decimal,
}

impl Default for LiquidityDemandParams {
    fn default() -> Self {
        Self {
            enabled: false,
            shock: false,
            max_percentage: dec!(0.1),
            shock_percentage: dec!(0.5),
        }
    }
}

impl LiquidityDemandParams {
    fn cap(&self) -> Decimal {
        if self.shock {
            self.shock_percentage
        } else {
            self.max_percentage
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DemandKind {
    Swap,
    Liquidity,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidityEvent {
    pub kind: DemandKind,
    pub delta: PoolDelta,
}

/// Percentage draws for this timestep, taken from the exogenous series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemandDraws {
    pub token_swap_pct: Decimal,
    pub liquidity_demand_pct: Decimal,
}

/// One random swap or liquidity event sized as a share of the RAI reserve.
///
/// Positive direction sells RAI or adds liquidity, negative buys RAI or removes it.
pub fn liquidity_demand<R: Rng>(
    params: &LiquidityDemandParams,
    pool: &PoolBalances,
    market_price: Decimal,
    eth_price: Decimal,
    fee: Decimal,
    draws: DemandDraws,
    rng: &mut R,
) -> Result<LiquidityEvent, AmmError> {
    let swap = rng.gen_bool(0.5);
    let sell_or_add = rng.gen_bool(0.5);

    let pct = if swap {
        draws.token_swap_pct.abs()
    } else {
        draws.liquidity_demand_pct.abs()
    };
    let size = (pct * pool.rai).min(pool.rai * params.cap());

    if swap {
        let delta = if sell_or_add {
            let (rai_in, eth_out) = swap_exact_in(size, pool.rai, pool.eth, fee)?;
            PoolDelta::new(rai_in, eth_out, Decimal::ZERO)
        } else {
            let (eth_in, rai_out) = swap_exact_out(size, pool.eth, pool.rai, fee)?;
            PoolDelta::new(rai_out, eth_in, Decimal::ZERO)
        };
        return Ok(LiquidityEvent {
            kind: DemandKind::Swap,
            delta,
        });
    }

    let delta = if sell_or_add {
        let value = size * market_price / eth_price;
        let (eth, rai, uni) = add_liquidity(pool.eth, pool.rai, pool.uni_supply, size, value);
        PoolDelta::new(rai, eth, uni)
    } else {
        let (eth, rai, uni) = remove_liquidity(pool.eth, pool.rai, pool.uni_supply, size)?;
        PoolDelta::new(rai, eth, uni)
    };
    Ok(LiquidityEvent {
        kind: DemandKind::Liquidity,
        delta,
    })
}

/// `1 - realized / expected` for swaps; liquidity events have no slippage.
pub fn slippage(
    event: &LiquidityEvent,
    pool: &PoolBalances,
    expected_price: Decimal,
    eth_price: Decimal,
) -> Option<Decimal> {
    if event.kind != DemandKind::Swap || expected_price.is_zero() {
        return None;
    }
    let rai = pool.rai + event.delta.rai;
    if rai.is_zero() {
        return None;
    }
    let realized = (pool.eth + event.delta.eth) / rai * eth_price;
    Some(Decimal::ONE - realized / expected_price)
}

pub fn spot_market_price(pool: &PoolBalances, eth_price: Decimal) -> Decimal {
    pool.spot_price(eth_price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pool() -> PoolBalances {
        PoolBalances::new(dec!(5000000), dec!(52333.33), dec!(5000000))
    }

    fn draws(pct: Decimal) -> DemandDraws {
        DemandDraws {
            token_swap_pct: pct,
            liquidity_demand_pct: pct,
        }
    }

    #[test]
    fn demand_is_capped_by_max_percentage() {
        let params = LiquidityDemandParams::default();
        let pool = pool();
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let event = liquidity_demand(&params, &pool, dec!(3.14), dec!(300), dec!(0.003), draws(dec!(0.9)), &mut rng).unwrap();
            assert!(event.delta.rai.abs() <= pool.rai * dec!(0.1) + dec!(0.000001));
        }
    }

    #[test]
    fn liquidity_events_keep_pool_ratio() {
        let params = LiquidityDemandParams::default();
        let pool = pool();
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let event = liquidity_demand(&params, &pool, pool.spot_price(dec!(300)), dec!(300), dec!(0.003), draws(dec!(0.05)), &mut rng).unwrap();
            if event.kind == DemandKind::Liquidity {
                let after = pool.apply(&event.delta).unwrap();
                let before_ratio = pool.eth / pool.rai;
                let after_ratio = after.eth / after.rai;
                assert!((before_ratio - after_ratio).abs() < dec!(0.0000001));
                assert_eq!(slippage(&event, &pool, dec!(3.14), dec!(300)), None);
            }
        }
    }

    #[test]
    fn selling_rai_has_positive_slippage() {
        let pool = pool();
        let (rai_in, eth_out) = swap_exact_in(dec!(10000), pool.rai, pool.eth, dec!(0.003)).unwrap();
        let event = LiquidityEvent {
            kind: DemandKind::Swap,
            delta: PoolDelta::new(rai_in, eth_out, Decimal::ZERO),
        };
        let expected = pool.spot_price(dec!(300));
        assert!(slippage(&event, &pool, expected, dec!(300)).unwrap() > Decimal::ZERO);
    }
}
