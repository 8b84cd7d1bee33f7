// 6.4 leverager.rs: one leveraged ETH position kept between two collateral ratios.
// below the band it frees ETH, sells it and wipes the RAI; above the band it draws RAI,
// sells it and locks the ETH. both legs aim for the band midpoint and account for the
// price impact of the pool trade.

use super::{capped, AgentError, MarketView, PoolCursor, RateBounds};
use crate::cdp::{OpenTerms, PricePair};
use crate::events::{EventPayload, PositionOpenedEvent};
use crate::ledger::CdpLedger;
use crate::types::Owner;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeveragerParams {
    pub enabled: bool,
    pub min_collateral_ratio: Decimal,
    pub max_collateral_ratio: Decimal,
}

impl Default for LeveragerParams {
    fn default() -> Self {
        Self {
            enabled: true,
            min_collateral_ratio: dec!(2.9),
            max_collateral_ratio: dec!(2.9),
        }
    }
}

impl LeveragerParams {
    pub fn preferred_ratio(&self) -> Decimal {
        (self.min_collateral_ratio + self.max_collateral_ratio) / Decimal::TWO
    }
}

/// What one rebalance did to the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rebalance {
    Delever,
    Lever,
    Hold,
}

pub fn open(ledger: &mut CdpLedger, terms: OpenTerms, timestep: u64) -> EventPayload {
    let position = ledger.open(Owner::Leverager, terms, timestep);
    EventPayload::PositionOpened(PositionOpenedEvent {
        position,
        owner: Owner::Leverager,
        locked: terms.locked,
        drawn: terms.drawn,
    })
}

pub fn rebalance(
    params: &LeveragerParams,
    ledger: &mut CdpLedger,
    pool: &mut PoolCursor,
    market: MarketView,
    bounds: &RateBounds,
) -> Result<Rebalance, AgentError> {
    let Some(id) = ledger.open_ids(Owner::Leverager).first().copied() else {
        return Ok(Rebalance::Hold);
    };
    let prices = PricePair::new(market.eth_price, market.target_price);
    let position = ledger.get(id)?;
    let locked = position.net_collateral();
    let drawn = position.net_debt();

    let Some(ratio) = position.collateral_ratio(prices) else {
        return Ok(Rebalance::Hold);
    };
    if ratio >= params.min_collateral_ratio && ratio < params.max_collateral_ratio {
        return Ok(Rebalance::Hold);
    }

    // size the collateral change so the ratio lands on `preferred` after the pool trade
    let preferred = params.preferred_ratio();
    let p_uni = pool.rai() / pool.eth();
    let denominator = market.eth_price - preferred * market.target_price * p_uni;
    if denominator.is_zero() {
        return Ok(Rebalance::Hold);
    }
    let d_locked = ((preferred * market.target_price * drawn - locked * market.eth_price) / denominator).abs();
    let d_drawn = p_uni * d_locked;
    let rr_apy = bounds.current_apy(market.target_rate)?;

    if ratio < preferred {
        if !bounds.allows_wipe(rr_apy) {
            return Ok(Rebalance::Hold);
        }
        let quoted = pool.quote_sell_eth(d_locked)?;
        let (freed, wiped, at_cap) = match bounds.wipe_cap(pool, market)? {
            Some(cap) if cap < quoted => (pool.quote_buy_rai(cap)?, cap, true),
            _ => (d_locked, quoted, false),
        };
        if wiped <= Decimal::ZERO || freed > locked || wiped > drawn || wiped >= pool.rai() {
            return Ok(Rebalance::Hold);
        }

        if at_cap {
            pool.buy_rai(wiped)?;
        } else {
            pool.sell_eth(freed)?;
        }
        let position = ledger.get_mut(id)?;
        position.free(freed)?;
        position.wipe(wiped)?;
        debug!(freed = %freed, wiped = %wiped, "leverager delever");
        Ok(Rebalance::Delever)
    } else {
        if !bounds.allows_draw(rr_apy) {
            return Ok(Rebalance::Hold);
        }
        let draw = capped(d_drawn, bounds.draw_cap(pool, market)?);
        if draw <= Decimal::ZERO {
            return Ok(Rebalance::Hold);
        }
        // trial the sale, commit only if the pool can pay it out
        let mut trial = *pool;
        let lock = trial.sell_rai(draw)?;
        if lock > pool.eth() {
            return Ok(Rebalance::Hold);
        }
        *pool = trial;

        let position = ledger.get_mut(id)?;
        position.draw(draw)?;
        position.lock(lock)?;
        debug!(drawn = %draw, locked = %lock, "leverager lever");
        Ok(Rebalance::Lever)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amm::PoolBalances;

    fn market() -> MarketView {
        MarketView {
            eth_price: dec!(300),
            target_price: dec!(3.14),
            target_rate: Decimal::ZERO,
        }
    }

    fn pool() -> PoolCursor {
        PoolCursor::new(&PoolBalances::new(dec!(5000000), dec!(52333.33), dec!(5000000)), dec!(0.003))
    }

    fn unbounded() -> RateBounds {
        RateBounds { min_apy: None, max_apy: None, kp: Decimal::ZERO }
    }

    fn ledger_at(ratio: Decimal) -> CdpLedger {
        let mut ledger = CdpLedger::new();
        let locked = dec!(1000);
        let drawn = locked * dec!(300) / (dec!(3.14) * ratio);
        open(&mut ledger, OpenTerms { locked, drawn }, 1);
        ledger
    }

    fn ratio_of(ledger: &CdpLedger) -> Decimal {
        let id = ledger.open_ids(Owner::Leverager)[0];
        ledger.get(id).unwrap().collateral_ratio(PricePair::new(dec!(300), dec!(3.14))).unwrap()
    }

    #[test]
    fn under_collateralized_position_delevers_toward_midpoint() {
        let params = LeveragerParams::default();
        let mut ledger = ledger_at(dec!(2.5));
        let mut cursor = pool();

        let action = rebalance(&params, &mut ledger, &mut cursor, market(), &unbounded()).unwrap();

        assert_eq!(action, Rebalance::Delever);
        let ratio = ratio_of(&ledger);
        assert!(ratio > dec!(2.5));
        assert!((ratio - dec!(2.9)).abs() < dec!(0.05));
        assert!(cursor.delta().eth > Decimal::ZERO);
    }

    #[test]
    fn over_collateralized_position_levers_toward_midpoint() {
        let params = LeveragerParams::default();
        let mut ledger = ledger_at(dec!(3.5));
        let mut cursor = pool();

        let action = rebalance(&params, &mut ledger, &mut cursor, market(), &unbounded()).unwrap();

        assert_eq!(action, Rebalance::Lever);
        let ratio = ratio_of(&ledger);
        assert!(ratio < dec!(3.5));
        assert!((ratio - dec!(2.9)).abs() < dec!(0.05));
        assert!(cursor.delta().rai > Decimal::ZERO);
    }

    #[test]
    fn inside_wide_band_holds() {
        let params = LeveragerParams {
            min_collateral_ratio: dec!(2.5),
            max_collateral_ratio: dec!(3.5),
            ..Default::default()
        };
        let mut ledger = ledger_at(dec!(3));
        let mut cursor = pool();
        let action = rebalance(&params, &mut ledger, &mut cursor, market(), &unbounded()).unwrap();
        assert_eq!(action, Rebalance::Hold);
        assert!(cursor.delta().is_zero());
    }

    #[test]
    fn band_is_closed_below_and_open_above() {
        let params = LeveragerParams {
            min_collateral_ratio: dec!(2),
            max_collateral_ratio: dec!(2.5),
            ..Default::default()
        };
        let market = MarketView {
            eth_price: dec!(300),
            target_price: dec!(3),
            target_rate: Decimal::ZERO,
        };

        // 1000 ETH at 300 against 40000 RAI at 3 sits exactly on the upper edge
        let mut ledger = CdpLedger::new();
        open(&mut ledger, OpenTerms { locked: dec!(1000), drawn: dec!(40000) }, 1);
        let mut cursor = pool();
        let action = rebalance(&params, &mut ledger, &mut cursor, market, &unbounded()).unwrap();
        assert_eq!(action, Rebalance::Lever);
        assert!(cursor.delta().rai > Decimal::ZERO);

        // 50000 RAI puts it exactly on the lower edge
        let mut ledger = CdpLedger::new();
        open(&mut ledger, OpenTerms { locked: dec!(1000), drawn: dec!(50000) }, 1);
        let mut cursor = pool();
        let action = rebalance(&params, &mut ledger, &mut cursor, market, &unbounded()).unwrap();
        assert_eq!(action, Rebalance::Hold);
        assert!(cursor.delta().is_zero());
    }

    #[test]
    fn rate_floor_blocks_wiping() {
        let params = LeveragerParams::default();
        let mut ledger = ledger_at(dec!(2.5));
        let mut cursor = pool();
        let bounds = RateBounds { min_apy: Some(dec!(10)), max_apy: None, kp: dec!(0.00000005) };

        let action = rebalance(&params, &mut ledger, &mut cursor, market(), &bounds).unwrap();
        assert_eq!(action, Rebalance::Hold);
    }
}
