// 6.5 debt_market.rs: liquidity CDPs held at the buffered liquidation ratio.
// under the buffer a position buys RAI from the pool with outside ETH and wipes;
// over it the position draws RAI and sells it into the pool.

use super::{capped, AgentError, MarketView, PoolCursor, RateBounds};
use crate::cdp::{draw_to_ratio, wipe_to_ratio, CdpParams, OpenTerms, PricePair};
use crate::events::{EventPayload, PositionOpenedEvent};
use crate::ledger::CdpLedger;
use crate::types::Owner;
use rust_decimal::Decimal;
use tracing::debug;

/// Open `count` equal positions from the total terms.
pub fn open(ledger: &mut CdpLedger, total: OpenTerms, count: usize, timestep: u64) -> Vec<EventPayload> {
    if count == 0 {
        return Vec::new();
    }
    let share = Decimal::from(count);
    let terms = OpenTerms {
        locked: total.locked / share,
        drawn: total.drawn / share,
    };
    (0..count)
        .map(|_| {
            let position = ledger.open(Owner::DebtMarket, terms, timestep);
            EventPayload::PositionOpened(PositionOpenedEvent {
                position,
                owner: Owner::DebtMarket,
                locked: terms.locked,
                drawn: terms.drawn,
            })
        })
        .collect()
}

/// Totals moved by one pass over the debt market positions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RebalanceSummary {
    pub wiped: Decimal,
    pub drawn: Decimal,
    pub positions_touched: usize,
}

pub fn rebalance(
    cdp: &CdpParams,
    ledger: &mut CdpLedger,
    pool: &mut PoolCursor,
    market: MarketView,
    bounds: &RateBounds,
) -> Result<RebalanceSummary, AgentError> {
    let prices = PricePair::new(market.eth_price, market.target_price);
    let ratio = cdp.buffered_ratio();
    let rr_apy = bounds.current_apy(market.target_rate)?;
    let mut summary = RebalanceSummary::default();

    for id in ledger.open_ids(Owner::DebtMarket) {
        let position = ledger.get(id)?;

        if !position.is_above(prices, ratio) {
            if !bounds.allows_wipe(rr_apy) {
                continue;
            }
            let wipe = capped(wipe_to_ratio(position, prices, ratio)?, bounds.wipe_cap(pool, market)?);
            if wipe <= Decimal::ZERO {
                continue;
            }
            let eth_delta = pool.quote_buy_rai(wipe)?;
            if eth_delta < Decimal::ZERO || eth_delta > pool.eth() {
                return Err(AgentError::SecondaryMarketDelta(format!(
                    "buying {wipe} RAI costs {eth_delta} ETH against a reserve of {}",
                    pool.eth()
                )));
            }
            pool.buy_rai(wipe)?;
            ledger.get_mut(id)?.wipe(wipe)?;
            summary.wiped += wipe;
            summary.positions_touched += 1;
        } else {
            if !bounds.allows_draw(rr_apy) {
                continue;
            }
            let draw = capped(draw_to_ratio(position, prices, ratio)?, bounds.draw_cap(pool, market)?);
            if draw <= Decimal::ZERO {
                continue;
            }
            ledger.get_mut(id)?.draw(draw)?;
            pool.sell_rai(draw)?;
            summary.drawn += draw;
            summary.positions_touched += 1;
        }
    }

    if summary.positions_touched > 0 {
        debug!(
            wiped = %summary.wiped,
            drawn = %summary.drawn,
            positions = summary.positions_touched,
            "debt market rebalance"
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amm::PoolBalances;
    use rust_decimal_macros::dec;

    fn market(eth_price: Decimal) -> MarketView {
        MarketView {
            eth_price,
            target_price: dec!(3.14),
            target_rate: Decimal::ZERO,
        }
    }

    fn cursor() -> PoolCursor {
        PoolCursor::new(&PoolBalances::new(dec!(5000000), dec!(52333.33), dec!(5000000)), dec!(0.003))
    }

    fn unbounded() -> RateBounds {
        RateBounds { min_apy: None, max_apy: None, kp: Decimal::ZERO }
    }

    fn ledger(cdp: &CdpParams) -> CdpLedger {
        let mut ledger = CdpLedger::new();
        let drawn = dec!(10000);
        let total = OpenTerms {
            locked: drawn * cdp.buffered_ratio() * dec!(3.14) / dec!(300),
            drawn,
        };
        let events = open(&mut ledger, total, 4, 1);
        assert_eq!(events.len(), 4);
        ledger
    }

    #[test]
    fn eth_drop_triggers_wipe_back_to_buffer() {
        let cdp = CdpParams::default();
        let mut ledger = ledger(&cdp);
        let mut pool = cursor();

        let summary = rebalance(&cdp, &mut ledger, &mut pool, market(dec!(250)), &unbounded()).unwrap();

        assert_eq!(summary.positions_touched, 4);
        assert!(summary.wiped > Decimal::ZERO);
        assert!(pool.delta().rai < Decimal::ZERO);
        let prices = PricePair::new(dec!(250), dec!(3.14));
        for p in ledger.iter() {
            assert!(p.is_above(prices, cdp.buffered_ratio() - dec!(0.000001)));
        }
    }

    #[test]
    fn eth_rise_triggers_draw() {
        let cdp = CdpParams::default();
        let mut ledger = ledger(&cdp);
        let mut pool = cursor();

        let summary = rebalance(&cdp, &mut ledger, &mut pool, market(dec!(360)), &unbounded()).unwrap();

        assert!(summary.drawn > Decimal::ZERO);
        assert!((pool.delta().rai - summary.drawn).abs() < dec!(0.0000001));
        assert!((ledger.totals().principal_debt() - dec!(10000) - summary.drawn).abs() < dec!(0.0000001));
    }

    #[test]
    fn zero_capital_positions_stay_idle() {
        let cdp = CdpParams::default();
        let mut ledger = CdpLedger::new();
        open(&mut ledger, OpenTerms { locked: Decimal::ZERO, drawn: Decimal::ZERO }, 3, 1);
        let mut pool = cursor();

        let summary = rebalance(&cdp, &mut ledger, &mut pool, market(dec!(300)), &unbounded()).unwrap();
        assert_eq!(summary, RebalanceSummary::default());
        assert!(pool.delta().is_zero());
    }
}
