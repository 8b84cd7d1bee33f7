// 6.2 rate_traders.rs: traders who forecast the redemption price `days` ahead and
// arbitrage the pool against it. sells are exact-in, buys exact-out.

use super::population::{BandDistribution, TraderPopulation};
use super::{AgentError, MarketView, PoolCursor};
use crate::amm::{buy_to_price, sell_to_price};
use crate::types::{checked_pow, SECONDS_PER_DAY};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateTraderParams {
    pub enabled: bool,
    pub count: usize,
    /// no-trade band in percent
    pub band: BandDistribution,
    /// forecast horizon in days
    pub days: BandDistribution,
    pub market_premium: Decimal,
}

impl Default for RateTraderParams {
    fn default() -> Self {
        Self {
            enabled: true,
            count: 100,
            band: BandDistribution::new(3.0, 6.0, 1.0),
            days: BandDistribution::new(0.0, 0.0, 0.0),
            market_premium: Decimal::ONE,
        }
    }
}

/// `target * (1 + rate)^(86400 * days) * premium`
pub fn future_redemption_price(
    target_price: Decimal,
    target_rate: Decimal,
    days: Decimal,
    premium: Decimal,
) -> Result<Decimal, AgentError> {
    let seconds = Decimal::from(SECONDS_PER_DAY) * days;
    let growth = checked_pow(Decimal::ONE + target_rate, seconds).ok_or_else(|| {
        AgentError::Condition(format!(
            "redemption forecast overflow: rate={target_rate}, days={days}"
        ))
    })?;
    Ok(target_price * growth * premium)
}

/// One pass over the population in a fresh random order.
pub fn trade<R: Rng>(
    params: &RateTraderParams,
    population: &mut TraderPopulation,
    pool: &mut PoolCursor,
    market: MarketView,
    rng: &mut R,
) -> Result<(), AgentError> {
    let fee = pool.fee();
    for index in population.shuffle(rng) {
        let Some(trader) = population.trader_mut(index) else {
            continue;
        };
        let market_price = pool.market_price(market.eth_price);
        let redemption = future_redemption_price(
            market.target_price,
            market.target_rate,
            trader.days,
            params.market_premium,
        )?;
        let band = trader.band();

        let expensive = redemption * (Decimal::ONE + band) < (Decimal::ONE - fee) * market_price;
        let cheap = redemption * (Decimal::ONE - band) > (Decimal::ONE + fee) * market_price;

        if expensive {
            let to_price = sell_to_price(pool.rai(), redemption, market_price)?;
            let amount = trader.rai_balance.min(to_price);
            if amount > Decimal::ZERO {
                let eth_out = pool.sell_rai(amount)?;
                trader.rai_balance -= amount;
                trader.base_balance += eth_out * market.eth_price;
                trader.n_sells += 1;
                debug!(trader = trader.id, rai = %amount, "rate trader sell");
            }
        } else if cheap {
            let to_price = buy_to_price(pool.rai(), redemption, market_price)?;
            let affordable = pool.quote_sell_eth(trader.base_balance / market.eth_price)?;
            let amount = affordable.min(to_price);
            if amount > Decimal::ZERO {
                let eth_in = pool.buy_rai(amount)?;
                trader.rai_balance += amount;
                trader.base_balance -= eth_in * market.eth_price;
                trader.n_buys += 1;
                debug!(trader = trader.id, rai = %amount, "rate trader buy");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::TraderCapital;
    use crate::amm::PoolBalances;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rust_decimal_macros::dec;

    fn population(rai: Decimal, base: Decimal) -> TraderPopulation {
        let band = BandDistribution::new(1.0, 0.0, 1.0);
        let mut rng = StdRng::seed_from_u64(5);
        TraderPopulation::sample(10, TraderCapital { rai, base }, &band, None, &mut rng).unwrap()
    }

    fn market() -> MarketView {
        MarketView {
            eth_price: dec!(300),
            target_price: dec!(3.14),
            target_rate: Decimal::ZERO,
        }
    }

    #[test]
    fn zero_horizon_forecast_is_target() {
        let price = future_redemption_price(dec!(3.14), dec!(0.0001), Decimal::ZERO, Decimal::ONE).unwrap();
        assert_eq!(price, dec!(3.14));
    }

    #[test]
    fn expensive_market_is_sold_down() {
        // pool priced at 3.6 against a 3.14 target
        let pool = PoolBalances::new(dec!(100000), dec!(1200), dec!(100000));
        let mut cursor = PoolCursor::new(&pool, dec!(0.003));
        let mut pop = population(dec!(50000), dec!(0));
        let params = RateTraderParams::default();

        trade(&params, &mut pop, &mut cursor, market(), &mut StdRng::seed_from_u64(1)).unwrap();

        let (buys, sells) = pop.trade_counts();
        assert_eq!(buys, 0);
        assert!(sells > 0);
        assert!(cursor.delta().rai > Decimal::ZERO);
        assert!(cursor.market_price(dec!(300)) < dec!(3.6));
        assert!(cursor.market_price(dec!(300)) >= dec!(3.14) * dec!(0.98));
        assert_eq!(pop.last_order().len(), 10);
    }

    #[test]
    fn cheap_market_is_bought_up_within_budget() {
        // pool priced at 2.7
        let pool = PoolBalances::new(dec!(100000), dec!(900), dec!(100000));
        let mut cursor = PoolCursor::new(&pool, dec!(0.003));
        let mut pop = population(dec!(0), dec!(10000));
        let params = RateTraderParams::default();

        trade(&params, &mut pop, &mut cursor, market(), &mut StdRng::seed_from_u64(1)).unwrap();

        let (buys, _) = pop.trade_counts();
        assert!(buys > 0);
        assert!(pop.total_rai() > Decimal::ZERO);
        assert!(pop.total_base() >= dec!(-0.0001));
        assert!(cursor.delta().rai < Decimal::ZERO);
    }

    #[test]
    fn inside_band_does_nothing() {
        let pool = PoolBalances::new(dec!(100000), dec!(1046.6666), dec!(100000));
        let mut cursor = PoolCursor::new(&pool, dec!(0.003));
        let mut pop = population(dec!(1000), dec!(1000));
        trade(&RateTraderParams::default(), &mut pop, &mut cursor, market(), &mut StdRng::seed_from_u64(1)).unwrap();
        assert!(cursor.delta().is_zero());
    }
}
