// 6.3 price_traders.rs: traders who only watch today's redemption price. buys are
// whole units sized off the pre-trade market price.

use super::population::{BandDistribution, TraderPopulation};
use super::{AgentError, MarketView, PoolCursor};
use crate::amm::{buy_to_price, sell_to_price};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTraderParams {
    pub enabled: bool,
    pub count: usize,
    pub band: BandDistribution,
    pub market_premium: Decimal,
}

impl Default for PriceTraderParams {
    fn default() -> Self {
        Self {
            enabled: false,
            count: 100,
            band: BandDistribution::new(5.0, 6.0, 2.0),
            market_premium: Decimal::ONE,
        }
    }
}

pub fn trade<R: Rng>(
    params: &PriceTraderParams,
    population: &mut TraderPopulation,
    pool: &mut PoolCursor,
    market: MarketView,
    rng: &mut R,
) -> Result<(), AgentError> {
    let fee = pool.fee();
    let redemption = market.target_price * params.market_premium;

    for index in population.shuffle(rng) {
        let Some(trader) = population.trader_mut(index) else {
            continue;
        };
        let market_price = pool.market_price(market.eth_price);
        let band = trader.band();

        let expensive = redemption * (Decimal::ONE + band) < (Decimal::ONE - fee) * market_price;
        let cheap = redemption * (Decimal::ONE - band) > (Decimal::ONE - fee) * market_price;

        // an empty wallet never reaches the sizing, whatever its band says
        if expensive && trader.rai_balance > Decimal::ZERO {
            let to_price = sell_to_price(pool.rai(), redemption, market_price)?;
            if to_price <= Decimal::ZERO {
                return Err(AgentError::Condition(format!(
                    "expensive market {market_price} but nothing to sell toward {redemption}"
                )));
            }
            let amount = trader.rai_balance.min(to_price);
            if amount > Decimal::ZERO {
                let eth_out = pool.sell_rai(amount)?;
                trader.rai_balance -= amount;
                trader.base_balance += eth_out * market.eth_price;
                trader.n_sells += 1;
                debug!(trader = trader.id, rai = %amount, "price trader sell");
            }
        } else if cheap && !expensive && trader.base_balance > Decimal::ZERO {
            let to_price = buy_to_price(pool.rai(), redemption, market_price)?;
            if to_price <= Decimal::ZERO {
                return Err(AgentError::Condition(format!(
                    "cheap market {market_price} but nothing to buy toward {redemption}"
                )));
            }
            let amount = (trader.base_balance / market_price).floor().min(to_price);
            if amount > Decimal::ZERO {
                let eth_in = pool.buy_rai(amount)?;
                trader.rai_balance += amount;
                trader.base_balance -= eth_in * market.eth_price;
                trader.n_buys += 1;
                debug!(trader = trader.id, rai = %amount, "price trader buy");
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

    fn market() -> MarketView {
        MarketView {
            eth_price: dec!(300),
            target_price: dec!(3.14),
            target_rate: Decimal::ZERO,
        }
    }

    fn population(rai: Decimal, base: Decimal) -> TraderPopulation {
        let band = BandDistribution::new(2.0, 0.0, 2.0);
        let mut rng = StdRng::seed_from_u64(3);
        TraderPopulation::sample(5, TraderCapital { rai, base }, &band, None, &mut rng).unwrap()
    }

    #[test]
    fn buys_whole_units() {
        // pool priced at 2.7
        let pool = PoolBalances::new(dec!(100000), dec!(900), dec!(100000));
        let mut cursor = PoolCursor::new(&pool, dec!(0.003));
        let mut pop = population(Decimal::ZERO, dec!(5000));

        trade(&PriceTraderParams::default(), &mut pop, &mut cursor, market(), &mut StdRng::seed_from_u64(2)).unwrap();

        for trader in pop.traders() {
            assert_eq!(trader.rai_balance.fract(), Decimal::ZERO);
        }
        assert!(pop.trade_counts().0 > 0);
    }

    #[test]
    fn empty_wallet_skips_inverted_band() {
        // band of -5% flags a market just under redemption as expensive
        let pool = PoolBalances::new(dec!(300000), dec!(3100), dec!(300000));
        let band = BandDistribution::new(-5.0, 0.0, -5.0);
        let empty = TraderCapital { rai: Decimal::ZERO, base: Decimal::ZERO };
        let mut rng = StdRng::seed_from_u64(3);
        let mut pop = TraderPopulation::sample(3, empty, &band, None, &mut rng).unwrap();
        let mut cursor = PoolCursor::new(&pool, dec!(0.003));

        trade(&PriceTraderParams::default(), &mut pop, &mut cursor, market(), &mut StdRng::seed_from_u64(2)).unwrap();
        assert_eq!(pop.trade_counts(), (0, 0));
        assert!(cursor.delta().is_zero());

        // the same band with RAI to sell has nowhere to sell toward
        let funded = TraderCapital { rai: dec!(300), base: Decimal::ZERO };
        let mut pop = TraderPopulation::sample(3, funded, &band, None, &mut rng).unwrap();
        let result = trade(&PriceTraderParams::default(), &mut pop, &mut cursor, market(), &mut StdRng::seed_from_u64(2));
        assert!(matches!(result, Err(AgentError::Condition(_))));
    }

    #[test]
    fn expensive_market_is_sold() {
        let pool = PoolBalances::new(dec!(100000), dec!(1200), dec!(100000));
        let mut cursor = PoolCursor::new(&pool, dec!(0.003));
        let mut pop = population(dec!(10000), Decimal::ZERO);

        trade(&PriceTraderParams::default(), &mut pop, &mut cursor, market(), &mut StdRng::seed_from_u64(2)).unwrap();

        assert!(pop.trade_counts().1 > 0);
        assert!(pop.total_base() > Decimal::ZERO);
        assert!(cursor.market_price(dec!(300)) < dec!(3.6));
    }
}
