// 6.0 agents/: the populations that trade against the pool and manage positions.
// 6.1 population.rs sampling and seeded ordering, 6.2 rate_traders.rs, 6.3 price_traders.rs,
// 6.4 leverager.rs, 6.5 debt_market.rs.
//
// every agent works on a PoolCursor: a local copy of the reserves that each trade
// mutates before the next member looks at the price. the accumulated delta is what
// the policy hands back to the stepper.

pub mod debt_market;
pub mod leverager;
pub mod population;
pub mod price_traders;
pub mod rate_traders;

use crate::amm::{
    buy_to_price, sell_to_price, swap_exact_in, swap_exact_out, AmmError, PoolBalances, PoolDelta,
};
use crate::cdp::{CdpError, CdpParams, OpenTerms};
use crate::controller::{market_price_for_apy, target_rate_to_apy, ControllerError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AgentError {
    #[error("AMM error: {0}")]
    Amm(#[from] AmmError),

    #[error("CDP error: {0}")]
    Cdp(#[from] CdpError),

    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("Agent condition violated: {0}")]
    Condition(String),

    #[error("Secondary market delta out of range: {0}")]
    SecondaryMarketDelta(String),

    #[error("Invalid distribution: {0}")]
    Distribution(String),
}

// 6.0.1
/// Reserves as the current agent sees them, plus everything traded so far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolCursor {
    rai: Decimal,
    eth: Decimal,
    fee: Decimal,
    delta: PoolDelta,
}

impl PoolCursor {
    pub fn new(pool: &PoolBalances, fee: Decimal) -> Self {
        Self {
            rai: pool.rai,
            eth: pool.eth,
            fee,
            delta: PoolDelta::zero(),
        }
    }

    pub fn rai(&self) -> Decimal {
        self.rai
    }

    pub fn eth(&self) -> Decimal {
        self.eth
    }

    pub fn fee(&self) -> Decimal {
        self.fee
    }

    pub fn delta(&self) -> PoolDelta {
        self.delta
    }

    pub fn market_price(&self, eth_price: Decimal) -> Decimal {
        self.eth / self.rai * eth_price
    }

    fn record(&mut self, rai: Decimal, eth: Decimal) {
        self.rai += rai;
        self.eth += eth;
        self.delta += PoolDelta::new(rai, eth, Decimal::ZERO);
    }

    /// Sell exactly `amount` RAI. Returns the ETH received.
    pub fn sell_rai(&mut self, amount: Decimal) -> Result<Decimal, AmmError> {
        let (rai_in, eth_out) = swap_exact_in(amount, self.rai, self.eth, self.fee)?;
        self.record(rai_in, eth_out);
        Ok(-eth_out)
    }

    /// Buy exactly `amount` RAI. Returns the ETH paid.
    pub fn buy_rai(&mut self, amount: Decimal) -> Result<Decimal, AmmError> {
        let (eth_in, rai_out) = swap_exact_out(amount, self.eth, self.rai, self.fee)?;
        self.record(rai_out, eth_in);
        Ok(eth_in)
    }

    /// Sell exactly `amount` ETH. Returns the RAI received.
    pub fn sell_eth(&mut self, amount: Decimal) -> Result<Decimal, AmmError> {
        let (eth_in, rai_out) = swap_exact_in(amount, self.eth, self.rai, self.fee)?;
        self.record(rai_out, eth_in);
        Ok(-rai_out)
    }

    pub fn quote_sell_eth(&self, amount: Decimal) -> Result<Decimal, AmmError> {
        let (_, rai_out) = swap_exact_in(amount, self.eth, self.rai, self.fee)?;
        Ok(-rai_out)
    }

    pub fn quote_buy_rai(&self, amount: Decimal) -> Result<Decimal, AmmError> {
        let (eth_in, _) = swap_exact_out(amount, self.eth, self.rai, self.fee)?;
        Ok(eth_in)
    }
}

/// Prices every agent reads at the start of its stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketView {
    pub eth_price: Decimal,
    pub target_price: Decimal,
    pub target_rate: Decimal,
}

// 6.0.2: redemption rate bounds. position managers stop wiping once the rate has fallen
// to the floor and stop drawing once it has risen to the cap, and size their trades so
// the market does not overshoot the price at which a proportional controller would
// output the bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateBounds {
    pub min_apy: Option<Decimal>,
    pub max_apy: Option<Decimal>,
    pub kp: Decimal,
}

impl RateBounds {
    pub fn new(cdp: &CdpParams, kp: Decimal) -> Self {
        Self {
            min_apy: cdp.min_redemption_rate,
            max_apy: cdp.max_redemption_rate,
            kp,
        }
    }

    pub fn current_apy(&self, target_rate: Decimal) -> Result<Decimal, AgentError> {
        Ok(target_rate_to_apy(target_rate)?)
    }

    pub fn allows_wipe(&self, rr_apy: Decimal) -> bool {
        self.min_apy.map_or(true, |min| rr_apy > min)
    }

    pub fn allows_draw(&self, rr_apy: Decimal) -> bool {
        self.max_apy.map_or(true, |max| rr_apy < max)
    }

    fn goal_price(&self, apy: Option<Decimal>, target_price: Decimal) -> Result<Option<Decimal>, AgentError> {
        let apy = match apy {
            Some(apy) if !self.kp.is_zero() => apy,
            _ => return Ok(None),
        };
        let goal = market_price_for_apy(apy, target_price, self.kp)?;
        Ok(Some(goal).filter(|g| *g > Decimal::ZERO))
    }

    /// Most RAI that can be bought before the rate reaches the floor.
    pub fn wipe_cap(&self, pool: &PoolCursor, market: MarketView) -> Result<Option<Decimal>, AgentError> {
        match self.goal_price(self.min_apy, market.target_price)? {
            Some(goal) => Ok(Some(buy_to_price(pool.rai(), goal, pool.market_price(market.eth_price))?)),
            None => Ok(None),
        }
    }

    /// Most RAI that can be sold before the rate reaches the cap.
    pub fn draw_cap(&self, pool: &PoolCursor, market: MarketView) -> Result<Option<Decimal>, AgentError> {
        match self.goal_price(self.max_apy, market.target_price)? {
            Some(goal) => Ok(Some(sell_to_price(pool.rai(), goal, pool.market_price(market.eth_price))?)),
            None => Ok(None),
        }
    }
}

fn capped(amount: Decimal, cap: Option<Decimal>) -> Decimal {
    cap.map_or(amount, |c| amount.min(c))
}

// 6.0.3: starting capital, split by share across agent classes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalParams {
    /// BASE
    pub total_starting_capital: Decimal,
    pub rate_traders: Decimal,
    pub price_traders: Decimal,
    pub eth_leverager: Decimal,
    pub liquidity_cdps: Decimal,
}

impl Default for CapitalParams {
    fn default() -> Self {
        Self {
            total_starting_capital: dec!(20000000),
            rate_traders: dec!(0.25),
            price_traders: Decimal::ZERO,
            eth_leverager: Decimal::ONE,
            liquidity_cdps: Decimal::ZERO,
        }
    }
}

/// Balances handed to a trader population as a whole.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraderCapital {
    pub rai: Decimal,
    pub base: Decimal,
}

impl CapitalParams {
    fn allocated(&self, share: Decimal) -> Decimal {
        share * self.total_starting_capital
    }

    /// Half the allocation in RAI, the other half in BASE.
    pub fn trader_capital(&self, share: Decimal, target_price: Decimal) -> TraderCapital {
        let rai = self.allocated(share) / target_price / Decimal::TWO;
        TraderCapital {
            rai,
            base: rai * target_price,
        }
    }

    pub fn leverager_terms(&self, cdp: &CdpParams, target_price: Decimal, eth_price: Decimal) -> OpenTerms {
        let allocated = self.allocated(self.eth_leverager);
        OpenTerms {
            locked: allocated / eth_price,
            drawn: allocated / cdp.buffered_ratio() / target_price,
        }
    }

    /// Total liquidity CDP terms, opened at the buffered ratio.
    pub fn liquidity_cdp_terms(&self, cdp: &CdpParams, target_price: Decimal, eth_price: Decimal) -> OpenTerms {
        let drawn = self.allocated(self.liquidity_cdps) / cdp.buffered_ratio() / target_price;
        OpenTerms {
            locked: drawn * cdp.buffered_ratio() * target_price / eth_price,
            drawn,
        }
    }
}
