// 9.0 state.rs: one immutable snapshot of a run.
// light fields are plain values. heavy fields (oracle ring, ledger, trader populations,
// event log) sit behind Arc so successive snapshots share them until a stage replaces
// one, and behind Option so old snapshots can drop them to bound memory.
//
// 9.1 Field names every column, 9.2 FieldUpdate carries one new value, 9.3 genesis.

use crate::agents::population::TraderPopulation;
use crate::amm::PoolBalances;
use crate::controller::ControllerState;
use crate::engine::SimError;
use crate::events::EventLog;
use crate::exogenous::ExogenousInputs;
use crate::ledger::{CdpLedger, CdpMetrics, LedgerTotals};
use crate::oracle::{FeedAnswer, TwapOracle};
use crate::types::Seconds;
use crate::config::SimulationConfig;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// 9.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Timestamp,
    CumulativeTime,
    Timedelta,
    EthPrice,
    EthReturn,
    EthGrossReturn,
    StabilityFee,
    Pool,
    LiquidityDemand,
    LiquidityDemandMean,
    MarketSlippage,
    RateTraders,
    PriceTraders,
    Cdps,
    AccruedInterest,
    SpotMarketPrice,
    Feed,
    Oracle,
    MarketPriceTwap,
    ErrorStar,
    PrevErrorStar,
    ErrorStarIntegral,
    ControllerEnabled,
    TargetRate,
    TargetPrice,
    W1,
    W2,
    W3,
    EthCollateral,
    PrincipalDebt,
    Totals,
    SystemRevenue,
    CdpMetrics,
    Events,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Fields that may be evicted from finished snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeavyField {
    Oracle,
    Cdps,
    RateTraders,
    PriceTraders,
    Events,
}

impl HeavyField {
    pub const ALL: [HeavyField; 5] = [
        HeavyField::Oracle,
        HeavyField::Cdps,
        HeavyField::RateTraders,
        HeavyField::PriceTraders,
        HeavyField::Events,
    ];

    pub fn field(&self) -> Field {
        match self {
            HeavyField::Oracle => Field::Oracle,
            HeavyField::Cdps => Field::Cdps,
            HeavyField::RateTraders => Field::RateTraders,
            HeavyField::PriceTraders => Field::PriceTraders,
            HeavyField::Events => Field::Events,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimState {
    pub timestamp: NaiveDateTime,
    pub cumulative_time: Seconds,
    pub timedelta: Seconds,

    pub eth_price: Decimal,
    pub eth_return: Decimal,
    pub eth_gross_return: Decimal,
    pub stability_fee: Decimal,

    pub pool: PoolBalances,
    pub liquidity_demand: Decimal,
    pub liquidity_demand_mean: Decimal,
    pub market_slippage: Option<Decimal>,

    pub spot_market_price: Decimal,
    /// feed answer: `market_price` and its timestamp
    pub feed: FeedAnswer,
    pub market_price_twap: Decimal,

    pub error_star: Decimal,
    pub prev_error_star: Decimal,
    pub error_star_integral: Decimal,
    pub controller_enabled: bool,
    pub target_rate: Decimal,
    pub target_price: Decimal,

    pub accrued_interest: Decimal,
    pub system_revenue: Decimal,
    pub w_1: Decimal,
    pub w_2: Decimal,
    pub w_3: Decimal,
    pub eth_collateral: Decimal,
    pub principal_debt: Decimal,
    pub totals: LedgerTotals,
    pub cdp_metrics: CdpMetrics,

    pub oracle: Option<Arc<TwapOracle>>,
    pub cdps: Option<Arc<CdpLedger>>,
    pub rate_traders: Option<Arc<TraderPopulation>>,
    pub price_traders: Option<Arc<TraderPopulation>>,
    pub events: Option<Arc<EventLog>>,
}

fn heavy<T>(slot: &Option<Arc<T>>, field: Field) -> Result<&Arc<T>, SimError> {
    slot.as_ref().ok_or(SimError::MissingField(field))
}

impl SimState {
    // 9.3: timestep 0. pool priced at the initial target, no positions, agents unborn.
    pub fn genesis(config: &SimulationConfig, exogenous: &ExogenousInputs) -> Result<Self, SimError> {
        let target_price = config.controller.initial_target_price;
        let rai = config.amm.initial_rai_reserve;
        let pool = PoolBalances::new(rai, rai * target_price / exogenous.eth_price, rai);
        let ledger = CdpLedger::new();

        Ok(Self {
            timestamp: config.time.start,
            cumulative_time: 0,
            timedelta: 0,
            eth_price: exogenous.eth_price,
            eth_return: Decimal::ZERO,
            eth_gross_return: Decimal::ZERO,
            stability_fee: exogenous.stability_fee,
            pool,
            liquidity_demand: Decimal::ONE,
            liquidity_demand_mean: Decimal::ONE,
            market_slippage: None,
            spot_market_price: pool.spot_price(exogenous.eth_price),
            feed: FeedAnswer {
                price: target_price,
                timestamp: 0,
            },
            market_price_twap: Decimal::ZERO,
            error_star: Decimal::ZERO,
            prev_error_star: Decimal::ZERO,
            error_star_integral: Decimal::ZERO,
            controller_enabled: false,
            target_rate: config.controller.initial_target_rate,
            target_price,
            accrued_interest: Decimal::ZERO,
            system_revenue: Decimal::ZERO,
            w_1: Decimal::ZERO,
            w_2: Decimal::ZERO,
            w_3: Decimal::ZERO,
            eth_collateral: Decimal::ZERO,
            principal_debt: Decimal::ZERO,
            totals: ledger.totals(),
            cdp_metrics: ledger.metrics(),
            oracle: Some(Arc::new(TwapOracle::new(&config.oracle)?)),
            cdps: Some(Arc::new(ledger)),
            rate_traders: Some(Arc::new(TraderPopulation::new())),
            price_traders: Some(Arc::new(TraderPopulation::new())),
            events: Some(Arc::new(EventLog::new())),
        })
    }

    /// Fails on the first heavy field that is absent.
    pub fn require_complete(&self) -> Result<(), SimError> {
        for field in HeavyField::ALL {
            if !self.has(field) {
                return Err(SimError::MissingField(field.field()));
            }
        }
        Ok(())
    }

    pub fn has(&self, field: HeavyField) -> bool {
        match field {
            HeavyField::Oracle => self.oracle.is_some(),
            HeavyField::Cdps => self.cdps.is_some(),
            HeavyField::RateTraders => self.rate_traders.is_some(),
            HeavyField::PriceTraders => self.price_traders.is_some(),
            HeavyField::Events => self.events.is_some(),
        }
    }

    pub fn evict(&mut self, field: HeavyField) {
        match field {
            HeavyField::Oracle => self.oracle = None,
            HeavyField::Cdps => self.cdps = None,
            HeavyField::RateTraders => self.rate_traders = None,
            HeavyField::PriceTraders => self.price_traders = None,
            HeavyField::Events => self.events = None,
        }
    }

    pub fn oracle(&self) -> Result<&Arc<TwapOracle>, SimError> {
        heavy(&self.oracle, Field::Oracle)
    }

    pub fn cdps(&self) -> Result<&Arc<CdpLedger>, SimError> {
        heavy(&self.cdps, Field::Cdps)
    }

    pub fn rate_traders(&self) -> Result<&Arc<TraderPopulation>, SimError> {
        heavy(&self.rate_traders, Field::RateTraders)
    }

    pub fn price_traders(&self) -> Result<&Arc<TraderPopulation>, SimError> {
        heavy(&self.price_traders, Field::PriceTraders)
    }

    pub fn events(&self) -> Result<&Arc<EventLog>, SimError> {
        heavy(&self.events, Field::Events)
    }

    pub fn market_price(&self) -> Decimal {
        self.feed.price
    }

    pub fn controller_state(&self) -> ControllerState {
        ControllerState {
            target_price: self.target_price,
            target_rate: self.target_rate,
            error: self.error_star,
            prev_error: self.prev_error_star,
            error_integral: self.error_star_integral,
        }
    }

    pub fn apply(&mut self, update: FieldUpdate) {
        match update {
            FieldUpdate::Timestamp(v) => self.timestamp = v,
            FieldUpdate::CumulativeTime(v) => self.cumulative_time = v,
            FieldUpdate::Timedelta(v) => self.timedelta = v,
            FieldUpdate::EthPrice(v) => self.eth_price = v,
            FieldUpdate::EthReturn(v) => self.eth_return = v,
            FieldUpdate::EthGrossReturn(v) => self.eth_gross_return = v,
            FieldUpdate::StabilityFee(v) => self.stability_fee = v,
            FieldUpdate::Pool(v) => self.pool = v,
            FieldUpdate::LiquidityDemand(v) => self.liquidity_demand = v,
            FieldUpdate::LiquidityDemandMean(v) => self.liquidity_demand_mean = v,
            FieldUpdate::MarketSlippage(v) => self.market_slippage = v,
            FieldUpdate::RateTraders(v) => self.rate_traders = Some(v),
            FieldUpdate::PriceTraders(v) => self.price_traders = Some(v),
            FieldUpdate::Cdps(v) => self.cdps = Some(v),
            FieldUpdate::AccruedInterest(v) => self.accrued_interest = v,
            FieldUpdate::SpotMarketPrice(v) => self.spot_market_price = v,
            FieldUpdate::Feed(v) => self.feed = v,
            FieldUpdate::Oracle(v) => self.oracle = Some(v),
            FieldUpdate::MarketPriceTwap(v) => self.market_price_twap = v,
            FieldUpdate::ErrorStar(v) => self.error_star = v,
            FieldUpdate::PrevErrorStar(v) => self.prev_error_star = v,
            FieldUpdate::ErrorStarIntegral(v) => self.error_star_integral = v,
            FieldUpdate::ControllerEnabled(v) => self.controller_enabled = v,
            FieldUpdate::TargetRate(v) => self.target_rate = v,
            FieldUpdate::TargetPrice(v) => self.target_price = v,
            FieldUpdate::W1(v) => self.w_1 = v,
            FieldUpdate::W2(v) => self.w_2 = v,
            FieldUpdate::W3(v) => self.w_3 = v,
            FieldUpdate::EthCollateral(v) => self.eth_collateral = v,
            FieldUpdate::PrincipalDebt(v) => self.principal_debt = v,
            FieldUpdate::Totals(v) => self.totals = v,
            FieldUpdate::SystemRevenue(v) => self.system_revenue = v,
            FieldUpdate::CdpMetrics(v) => self.cdp_metrics = v,
            FieldUpdate::Events(v) => self.events = Some(v),
        }
    }
}

// 9.2
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Timestamp(NaiveDateTime),
    CumulativeTime(Seconds),
    Timedelta(Seconds),
    EthPrice(Decimal),
    EthReturn(Decimal),
    EthGrossReturn(Decimal),
    StabilityFee(Decimal),
    Pool(PoolBalances),
    LiquidityDemand(Decimal),
    LiquidityDemandMean(Decimal),
    MarketSlippage(Option<Decimal>),
    RateTraders(Arc<TraderPopulation>),
    PriceTraders(Arc<TraderPopulation>),
    Cdps(Arc<CdpLedger>),
    AccruedInterest(Decimal),
    SpotMarketPrice(Decimal),
    Feed(FeedAnswer),
    Oracle(Arc<TwapOracle>),
    MarketPriceTwap(Decimal),
    ErrorStar(Decimal),
    PrevErrorStar(Decimal),
    ErrorStarIntegral(Decimal),
    ControllerEnabled(bool),
    TargetRate(Decimal),
    TargetPrice(Decimal),
    W1(Decimal),
    W2(Decimal),
    W3(Decimal),
    EthCollateral(Decimal),
    PrincipalDebt(Decimal),
    Totals(LedgerTotals),
    SystemRevenue(Decimal),
    CdpMetrics(CdpMetrics),
    Events(Arc<EventLog>),
}

impl FieldUpdate {
    pub fn field(&self) -> Field {
        match self {
            FieldUpdate::Timestamp(_) => Field::Timestamp,
            FieldUpdate::CumulativeTime(_) => Field::CumulativeTime,
            FieldUpdate::Timedelta(_) => Field::Timedelta,
            FieldUpdate::EthPrice(_) => Field::EthPrice,
            FieldUpdate::EthReturn(_) => Field::EthReturn,
            FieldUpdate::EthGrossReturn(_) => Field::EthGrossReturn,
            FieldUpdate::StabilityFee(_) => Field::StabilityFee,
            FieldUpdate::Pool(_) => Field::Pool,
            FieldUpdate::LiquidityDemand(_) => Field::LiquidityDemand,
            FieldUpdate::LiquidityDemandMean(_) => Field::LiquidityDemandMean,
            FieldUpdate::MarketSlippage(_) => Field::MarketSlippage,
            FieldUpdate::RateTraders(_) => Field::RateTraders,
            FieldUpdate::PriceTraders(_) => Field::PriceTraders,
            FieldUpdate::Cdps(_) => Field::Cdps,
            FieldUpdate::AccruedInterest(_) => Field::AccruedInterest,
            FieldUpdate::SpotMarketPrice(_) => Field::SpotMarketPrice,
            FieldUpdate::Feed(_) => Field::Feed,
            FieldUpdate::Oracle(_) => Field::Oracle,
            FieldUpdate::MarketPriceTwap(_) => Field::MarketPriceTwap,
            FieldUpdate::ErrorStar(_) => Field::ErrorStar,
            FieldUpdate::PrevErrorStar(_) => Field::PrevErrorStar,
            FieldUpdate::ErrorStarIntegral(_) => Field::ErrorStarIntegral,
            FieldUpdate::ControllerEnabled(_) => Field::ControllerEnabled,
            FieldUpdate::TargetRate(_) => Field::TargetRate,
            FieldUpdate::TargetPrice(_) => Field::TargetPrice,
            FieldUpdate::W1(_) => Field::W1,
            FieldUpdate::W2(_) => Field::W2,
            FieldUpdate::W3(_) => Field::W3,
            FieldUpdate::EthCollateral(_) => Field::EthCollateral,
            FieldUpdate::PrincipalDebt(_) => Field::PrincipalDebt,
            FieldUpdate::Totals(_) => Field::Totals,
            FieldUpdate::SystemRevenue(_) => Field::SystemRevenue,
            FieldUpdate::CdpMetrics(_) => Field::CdpMetrics,
            FieldUpdate::Events(_) => Field::Events,
        }
    }
}
