// 8.2 pipeline.rs: the default stage list and every policy/update it is built from.
// stage order is the order of the model: clock, exogenous prices, pool demand, agents,
// ledger, price discovery, controller, accounting. each update reads the snapshot as it
// stood before its stage and returns one field.

use super::results::SimError;
use super::stage::{ErrorObservation, PolicyInput, Stage, StepContext};
use crate::agents::population::TraderPopulation;
use crate::agents::{debt_market, leverager, price_traders, rate_traders, MarketView, PoolCursor, RateBounds};
use crate::cdp::{accrue_interest, PricePair};
use crate::config::SimulationConfig;
use crate::controller::{observe_error, update_integral, update_target_price, update_target_rate};
use crate::events::{
    ControllerEnabledEvent, EventPayload, LiquidationEvent, LiquidationShortfallEvent, OracleUpdatedEvent,
};
use crate::market::{self, DemandDraws};
use crate::state::{Field, FieldUpdate, SimState};
use crate::types::{approx_ge_zero, Owner, AGGREGATE_TOLERANCE};
use chrono::Duration;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

// rng salts, one per random process
const SALT_LIQUIDITY: u64 = 1;
const SALT_RATE_TRADERS: u64 = 2;
const SALT_PRICE_TRADERS: u64 = 3;

pub fn default_pipeline(config: &SimulationConfig) -> Vec<Stage> {
    vec![
        Stage::new("free_memory")
            .evicting(config.admin.free_memory_states.clone())
            .update(Field::Events, append_events),
        Stage::new("time")
            .policy("time_step", p_time_step)
            .update(Field::Timedelta, s_timedelta)
            .update(Field::CumulativeTime, s_cumulative_time)
            .update(Field::Timestamp, s_timestamp),
        Stage::new("eth_price")
            .policy("eth_price", p_eth_price)
            .update(Field::EthPrice, s_eth_price)
            .update(Field::EthReturn, s_eth_return)
            .update(Field::EthGrossReturn, s_eth_gross_return)
            .update(Field::StabilityFee, s_stability_fee),
        Stage::new("liquidity_demand")
            .policy("liquidity_demand", p_liquidity_demand)
            .update(Field::Pool, s_pool)
            .update(Field::LiquidityDemand, s_liquidity_demand)
            .update(Field::LiquidityDemandMean, s_liquidity_demand_mean)
            .update(Field::MarketSlippage, s_market_slippage),
        Stage::new("rate_traders")
            .policy("rate_traders", p_rate_traders)
            .update(Field::RateTraders, s_rate_traders)
            .update(Field::Pool, s_pool),
        Stage::new("price_traders")
            .policy("price_traders", p_price_traders)
            .update(Field::PriceTraders, s_price_traders)
            .update(Field::Pool, s_pool),
        Stage::new("leverager")
            .policy("eth_leverager", p_leverager)
            .update(Field::Cdps, s_cdps)
            .update(Field::Pool, s_pool)
            .update(Field::Events, append_events),
        Stage::new("accrue_interest")
            .policy("accrue_interest", p_accrue_interest)
            .update(Field::AccruedInterest, s_accrued_interest)
            .update(Field::Cdps, s_cdps),
        Stage::new("debt_market")
            .policy("liquidity_cdps", p_debt_market)
            .update(Field::Cdps, s_cdps)
            .update(Field::Pool, s_pool)
            .update(Field::Events, append_events),
        Stage::new("liquidation")
            .policy("liquidate_cdps", p_liquidate)
            .update(Field::Cdps, s_cdps)
            .update(Field::Events, append_events),
        Stage::new("spot_price")
            .policy("spot_price", p_spot_price)
            .update(Field::SpotMarketPrice, s_spot_market_price),
        Stage::new("price_feed")
            .policy("price_feed", p_feed)
            .update(Field::Feed, s_feed),
        Stage::new("twap")
            .policy("twap_update", p_twap)
            .update(Field::Oracle, s_oracle)
            .update(Field::MarketPriceTwap, s_market_price_twap)
            .update(Field::Events, append_events),
        Stage::new("controller_error")
            .policy("observe_errors", p_errors)
            .update(Field::ErrorStar, s_error_star)
            .update(Field::PrevErrorStar, s_prev_error_star)
            .update(Field::ErrorStarIntegral, s_error_star_integral),
        Stage::new("target_rate")
            .policy("governance", p_governance)
            .update(Field::ControllerEnabled, s_controller_enabled)
            .update(Field::TargetRate, s_target_rate)
            .update(Field::Events, append_events),
        Stage::new("target_price").update(Field::TargetPrice, s_target_price),
        Stage::new("cdp_aggregates")
            .update(Field::W1, s_w_1)
            .update(Field::W2, s_w_2)
            .update(Field::W3, s_w_3)
            .update(Field::EthCollateral, s_eth_collateral)
            .update(Field::PrincipalDebt, s_principal_debt)
            .update(Field::Totals, s_totals),
        Stage::new("interest_accounting")
            .update(Field::AccruedInterest, s_interest_after_bites)
            .update(Field::SystemRevenue, s_system_revenue),
        Stage::new("cdp_metrics").update(Field::CdpMetrics, s_cdp_metrics),
    ]
}

fn require<T>(slot: Option<T>, field: Field) -> Result<T, SimError> {
    slot.ok_or(SimError::MissingField(field))
}

/// New value from the policy when it produced one, otherwise the current one.
fn keep<T>(new: &Option<Arc<T>>, current: Result<&Arc<T>, SimError>) -> Result<Arc<T>, SimError> {
    match new {
        Some(value) => Ok(Arc::clone(value)),
        None => current.map(Arc::clone),
    }
}

fn market_view(state: &SimState) -> MarketView {
    MarketView {
        eth_price: state.eth_price,
        target_price: state.target_price,
        target_rate: state.target_rate,
    }
}

fn rate_bounds(config: &SimulationConfig) -> RateBounds {
    RateBounds::new(&config.cdp, config.controller.kp)
}

// shared updates

fn append_events(ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    let log = ctx.state.events()?;
    if input.events.is_empty() {
        return Ok(FieldUpdate::Events(Arc::clone(log)));
    }
    let mut log = (**log).clone();
    log.extend(ctx.timestep, input.events.iter().cloned());
    Ok(FieldUpdate::Events(Arc::new(log)))
}

fn s_pool(ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::Pool(ctx.state.pool.apply(&input.pool_delta)?))
}

fn s_cdps(ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::Cdps(keep(&input.cdps, ctx.state.cdps())?))
}

// time

fn p_time_step(ctx: &StepContext<'_>) -> Result<PolicyInput, SimError> {
    Ok(PolicyInput {
        timedelta: Some(ctx.exogenous.seconds_passed),
        ..Default::default()
    })
}

fn s_timedelta(_ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::Timedelta(require(input.timedelta, Field::Timedelta)?))
}

fn s_cumulative_time(ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    let dt = require(input.timedelta, Field::Timedelta)?;
    Ok(FieldUpdate::CumulativeTime(ctx.state.cumulative_time + dt))
}

fn s_timestamp(ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    let dt = require(input.timedelta, Field::Timedelta)?;
    let advanced = i64::try_from(dt)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|d| ctx.state.timestamp.checked_add_signed(d))
        .ok_or_else(|| SimError::InvalidConfig(format!("timestep of {dt}s overflows the clock")))?;
    Ok(FieldUpdate::Timestamp(advanced))
}

// eth

fn p_eth_price(ctx: &StepContext<'_>) -> Result<PolicyInput, SimError> {
    Ok(PolicyInput {
        delta_eth_price: Some(ctx.exogenous.eth_price - ctx.state.eth_price),
        ..Default::default()
    })
}

fn s_eth_price(ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    let delta = require(input.delta_eth_price, Field::EthPrice)?;
    Ok(FieldUpdate::EthPrice(ctx.state.eth_price + delta))
}

fn s_eth_return(ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    let delta = require(input.delta_eth_price, Field::EthPrice)?;
    let prev = ctx.state.eth_price;
    Ok(FieldUpdate::EthReturn(if prev.is_zero() { Decimal::ZERO } else { delta / prev }))
}

fn s_eth_gross_return(ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    let delta = require(input.delta_eth_price, Field::EthPrice)?;
    let prev = ctx.state.eth_price;
    Ok(FieldUpdate::EthGrossReturn(if prev.is_zero() {
        Decimal::ZERO
    } else {
        (prev + delta) / prev
    }))
}

fn s_stability_fee(ctx: &StepContext<'_>, _input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::StabilityFee(ctx.exogenous.stability_fee))
}

// liquidity demand

fn p_liquidity_demand(ctx: &StepContext<'_>) -> Result<PolicyInput, SimError> {
    let params = &ctx.config.liquidity_demand;
    if !params.enabled {
        return Ok(PolicyInput::new());
    }
    let state = ctx.state;
    let draws = DemandDraws {
        token_swap_pct: ctx.exogenous.token_swap_pct,
        liquidity_demand_pct: ctx.exogenous.liquidity_demand_pct,
    };
    let event = market::liquidity_demand(
        params,
        &state.pool,
        state.market_price(),
        state.eth_price,
        ctx.config.amm.fee,
        draws,
        &mut ctx.rng(SALT_LIQUIDITY),
    )?;
    Ok(PolicyInput {
        pool_delta: event.delta,
        liquidity_event: Some(event),
        ..Default::default()
    })
}

fn demand(input: &PolicyInput) -> Decimal {
    input.liquidity_event.map_or(Decimal::ZERO, |e| e.delta.rai)
}

fn s_liquidity_demand(_ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::LiquidityDemand(demand(input)))
}

fn s_liquidity_demand_mean(ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::LiquidityDemandMean(
        (ctx.state.liquidity_demand_mean + demand(input)) / Decimal::TWO,
    ))
}

fn s_market_slippage(ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    let state = ctx.state;
    Ok(FieldUpdate::MarketSlippage(input.liquidity_event.and_then(|event| {
        market::slippage(&event, &state.pool, state.market_price(), state.eth_price)
    })))
}

// traders

fn p_rate_traders(ctx: &StepContext<'_>) -> Result<PolicyInput, SimError> {
    let params = &ctx.config.rate_traders;
    if !params.enabled {
        return Ok(PolicyInput::new());
    }
    let state = ctx.state;
    let mut rng = ctx.rng(SALT_RATE_TRADERS);

    if ctx.timestep.is_first() {
        let capital = ctx
            .config
            .capital
            .trader_capital(ctx.config.capital.rate_traders, state.target_price);
        let population =
            TraderPopulation::sample(params.count, capital, &params.band, Some(&params.days), &mut rng)?;
        return Ok(PolicyInput {
            rate_traders: Some(Arc::new(population)),
            ..Default::default()
        });
    }

    let mut population = (**state.rate_traders()?).clone();
    let mut pool = PoolCursor::new(&state.pool, ctx.config.amm.fee);
    rate_traders::trade(params, &mut population, &mut pool, market_view(state), &mut rng)?;
    let (buys, sells) = population.trade_counts();
    debug!(buys, sells, rai = %pool.delta().rai, "rate traders");
    Ok(PolicyInput {
        pool_delta: pool.delta(),
        rate_traders: Some(Arc::new(population)),
        ..Default::default()
    })
}

fn s_rate_traders(ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::RateTraders(keep(&input.rate_traders, ctx.state.rate_traders())?))
}

fn p_price_traders(ctx: &StepContext<'_>) -> Result<PolicyInput, SimError> {
    let params = &ctx.config.price_traders;
    if !params.enabled {
        return Ok(PolicyInput::new());
    }
    let state = ctx.state;
    let mut rng = ctx.rng(SALT_PRICE_TRADERS);

    if ctx.timestep.is_first() {
        let capital = ctx
            .config
            .capital
            .trader_capital(ctx.config.capital.price_traders, state.target_price);
        let population = TraderPopulation::sample(params.count, capital, &params.band, None, &mut rng)?;
        return Ok(PolicyInput {
            price_traders: Some(Arc::new(population)),
            ..Default::default()
        });
    }

    let mut population = (**state.price_traders()?).clone();
    let mut pool = PoolCursor::new(&state.pool, ctx.config.amm.fee);
    price_traders::trade(params, &mut population, &mut pool, market_view(state), &mut rng)?;
    Ok(PolicyInput {
        pool_delta: pool.delta(),
        price_traders: Some(Arc::new(population)),
        ..Default::default()
    })
}

fn s_price_traders(ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::PriceTraders(keep(&input.price_traders, ctx.state.price_traders())?))
}

// position managers

fn p_leverager(ctx: &StepContext<'_>) -> Result<PolicyInput, SimError> {
    let config = ctx.config;
    if !config.leverager.enabled {
        return Ok(PolicyInput::new());
    }
    let state = ctx.state;
    let mut ledger = (**state.cdps()?).clone();

    if ctx.timestep.is_first() && !ledger.has_owner(Owner::Leverager) {
        let terms = config
            .capital
            .leverager_terms(&config.cdp, state.target_price, state.eth_price);
        let event = leverager::open(&mut ledger, terms, ctx.timestep.value());
        return Ok(PolicyInput {
            cdps: Some(Arc::new(ledger)),
            events: vec![event],
            ..Default::default()
        });
    }

    let mut pool = PoolCursor::new(&state.pool, config.amm.fee);
    let action = leverager::rebalance(
        &config.leverager,
        &mut ledger,
        &mut pool,
        market_view(state),
        &rate_bounds(config),
    )?;
    debug!(?action, "leverager");
    Ok(PolicyInput {
        pool_delta: pool.delta(),
        cdps: Some(Arc::new(ledger)),
        ..Default::default()
    })
}

fn p_debt_market(ctx: &StepContext<'_>) -> Result<PolicyInput, SimError> {
    let config = ctx.config;
    let count = config.cdp.liquidity_cdp_count;
    if count == 0 {
        return Ok(PolicyInput::new());
    }
    let state = ctx.state;
    let mut ledger = (**state.cdps()?).clone();

    if ctx.timestep.is_first() && !ledger.has_owner(Owner::DebtMarket) {
        let terms = config
            .capital
            .liquidity_cdp_terms(&config.cdp, state.target_price, state.eth_price);
        let events = debt_market::open(&mut ledger, terms, count, ctx.timestep.value());
        return Ok(PolicyInput {
            cdps: Some(Arc::new(ledger)),
            events,
            ..Default::default()
        });
    }

    let mut pool = PoolCursor::new(&state.pool, config.amm.fee);
    debt_market::rebalance(
        &config.cdp,
        &mut ledger,
        &mut pool,
        market_view(state),
        &rate_bounds(config),
    )?;
    Ok(PolicyInput {
        pool_delta: pool.delta(),
        cdps: Some(Arc::new(ledger)),
        ..Default::default()
    })
}

// ledger

fn p_accrue_interest(ctx: &StepContext<'_>) -> Result<PolicyInput, SimError> {
    let state = ctx.state;
    let cdp = &ctx.config.cdp;
    let mut ledger = (**state.cdps()?).clone();
    ledger.accrue_all(state.stability_fee, cdp.rate_adjustment, state.timedelta)?;
    let accrued = accrue_interest(
        state.principal_debt,
        state.stability_fee,
        cdp.rate_adjustment,
        state.timedelta,
        state.accrued_interest,
    )?;
    Ok(PolicyInput {
        cdps: Some(Arc::new(ledger)),
        accrued_interest: Some(accrued),
        ..Default::default()
    })
}

fn s_accrued_interest(ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    let accrued = require(input.accrued_interest, Field::AccruedInterest)?;
    Ok(FieldUpdate::AccruedInterest(ctx.state.accrued_interest + accrued))
}

fn p_liquidate(ctx: &StepContext<'_>) -> Result<PolicyInput, SimError> {
    let cdp = &ctx.config.cdp;
    if !cdp.liquidations_enabled {
        return Ok(PolicyInput::new());
    }
    let state = ctx.state;
    let prices = PricePair::new(state.eth_price, state.target_price);
    let mut ledger = (**state.cdps()?).clone();
    let outcomes = ledger.liquidate_below(prices, cdp.liquidation_ratio, cdp.liquidation_penalty)?;
    if outcomes.is_empty() {
        return Ok(PolicyInput::new());
    }

    let mut events = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        let owner = ledger.get(outcome.id)?.owner;
        events.push(EventPayload::Liquidation(LiquidationEvent {
            position: outcome.id,
            owner,
            collateral_seized: outcome.v_bite,
            debt_written_off: outcome.u_bite,
            interest_written_off: outcome.w_bite,
            collateral_returned: outcome.free,
        }));
        if let Some(shortfall) = outcome.shortfall {
            events.push(EventPayload::LiquidationShortfall(LiquidationShortfallEvent {
                position: outcome.id,
                shortfall,
            }));
        }
    }
    debug!(liquidated = events.len(), "liquidations");
    Ok(PolicyInput {
        cdps: Some(Arc::new(ledger)),
        events,
        ..Default::default()
    })
}

// price discovery

fn p_spot_price(ctx: &StepContext<'_>) -> Result<PolicyInput, SimError> {
    Ok(PolicyInput {
        spot_market_price: Some(market::spot_market_price(&ctx.state.pool, ctx.state.eth_price)),
        ..Default::default()
    })
}

fn s_spot_market_price(_ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::SpotMarketPrice(require(input.spot_market_price, Field::SpotMarketPrice)?))
}

fn p_feed(ctx: &StepContext<'_>) -> Result<PolicyInput, SimError> {
    let state = ctx.state;
    Ok(PolicyInput {
        feed: Some(state.feed.poll(state.spot_market_price, state.cumulative_time, &ctx.config.feed)),
        ..Default::default()
    })
}

fn s_feed(_ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::Feed(require(input.feed, Field::Feed)?))
}

fn p_twap(ctx: &StepContext<'_>) -> Result<PolicyInput, SimError> {
    let state = ctx.state;
    let mut oracle = (**state.oracle()?).clone();
    let accepted = oracle.update(state.cumulative_time, state.feed.price, state.feed.timestamp)?;
    if !accepted {
        return Ok(PolicyInput::new());
    }
    let event = EventPayload::OracleUpdated(OracleUpdatedEvent {
        price: state.feed.price,
        median_price: oracle.median_price(),
        updates: oracle.updates(),
    });
    Ok(PolicyInput {
        oracle: Some(Arc::new(oracle)),
        events: vec![event],
        ..Default::default()
    })
}

fn s_oracle(ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::Oracle(keep(&input.oracle, ctx.state.oracle())?))
}

fn s_market_price_twap(ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    let oracle = keep(&input.oracle, ctx.state.oracle())?;
    Ok(FieldUpdate::MarketPriceTwap(oracle.median_price()))
}

// controller

fn p_errors(ctx: &StepContext<'_>) -> Result<PolicyInput, SimError> {
    let state = ctx.state;
    let params = &ctx.config.controller;
    let error = observe_error(
        params,
        state.target_price,
        state.market_price_twap,
        ctx.config.cdp.liquidation_ratio,
    );
    let prev_error = ctx
        .history
        .lagged(params.derivative_lag)
        .map_or(Decimal::ZERO, |s| s.state.error_star);
    Ok(PolicyInput {
        errors: Some(ErrorObservation { error, prev_error }),
        ..Default::default()
    })
}

fn s_error_star(_ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::ErrorStar(require(input.errors, Field::ErrorStar)?.error))
}

fn s_prev_error_star(_ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::PrevErrorStar(require(input.errors, Field::PrevErrorStar)?.prev_error))
}

fn s_error_star_integral(ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    let state = ctx.state;
    let observed = require(input.errors, Field::ErrorStarIntegral)?;
    let integral = update_integral(
        &ctx.config.controller,
        state.error_star_integral,
        state.error_star,
        observed.error,
        state.timedelta,
        state.cumulative_time,
    )?;
    Ok(FieldUpdate::ErrorStarIntegral(integral))
}

fn p_governance(ctx: &StepContext<'_>) -> Result<PolicyInput, SimError> {
    let state = ctx.state;
    let enabled = ctx.config.controller.is_enabled(state.cumulative_time);
    let mut events = Vec::new();
    if enabled && !state.controller_enabled {
        events.push(EventPayload::ControllerEnabled(ControllerEnabledEvent {
            cumulative_time: state.cumulative_time,
        }));
    }
    Ok(PolicyInput {
        controller_enabled: Some(enabled),
        events,
        ..Default::default()
    })
}

fn s_controller_enabled(_ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::ControllerEnabled(require(input.controller_enabled, Field::ControllerEnabled)?))
}

fn s_target_rate(ctx: &StepContext<'_>, input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    let state = ctx.state;
    let enabled = require(input.controller_enabled, Field::ControllerEnabled)?;
    Ok(FieldUpdate::TargetRate(update_target_rate(
        &ctx.config.controller,
        &state.controller_state(),
        state.cumulative_time,
        enabled,
    )))
}

fn s_target_price(ctx: &StepContext<'_>, _input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    let state = ctx.state;
    Ok(FieldUpdate::TargetPrice(update_target_price(
        state.target_price,
        state.target_rate,
        state.timedelta,
    )?))
}

// accounting. `state.totals` still holds the previous timestep's column sums here.

fn s_w_1(ctx: &StepContext<'_>, _input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    let totals = ctx.state.cdps()?.totals();
    Ok(FieldUpdate::W1(totals.dripped - ctx.state.totals.dripped))
}

fn s_w_2(ctx: &StepContext<'_>, _input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    let totals = ctx.state.cdps()?.totals();
    Ok(FieldUpdate::W2(totals.w_wiped - ctx.state.totals.w_wiped))
}

fn s_w_3(ctx: &StepContext<'_>, _input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    let totals = ctx.state.cdps()?.totals();
    Ok(FieldUpdate::W3(totals.w_bitten - ctx.state.totals.w_bitten))
}

fn non_negative(field: Field, value: Decimal) -> Result<Decimal, SimError> {
    if approx_ge_zero(value, AGGREGATE_TOLERANCE) {
        Ok(value)
    } else {
        Err(SimError::NegativeAggregate { field, value })
    }
}

fn s_eth_collateral(ctx: &StepContext<'_>, _input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    let collateral = ctx.state.cdps()?.totals().collateral();
    Ok(FieldUpdate::EthCollateral(non_negative(Field::EthCollateral, collateral)?))
}

fn s_principal_debt(ctx: &StepContext<'_>, _input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    let debt = ctx.state.cdps()?.totals().principal_debt();
    Ok(FieldUpdate::PrincipalDebt(non_negative(Field::PrincipalDebt, debt)?))
}

fn s_totals(ctx: &StepContext<'_>, _input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::Totals(ctx.state.cdps()?.totals()))
}

fn s_interest_after_bites(ctx: &StepContext<'_>, _input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::AccruedInterest(ctx.state.accrued_interest - ctx.state.w_3))
}

fn s_system_revenue(ctx: &StepContext<'_>, _input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::SystemRevenue(ctx.state.system_revenue + ctx.state.w_2))
}

fn s_cdp_metrics(ctx: &StepContext<'_>, _input: &PolicyInput) -> Result<FieldUpdate, SimError> {
    Ok(FieldUpdate::CdpMetrics(ctx.state.cdps()?.metrics()))
}
