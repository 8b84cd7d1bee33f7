//! Stablecoin peg simulation.
//!
//! Runs the named presets plus a Monte Carlo batch and prints a summary of
//! each: where the redemption price and the market price ended up, what the
//! leverager and the liquidity CDPs did, and what the audit log recorded.
//! Set `RUST_LOG=peg_sim=debug` to follow every stage.

use peg_sim::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::error::Error;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("peg_sim=info")))
        .with_target(false)
        .init();

    println!("Stablecoin Peg Simulation");
    println!("RAI/ETH pool, CDP ledger, redemption controller, TWAP oracle\n");

    scenario_1_launch()?;
    scenario_2_pi_controller_under_shock()?;
    scenario_3_no_controller()?;
    scenario_4_monte_carlo()?;

    println!("\nAll simulations completed.");
    Ok(())
}

const DAY: u64 = 24;

fn summarize(result: &RunResult) {
    let Some(last) = result.history.latest() else {
        println!("  run {} produced no snapshots", result.run.0);
        return;
    };
    let state = &last.state;
    println!("  run {} after {} timesteps ({})", result.run.0, result.timesteps(), state.timestamp);
    println!("    redemption price: {:.6}", state.target_price);
    println!("    redemption rate:  {:.4}% APY", target_rate_to_apy(state.target_rate).unwrap_or_default());
    println!("    market price:     {:.6} (twap {:.6})", state.market_price(), state.market_price_twap);
    println!("    pool:             {:.2} RAI / {:.4} ETH", state.pool.rai, state.pool.eth);
    println!(
        "    cdps:             {} open, {} closed, {:.2} ETH locked, {:.2} RAI debt",
        state.cdp_metrics.open_cdp_count,
        state.cdp_metrics.closed_cdp_count,
        state.eth_collateral,
        state.principal_debt
    );
    println!("    interest:         {:.4} accrued, {:.4} revenue", state.accrued_interest, state.system_revenue);

    if let Ok(events) = state.events() {
        let liquidations = events.count(|e| matches!(e, EventPayload::Liquidation(_)));
        let oracle = events.count(|e| matches!(e, EventPayload::OracleUpdated(_)));
        println!("    events:           {} total, {liquidations} liquidations, {oracle} oracle updates", events.len());
    }
    if let Some(failure) = &result.failure {
        println!("    FAILED: {failure}");
    }
}

/// Launch parameters for one week.
fn scenario_1_launch() -> Result<(), Box<dyn Error>> {
    println!("Scenario 1: Launch Parameters, One Week\n");

    let sim = Simulation::new(SimulationConfig::rai_launch())?;
    let result = sim.run(RunId(1), 7 * DAY);
    summarize(&result);

    if let Some(traders) = result.history.latest().and_then(|s| s.state.rate_traders.clone()) {
        let (buys, sells) = traders.trade_counts();
        println!("    rate traders:     {} members, {buys} buys, {sells} sells", traders.len());
    }
    println!();
    Ok(())
}

/// Full PI controller while ETH drops 40% on day three.
fn scenario_2_pi_controller_under_shock() -> Result<(), Box<dyn Error>> {
    println!("Scenario 2: PI Controller, ETH Crash\n");

    let mut config = SimulationConfig::pi_controller();
    config.exogenous.eth_price = Series::function(|_, t| if t < 3 * DAY { dec!(300) } else { dec!(180) });
    config.controller.enable_controller_time = 0;

    let sim = Simulation::new(config)?;
    let result = sim.run(RunId(1), 7 * DAY);
    summarize(&result);
    println!();
    Ok(())
}

/// Controller switched off: only traders hold the peg.
fn scenario_3_no_controller() -> Result<(), Box<dyn Error>> {
    println!("Scenario 3: No Controller\n");

    let mut config = SimulationConfig::no_controller();
    config.price_traders.enabled = true;
    config.capital.price_traders = dec!(0.1);

    let sim = Simulation::new(config)?;
    let result = sim.run(RunId(1), 3 * DAY);
    summarize(&result);

    let target = result
        .history
        .final_states()
        .iter()
        .map(|s| s.target_price)
        .all(|p| p == dec!(3.14));
    println!("    target unchanged: {target}\n");
    Ok(())
}

/// Isolated runs over seeded ETH paths with random liquidity demand.
fn scenario_4_monte_carlo() -> Result<(), Box<dyn Error>> {
    println!("Scenario 4: Monte Carlo Batch\n");

    let runs = 4;
    let timesteps = 5 * DAY;
    let mut config = SimulationConfig::rai_launch();
    config.admin.seed = 42;
    config.exogenous.eth_price = gbm_paths(&GbmParams::default(), runs, timesteps, 42)?;
    config.exogenous.token_swap_pct = normal_events(0.0, 0.001, runs, timesteps, 7)?;
    config.exogenous.liquidity_demand_pct = normal_events(0.0, 0.001, runs, timesteps, 8)?;
    config.liquidity_demand.enabled = true;

    let sim = Simulation::new(config)?;
    let report = sim.run_batch(runs, timesteps);

    for result in &report.results {
        summarize(result);
    }
    let spread: Vec<Decimal> = report
        .passed()
        .filter_map(|r| r.history.latest())
        .map(|s| s.state.market_price() - s.state.target_price)
        .collect();
    println!(
        "\n  {} passed, {} failed, market minus target per run: {:?}",
        report.passed().count(),
        report.failed().count(),
        spread.iter().map(|d| d.round_dp(4)).collect::<Vec<_>>()
    );
    Ok(())
}
