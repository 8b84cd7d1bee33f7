//! Property-based tests for the core math.
//!
//! These tests verify invariants hold under random inputs.

use peg_sim::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// Strategies for generating test data
fn reserve_strategy() -> impl Strategy<Value = Decimal> {
    (10_000i64..10_000_000i64).prop_map(Decimal::from)
}

fn fee_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..=10i64).prop_map(|x| Decimal::new(x, 3)) // 0.1% to 1%
}

// share of the reserve traded, in basis points
fn trade_bps_strategy() -> impl Strategy<Value = i64> {
    1i64..3_000i64
}

const PERIOD: u64 = 4 * 3600;

proptest! {
    /// Fee-adjusted constant product never decreases across swaps.
    #[test]
    fn swaps_never_shrink_the_invariant(
        rai in reserve_strategy(),
        eth in reserve_strategy(),
        fee in fee_strategy(),
        trades in proptest::collection::vec((any::<bool>(), trade_bps_strategy()), 1..20),
    ) {
        let mut rai = rai;
        let mut eth = eth;

        for (sell_rai, bps) in trades {
            let k_before = rai * eth;
            if sell_rai {
                let dx = rai * Decimal::new(bps, 4);
                let (d_rai, d_eth) = swap_exact_in(dx, rai, eth, fee).unwrap();
                rai += d_rai;
                eth += d_eth;
            } else {
                let dy = rai * Decimal::new(bps, 4);
                let (d_eth, d_rai) = swap_exact_out(dy, eth, rai, fee).unwrap();
                rai += d_rai;
                eth += d_eth;
            }
            prop_assert!(rai > Decimal::ZERO && eth > Decimal::ZERO);
            prop_assert!(rai * eth >= k_before, "k fell from {} to {}", k_before, rai * eth);
        }
    }

    /// Buying back the output of a sale costs the original input.
    #[test]
    fn exact_out_inverts_exact_in(
        reserve_in in reserve_strategy(),
        reserve_out in reserve_strategy(),
        fee in fee_strategy(),
        bps in trade_bps_strategy(),
    ) {
        let dx = reserve_in * Decimal::new(bps, 4);
        let (applied, dy) = swap_exact_in(dx, reserve_in, reserve_out, fee).unwrap();
        prop_assert!(dy <= Decimal::ZERO);

        let (recovered, _) = swap_exact_out(-dy, reserve_in, reserve_out, fee).unwrap();
        let tolerance = dec!(0.000000001) * dx.max(Decimal::ONE);
        prop_assert!((recovered - applied).abs() < tolerance, "{} vs {}", recovered, applied);
    }

    /// Net collateral and debt stay non-negative and liquidated positions stay closed.
    #[test]
    fn ledger_stays_non_negative(
        opening in proptest::collection::vec((1i64..1_000i64, 150i64..300i64), 1..6),
        path in proptest::collection::vec(100i64..500i64, 1..30),
        penalty_pct in 0i64..20i64,
    ) {
        let target = dec!(3.14);
        let liquidation_ratio = dec!(1.45);
        let buffered = dec!(2.9);
        let penalty = Decimal::new(penalty_pct, 2);

        let mut ledger = CdpLedger::new();
        for (lock, ratio) in opening {
            let terms = open_at_ratio(
                OpenAmount::Lock(Decimal::from(lock)),
                PricePair::new(dec!(300), target),
                Decimal::new(ratio, 2),
            ).unwrap();
            ledger.open(Owner::DebtMarket, terms, 1);
        }

        let mut closed = Vec::new();
        for eth in path {
            let prices = PricePair::new(Decimal::from(eth), target);
            ledger.accrue_all(DEFAULT_STABILITY_FEE, Decimal::ONE, 3600).unwrap();

            let open: Vec<PositionId> = ledger.iter().filter(|p| p.open).map(|p| p.id).collect();
            for id in open {
                let position = ledger.get(id).unwrap();
                if !position.is_above(prices, liquidation_ratio) {
                    continue;
                }
                if position.is_above(prices, buffered) {
                    let draw = draw_to_ratio(position, prices, buffered).unwrap();
                    ledger.get_mut(id).unwrap().draw(draw).unwrap();
                } else {
                    let wipe = wipe_to_ratio(position, prices, buffered).unwrap();
                    ledger.get_mut(id).unwrap().wipe(wipe).unwrap();
                }
            }

            for outcome in ledger.liquidate_below(prices, liquidation_ratio, penalty).unwrap() {
                closed.push(outcome.id);
            }

            for position in ledger.iter() {
                prop_assert!(approx_ge_zero(position.net_collateral(), AGGREGATE_TOLERANCE));
                prop_assert!(approx_ge_zero(position.net_debt(), AGGREGATE_TOLERANCE));
            }
            for id in &closed {
                prop_assert!(!ledger.get(*id).unwrap().open);
            }
        }

        let totals = ledger.totals();
        prop_assert!(approx_ge_zero(totals.collateral(), AGGREGATE_TOLERANCE));
        prop_assert!(approx_ge_zero(totals.principal_debt(), AGGREGATE_TOLERANCE));
    }

    /// Upstream timestamps only move forward, and once the ring has wrapped the
    /// median sits between the prices it holds.
    #[test]
    fn twap_window_is_monotonic_and_convex(
        offers in proptest::collection::vec((1u64..=3 * PERIOD, 1i64..100_000i64, -2i64..=3i64), 1..40),
    ) {
        let mut twap = TwapOracle::new(&OracleParams::default()).unwrap();
        let mut now = 0u64;
        let mut upstream = 0i64;
        let mut last_accepted = 0u64;

        for (gap, cents, ts_step) in offers {
            now += gap;
            upstream = (upstream + ts_step).max(0);
            let price = Decimal::new(cents, 2);

            let accepted = twap.update(now, price, upstream as u64).unwrap();
            if !accepted {
                continue;
            }
            prop_assert!(upstream as u64 > last_accepted);
            last_accepted = upstream as u64;
            prop_assert_eq!(twap.link_aggregator_timestamp(), last_accepted);
            prop_assert!(twap.observations().len() <= 4);

            if twap.updates() > 4 {
                let prices = twap.observations().iter().map(|o| o.price);
                let min = prices.clone().min().unwrap();
                let max = prices.max().unwrap();
                let tolerance = dec!(0.000000001);
                prop_assert!(twap.median_price() >= min - tolerance, "{} < {}", twap.median_price(), min);
                prop_assert!(twap.median_price() <= max + tolerance, "{} > {}", twap.median_price(), max);
            }
        }
    }

    /// With zero error and no integral or derivative gain, an incremental
    /// controller holds its rate.
    #[test]
    fn incremental_rate_holds_under_zero_error(
        kp in 1i64..1_000i64,
        rate in -1_000i64..1_000i64,
        periods in 1u64..50u64,
    ) {
        let params = ControllerParams {
            kp: Decimal::new(kp, 9),
            ki: Decimal::ZERO,
            kd: Decimal::ZERO,
            rate_law: RateLaw::Incremental,
            enable_controller_time: 0,
            ..Default::default()
        };
        let initial = Decimal::new(rate, 15);
        let mut state = ControllerState {
            target_price: dec!(3.14),
            target_rate: initial,
            error: Decimal::ZERO,
            prev_error: Decimal::ZERO,
            error_integral: Decimal::ZERO,
        };

        for period in 1..=periods {
            let now = period * params.control_period;
            state.target_rate = update_target_rate(&params, &state, now, true);
            prop_assert_eq!(state.target_rate, initial);
        }
    }

    /// Zero error and zero rate: the redemption price never moves.
    #[test]
    fn absolute_controller_keeps_price_under_zero_error(
        kp in 1i64..1_000i64,
        price_cents in 1i64..10_000i64,
        steps in 1u64..100u64,
    ) {
        let params = ControllerParams {
            kp: Decimal::new(kp, 9),
            ki: Decimal::ZERO,
            kd: Decimal::ZERO,
            rate_law: RateLaw::Absolute,
            enable_controller_time: 0,
            ..Default::default()
        };
        let initial = Decimal::new(price_cents, 2);
        let mut state = ControllerState {
            target_price: initial,
            target_rate: Decimal::ZERO,
            error: Decimal::ZERO,
            prev_error: Decimal::ZERO,
            error_integral: Decimal::ZERO,
        };

        for step in 1..=steps {
            let now = step * 3600;
            state.target_rate = update_target_rate(&params, &state, now, true);
            state.target_price = update_target_price(state.target_price, state.target_rate, 3600).unwrap();
            prop_assert_eq!(state.target_rate, Decimal::ZERO);
            prop_assert_eq!(state.target_price, initial);
        }
    }

    /// Error observation vanishes exactly when the twap sits on the target.
    #[test]
    fn error_is_zero_on_target(price_cents in 1i64..10_000i64) {
        let params = ControllerParams::default();
        let price = Decimal::new(price_cents, 2);
        prop_assert_eq!(observe_error(&params, price, price, dec!(1.45)), Decimal::ZERO);
    }
}
