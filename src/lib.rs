// peg-sim: stablecoin peg simulation engine.
// a RAI/ETH constant product pool, a CDP ledger, a redemption rate controller fed by a
// TWAP oracle, and agent populations trading between them, stepped through a typed
// stage pipeline. all computation is deterministic Decimal math given a seed.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: RunId, Timestep, PositionId, Owner, unit constants
//   2.x  amm.rs: swaps, liquidity add/remove, trade-to-price solvers, pool balances
//   3.x  cdp.rs: position math, to-ratio solvers, interest, liquidation
//   3.5  ledger.rs: position arena, aggregates and metrics
//   4.x  controller.rs: error, leaky integral, rate laws, target price, APY helpers
//   5.x  oracle.rs: deviation/heartbeat feed and the TWAP ring
//   6.x  agents/: rate traders, price traders, ETH leverager, liquidity CDPs
//   7.x  config.rs: sections, presets, json, validation
//   8.x  engine/: stages, pipeline, history, runs and batches
//   9.x  state.rs: snapshot fields and genesis
//   10.x exogenous.rs: input series and seeded generators
//   11.x events.rs: audit log
//   12.x market.rs: liquidity demand process, slippage, spot price

// model components
pub mod amm;
pub mod cdp;
pub mod controller;
pub mod ledger;
pub mod oracle;
pub mod types;

// agents and market processes
pub mod agents;
pub mod exogenous;
pub mod market;

// stepping
pub mod config;
pub mod engine;
pub mod events;
pub mod state;

// re exports for convenience
pub use amm::*;
pub use cdp::*;
pub use config::*;
pub use controller::*;
pub use engine::*;
pub use events::*;
pub use exogenous::*;
pub use ledger::*;
pub use market::*;
pub use oracle::*;
pub use state::*;
pub use types::*;
