// 3.5 ledger.rs: arena of positions addressed by stable id.
// positions are never removed, closing just flips `open`. totals and metrics are
// recomputed from the full set every call instead of being maintained incrementally.

use crate::cdp::{liquidate, CdpError, LiquidationOutcome, OpenTerms, Position, PricePair};
use crate::types::{Owner, PositionId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CdpLedger {
    positions: Vec<Position>,
}

impl CdpLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, owner: Owner, terms: OpenTerms, timestep: u64) -> PositionId {
        let id = PositionId(self.positions.len() as u64);
        self.positions.push(Position::new(id, owner, terms, timestep));
        id
    }

    pub fn get(&self, id: PositionId) -> Result<&Position, CdpError> {
        self.positions
            .get(id.0 as usize)
            .ok_or(CdpError::UnknownPosition(id))
    }

    pub fn get_mut(&mut self, id: PositionId) -> Result<&mut Position, CdpError> {
        self.positions
            .get_mut(id.0 as usize)
            .ok_or(CdpError::UnknownPosition(id))
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter()
    }

    pub fn open_ids(&self, owner: Owner) -> Vec<PositionId> {
        self.positions
            .iter()
            .filter(|p| p.open && p.owner == owner)
            .map(|p| p.id)
            .collect()
    }

    pub fn has_owner(&self, owner: Owner) -> bool {
        self.positions.iter().any(|p| p.owner == owner)
    }

    /// Interest on every open position. Returns the total added.
    pub fn accrue_all(
        &mut self,
        stability_fee: Decimal,
        rate_adjustment: Decimal,
        timedelta: u64,
    ) -> Result<Decimal, CdpError> {
        let mut total = Decimal::ZERO;
        for position in self.positions.iter_mut() {
            total += position.accrue(stability_fee, rate_adjustment, timedelta)?;
        }
        Ok(total)
    }

    /// Liquidate every open position below `ratio`, in id order.
    pub fn liquidate_below(
        &mut self,
        prices: PricePair,
        ratio: Decimal,
        penalty: Decimal,
    ) -> Result<Vec<LiquidationOutcome>, CdpError> {
        let mut outcomes = Vec::new();
        for position in self.positions.iter_mut() {
            if position.is_liquidatable(prices, ratio) {
                outcomes.push(liquidate(position, prices, penalty)?);
            }
        }
        Ok(outcomes)
    }

    pub fn totals(&self) -> LedgerTotals {
        self.positions
            .iter()
            .fold(LedgerTotals::default(), |mut t, p| {
                t.locked += p.locked;
                t.freed += p.freed;
                t.v_bitten += p.v_bitten;
                t.drawn += p.drawn;
                t.wiped += p.wiped;
                t.u_bitten += p.u_bitten;
                t.dripped += p.dripped;
                t.w_wiped += p.w_wiped;
                t.w_bitten += p.w_bitten;
                t
            })
    }

    pub fn metrics(&self) -> CdpMetrics {
        let mut collateral: Vec<Decimal> = self.positions.iter().map(|p| p.net_collateral()).collect();
        let open = self.positions.iter().filter(|p| p.open).count();

        CdpMetrics {
            cdp_count: self.positions.len(),
            open_cdp_count: open,
            closed_cdp_count: self.positions.len() - open,
            mean_cdp_collateral: mean(&collateral),
            median_cdp_collateral: median(&mut collateral),
        }
    }
}

/// Column sums over every position, open or closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub locked: Decimal,
    pub freed: Decimal,
    pub v_bitten: Decimal,
    pub drawn: Decimal,
    pub wiped: Decimal,
    pub u_bitten: Decimal,
    pub dripped: Decimal,
    pub w_wiped: Decimal,
    pub w_bitten: Decimal,
}

impl LedgerTotals {
    pub fn collateral(&self) -> Decimal {
        self.locked - self.freed - self.v_bitten
    }

    pub fn principal_debt(&self) -> Decimal {
        self.drawn - self.wiped - self.u_bitten
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CdpMetrics {
    pub cdp_count: usize,
    pub open_cdp_count: usize,
    pub closed_cdp_count: usize,
    pub mean_cdp_collateral: Option<Decimal>,
    pub median_cdp_collateral: Option<Decimal>,
}

fn mean(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let sum: Decimal = values.iter().copied().sum();
    Some(sum / Decimal::from(values.len()))
}

fn median(values: &mut [Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    values.sort();
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / Decimal::TWO)
    } else {
        Some(values[mid])
    }
}
