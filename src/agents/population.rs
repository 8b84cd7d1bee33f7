// 6.1 population.rs: a trader population and how it is built and ordered.
// thresholds are drawn once at creation; the visiting order is reshuffled every
// timestep from a seeded rng and kept so a run can be replayed member by member.

use super::{AgentError, TraderCapital};
use crate::types::decimal_from_f64;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Normal draw floored at `min`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandDistribution {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
}

impl BandDistribution {
    pub fn new(mean: f64, std: f64, min: f64) -> Self {
        Self { mean, std, min }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Result<Decimal, AgentError> {
        let normal = Normal::new(self.mean, self.std)
            .map_err(|e| AgentError::Distribution(format!("{e}: mean={}, std={}", self.mean, self.std)))?;
        let value = normal.sample(rng).max(self.min);
        decimal_from_f64(value)
            .ok_or_else(|| AgentError::Distribution(format!("sample {value} has no decimal form")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trader {
    pub id: usize,
    pub rai_balance: Decimal,
    pub base_balance: Decimal,
    /// no-trade band half width, percent
    pub pct_bound: Decimal,
    /// horizon of the redemption price forecast
    pub days: Decimal,
    pub n_buys: u64,
    pub n_sells: u64,
}

impl Trader {
    pub fn band(&self) -> Decimal {
        self.pct_bound / Decimal::ONE_HUNDRED
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraderPopulation {
    traders: Vec<Trader>,
    last_order: Vec<usize>,
}

impl TraderPopulation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Even split of `capital` over `count` members.
    pub fn sample<R: Rng>(
        count: usize,
        capital: TraderCapital,
        band: &BandDistribution,
        days: Option<&BandDistribution>,
        rng: &mut R,
    ) -> Result<Self, AgentError> {
        if count == 0 {
            return Ok(Self::new());
        }
        let share = Decimal::from(count);
        let mut traders = Vec::with_capacity(count);
        for id in 0..count {
            let pct_bound = band.sample(rng)?;
            let days = match days {
                Some(d) => d.sample(rng)?,
                None => Decimal::ZERO,
            };
            traders.push(Trader {
                id,
                rai_balance: capital.rai / share,
                base_balance: capital.base / share,
                pct_bound,
                days,
                n_buys: 0,
                n_sells: 0,
            });
        }
        Ok(Self {
            traders,
            last_order: Vec::new(),
        })
    }

    /// Fresh permutation of member indices, recorded as `last_order`.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.traders.len()).collect();
        order.shuffle(rng);
        self.last_order = order.clone();
        order
    }

    pub fn last_order(&self) -> &[usize] {
        &self.last_order
    }

    pub fn traders(&self) -> &[Trader] {
        &self.traders
    }

    pub fn trader_mut(&mut self, index: usize) -> Option<&mut Trader> {
        self.traders.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.traders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traders.is_empty()
    }

    pub fn total_rai(&self) -> Decimal {
        self.traders.iter().map(|t| t.rai_balance).sum()
    }

    pub fn total_base(&self) -> Decimal {
        self.traders.iter().map(|t| t.base_balance).sum()
    }

    pub fn trade_counts(&self) -> (u64, u64) {
        self.traders
            .iter()
            .fold((0, 0), |(b, s), t| (b + t.n_buys, s + t.n_sells))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rust_decimal_macros::dec;

    fn capital() -> TraderCapital {
        TraderCapital { rai: dec!(1000), base: dec!(3140) }
    }

    #[test]
    fn samples_are_floored_at_min() {
        let band = BandDistribution::new(3.0, 6.0, 1.0);
        let mut rng = StdRng::seed_from_u64(11);
        let pop = TraderPopulation::sample(200, capital(), &band, None, &mut rng).unwrap();

        assert_eq!(pop.len(), 200);
        assert!(pop.traders().iter().all(|t| t.pct_bound >= Decimal::ONE));
        assert!(pop.traders().iter().all(|t| t.days.is_zero()));
        assert_eq!(pop.total_rai(), dec!(1000));
    }

    #[test]
    fn shuffle_is_seeded_and_recorded() {
        let band = BandDistribution::new(3.0, 6.0, 1.0);
        let mut rng = StdRng::seed_from_u64(1);
        let mut a = TraderPopulation::sample(20, capital(), &band, None, &mut rng).unwrap();
        let mut b = a.clone();

        let order_a = a.shuffle(&mut StdRng::seed_from_u64(99));
        let order_b = b.shuffle(&mut StdRng::seed_from_u64(99));
        assert_eq!(order_a, order_b);
        assert_eq!(a.last_order(), order_a.as_slice());

        let mut sorted = order_a.clone();
        sorted.sort();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn negative_std_is_rejected() {
        let band = BandDistribution::new(3.0, -1.0, 1.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(band.sample(&mut rng), Err(AgentError::Distribution(_))));
    }
}
