// 5.0 oracle.rs: price feed aggregator and TWAP over its answers.
// 5.1 FeedAnswer moves on deviation or heartbeat. 5.2 TwapOracle keeps a ring of
// `granularity` observations and a running time weighted sum over them.
//
// the twap window is elastic: its width follows the actual sampling cadence, and
// the divisor switches from "since last update" to "since oldest entry" once the
// ring holds anything. keep that branch as is, downstream calibration depends on it.

use crate::types::Seconds;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("Invalid feed result: {0}")]
    InvalidFeedResult(Decimal),

    #[error("Invalid oracle config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedParams {
    /// relative move that forces a new answer
    pub deviation_threshold: Decimal,
    /// seconds an answer may age before a forced refresh
    pub staleness_threshold: Seconds,
}

impl Default for FeedParams {
    fn default() -> Self {
        Self {
            deviation_threshold: dec!(0.01),
            staleness_threshold: 3600,
        }
    }
}

// 5.1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedAnswer {
    pub price: Decimal,
    pub timestamp: Seconds,
}

impl FeedAnswer {
    /// Next answer given the current spot price.
    pub fn poll(&self, spot: Decimal, now: Seconds, params: &FeedParams) -> FeedAnswer {
        let deviated = if self.price.is_zero() {
            true
        } else {
            ((spot - self.price) / self.price).abs() >= params.deviation_threshold
        };
        let stale = now.saturating_sub(self.timestamp) > params.staleness_threshold;

        if deviated || stale {
            FeedAnswer {
                price: spot,
                timestamp: now,
            }
        } else {
            *self
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleParams {
    pub window_size: Seconds,
    pub max_window_size: Seconds,
    pub granularity: usize,
}

impl Default for OracleParams {
    fn default() -> Self {
        Self {
            window_size: 16 * 3600,
            max_window_size: 24 * 3600,
            granularity: 4,
        }
    }
}

impl OracleParams {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.granularity <= 1 {
            return Err(OracleError::InvalidConfig(format!(
                "granularity {} must exceed 1",
                self.granularity
            )));
        }
        if self.window_size == 0 {
            return Err(OracleError::InvalidConfig("window size is zero".into()));
        }
        if self.max_window_size <= self.window_size {
            return Err(OracleError::InvalidConfig(format!(
                "max window {} must exceed window {}",
                self.max_window_size, self.window_size
            )));
        }
        if self.window_size % self.granularity as u64 != 0 {
            return Err(OracleError::InvalidConfig(format!(
                "window {} not divisible by granularity {}",
                self.window_size, self.granularity
            )));
        }
        Ok(())
    }

    pub fn period_size(&self) -> Seconds {
        self.window_size / self.granularity as u64
    }
}

// 5.2
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwapObservation {
    pub timestamp: Seconds,
    /// price times the seconds it was held
    pub time_adjusted_price: Decimal,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwapOracle {
    granularity: usize,
    window_size: Seconds,
    period_size: Seconds,
    observations: VecDeque<TwapObservation>,
    cumulative: Decimal,
    median_price: Decimal,
    last_update_time: Seconds,
    updates: u64,
    link_aggregator_timestamp: Seconds,
}

impl TwapOracle {
    pub fn new(params: &OracleParams) -> Result<Self, OracleError> {
        params.validate()?;
        Ok(Self {
            granularity: params.granularity,
            window_size: params.window_size,
            period_size: params.period_size(),
            observations: VecDeque::with_capacity(params.granularity),
            cumulative: Decimal::ZERO,
            median_price: Decimal::ZERO,
            last_update_time: 0,
            updates: 0,
            link_aggregator_timestamp: 0,
        })
    }

    /// Offer a feed answer at `now`. Returns whether it was accepted.
    ///
    /// Too soon after the last observation, or an upstream timestamp that
    /// does not move forward, is a silent no-op. A non-positive price is an error.
    pub fn update(
        &mut self,
        now: Seconds,
        price: Decimal,
        aggregator_timestamp: Seconds,
    ) -> Result<bool, OracleError> {
        let elapsed = match self.observations.back() {
            None => self.period_size,
            Some(last) => now.saturating_sub(last.timestamp),
        };
        if !self.observations.is_empty() && elapsed < self.period_size {
            return Ok(false);
        }

        if price <= Decimal::ZERO {
            return Err(OracleError::InvalidFeedResult(price));
        }
        if aggregator_timestamp <= self.link_aggregator_timestamp {
            return Ok(false);
        }

        // measured before the ring changes
        let time_since_first = match self.observations.front() {
            None => now.saturating_sub(self.last_update_time),
            Some(first) => now.saturating_sub(first.timestamp),
        };
        if time_since_first == 0 {
            return Ok(false);
        }

        self.push_observation(now, elapsed, price);

        self.median_price = self.cumulative / Decimal::from(time_since_first);
        self.last_update_time = now;
        self.updates += 1;
        self.link_aggregator_timestamp = aggregator_timestamp;
        Ok(true)
    }

    // evict before append so the ring never exceeds granularity
    fn push_observation(&mut self, now: Seconds, elapsed: Seconds, price: Decimal) {
        let time_adjusted_price = price * Decimal::from(elapsed);
        self.cumulative += time_adjusted_price;

        if self.observations.len() >= self.granularity {
            if let Some(evicted) = self.observations.pop_front() {
                self.cumulative -= evicted.time_adjusted_price;
            }
        }
        self.observations.push_back(TwapObservation {
            timestamp: now,
            time_adjusted_price,
            price,
        });
    }

    pub fn median_price(&self) -> Decimal {
        self.median_price
    }

    pub fn cumulative(&self) -> Decimal {
        self.cumulative
    }

    pub fn observations(&self) -> &VecDeque<TwapObservation> {
        &self.observations
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn period_size(&self) -> Seconds {
        self.period_size
    }

    pub fn window_size(&self) -> Seconds {
        self.window_size
    }

    pub fn last_update_time(&self) -> Seconds {
        self.last_update_time
    }

    pub fn link_aggregator_timestamp(&self) -> Seconds {
        self.link_aggregator_timestamp
    }

    /// Index, in the count of all accepted updates, of the oldest entry still in the ring.
    pub fn earliest_observation_index(&self) -> u64 {
        let granularity = self.granularity as u64;
        if self.updates <= granularity {
            0
        } else {
            self.updates - granularity
        }
    }

    pub fn is_full(&self) -> bool {
        self.observations.len() == self.granularity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Seconds = 4 * 3600;

    fn oracle() -> TwapOracle {
        TwapOracle::new(&OracleParams::default()).unwrap()
    }

    #[test]
    fn rejects_bad_config() {
        let bad = [
            OracleParams { granularity: 1, ..Default::default() },
            OracleParams { window_size: 10, granularity: 4, max_window_size: 100 },
            OracleParams { window_size: 100, granularity: 4, max_window_size: 100 },
        ];
        for params in bad {
            assert!(matches!(TwapOracle::new(&params), Err(OracleError::InvalidConfig(_))));
        }
    }

    #[test]
    fn four_observations_then_eviction() {
        let mut twap = oracle();
        for (i, price) in [dec!(1), dec!(2), dec!(3), dec!(4)].into_iter().enumerate() {
            let now = PERIOD * (i as u64 + 1);
            assert!(twap.update(now, price, now).unwrap());
        }
        let p = Decimal::from(PERIOD);
        assert_eq!(twap.cumulative(), dec!(10) * p);
        // divisor runs from the oldest entry, which is one period short
        assert_eq!(twap.median_price(), dec!(10) * p / (dec!(3) * p));
        assert!(twap.is_full());

        let now = PERIOD * 5;
        assert!(twap.update(now, dec!(5), now).unwrap());
        assert_eq!(twap.cumulative(), dec!(14) * p);
        assert_eq!(twap.median_price(), dec!(3.5));
        assert_eq!(twap.observations().len(), 4);
        assert_eq!(twap.observations()[0].price, dec!(2));
        assert_eq!(twap.earliest_observation_index(), 1);
    }

    #[test]
    fn first_update_divides_by_time_since_start() {
        let mut twap = oracle();
        assert!(twap.update(PERIOD, dec!(3), PERIOD).unwrap());
        assert_eq!(twap.median_price(), dec!(3));
    }

    #[test]
    fn too_soon_is_noop() {
        let mut twap = oracle();
        twap.update(PERIOD, dec!(3), PERIOD).unwrap();
        let before = twap.clone();
        assert!(!twap.update(PERIOD + 3600, dec!(5), PERIOD + 3600).unwrap());
        assert_eq!(twap, before);
    }

    #[test]
    fn stale_upstream_timestamp_is_noop() {
        let mut twap = oracle();
        twap.update(PERIOD, dec!(3), PERIOD).unwrap();
        assert!(!twap.update(2 * PERIOD, dec!(5), PERIOD).unwrap());
        assert_eq!(twap.updates(), 1);
    }

    #[test]
    fn non_positive_price_is_error() {
        let mut twap = oracle();
        assert_eq!(
            twap.update(PERIOD, Decimal::ZERO, PERIOD),
            Err(OracleError::InvalidFeedResult(Decimal::ZERO))
        );
    }

    #[test]
    fn feed_moves_on_deviation_or_heartbeat() {
        let params = FeedParams::default();
        let answer = FeedAnswer { price: dec!(3), timestamp: 3600 };

        // small move inside the heartbeat keeps the old answer
        assert_eq!(answer.poll(dec!(3.01), 7200, &params), answer);

        let moved = answer.poll(dec!(3.1), 7200, &params);
        assert_eq!(moved, FeedAnswer { price: dec!(3.1), timestamp: 7200 });

        let refreshed = answer.poll(dec!(3.01), 3600 + 3601, &params);
        assert_eq!(refreshed.timestamp, 7201);
    }
}
