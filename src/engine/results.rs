// 8.0.2: errors and results for runs and batches.

use super::history::History;
use crate::agents::AgentError;
use crate::amm::AmmError;
use crate::cdp::CdpError;
use crate::config::ConfigError;
use crate::controller::ControllerError;
use crate::exogenous::SeriesError;
use crate::oracle::OracleError;
use crate::state::Field;
use crate::types::{RunId, Timestep};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    #[error("State field {0} is missing")]
    MissingField(Field),

    #[error("Policy {policy} wrote {key}, already set by an earlier policy in the stage")]
    ConflictingPolicyOutput { key: &'static str, policy: &'static str },

    #[error("Update declared for {expected} returned {got}")]
    FieldMismatch { expected: Field, got: Field },

    #[error("Aggregate {field} is negative: {value}")]
    NegativeAggregate { field: Field, value: Decimal },

    #[error("Agent condition violated: {0}")]
    AgentCondition(String),

    #[error("Secondary market delta out of range: {0}")]
    SecondaryMarketDelta(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Exogenous input error: {0}")]
    Exogenous(#[from] SeriesError),

    #[error("AMM error: {0}")]
    Amm(#[from] AmmError),

    #[error("CDP error: {0}")]
    Cdp(#[from] CdpError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),
}

impl From<AgentError> for SimError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Amm(e) => SimError::Amm(e),
            AgentError::Cdp(e) => SimError::Cdp(e),
            AgentError::Controller(e) => SimError::Controller(e),
            AgentError::Condition(reason) | AgentError::Distribution(reason) => SimError::AgentCondition(reason),
            AgentError::SecondaryMarketDelta(reason) => SimError::SecondaryMarketDelta(reason),
        }
    }
}

impl From<ConfigError> for SimError {
    fn from(err: ConfigError) -> Self {
        SimError::InvalidConfig(err.to_string())
    }
}

/// Where and why a run stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    pub run: RunId,
    pub timestep: Timestep,
    pub substep: usize,
    pub stage: &'static str,
    pub field: Option<Field>,
    pub error: SimError,
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "run {} failed at timestep {} substep {} ({})",
            self.run.0, self.timestep, self.substep, self.stage
        )?;
        if let Some(field) = self.field {
            write!(f, " updating {field}")?;
        }
        write!(f, ": {}", self.error)
    }
}

/// Snapshots up to the end, or up to the failure point.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run: RunId,
    pub history: History,
    pub failure: Option<RunFailure>,
}

impl RunResult {
    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }

    /// Timesteps completed after genesis.
    pub fn timesteps(&self) -> usize {
        self.history.len().saturating_sub(1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub results: Vec<RunResult>,
}

impl BatchReport {
    pub fn passed(&self) -> impl Iterator<Item = &RunResult> {
        self.results.iter().filter(|r| r.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &RunResult> {
        self.results.iter().filter(|r| !r.is_ok())
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.is_ok())
    }
}
