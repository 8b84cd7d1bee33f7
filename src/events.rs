// 11.0: audit log. every notable state change in a run produces an event.
// the log is a heavy state field: shared between snapshots and evictable.

use crate::types::{Owner, PositionId, Seconds, Timestep};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestep: Timestep,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    PositionOpened(PositionOpenedEvent),
    Liquidation(LiquidationEvent),
    LiquidationShortfall(LiquidationShortfallEvent),
    ControllerEnabled(ControllerEnabledEvent),
    OracleUpdated(OracleUpdatedEvent),
    FreeMemory(FreeMemoryEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionOpenedEvent {
    pub position: PositionId,
    pub owner: Owner,
    pub locked: Decimal,
    pub drawn: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub position: PositionId,
    pub owner: Owner,
    pub collateral_seized: Decimal,
    pub debt_written_off: Decimal,
    pub interest_written_off: Decimal,
    pub collateral_returned: Decimal,
}

// collateral did not cover the bite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationShortfallEvent {
    pub position: PositionId,
    pub shortfall: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerEnabledEvent {
    pub cumulative_time: Seconds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleUpdatedEvent {
    pub price: Decimal,
    pub median_price: Decimal,
    pub updates: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeMemoryEvent {
    pub fields: Vec<String>,
    pub snapshots: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<Event>,
    next_id: u64,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, timestep: Timestep, payload: EventPayload) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.events.push(Event {
            id,
            timestep,
            payload,
        });
        id
    }

    pub fn extend(&mut self, timestep: Timestep, payloads: impl IntoIterator<Item = EventPayload>) {
        for payload in payloads {
            self.append(timestep, payload);
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn count(&self, matches: impl Fn(&EventPayload) -> bool) -> usize {
        self.events.iter().filter(|e| matches(&e.payload)).count()
    }
}
