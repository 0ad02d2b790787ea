//! Seams to the collaborators the engine consumes but does not own:
//! access control, event logging and multisig confirmation.

use std::collections::{BTreeSet, HashMap};

use agora_types::Address;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Stamp;

/// Privileged roles checked through [`AccessControl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Ledger authority: lockers, registry upgrades
    Admin,
    Minter,
    StrategyManager,
    TreasuryManager,
}

pub trait AccessControl: Send + Sync {
    fn can_manage(&self, caller: &Address, role: Role) -> bool;
}

/// In-memory role table.
#[derive(Debug, Default)]
pub struct StaticRoles {
    grants: RwLock<HashMap<Role, BTreeSet<Address>>>,
}

impl StaticRoles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table where `admin` holds every role.
    pub fn with_admin(admin: Address) -> Self {
        let roles = Self::new();
        for role in [Role::Admin, Role::Minter, Role::StrategyManager, Role::TreasuryManager] {
            roles.grant(role, admin);
        }
        roles
    }

    pub fn grant(&self, role: Role, account: Address) -> bool {
        self.grants.write().entry(role).or_default().insert(account)
    }

    pub fn revoke(&self, role: Role, account: &Address) -> bool {
        self.grants
            .write()
            .get_mut(&role)
            .map(|members| members.remove(account))
            .unwrap_or(false)
    }
}

impl AccessControl for StaticRoles {
    fn can_manage(&self, caller: &Address, role: Role) -> bool {
        self.grants
            .read()
            .get(&role)
            .map(|members| members.contains(caller))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Ledger,
    Strategy,
    Proposal,
    Timelock,
    Treasury,
    Registry,
}

/// One state transition, as handed to an [`EventSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceEvent {
    pub event_type: String,
    pub actor: Address,
    pub target: Option<Address>,
    pub payload: serde_json::Value,
    pub category: EventCategory,
    pub stamp: Stamp,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SinkError {
    #[error("event sink full: capacity {0}")]
    Full(usize),

    #[error("event sink unavailable: {0}")]
    Unavailable(String),
}

/// Receives one event per committed transition. A failure here never
/// rolls back the transition.
pub trait EventSink: Send + Sync {
    fn log_event(&self, event: &GovernanceEvent) -> Result<u64, SinkError>;
}

/// Bounded in-memory event log.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<GovernanceEvent>>,
    capacity: Option<usize>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            capacity: Some(capacity),
        }
    }

    pub fn events(&self) -> Vec<GovernanceEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn of_type(&self, event_type: &str) -> Vec<GovernanceEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect()
    }
}

impl EventSink for MemoryEventLog {
    fn log_event(&self, event: &GovernanceEvent) -> Result<u64, SinkError> {
        let mut events = self.events.lock();
        if let Some(capacity) = self.capacity {
            if events.len() >= capacity {
                return Err(SinkError::Full(capacity));
            }
        }
        events.push(event.clone());
        Ok(events.len() as u64)
    }
}

/// Emits every event as a structured `tracing` record.
#[derive(Debug, Default)]
pub struct TracingEventSink {
    emitted: Mutex<u64>,
}

impl TracingEventSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for TracingEventSink {
    fn log_event(&self, event: &GovernanceEvent) -> Result<u64, SinkError> {
        let mut emitted = self.emitted.lock();
        *emitted += 1;
        tracing::info!(
            target: "agora::events",
            event_id = *emitted,
            event_type = %event.event_type,
            category = ?event.category,
            actor = %event.actor,
            height = event.stamp.height,
            sequence = event.stamp.sequence,
            payload = %event.payload,
            "governance event"
        );
        Ok(*emitted)
    }
}

/// Optional extra gate before treasury releases.
pub trait MultisigGate: Send + Sync {
    fn has_enough_confirmations(&self, tx_id: u64) -> bool;
}

/// Multisig stand-in where confirmations are recorded directly.
#[derive(Debug, Default)]
pub struct ConfirmationSet {
    confirmed: RwLock<BTreeSet<u64>>,
}

impl ConfirmationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirm(&self, tx_id: u64) {
        self.confirmed.write().insert(tx_id);
    }
}

impl MultisigGate for ConfirmationSet {
    fn has_enough_confirmations(&self, tx_id: u64) -> bool {
        self.confirmed.read().contains(&tx_id)
    }
}
