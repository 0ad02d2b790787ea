//! Timelocked execution queue.
//!
//! Operations are content addressed: the identity of an operation is the
//! blake3 hash of the borsh encoding of `(target, function, args, eta)`.
//! Queuing the same content twice is rejected; changing any field yields a
//! new, independent operation.

use std::collections::HashMap;

use agora_types::{Address, Hash, Height};
use borsh::BorshSerialize;
use serde::{Deserialize, Serialize};

use crate::clock::Stamp;
use crate::error::GovernanceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelockParams {
    pub min_delay: u64,
    pub max_delay: u64,
    pub delay: u64,
    pub grace_period: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub hash: Hash,
    pub target: Address,
    pub function: String,
    pub args: Vec<u8>,
    pub eta: Height,
    pub executed: bool,
    pub cancelled: bool,
    pub queued_at: Stamp,
    pub executed_at: Option<Stamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting for `eta`
    Queued,
    /// Inside `[eta, eta + grace_period]`
    Ready,
    /// Grace period passed; never executable again
    Expired,
    Executed,
    Cancelled,
}

impl QueuedOperation {
    pub fn status(&self, now: Height, grace_period: u64) -> OperationStatus {
        if self.cancelled {
            OperationStatus::Cancelled
        } else if self.executed {
            OperationStatus::Executed
        } else if now < self.eta {
            OperationStatus::Queued
        } else if now > self.eta.saturating_add(grace_period) {
            OperationStatus::Expired
        } else {
            OperationStatus::Ready
        }
    }
}

/// Identity of an operation.
pub fn operation_hash(target: &Address, function: &str, args: &[u8], eta: Height) -> Result<Hash, GovernanceError> {
    let encoded = encode_operation(target, function, args, eta)
        .map_err(|e| GovernanceError::InvalidParameter(format!("operation cannot be encoded: {}", e)))?;
    Ok(Hash::compute(&encoded))
}

fn encode_operation(target: &Address, function: &str, args: &[u8], eta: Height) -> std::io::Result<Vec<u8>> {
    let mut encoded = Vec::with_capacity(Address::LEN + function.len() + args.len() + 16);
    BorshSerialize::serialize(target, &mut encoded)?;
    BorshSerialize::serialize(function, &mut encoded)?;
    BorshSerialize::serialize(args, &mut encoded)?;
    BorshSerialize::serialize(&eta, &mut encoded)?;
    Ok(encoded)
}

#[derive(Debug, Clone)]
pub struct Timelock {
    admin: Address,
    /// May queue but not cancel; the current lifecycle implementation
    proposer: Address,
    pending_admin: Option<Address>,
    params: TimelockParams,
    operations: HashMap<Hash, QueuedOperation>,
}

impl Timelock {
    pub fn new(admin: Address, proposer: Address, params: TimelockParams) -> Self {
        Self {
            admin,
            proposer,
            pending_admin: None,
            params,
            operations: HashMap::new(),
        }
    }

    pub fn admin(&self) -> Address {
        self.admin
    }

    pub fn proposer(&self) -> Address {
        self.proposer
    }

    pub fn set_proposer(&mut self, proposer: Address) {
        self.proposer = proposer;
    }

    pub fn pending_admin(&self) -> Option<Address> {
        self.pending_admin
    }

    pub fn params(&self) -> TimelockParams {
        self.params
    }

    pub fn delay(&self) -> u64 {
        self.params.delay
    }

    pub fn operation(&self, hash: &Hash) -> Option<&QueuedOperation> {
        self.operations.get(hash)
    }

    pub fn operations(&self) -> impl Iterator<Item = &QueuedOperation> {
        self.operations.values()
    }

    fn require_admin(&self, caller: Address, action: &str) -> Result<(), GovernanceError> {
        if caller != self.admin {
            return Err(GovernanceError::Unauthorized(format!(
                "only the timelock admin can {}",
                action
            )));
        }
        Ok(())
    }

    /// Validates a queue request and returns the operation's identity.
    pub fn check_queue(
        &self,
        caller: Address,
        target: &Address,
        function: &str,
        args: &[u8],
        eta: Height,
        now: Height,
    ) -> Result<Hash, GovernanceError> {
        if caller != self.proposer {
            self.require_admin(caller, "queue operations")?;
        }
        if function.is_empty() {
            return Err(GovernanceError::InvalidParameter("empty function name".to_string()));
        }
        let earliest = now.checked_add(self.params.delay).ok_or(GovernanceError::Overflow)?;
        if eta < earliest {
            return Err(GovernanceError::InvalidParameter(format!(
                "eta {} is before the earliest allowed height {}",
                eta, earliest
            )));
        }

        let hash = operation_hash(target, function, args, eta)?;
        if self.operations.contains_key(&hash) {
            return Err(GovernanceError::AlreadyExists(format!("operation {}", hash)));
        }
        Ok(hash)
    }

    pub fn queue(
        &mut self,
        caller: Address,
        target: Address,
        function: String,
        args: Vec<u8>,
        eta: Height,
        stamp: Stamp,
    ) -> Result<Hash, GovernanceError> {
        let hash = self.check_queue(caller, &target, &function, &args, eta, stamp.height)?;
        self.operations.insert(
            hash,
            QueuedOperation {
                hash,
                target,
                function,
                args,
                eta,
                executed: false,
                cancelled: false,
                queued_at: stamp,
                executed_at: None,
            },
        );
        Ok(hash)
    }

    /// Checks that `hash` may run at `now`. Anyone may execute a ready
    /// operation.
    pub fn ensure_ready(&self, hash: &Hash, now: Height) -> Result<&QueuedOperation, GovernanceError> {
        let op = self
            .operations
            .get(hash)
            .ok_or_else(|| GovernanceError::NotFound(format!("operation {}", hash)))?;
        match op.status(now, self.params.grace_period) {
            OperationStatus::Ready => Ok(op),
            OperationStatus::Cancelled => Err(GovernanceError::Cancelled(*hash)),
            OperationStatus::Executed => Err(GovernanceError::AlreadyExecuted(format!("operation {}", hash))),
            OperationStatus::Queued => Err(GovernanceError::StateNotReady(format!(
                "operation {} executable from {}",
                hash, op.eta
            ))),
            OperationStatus::Expired => Err(GovernanceError::StateExpired(format!(
                "operation {} expired at {}",
                hash,
                op.eta.saturating_add(self.params.grace_period)
            ))),
        }
    }

    pub fn mark_executed(&mut self, hash: &Hash, stamp: Stamp) -> Result<QueuedOperation, GovernanceError> {
        self.ensure_ready(hash, stamp.height)?;
        let op = self
            .operations
            .get_mut(hash)
            .ok_or_else(|| GovernanceError::NotFound(format!("operation {}", hash)))?;
        op.executed = true;
        op.executed_at = Some(stamp);
        Ok(op.clone())
    }

    /// One-way. Executed operations cannot be cancelled.
    pub fn cancel(&mut self, caller: Address, hash: &Hash) -> Result<(), GovernanceError> {
        self.require_admin(caller, "cancel operations")?;
        let op = self
            .operations
            .get_mut(hash)
            .ok_or_else(|| GovernanceError::NotFound(format!("operation {}", hash)))?;
        if op.cancelled {
            return Err(GovernanceError::Cancelled(*hash));
        }
        if op.executed {
            return Err(GovernanceError::AlreadyExecuted(format!("operation {}", hash)));
        }
        op.cancelled = true;
        Ok(())
    }

    /// Returns the previous delay.
    pub fn set_delay(&mut self, caller: Address, delay: u64) -> Result<u64, GovernanceError> {
        self.require_admin(caller, "change the delay")?;
        if delay < self.params.min_delay || delay > self.params.max_delay {
            return Err(GovernanceError::InvalidParameter(format!(
                "delay {} outside [{}, {}]",
                delay, self.params.min_delay, self.params.max_delay
            )));
        }
        Ok(std::mem::replace(&mut self.params.delay, delay))
    }

    pub fn propose_admin(&mut self, caller: Address, candidate: Address) -> Result<(), GovernanceError> {
        self.require_admin(caller, "propose a new admin")?;
        if candidate.is_zero() {
            return Err(GovernanceError::InvalidParameter("admin candidate is the zero address".to_string()));
        }
        self.pending_admin = Some(candidate);
        Ok(())
    }

    /// Second phase of the admin handover; returns the previous admin.
    pub fn accept_admin(&mut self, caller: Address) -> Result<Address, GovernanceError> {
        match self.pending_admin {
            Some(candidate) if candidate == caller => {
                self.pending_admin = None;
                Ok(std::mem::replace(&mut self.admin, caller))
            }
            Some(_) => Err(GovernanceError::Unauthorized(
                "only the proposed admin can accept".to_string(),
            )),
            None => Err(GovernanceError::NotFound("no pending admin".to_string())),
        }
    }
}
