//! Agora Governance - Token-weighted governance engine.
//!
//! This crate provides:
//! - Voting-power ledger with one-hop delegation and checkpoints
//! - Pluggable vote-counting strategies
//! - Proposal lifecycle management
//! - Timelocked, content-addressed execution queue
//! - Treasury gate
//!
//! [`Engine`] ties the modules together and runs every call atomically.

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod proposal;
pub mod registry;
pub mod strategy;
pub mod timelock;
pub mod treasury;

pub use clock::{Clock, Stamp};
pub use collaborators::{
    AccessControl, ConfirmationSet, EventCategory, EventSink, GovernanceEvent, MemoryEventLog, MultisigGate, Role,
    SinkError, StaticRoles, TracingEventSink,
};
pub use config::GovernanceConfig;
pub use engine::{Collaborators, Engine, ExecutionEffect, ExecutionReceipt, GovernanceState, OperationReceipt, SET_PARAMETER};
pub use error::{ErrorKind, GovernanceError};
pub use ledger::{Checkpoint, Ledger};
pub use proposal::{PowerSource, Proposal, ProposalKind, ProposalState, VoteChoice, VoteRecord};
pub use registry::{ModuleKind, UpgradeRecord};
pub use strategy::{Outcome, StrategyConfig, StrategyKind, Tally};
pub use timelock::{operation_hash, OperationStatus, QueuedOperation};
pub use treasury::TransferRecord;
