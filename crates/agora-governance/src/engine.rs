//! Governance engine.
//!
//! Owns every module's state behind a single write lock. Each mutating call
//! holds the lock from its first check to its last write, so calls are
//! atomic and totally ordered, and cross-module chains (lifecycle, ledger,
//! strategy, treasury) either apply completely or not at all. Every call
//! validates all of its preconditions before the first write.
//!
//! The clock's sequence is claimed only once a call has succeeded. Events
//! are emitted after the lock is released; a failing sink is logged and
//! ignored.

use std::sync::Arc;

use agora_types::{Address, Amount, Hash, Height};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::clock::{Clock, Stamp};
use crate::collaborators::{
    AccessControl, EventCategory, EventSink, GovernanceEvent, MultisigGate, Role, StaticRoles,
    TracingEventSink,
};
use crate::config::GovernanceConfig;
use crate::error::GovernanceError;
use crate::ledger::{Checkpoint, Ledger};
use crate::proposal::{
    decode_le_u128, Lifecycle, LifecycleParams, PowerSource, Proposal, ProposalKind,
    ProposalState, VoteChoice, VoteRecord,
};
use crate::registry::{ModuleKind, Registry, UpgradeRecord};
use crate::strategy::{Outcome, StrategyConfig, StrategyEngine, StrategyKind};
use crate::timelock::{OperationStatus, QueuedOperation, Timelock, TimelockParams};
use crate::treasury::{TransferRecord, Treasury};

/// Timelock function that sets a lifecycle parameter when its target is the
/// lifecycle principal. Arguments are borsh `(String, Vec<u8>)`.
pub const SET_PARAMETER: &str = "set_parameter";

/// All module state guarded by the engine's lock.
#[derive(Debug, Clone)]
pub struct GovernanceState {
    pub clock: Clock,
    pub ledger: Ledger,
    pub strategies: StrategyEngine,
    pub lifecycle: Lifecycle,
    pub timelock: Timelock,
    pub treasury: Treasury,
    pub registry: Registry,
}

impl GovernanceState {
    fn outcome(&self, proposal: &Proposal) -> Result<Outcome, GovernanceError> {
        self.strategies
            .thresholds_for(proposal.id)
            .evaluate(&proposal.tally, self.ledger.total_supply())
    }

    /// Address acting as the lifecycle module: whatever the registry
    /// currently lists for the slot.
    pub fn governor(&self) -> Address {
        self.registry.implementation(ModuleKind::Lifecycle)
    }

    /// Re-point the modules that trust the lifecycle at its current
    /// implementation.
    fn rewire(&mut self) {
        let governor = self.governor();
        self.strategies.set_lifecycle(governor);
        self.timelock.set_proposer(governor);
        self.treasury.set_governor(governor);
    }

    fn state_of(&self, proposal: &Proposal) -> Result<ProposalState, GovernanceError> {
        match proposal.phase(self.clock.now()) {
            Some(state) => Ok(state),
            None if self.outcome(proposal)?.passed() => Ok(ProposalState::Passed),
            None => Ok(ProposalState::Failed),
        }
    }
}

/// External collaborators the engine consults.
#[derive(Clone)]
pub struct Collaborators {
    pub access: Arc<dyn AccessControl>,
    pub events: Arc<dyn EventSink>,
    pub multisig: Option<Arc<dyn MultisigGate>>,
}

impl Collaborators {
    /// `admin` holds every role; events go to `tracing`; no multisig.
    pub fn for_admin(admin: Address) -> Self {
        Self {
            access: Arc::new(StaticRoles::with_admin(admin)),
            events: Arc::new(TracingEventSink::new()),
            multisig: None,
        }
    }
}

/// What an executed proposal did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum ExecutionEffect {
    Transferred { record: TransferRecord },
    ParameterSet {
        key: String,
        #[serde(with = "agora_types::amount_serde")]
        value: u128,
    },
    Upgraded { record: UpgradeRecord },
    Queued { hash: Hash, eta: Height },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub proposal_id: u64,
    pub outcome: Outcome,
    pub effect: ExecutionEffect,
    pub stamp: Stamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationReceipt {
    pub operation: QueuedOperation,
    /// Parameter applied in place; `None` means the caller dispatches the
    /// operation itself.
    pub applied_parameter: Option<(String, u128)>,
}

/// Validated dispatch plan for a passed proposal.
enum Dispatch {
    Transfer { recipient: Address, amount: Amount, confirmed: bool },
    Parameter { key: String, value: u128 },
    Upgrade { module: ModuleKind, implementation: Address },
    Queue { target: Address, function: String, args: Vec<u8>, eta: Height },
}

pub struct Engine {
    state: RwLock<GovernanceState>,
    access: Arc<dyn AccessControl>,
    events: Arc<dyn EventSink>,
    multisig: Option<Arc<dyn MultisigGate>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("height", &self.height())
            .field("multisig", &self.multisig.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine. `admin` becomes the registry authority and the
    /// timelock admin.
    pub fn new(
        config: &GovernanceConfig,
        admin: Address,
        collaborators: Collaborators,
    ) -> Result<Self, GovernanceError> {
        config.validate()?;
        if config.treasury.require_multisig && collaborators.multisig.is_none() {
            return Err(GovernanceError::InvalidParameter(
                "treasury requires multisig but no gate is configured".to_string(),
            ));
        }

        let registry = Registry::new(admin);
        let governor = registry.implementation(ModuleKind::Lifecycle);
        let supply_cap = config.ledger.supply_cap as Amount;
        let strategies = StrategyEngine::new(
            governor,
            config.strategies.to_map(),
            config.strategies.default_strategy,
        )?;
        let state = GovernanceState {
            clock: Clock::new(),
            ledger: Ledger::new(supply_cap),
            strategies,
            lifecycle: Lifecycle::new(config.lifecycle.params(supply_cap)),
            timelock: Timelock::new(admin, governor, config.timelock.params()),
            treasury: Treasury::new(governor, config.treasury.require_multisig),
            registry,
        };

        info!(
            authority = %admin,
            voting_period = config.lifecycle.voting_period,
            execution_delay = config.lifecycle.execution_delay,
            default_strategy = config.strategies.default_strategy.name(),
            "governance engine initialised"
        );

        Ok(Self {
            state: RwLock::new(state),
            access: collaborators.access,
            events: collaborators.events,
            multisig: collaborators.multisig,
        })
    }

    /// Engine with default configuration where `admin` holds every role.
    pub fn with_defaults(admin: Address) -> Result<Self, GovernanceError> {
        Self::new(&GovernanceConfig::default(), admin, Collaborators::for_admin(admin))
    }

    fn require_role(&self, caller: &Address, role: Role) -> Result<(), GovernanceError> {
        if !self.access.can_manage(caller, role) {
            return Err(GovernanceError::Unauthorized(format!(
                "{:x} lacks the {:?} role",
                caller, role
            )));
        }
        Ok(())
    }

    /// Ask the multisig gate about the next release. Runs without the state
    /// lock held so a gate may read the engine. Returns the transfer id the
    /// answer covers.
    fn release_confirmation(&self) -> (u64, bool) {
        let (tx_id, required) = {
            let state = self.state.read();
            (state.treasury.next_transfer_id(), state.treasury.requires_multisig())
        };
        let confirmed = required
            && self
                .multisig
                .as_ref()
                .is_some_and(|gate| gate.has_enough_confirmations(tx_id));
        (tx_id, confirmed)
    }

    /// A confirmation is only valid for the transfer id it was given for.
    fn ensure_release_unchanged(state: &GovernanceState, tx_id: u64) -> Result<(), GovernanceError> {
        let next = state.treasury.next_transfer_id();
        if state.treasury.requires_multisig() && next != tx_id {
            return Err(GovernanceError::StateNotReady(format!(
                "transfer {} was released concurrently, confirm transfer {}",
                tx_id, next
            )));
        }
        Ok(())
    }

    fn emit(
        &self,
        event_type: &str,
        category: EventCategory,
        actor: Address,
        target: Option<Address>,
        stamp: Stamp,
        payload: serde_json::Value,
    ) {
        let event = GovernanceEvent {
            event_type: event_type.to_string(),
            actor,
            target,
            payload,
            category,
            stamp,
        };
        if let Err(e) = self.events.log_event(&event) {
            warn!(event_type, sequence = stamp.sequence, error = %e, "event sink rejected event");
        }
    }

    // ----- clock -----

    /// Advance the shared height. Called by the hosting platform.
    pub fn advance(&self, blocks: u64) -> Height {
        let height = self.state.write().clock.advance(blocks);
        debug!(height, "height advanced");
        height
    }

    pub fn height(&self) -> Height {
        self.state.read().clock.now()
    }

    /// Owned copy of the whole state.
    pub fn snapshot(&self) -> GovernanceState {
        self.state.read().clone()
    }

    // ----- ledger -----

    pub fn mint(&self, caller: Address, amount: Amount, recipient: Address) -> Result<Amount, GovernanceError> {
        self.require_role(&caller, Role::Minter)?;
        let (stamp, supply) = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let stamp = state.clock.peek();
            state.ledger.mint(amount, recipient, stamp)?;
            state.clock.commit();
            (stamp, state.ledger.total_supply())
        };
        info!(recipient = %recipient, amount, total_supply = supply, "minted");
        self.emit(
            "mint",
            EventCategory::Ledger,
            caller,
            Some(recipient),
            stamp,
            json!({ "amount": amount.to_string(), "total_supply": supply.to_string() }),
        );
        Ok(supply)
    }

    pub fn burn(&self, caller: Address, amount: Amount, from: Address) -> Result<Amount, GovernanceError> {
        let (stamp, supply) = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let stamp = state.clock.peek();
            state.ledger.burn(caller, amount, from, stamp)?;
            state.clock.commit();
            (stamp, state.ledger.total_supply())
        };
        info!(from = %from, amount, total_supply = supply, "burned");
        self.emit(
            "burn",
            EventCategory::Ledger,
            caller,
            None,
            stamp,
            json!({ "amount": amount.to_string(), "total_supply": supply.to_string() }),
        );
        Ok(supply)
    }

    pub fn transfer(&self, caller: Address, amount: Amount, from: Address, to: Address) -> Result<(), GovernanceError> {
        let stamp = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let stamp = state.clock.peek();
            state.ledger.transfer(caller, amount, from, to, stamp)?;
            state.clock.commit();
            stamp
        };
        info!(from = %from, to = %to, amount, "transferred");
        self.emit(
            "transfer",
            EventCategory::Ledger,
            caller,
            Some(to),
            stamp,
            json!({ "amount": amount.to_string() }),
        );
        Ok(())
    }

    pub fn delegate(&self, caller: Address, to: Address) -> Result<(), GovernanceError> {
        let stamp = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let stamp = state.clock.peek();
            state.ledger.delegate(caller, to, stamp)?;
            state.clock.commit();
            stamp
        };
        info!(delegator = %caller, delegate = %to, "delegated");
        self.emit("delegate", EventCategory::Ledger, caller, Some(to), stamp, json!({}));
        Ok(())
    }

    /// Returns the delegate the caller was delegating to.
    pub fn undelegate(&self, caller: Address) -> Result<Address, GovernanceError> {
        let (stamp, previous) = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let stamp = state.clock.peek();
            let previous = state.ledger.undelegate(caller, stamp)?;
            state.clock.commit();
            (stamp, previous)
        };
        info!(delegator = %caller, delegate = %previous, "undelegated");
        self.emit("undelegate", EventCategory::Ledger, caller, Some(previous), stamp, json!({}));
        Ok(previous)
    }

    pub fn authorize_locker(&self, caller: Address, module: Address) -> Result<bool, GovernanceError> {
        self.require_role(&caller, Role::Admin)?;
        let (stamp, added) = {
            let mut state = self.state.write();
            let added = state.ledger.authorize_locker(module);
            (state.clock.commit(), added)
        };
        info!(module = %module, added, "locker authorised");
        self.emit("locker_authorized", EventCategory::Ledger, caller, Some(module), stamp, json!({ "added": added }));
        Ok(added)
    }

    pub fn revoke_locker(&self, caller: Address, module: Address) -> Result<bool, GovernanceError> {
        self.require_role(&caller, Role::Admin)?;
        let (stamp, removed) = {
            let mut state = self.state.write();
            let removed = state.ledger.revoke_locker(&module);
            (state.clock.commit(), removed)
        };
        info!(module = %module, removed, "locker revoked");
        self.emit("locker_revoked", EventCategory::Ledger, caller, Some(module), stamp, json!({ "removed": removed }));
        Ok(removed)
    }

    /// Returns the account's new locked amount.
    pub fn lock(&self, caller: Address, account: Address, amount: Amount) -> Result<Amount, GovernanceError> {
        let (stamp, locked) = {
            let mut state = self.state.write();
            let locked = state.ledger.lock(caller, account, amount)?;
            (state.clock.commit(), locked)
        };
        info!(account = %account, amount, locked, "balance locked");
        self.emit("lock", EventCategory::Ledger, caller, Some(account), stamp, json!({ "amount": amount.to_string() }));
        Ok(locked)
    }

    pub fn unlock(&self, caller: Address, account: Address, amount: Amount) -> Result<Amount, GovernanceError> {
        let (stamp, locked) = {
            let mut state = self.state.write();
            let locked = state.ledger.unlock(caller, account, amount)?;
            (state.clock.commit(), locked)
        };
        info!(account = %account, amount, locked, "balance unlocked");
        self.emit("unlock", EventCategory::Ledger, caller, Some(account), stamp, json!({ "amount": amount.to_string() }));
        Ok(locked)
    }

    pub fn balance(&self, account: &Address) -> Amount {
        self.state.read().ledger.balance(account)
    }

    pub fn total_supply(&self) -> Amount {
        self.state.read().ledger.total_supply()
    }

    pub fn locked(&self, account: &Address) -> Amount {
        self.state.read().ledger.locked(account)
    }

    pub fn spendable(&self, account: &Address) -> Amount {
        self.state.read().ledger.spendable(account)
    }

    pub fn delegate_of(&self, account: &Address) -> Option<Address> {
        self.state.read().ledger.delegate_of(account)
    }

    pub fn voting_power(&self, account: &Address) -> Amount {
        self.state.read().ledger.voting_power(account)
    }

    pub fn voting_power_at(&self, account: &Address, height: Height) -> Amount {
        self.state.read().ledger.voting_power_at(account, height)
    }

    pub fn checkpoints(&self, account: &Address) -> Vec<Checkpoint> {
        self.state.read().ledger.checkpoints(account)
    }

    // ----- strategies -----

    pub fn configure_strategy(
        &self,
        caller: Address,
        kind: StrategyKind,
        config: StrategyConfig,
    ) -> Result<(), GovernanceError> {
        self.require_role(&caller, Role::StrategyManager)?;
        let stamp = {
            let mut state = self.state.write();
            state.strategies.configure(kind, config)?;
            state.clock.commit()
        };
        info!(
            strategy = kind.name(),
            threshold_bps = config.threshold_bps,
            quorum_bps = config.quorum_bps,
            active = config.active,
            "strategy configured"
        );
        self.emit(
            "strategy_configured",
            EventCategory::Strategy,
            caller,
            None,
            stamp,
            json!({
                "strategy": kind.name(),
                "threshold_bps": config.threshold_bps,
                "quorum_bps": config.quorum_bps,
                "active": config.active,
            }),
        );
        Ok(())
    }

    pub fn set_default_strategy(&self, caller: Address, kind: StrategyKind) -> Result<(), GovernanceError> {
        self.require_role(&caller, Role::StrategyManager)?;
        let stamp = {
            let mut state = self.state.write();
            state.strategies.set_default(kind)?;
            state.clock.commit()
        };
        info!(strategy = kind.name(), "default strategy changed");
        self.emit("default_strategy_set", EventCategory::Strategy, caller, None, stamp, json!({ "strategy": kind.name() }));
        Ok(())
    }

    pub fn strategy_config(&self, kind: StrategyKind) -> StrategyConfig {
        self.state.read().strategies.config_of(kind)
    }

    pub fn default_strategy(&self) -> StrategyKind {
        self.state.read().strategies.default_strategy()
    }

    pub fn strategy_of(&self, proposal_id: u64) -> StrategyKind {
        self.state.read().strategies.strategy_of(proposal_id)
    }

    // ----- lifecycle -----

    /// Create a proposal bound to `strategy`, or to the default strategy.
    pub fn create_proposal(
        &self,
        caller: Address,
        title: impl Into<String>,
        description: impl Into<String>,
        kind: ProposalKind,
        strategy: Option<StrategyKind>,
    ) -> Result<u64, GovernanceError> {
        let (stamp, proposal) = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let stamp = state.clock.peek();
            let power = state.ledger.voting_power(&caller);
            let strategy = strategy.unwrap_or_else(|| state.strategies.default_strategy());
            let draft = state
                .lifecycle
                .draft(caller, power, title.into(), description.into(), kind, strategy, stamp)?;
            let governor = state.governor();
            state.strategies.set_proposal_strategy(
                governor,
                draft.id,
                strategy,
                stamp.height,
                draft.start,
            )?;
            state.lifecycle.insert(draft.clone());
            state.clock.commit();
            (stamp, draft)
        };
        info!(
            proposal_id = proposal.id,
            proposer = %caller,
            kind = proposal.kind.name(),
            strategy = proposal.strategy.name(),
            start = proposal.start,
            end = proposal.end,
            "proposal created"
        );
        self.emit(
            "proposal_created",
            EventCategory::Proposal,
            caller,
            None,
            stamp,
            json!({
                "proposal_id": proposal.id,
                "kind": proposal.kind.name(),
                "strategy": proposal.strategy.name(),
                "start": proposal.start,
                "end": proposal.end,
            }),
        );
        Ok(proposal.id)
    }

    pub fn vote(&self, caller: Address, proposal_id: u64, choice: VoteChoice) -> Result<VoteRecord, GovernanceError> {
        let record = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let stamp = state.clock.peek();
            let snapshot_height = state
                .lifecycle
                .ensure_can_vote(proposal_id, &caller, stamp.height)?
                .snapshot_height();
            let base = match state.lifecycle.params().power_source {
                PowerSource::Live => state.ledger.voting_power(&caller),
                PowerSource::Snapshot => state.ledger.voting_power_at(&caller, snapshot_height),
            };
            let power = state
                .strategies
                .calculate_voting_power(&caller, proposal_id, base, &state.ledger);
            state.lifecycle.cast_vote(proposal_id, caller, choice, power, stamp)?;
            state.clock.commit();
            VoteRecord { choice, power, stamp }
        };
        info!(proposal_id, voter = %caller, choice = ?choice, power = record.power, "vote cast");
        self.emit(
            "vote_cast",
            EventCategory::Proposal,
            caller,
            None,
            record.stamp,
            json!({ "proposal_id": proposal_id, "choice": choice, "power": record.power.to_string() }),
        );
        Ok(record)
    }

    /// Execute a passed proposal once its delay has elapsed. Anyone may call.
    pub fn execute(&self, caller: Address, proposal_id: u64) -> Result<ExecutionReceipt, GovernanceError> {
        let is_transfer = self
            .state
            .read()
            .lifecycle
            .get(proposal_id)
            .is_some_and(|p| matches!(p.kind, ProposalKind::Transfer { .. }));
        let release = is_transfer.then(|| self.release_confirmation());

        let (receipt, governor) = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let stamp = state.clock.peek();
            let now = stamp.height;
            let governor = state.governor();

            let proposal = state.lifecycle.ensure_executable(proposal_id, now)?.clone();
            let outcome = state.outcome(&proposal)?;
            if !outcome.passed() {
                return Err(GovernanceError::ProposalNotPassed {
                    proposal_id,
                    quorum_met: outcome.quorum_met,
                    approval_met: outcome.approval_met,
                });
            }

            let dispatch = match proposal.kind {
                ProposalKind::Transfer { recipient, amount } => {
                    let (tx_id, confirmed) = release.unwrap_or((0, false));
                    Self::ensure_release_unchanged(state, tx_id)?;
                    state.treasury.check_transfer(governor, recipient, amount, confirmed)?;
                    Dispatch::Transfer { recipient, amount, confirmed }
                }
                ProposalKind::ParameterChange { key, value } => {
                    let value = decode_le_u128(&value)?;
                    state.lifecycle.validate_parameter(&key, value)?;
                    Dispatch::Parameter { key, value }
                }
                ProposalKind::Upgrade { module, implementation } => {
                    state.registry.check_upgrade(governor, module, implementation)?;
                    Dispatch::Upgrade { module, implementation }
                }
                ProposalKind::Custom { target, function, args } => {
                    let eta = now
                        .checked_add(state.timelock.delay())
                        .ok_or(GovernanceError::Overflow)?;
                    state.timelock.check_queue(governor, &target, &function, &args, eta, now)?;
                    Dispatch::Queue { target, function, args, eta }
                }
            };

            let (effect, queued) = match dispatch {
                Dispatch::Transfer { recipient, amount, confirmed } => {
                    let record = state
                        .treasury
                        .execute_transfer(governor, recipient, amount, proposal_id, confirmed, stamp)?;
                    (ExecutionEffect::Transferred { record }, None)
                }
                Dispatch::Parameter { key, value } => {
                    state.lifecycle.apply_parameter(&key, value)?;
                    (ExecutionEffect::ParameterSet { key, value }, None)
                }
                Dispatch::Upgrade { module, implementation } => {
                    let record = state
                        .registry
                        .upgrade_module(governor, module, implementation, Some(proposal_id), stamp)?;
                    state.rewire();
                    (ExecutionEffect::Upgraded { record }, None)
                }
                Dispatch::Queue { target, function, args, eta } => {
                    let hash = state.timelock.queue(governor, target, function, args, eta, stamp)?;
                    (ExecutionEffect::Queued { hash, eta }, Some(hash))
                }
            };

            state.lifecycle.mark_executed(proposal_id, stamp, queued);
            state.clock.commit();
            (ExecutionReceipt { proposal_id, outcome, effect, stamp }, governor)
        };

        info!(
            proposal_id,
            executor = %caller,
            votes_cast = receipt.outcome.votes_cast,
            "proposal executed"
        );
        let payload = serde_json::to_value(&receipt.effect).unwrap_or_else(|_| json!({}));
        self.emit("proposal_executed", EventCategory::Proposal, caller, None, receipt.stamp, payload);
        match &receipt.effect {
            ExecutionEffect::Transferred { record } => self.emit_transfer(caller, record),
            ExecutionEffect::Upgraded { record } => self.emit_upgrade(record),
            ExecutionEffect::Queued { hash, eta } => self.emit_queued(governor, *hash, *eta, receipt.stamp),
            ExecutionEffect::ParameterSet { .. } => {}
        }
        Ok(receipt)
    }

    pub fn proposal(&self, proposal_id: u64) -> Option<Proposal> {
        self.state.read().lifecycle.get(proposal_id).cloned()
    }

    pub fn proposals(&self) -> Vec<Proposal> {
        self.state.read().lifecycle.all().cloned().collect()
    }

    pub fn proposal_state(&self, proposal_id: u64) -> Result<ProposalState, GovernanceError> {
        let state = self.state.read();
        let proposal = state.lifecycle.require(proposal_id)?;
        state.state_of(proposal)
    }

    /// Quorum and approval evaluation against the live total supply.
    pub fn outcome(&self, proposal_id: u64) -> Result<Outcome, GovernanceError> {
        let state = self.state.read();
        let proposal = state.lifecycle.require(proposal_id)?;
        state.outcome(proposal)
    }

    pub fn vote_of(&self, proposal_id: u64, voter: &Address) -> Option<VoteRecord> {
        self.state.read().lifecycle.vote_of(proposal_id, voter)
    }

    pub fn parameter(&self, key: &str) -> Option<u128> {
        self.state.read().lifecycle.parameter(key)
    }

    pub fn lifecycle_params(&self) -> LifecycleParams {
        self.state.read().lifecycle.params()
    }

    // ----- timelock -----

    pub fn queue_operation(
        &self,
        caller: Address,
        target: Address,
        function: impl Into<String>,
        args: Vec<u8>,
        eta: Height,
    ) -> Result<Hash, GovernanceError> {
        let (stamp, hash) = {
            let mut state = self.state.write();
            let stamp = state.clock.peek();
            let hash = state.timelock.queue(caller, target, function.into(), args, eta, stamp)?;
            state.clock.commit();
            (stamp, hash)
        };
        self.emit_queued(caller, hash, eta, stamp);
        Ok(hash)
    }

    /// Execute a ready operation. Anyone may call.
    pub fn execute_operation(&self, caller: Address, hash: Hash) -> Result<OperationReceipt, GovernanceError> {
        let receipt = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let stamp = state.clock.peek();
            let op = state.timelock.ensure_ready(&hash, stamp.height)?;

            let parameter = if op.target == state.governor() && op.function == SET_PARAMETER {
                let (key, value): (String, Vec<u8>) = borsh::from_slice(&op.args)
                    .map_err(|e| GovernanceError::InvalidParameter(format!("set_parameter args: {}", e)))?;
                let value = decode_le_u128(&value)?;
                state.lifecycle.validate_parameter(&key, value)?;
                Some((key, value))
            } else {
                None
            };

            let operation = state.timelock.mark_executed(&hash, stamp)?;
            if let Some((key, value)) = &parameter {
                state.lifecycle.apply_parameter(key, *value)?;
            }
            state.clock.commit();
            OperationReceipt { operation, applied_parameter: parameter }
        };

        let operation = &receipt.operation;
        info!(
            hash = %hash.short(),
            target = %operation.target,
            function = %operation.function,
            applied = receipt.applied_parameter.is_some(),
            "timelock operation executed"
        );
        if let Some(stamp) = operation.executed_at {
            self.emit(
                "operation_executed",
                EventCategory::Timelock,
                caller,
                Some(operation.target),
                stamp,
                json!({ "hash": hash.to_string(), "function": operation.function }),
            );
        }
        Ok(receipt)
    }

    pub fn cancel_operation(&self, caller: Address, hash: Hash) -> Result<(), GovernanceError> {
        let stamp = {
            let mut state = self.state.write();
            state.timelock.cancel(caller, &hash)?;
            state.clock.commit()
        };
        info!(hash = %hash.short(), "timelock operation cancelled");
        self.emit(
            "operation_cancelled",
            EventCategory::Timelock,
            caller,
            None,
            stamp,
            json!({ "hash": hash.to_string() }),
        );
        Ok(())
    }

    /// Returns the previous delay.
    pub fn set_timelock_delay(&self, caller: Address, delay: u64) -> Result<u64, GovernanceError> {
        let (stamp, previous) = {
            let mut state = self.state.write();
            let previous = state.timelock.set_delay(caller, delay)?;
            (state.clock.commit(), previous)
        };
        info!(previous, delay, "timelock delay changed");
        self.emit("delay_set", EventCategory::Timelock, caller, None, stamp, json!({ "previous": previous, "delay": delay }));
        Ok(previous)
    }

    pub fn propose_timelock_admin(&self, caller: Address, candidate: Address) -> Result<(), GovernanceError> {
        let stamp = {
            let mut state = self.state.write();
            state.timelock.propose_admin(caller, candidate)?;
            state.clock.commit()
        };
        info!(candidate = %candidate, "timelock admin proposed");
        self.emit("admin_proposed", EventCategory::Timelock, caller, Some(candidate), stamp, json!({}));
        Ok(())
    }

    /// Returns the previous admin.
    pub fn accept_timelock_admin(&self, caller: Address) -> Result<Address, GovernanceError> {
        let (stamp, previous) = {
            let mut state = self.state.write();
            let previous = state.timelock.accept_admin(caller)?;
            (state.clock.commit(), previous)
        };
        info!(admin = %caller, previous = %previous, "timelock admin accepted");
        self.emit("admin_accepted", EventCategory::Timelock, caller, Some(previous), stamp, json!({}));
        Ok(previous)
    }

    pub fn operation(&self, hash: &Hash) -> Option<QueuedOperation> {
        self.state.read().timelock.operation(hash).cloned()
    }

    pub fn operation_status(&self, hash: &Hash) -> Option<OperationStatus> {
        let state = self.state.read();
        let grace = state.timelock.params().grace_period;
        state
            .timelock
            .operation(hash)
            .map(|op| op.status(state.clock.now(), grace))
    }

    pub fn timelock_admin(&self) -> Address {
        self.state.read().timelock.admin()
    }

    pub fn timelock_params(&self) -> TimelockParams {
        self.state.read().timelock.params()
    }

    fn emit_queued(&self, caller: Address, hash: Hash, eta: Height, stamp: Stamp) {
        info!(hash = %hash.short(), eta, "timelock operation queued");
        self.emit(
            "operation_queued",
            EventCategory::Timelock,
            caller,
            None,
            stamp,
            json!({ "hash": hash.to_string(), "eta": eta }),
        );
    }

    // ----- treasury -----

    /// Returns the new logical balance.
    pub fn deposit(&self, caller: Address, amount: Amount) -> Result<Amount, GovernanceError> {
        let (stamp, balance) = {
            let mut state = self.state.write();
            let balance = state.treasury.deposit(amount)?;
            (state.clock.commit(), balance)
        };
        info!(depositor = %caller, amount, balance, "treasury deposit");
        self.emit(
            "deposit",
            EventCategory::Treasury,
            caller,
            None,
            stamp,
            json!({ "amount": amount.to_string(), "balance": balance.to_string() }),
        );
        Ok(balance)
    }

    /// Funds that reached custody without a deposit. Not spendable.
    pub fn receive_unaccounted(&self, caller: Address, amount: Amount) -> Result<Amount, GovernanceError> {
        let (stamp, held) = {
            let mut state = self.state.write();
            let held = state.treasury.receive_unaccounted(amount)?;
            (state.clock.commit(), held)
        };
        warn!(sender = %caller, amount, held, "treasury received funds outside deposit");
        self.emit(
            "unaccounted_funds",
            EventCategory::Treasury,
            caller,
            None,
            stamp,
            json!({ "amount": amount.to_string(), "held": held.to_string() }),
        );
        Ok(held)
    }

    /// Direct release by the current lifecycle implementation or a
    /// registered executor.
    pub fn execute_transfer(
        &self,
        caller: Address,
        recipient: Address,
        amount: Amount,
        proposal_id: u64,
    ) -> Result<TransferRecord, GovernanceError> {
        let (tx_id, confirmed) = self.release_confirmation();
        let record = {
            let mut state = self.state.write();
            let stamp = state.clock.peek();
            Self::ensure_release_unchanged(&state, tx_id)?;
            let record = state
                .treasury
                .execute_transfer(caller, recipient, amount, proposal_id, confirmed, stamp)?;
            state.clock.commit();
            record
        };
        self.emit_transfer(caller, &record);
        Ok(record)
    }

    pub fn set_treasury_executor(&self, caller: Address, executor: Address) -> Result<(), GovernanceError> {
        self.require_role(&caller, Role::TreasuryManager)?;
        let stamp = {
            let mut state = self.state.write();
            state.treasury.set_executor(executor)?;
            state.clock.commit()
        };
        info!(executor = %executor, "treasury executor set");
        self.emit("executor_set", EventCategory::Treasury, caller, Some(executor), stamp, json!({}));
        Ok(())
    }

    pub fn revoke_treasury_executor(&self, caller: Address, executor: Address) -> Result<(), GovernanceError> {
        self.require_role(&caller, Role::TreasuryManager)?;
        let stamp = {
            let mut state = self.state.write();
            state.treasury.revoke_executor(&executor)?;
            state.clock.commit()
        };
        info!(executor = %executor, "treasury executor revoked");
        self.emit("executor_revoked", EventCategory::Treasury, caller, Some(executor), stamp, json!({}));
        Ok(())
    }

    pub fn treasury_balance(&self) -> Amount {
        self.state.read().treasury.balance()
    }

    pub fn treasury_held(&self) -> Amount {
        self.state.read().treasury.held()
    }

    pub fn treasury_transfers(&self) -> Vec<TransferRecord> {
        self.state.read().treasury.transfers().to_vec()
    }

    pub fn treasury_transfer(&self, id: u64) -> Option<TransferRecord> {
        self.state.read().treasury.transfer(id).cloned()
    }

    pub fn paid_to(&self, recipient: &Address) -> Amount {
        self.state.read().treasury.paid_to(recipient)
    }

    fn emit_transfer(&self, caller: Address, record: &TransferRecord) {
        info!(
            transfer_id = record.id,
            proposal_id = record.proposal_id,
            recipient = %record.recipient,
            amount = record.amount,
            "treasury transfer"
        );
        self.emit(
            "treasury_transfer",
            EventCategory::Treasury,
            caller,
            Some(record.recipient),
            record.stamp,
            json!({
                "transfer_id": record.id,
                "proposal_id": record.proposal_id,
                "amount": record.amount.to_string(),
            }),
        );
    }

    // ----- registry -----

    /// Returns the previous authority.
    pub fn update_authority(&self, caller: Address, new_authority: Address) -> Result<Address, GovernanceError> {
        let (stamp, previous) = {
            let mut state = self.state.write();
            let previous = state.registry.update_authority(caller, new_authority)?;
            (state.clock.commit(), previous)
        };
        info!(previous = %previous, authority = %new_authority, "registry authority updated");
        self.emit("authority_updated", EventCategory::Registry, caller, Some(new_authority), stamp, json!({}));
        Ok(previous)
    }

    pub fn upgrade_module(
        &self,
        caller: Address,
        module: ModuleKind,
        implementation: Address,
    ) -> Result<UpgradeRecord, GovernanceError> {
        let record = {
            let mut state = self.state.write();
            let stamp = state.clock.peek();
            let record = state.registry.upgrade_module(caller, module, implementation, None, stamp)?;
            state.rewire();
            state.clock.commit();
            record
        };
        self.emit_upgrade(&record);
        Ok(record)
    }

    pub fn registry_authority(&self) -> Address {
        self.state.read().registry.authority()
    }

    /// Address currently holding the lifecycle module's rights.
    pub fn governor(&self) -> Address {
        self.state.read().governor()
    }

    pub fn implementation(&self, module: ModuleKind) -> Address {
        self.state.read().registry.implementation(module)
    }

    pub fn upgrade_log(&self) -> Vec<UpgradeRecord> {
        self.state.read().registry.audit_log().to_vec()
    }

    fn emit_upgrade(&self, record: &UpgradeRecord) {
        info!(
            module = record.module.label(),
            previous = %record.previous,
            implementation = %record.implementation,
            proposal_id = ?record.proposal_id,
            "module upgraded"
        );
        self.emit(
            "module_upgraded",
            EventCategory::Registry,
            record.authorized_by,
            Some(record.implementation),
            record.stamp,
            json!({ "module": record.module, "previous": record.previous, "proposal_id": record.proposal_id }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ConfirmationSet, MemoryEventLog};

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    fn admin() -> Address {
        addr(100)
    }

    fn engine_with_log(capacity: Option<usize>) -> (Engine, Arc<MemoryEventLog>) {
        let log = Arc::new(match capacity {
            Some(capacity) => MemoryEventLog::with_capacity(capacity),
            None => MemoryEventLog::new(),
        });
        let collaborators = Collaborators {
            access: Arc::new(StaticRoles::with_admin(admin())),
            events: log.clone(),
            multisig: None,
        };
        let engine = Engine::new(&GovernanceConfig::default(), admin(), collaborators).unwrap();
        (engine, log)
    }

    #[test]
    fn test_mint_requires_minter_role() {
        let (engine, _) = engine_with_log(None);
        assert!(matches!(engine.mint(addr(1), 10, addr(1)), Err(GovernanceError::Unauthorized(_))));
        assert_eq!(engine.mint(admin(), 10, addr(1)).unwrap(), 10);
    }

    #[test]
    fn test_failed_calls_do_not_advance_sequence() {
        let (engine, log) = engine_with_log(None);
        engine.mint(admin(), 100, addr(1)).unwrap();
        let before = engine.snapshot().clock.last_sequence();

        assert!(engine.transfer(addr(1), 101, addr(1), addr(2)).is_err());
        assert!(engine.delegate(addr(1), addr(1)).is_err());
        assert_eq!(engine.snapshot().clock.last_sequence(), before);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_sink_failure_keeps_state() {
        let (engine, log) = engine_with_log(Some(1));
        engine.mint(admin(), 100, addr(1)).unwrap();
        engine.transfer(addr(1), 40, addr(1), addr(2)).unwrap();

        assert_eq!(log.len(), 1);
        assert_eq!(engine.balance(&addr(2)), 40);
    }

    #[test]
    fn test_event_per_transition() {
        let (engine, log) = engine_with_log(None);
        engine.mint(admin(), 5_000, addr(1)).unwrap();
        engine.deposit(addr(1), 50).unwrap();
        let id = engine
            .create_proposal(
                addr(1),
                "Grant",
                "",
                ProposalKind::Transfer { recipient: addr(2), amount: 50 },
                None,
            )
            .unwrap();
        engine.advance(1);
        engine.vote(addr(1), id, VoteChoice::For).unwrap();

        let types: Vec<_> = log.events().into_iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec!["mint", "deposit", "proposal_created", "vote_cast"]);
        let sequences: Vec<_> = log.events().iter().map(|e| e.stamp.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_multisig_required_without_gate_rejected() {
        let mut config = GovernanceConfig::default();
        config.treasury.require_multisig = true;
        let err = Engine::new(&config, admin(), Collaborators::for_admin(admin())).unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidParameter(_)));
    }

    #[test]
    fn test_multisig_gate_blocks_release() {
        let gate = Arc::new(ConfirmationSet::new());
        let mut config = GovernanceConfig::default();
        config.treasury.require_multisig = true;
        let collaborators = Collaborators {
            multisig: Some(gate.clone()),
            ..Collaborators::for_admin(admin())
        };
        let engine = Engine::new(&config, admin(), collaborators).unwrap();
        engine.set_treasury_executor(admin(), addr(9)).unwrap();
        engine.deposit(addr(1), 100).unwrap();

        assert!(matches!(
            engine.execute_transfer(addr(9), addr(2), 10, 0),
            Err(GovernanceError::Unauthorized(_))
        ));
        gate.confirm(1);
        assert_eq!(engine.execute_transfer(addr(9), addr(2), 10, 0).unwrap().id, 1);
        assert_eq!(engine.treasury_balance(), 90);
    }

    /// Gate that reads the engine back, counting how often it is asked.
    #[derive(Default)]
    struct ReentrantGate {
        engine: parking_lot::Mutex<Option<Arc<Engine>>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl MultisigGate for ReentrantGate {
        fn has_enough_confirmations(&self, _tx_id: u64) -> bool {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let engine = self.engine.lock().clone();
            engine.is_some_and(|engine| engine.treasury_balance() >= 10)
        }
    }

    #[test]
    fn test_gate_consulted_once_without_lock() {
        let gate = Arc::new(ReentrantGate::default());
        let mut config = GovernanceConfig::default();
        config.treasury.require_multisig = true;
        let collaborators = Collaborators {
            multisig: Some(gate.clone()),
            ..Collaborators::for_admin(admin())
        };
        let engine = Arc::new(Engine::new(&config, admin(), collaborators).unwrap());
        *gate.engine.lock() = Some(engine.clone());
        engine.set_treasury_executor(admin(), addr(9)).unwrap();
        engine.deposit(addr(1), 100).unwrap();

        assert_eq!(engine.execute_transfer(addr(9), addr(2), 10, 0).unwrap().id, 1);
        assert_eq!(gate.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        *gate.engine.lock() = None;
    }

    #[test]
    fn test_strategy_management_is_role_gated() {
        let (engine, _) = engine_with_log(None);
        let config = StrategyConfig::new(7_500, 3_000);
        assert!(matches!(
            engine.configure_strategy(addr(1), StrategyKind::Supermajority, config),
            Err(GovernanceError::Unauthorized(_))
        ));
        engine.configure_strategy(admin(), StrategyKind::Supermajority, config).unwrap();
        assert_eq!(engine.strategy_config(StrategyKind::Supermajority), config);

        engine.set_default_strategy(admin(), StrategyKind::Quadratic).unwrap();
        assert_eq!(engine.default_strategy(), StrategyKind::Quadratic);
    }

    #[test]
    fn test_lock_requires_authorised_locker() {
        let (engine, _) = engine_with_log(None);
        engine.mint(admin(), 100, addr(1)).unwrap();
        assert!(matches!(engine.lock(addr(7), addr(1), 10), Err(GovernanceError::Unauthorized(_))));
        assert!(engine.authorize_locker(admin(), addr(7)).unwrap());
        assert_eq!(engine.lock(addr(7), addr(1), 60).unwrap(), 60);
        assert_eq!(engine.spendable(&addr(1)), 40);
        assert!(matches!(
            engine.transfer(addr(1), 50, addr(1), addr(2)),
            Err(GovernanceError::InsufficientBalance { .. })
        ));
        assert_eq!(engine.unlock(addr(7), addr(1), 60).unwrap(), 0);
    }

    #[test]
    fn test_engine_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }
}
