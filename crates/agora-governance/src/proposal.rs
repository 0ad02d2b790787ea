//! Proposal lifecycle management.
//!
//! Proposals go through states: Pending -> Active -> Passed/Failed -> Executed.
//! Only the executed flag is stored; the other states are derived from the
//! shared height and the live tally evaluation, so a proposal can never be
//! reopened.

use std::collections::{BTreeMap, HashMap};

use agora_types::{Address, Amount, Hash, Height};
use serde::{Deserialize, Serialize};

use crate::clock::Stamp;
use crate::error::GovernanceError;
use crate::registry::ModuleKind;
use crate::strategy::{StrategyKind, Tally};

/// Proposal status in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalState {
    /// Created, voting opens at `start`
    Pending,
    /// Voting window `[start, end]` is open
    Active,
    /// Window closed with quorum and approval met
    Passed,
    /// Window closed without quorum or approval
    Failed,
    /// Terminal
    Executed,
}

/// What a proposal does once executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProposalKind {
    /// Release treasury funds
    Transfer {
        recipient: Address,
        #[serde(with = "agora_types::amount_serde")]
        amount: Amount,
    },
    /// Update a governance parameter; `value` is a little-endian integer
    ParameterChange { key: String, value: Vec<u8> },
    /// Point a module slot at a new implementation
    Upgrade { module: ModuleKind, implementation: Address },
    /// Arbitrary call, deferred through the timelock
    Custom {
        target: Address,
        function: String,
        args: Vec<u8>,
    },
}

impl ProposalKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProposalKind::Transfer { .. } => "transfer",
            ProposalKind::ParameterChange { .. } => "parameter_change",
            ProposalKind::Upgrade { .. } => "upgrade",
            ProposalKind::Custom { .. } => "custom",
        }
    }

    fn validate(&self, params: &LifecycleParams) -> Result<(), GovernanceError> {
        match self {
            ProposalKind::Transfer { recipient, amount } => {
                if *amount == 0 {
                    return Err(GovernanceError::InvalidParameter(
                        "transfer amount must be non-zero".to_string(),
                    ));
                }
                if recipient.is_zero() {
                    return Err(GovernanceError::InvalidParameter(
                        "transfer recipient is the zero address".to_string(),
                    ));
                }
            }
            ProposalKind::ParameterChange { key, value } => {
                if key.is_empty() {
                    return Err(GovernanceError::InvalidParameter("empty parameter key".to_string()));
                }
                params.check_parameter(key, decode_le_u128(value)?)?;
            }
            ProposalKind::Upgrade { implementation, .. } => {
                if implementation.is_zero() {
                    return Err(GovernanceError::InvalidParameter(
                        "implementation is the zero address".to_string(),
                    ));
                }
            }
            ProposalKind::Custom { function, .. } => {
                if function.is_empty() {
                    return Err(GovernanceError::InvalidParameter("empty function name".to_string()));
                }
            }
        }
        Ok(())
    }
}

/// Vote support options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    For,
    Against,
    /// Counts toward quorum but not the approval ratio
    Abstain,
}

/// Write-once record of a cast vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub choice: VoteChoice,
    /// Effective power at vote time; later balance changes never alter it.
    pub power: Amount,
    pub stamp: Stamp,
}

/// Where base voting power is read from when a vote is cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PowerSource {
    /// Present power at vote time
    #[default]
    Live,
    /// Power as of the height before voting opened
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleParams {
    pub voting_period: u64,
    pub execution_delay: u64,
    pub min_proposal_power: Amount,
    pub power_source: PowerSource,
    /// Ceiling for `voting_period` changes
    pub max_voting_period: u64,
    /// Ceiling for `execution_delay` changes
    pub max_execution_delay: u64,
    /// Ceiling for `min_proposal_power` changes; the ledger's supply cap
    pub max_proposal_power: Amount,
}

impl LifecycleParams {
    /// Range checks for recognised parameter keys. Other keys are free-form.
    pub fn check_parameter(&self, key: &str, value: u128) -> Result<(), GovernanceError> {
        let (low, high) = match key {
            "voting_period" => (1, self.max_voting_period as u128),
            "execution_delay" => (0, self.max_execution_delay as u128),
            "min_proposal_power" => (0, self.max_proposal_power),
            _ => return Ok(()),
        };
        if value < low || value > high {
            return Err(GovernanceError::InvalidParameter(format!(
                "{} = {} outside [{}, {}]",
                key, value, low, high
            )));
        }
        Ok(())
    }
}

/// On-chain proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: u64,
    pub proposer: Address,
    pub title: String,
    pub description: String,
    pub kind: ProposalKind,
    pub strategy: StrategyKind,
    /// First height votes are accepted
    pub start: Height,
    /// Last height votes are accepted
    pub end: Height,
    pub tally: Tally,
    /// Delay in force when the proposal was created
    pub execution_delay: u64,
    pub executed: bool,
    pub executed_at: Option<Stamp>,
    /// Timelock operation created when a custom proposal executes
    pub queued_operation: Option<Hash>,
    pub created_at: Stamp,
}

impl Proposal {
    /// Height at which the proposal may first be executed. Later changes to
    /// the lifecycle delay do not move it.
    pub fn executable_from(&self) -> Height {
        self.end.saturating_add(self.execution_delay)
    }

    /// Height snapshot-mode voting power is read at.
    pub fn snapshot_height(&self) -> Height {
        self.start.saturating_sub(1)
    }

    /// Pending/Active/Executed, or `None` once the window has closed and
    /// the outcome has to be evaluated.
    pub fn phase(&self, now: Height) -> Option<ProposalState> {
        if self.executed {
            Some(ProposalState::Executed)
        } else if now < self.start {
            Some(ProposalState::Pending)
        } else if now <= self.end {
            Some(ProposalState::Active)
        } else {
            None
        }
    }
}

/// Proposal and vote store.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    proposals: BTreeMap<u64, Proposal>,
    votes: HashMap<(u64, Address), VoteRecord>,
    next_id: u64,
    params: LifecycleParams,
    parameters: BTreeMap<String, u128>,
}

impl Lifecycle {
    pub fn new(params: LifecycleParams) -> Self {
        Self {
            proposals: BTreeMap::new(),
            votes: HashMap::new(),
            next_id: 1,
            params,
            parameters: BTreeMap::new(),
        }
    }

    pub fn params(&self) -> LifecycleParams {
        self.params
    }

    pub fn get(&self, id: u64) -> Option<&Proposal> {
        self.proposals.get(&id)
    }

    pub fn require(&self, id: u64) -> Result<&Proposal, GovernanceError> {
        self.proposals
            .get(&id)
            .ok_or_else(|| GovernanceError::NotFound(format!("proposal {}", id)))
    }

    pub fn all(&self) -> impl Iterator<Item = &Proposal> {
        self.proposals.values()
    }

    pub fn count(&self) -> u64 {
        self.next_id - 1
    }

    pub fn vote_of(&self, id: u64, voter: &Address) -> Option<VoteRecord> {
        self.votes.get(&(id, *voter)).copied()
    }

    pub fn parameter(&self, key: &str) -> Option<u128> {
        self.parameters.get(key).copied()
    }

    pub fn parameters(&self) -> &BTreeMap<String, u128> {
        &self.parameters
    }

    /// Build (but do not store) the next proposal.
    #[allow(clippy::too_many_arguments)]
    pub fn draft(
        &self,
        proposer: Address,
        proposer_power: Amount,
        title: String,
        description: String,
        kind: ProposalKind,
        strategy: StrategyKind,
        stamp: Stamp,
    ) -> Result<Proposal, GovernanceError> {
        if proposer_power < self.params.min_proposal_power {
            return Err(GovernanceError::InsufficientVotingPower {
                required: self.params.min_proposal_power,
                actual: proposer_power,
            });
        }
        if title.trim().is_empty() {
            return Err(GovernanceError::InvalidParameter("empty proposal title".to_string()));
        }
        kind.validate(&self.params)?;

        let start = stamp.height.checked_add(1).ok_or(GovernanceError::Overflow)?;
        let end = start
            .checked_add(self.params.voting_period)
            .ok_or(GovernanceError::Overflow)?;

        Ok(Proposal {
            id: self.next_id,
            proposer,
            title,
            description,
            kind,
            strategy,
            start,
            end,
            tally: Tally::default(),
            execution_delay: self.params.execution_delay,
            executed: false,
            executed_at: None,
            queued_operation: None,
            created_at: stamp,
        })
    }

    /// Store a proposal produced by [`Lifecycle::draft`].
    pub fn insert(&mut self, proposal: Proposal) -> u64 {
        let id = proposal.id;
        self.next_id = id + 1;
        self.proposals.insert(id, proposal);
        id
    }

    /// Window and duplicate checks, before any power is computed.
    pub fn ensure_can_vote(&self, id: u64, voter: &Address, now: Height) -> Result<&Proposal, GovernanceError> {
        let proposal = self.require(id)?;
        if now < proposal.start {
            return Err(GovernanceError::StateNotReady(format!(
                "voting on proposal {} opens at {}",
                id, proposal.start
            )));
        }
        if now > proposal.end {
            return Err(GovernanceError::StateExpired(format!(
                "voting on proposal {} closed at {}",
                id, proposal.end
            )));
        }
        if self.votes.contains_key(&(id, *voter)) {
            return Err(GovernanceError::AlreadyVoted { proposal_id: id, voter: *voter });
        }
        Ok(proposal)
    }

    pub fn cast_vote(
        &mut self,
        id: u64,
        voter: Address,
        choice: VoteChoice,
        power: Amount,
        stamp: Stamp,
    ) -> Result<Tally, GovernanceError> {
        self.ensure_can_vote(id, &voter, stamp.height)?;
        if power == 0 {
            return Err(GovernanceError::InsufficientVotingPower { required: 1, actual: 0 });
        }

        let proposal = self
            .proposals
            .get_mut(&id)
            .ok_or_else(|| GovernanceError::NotFound(format!("proposal {}", id)))?;
        let mut tally = proposal.tally;
        let slot = match choice {
            VoteChoice::For => &mut tally.votes_for,
            VoteChoice::Against => &mut tally.votes_against,
            VoteChoice::Abstain => &mut tally.votes_abstain,
        };
        *slot = slot.checked_add(power).ok_or(GovernanceError::Overflow)?;
        tally.total()?;

        proposal.tally = tally;
        self.votes.insert((id, voter), VoteRecord { choice, power, stamp });
        Ok(tally)
    }

    /// Executed-flag and timing checks; the pass check needs the strategy
    /// and the live supply and is done by the caller.
    pub fn ensure_executable(&self, id: u64, now: Height) -> Result<&Proposal, GovernanceError> {
        let proposal = self.require(id)?;
        if proposal.executed {
            return Err(GovernanceError::AlreadyExecuted(format!("proposal {}", id)));
        }
        let ready_at = proposal.executable_from();
        if now < ready_at {
            return Err(GovernanceError::StateNotReady(format!(
                "proposal {} executable from {}",
                id, ready_at
            )));
        }
        Ok(proposal)
    }

    pub fn mark_executed(&mut self, id: u64, stamp: Stamp, queued_operation: Option<Hash>) {
        if let Some(proposal) = self.proposals.get_mut(&id) {
            proposal.executed = true;
            proposal.executed_at = Some(stamp);
            proposal.queued_operation = queued_operation;
        }
    }

    pub fn validate_parameter(&self, key: &str, value: u128) -> Result<(), GovernanceError> {
        self.params.check_parameter(key, value)
    }

    /// Store a parameter; recognised keys also retune the lifecycle for
    /// proposals created from now on.
    pub fn apply_parameter(&mut self, key: &str, value: u128) -> Result<(), GovernanceError> {
        self.validate_parameter(key, value)?;
        match key {
            "voting_period" => self.params.voting_period = value as u64,
            "execution_delay" => self.params.execution_delay = value as u64,
            "min_proposal_power" => self.params.min_proposal_power = value,
            _ => {}
        }
        self.parameters.insert(key.to_string(), value);
        Ok(())
    }
}

/// Decode a little-endian unsigned integer of at most 16 bytes.
pub fn decode_le_u128(bytes: &[u8]) -> Result<u128, GovernanceError> {
    if bytes.is_empty() {
        return Err(GovernanceError::InvalidParameter("empty integer argument".to_string()));
    }
    if bytes.len() > 16 {
        return Err(GovernanceError::InvalidParameter(format!(
            "integer argument is {} bytes, at most 16 allowed",
            bytes.len()
        )));
    }
    let mut buf = [0u8; 16];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(u128::from_le_bytes(buf))
}
