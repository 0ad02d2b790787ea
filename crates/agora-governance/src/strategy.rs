//! Voting strategies and pass/fail thresholds.
//!
//! Simple majority and supermajority count base power unchanged and differ
//! only in their approval threshold. Quadratic credits half of the base power
//! (a linear stand-in for a square root, kept for parity with deployed
//! tallies). Delegated ignores direct votes from accounts that currently
//! delegate.

use std::collections::{BTreeMap, HashMap};

use agora_types::{Address, Amount, Height, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};

use crate::error::GovernanceError;
use crate::ledger::Ledger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    SimpleMajority,
    Supermajority,
    Quadratic,
    Delegated,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::SimpleMajority,
        StrategyKind::Supermajority,
        StrategyKind::Quadratic,
        StrategyKind::Delegated,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::SimpleMajority => "simple_majority",
            StrategyKind::Supermajority => "supermajority",
            StrategyKind::Quadratic => "quadratic",
            StrategyKind::Delegated => "delegated",
        }
    }
}

/// Thresholds in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Share of for-votes among for+against needed to pass.
    pub threshold_bps: u16,
    /// Share of total supply that must be cast.
    pub quorum_bps: u16,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

impl StrategyConfig {
    pub const fn new(threshold_bps: u16, quorum_bps: u16) -> Self {
        Self {
            threshold_bps,
            quorum_bps,
            active: true,
        }
    }

    pub fn validate(&self) -> Result<(), GovernanceError> {
        if self.threshold_bps as u128 > BPS_DENOMINATOR || self.threshold_bps == 0 {
            return Err(GovernanceError::InvalidParameter(format!(
                "threshold must be in 1..=10000 bps, got {}",
                self.threshold_bps
            )));
        }
        if self.quorum_bps as u128 > BPS_DENOMINATOR {
            return Err(GovernanceError::InvalidParameter(format!(
                "quorum must be at most 10000 bps, got {}",
                self.quorum_bps
            )));
        }
        Ok(())
    }

    /// Evaluate a tally against these thresholds and the supply read now.
    ///
    /// Comparisons are cross-multiplied so no rounding is involved:
    /// `cast * 10000 >= quorum_bps * supply` and
    /// `for * 10000 >= threshold_bps * (for + against)`.
    pub fn evaluate(&self, tally: &Tally, total_supply: Amount) -> Result<Outcome, GovernanceError> {
        let cast = tally.total()?;
        let decisive = tally
            .votes_for
            .checked_add(tally.votes_against)
            .ok_or(GovernanceError::Overflow)?;

        let quorum_lhs = cast.checked_mul(BPS_DENOMINATOR).ok_or(GovernanceError::Overflow)?;
        let quorum_rhs = total_supply
            .checked_mul(self.quorum_bps as u128)
            .ok_or(GovernanceError::Overflow)?;
        let approval_lhs = tally
            .votes_for
            .checked_mul(BPS_DENOMINATOR)
            .ok_or(GovernanceError::Overflow)?;
        let approval_rhs = decisive
            .checked_mul(self.threshold_bps as u128)
            .ok_or(GovernanceError::Overflow)?;

        let quorum_met = quorum_lhs >= quorum_rhs;
        let approval_met = decisive > 0 && approval_lhs >= approval_rhs;

        Ok(Outcome {
            votes_cast: cast,
            quorum_required: quorum_rhs / BPS_DENOMINATOR,
            approval_required: approval_rhs / BPS_DENOMINATOR,
            quorum_met,
            approval_met,
        })
    }
}

/// Accumulated weighted votes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub votes_for: Amount,
    pub votes_against: Amount,
    pub votes_abstain: Amount,
}

impl Tally {
    pub fn total(&self) -> Result<Amount, GovernanceError> {
        self.votes_for
            .checked_add(self.votes_against)
            .and_then(|v| v.checked_add(self.votes_abstain))
            .ok_or(GovernanceError::Overflow)
    }
}

/// Result of evaluating a tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub votes_cast: Amount,
    /// Informational, rounded down.
    pub quorum_required: Amount,
    /// Informational, rounded down.
    pub approval_required: Amount,
    pub quorum_met: bool,
    pub approval_met: bool,
}

impl Outcome {
    pub fn passed(&self) -> bool {
        self.quorum_met && self.approval_met
    }
}

#[derive(Debug, Clone)]
pub struct StrategyEngine {
    /// Only this principal may bind proposals to strategies.
    lifecycle: Address,
    configs: BTreeMap<StrategyKind, StrategyConfig>,
    default_strategy: StrategyKind,
    bindings: HashMap<u64, StrategyKind>,
}

impl StrategyEngine {
    pub fn new(
        lifecycle: Address,
        configs: BTreeMap<StrategyKind, StrategyConfig>,
        default_strategy: StrategyKind,
    ) -> Result<Self, GovernanceError> {
        for kind in StrategyKind::ALL {
            configs
                .get(&kind)
                .ok_or_else(|| {
                    GovernanceError::InvalidParameter(format!("missing config for {}", kind.name()))
                })?
                .validate()?;
        }
        if !configs.get(&default_strategy).is_some_and(|c| c.active) {
            return Err(GovernanceError::InvalidParameter(
                "default strategy must be active".to_string(),
            ));
        }

        Ok(Self {
            lifecycle,
            configs,
            default_strategy,
            bindings: HashMap::new(),
        })
    }

    pub fn default_strategy(&self) -> StrategyKind {
        self.default_strategy
    }

    /// Follow a lifecycle upgrade.
    pub fn set_lifecycle(&mut self, lifecycle: Address) {
        self.lifecycle = lifecycle;
    }

    pub fn config_of(&self, kind: StrategyKind) -> StrategyConfig {
        // every kind is present after construction
        self.configs
            .get(&kind)
            .copied()
            .unwrap_or(StrategyConfig { threshold_bps: 10_000, quorum_bps: 10_000, active: false })
    }

    /// Strategy a proposal is bound to, falling back to the global default.
    pub fn strategy_of(&self, proposal_id: u64) -> StrategyKind {
        self.bindings
            .get(&proposal_id)
            .copied()
            .unwrap_or(self.default_strategy)
    }

    pub fn thresholds_for(&self, proposal_id: u64) -> StrategyConfig {
        self.config_of(self.strategy_of(proposal_id))
    }

    pub fn configure(&mut self, kind: StrategyKind, config: StrategyConfig) -> Result<(), GovernanceError> {
        config.validate()?;
        if kind == self.default_strategy && !config.active {
            return Err(GovernanceError::InvalidParameter(
                "cannot deactivate the default strategy".to_string(),
            ));
        }
        self.configs.insert(kind, config);
        Ok(())
    }

    pub fn set_default(&mut self, kind: StrategyKind) -> Result<(), GovernanceError> {
        if !self.config_of(kind).active {
            return Err(GovernanceError::InvalidParameter(format!(
                "strategy {} is inactive",
                kind.name()
            )));
        }
        self.default_strategy = kind;
        Ok(())
    }

    /// Bind a proposal to a strategy. Allowed up to and including the
    /// proposal's start height.
    pub fn set_proposal_strategy(
        &mut self,
        caller: Address,
        proposal_id: u64,
        kind: StrategyKind,
        now: Height,
        start: Height,
    ) -> Result<(), GovernanceError> {
        if caller != self.lifecycle {
            return Err(GovernanceError::Unauthorized(
                "only the lifecycle module binds strategies".to_string(),
            ));
        }
        if now > start {
            return Err(GovernanceError::StateExpired(format!(
                "proposal {} is already active",
                proposal_id
            )));
        }
        if !self.config_of(kind).active {
            return Err(GovernanceError::InvalidParameter(format!(
                "strategy {} is inactive",
                kind.name()
            )));
        }
        self.bindings.insert(proposal_id, kind);
        Ok(())
    }

    /// Effective power a voter contributes to a proposal.
    pub fn calculate_voting_power(
        &self,
        user: &Address,
        proposal_id: u64,
        base_power: Amount,
        ledger: &Ledger,
    ) -> Amount {
        match self.strategy_of(proposal_id) {
            StrategyKind::SimpleMajority | StrategyKind::Supermajority => base_power,
            StrategyKind::Quadratic => base_power / 2,
            StrategyKind::Delegated => {
                if ledger.is_delegating(user) {
                    0
                } else {
                    base_power
                }
            }
        }
    }
}
