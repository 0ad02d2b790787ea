//! Governance configuration.
//!
//! Loaded from TOML. Every section has defaults so a file only needs the
//! values it changes. Amounts are plain integers in the file and limited to
//! the `u64` range there.

use std::collections::BTreeMap;

use agora_types::Amount;
use serde::{Deserialize, Serialize};

use crate::error::GovernanceError;
use crate::proposal::{LifecycleParams, PowerSource};
use crate::strategy::{StrategyConfig, StrategyKind};
use crate::timelock::TimelockParams;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub ledger: LedgerConfig,
    pub lifecycle: LifecycleConfig,
    pub strategies: StrategiesConfig,
    pub timelock: TimelockConfig,
    pub treasury: TreasuryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Hard cap on total supply
    pub supply_cap: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            supply_cap: 1_000_000_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Heights a proposal accepts votes for
    pub voting_period: u64,
    /// Heights between the end of voting and the first execution attempt
    pub execution_delay: u64,
    /// Voting power needed to create a proposal
    pub min_proposal_power: u64,
    pub power_source: PowerSource,
    /// Largest `voting_period` a parameter change may set
    pub max_voting_period: u64,
    /// Largest `execution_delay` a parameter change may set
    pub max_execution_delay: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            voting_period: 100,
            execution_delay: 10,
            min_proposal_power: 1_000,
            power_source: PowerSource::Live,
            max_voting_period: 50_000,
            max_execution_delay: 10_000,
        }
    }
}

impl LifecycleConfig {
    /// `supply_cap` bounds later `min_proposal_power` changes.
    pub fn params(&self, supply_cap: Amount) -> LifecycleParams {
        LifecycleParams {
            voting_period: self.voting_period,
            execution_delay: self.execution_delay,
            min_proposal_power: self.min_proposal_power as Amount,
            power_source: self.power_source,
            max_voting_period: self.max_voting_period,
            max_execution_delay: self.max_execution_delay,
            max_proposal_power: supply_cap,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategiesConfig {
    pub default_strategy: StrategyKind,
    pub simple_majority: StrategyConfig,
    pub supermajority: StrategyConfig,
    pub quadratic: StrategyConfig,
    pub delegated: StrategyConfig,
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            default_strategy: StrategyKind::SimpleMajority,
            simple_majority: StrategyConfig::new(5_100, 2_000),
            supermajority: StrategyConfig::new(6_667, 2_000),
            quadratic: StrategyConfig::new(5_100, 1_000),
            delegated: StrategyConfig::new(5_100, 2_000),
        }
    }
}

impl StrategiesConfig {
    pub fn get(&self, kind: StrategyKind) -> StrategyConfig {
        match kind {
            StrategyKind::SimpleMajority => self.simple_majority,
            StrategyKind::Supermajority => self.supermajority,
            StrategyKind::Quadratic => self.quadratic,
            StrategyKind::Delegated => self.delegated,
        }
    }

    pub fn to_map(&self) -> BTreeMap<StrategyKind, StrategyConfig> {
        StrategyKind::ALL.iter().map(|kind| (*kind, self.get(*kind))).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelockConfig {
    pub min_delay: u64,
    pub max_delay: u64,
    pub delay: u64,
    /// Heights after `eta` an operation stays executable
    pub grace_period: u64,
}

impl Default for TimelockConfig {
    fn default() -> Self {
        Self {
            min_delay: 10,
            max_delay: 1_000,
            delay: 10,
            grace_period: 100,
        }
    }
}

impl TimelockConfig {
    pub fn params(&self) -> TimelockParams {
        TimelockParams {
            min_delay: self.min_delay,
            max_delay: self.max_delay,
            delay: self.delay,
            grace_period: self.grace_period,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreasuryConfig {
    /// Consult the multisig gate before every release
    pub require_multisig: bool,
}

impl GovernanceConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, GovernanceError> {
        let config: GovernanceConfig = toml::from_str(contents)
            .map_err(|e| GovernanceError::InvalidParameter(format!("config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, GovernanceError> {
        toml::to_string_pretty(self).map_err(|e| GovernanceError::InvalidParameter(format!("config: {}", e)))
    }

    pub fn validate(&self) -> Result<(), GovernanceError> {
        if self.ledger.supply_cap == 0 {
            return Err(invalid("ledger.supply_cap must be non-zero"));
        }
        let lifecycle = &self.lifecycle;
        if lifecycle.voting_period == 0 || lifecycle.voting_period > lifecycle.max_voting_period {
            return Err(invalid("lifecycle.voting_period outside [1, max_voting_period]"));
        }
        if lifecycle.execution_delay > lifecycle.max_execution_delay {
            return Err(invalid("lifecycle.execution_delay exceeds max_execution_delay"));
        }
        if lifecycle.min_proposal_power > self.ledger.supply_cap {
            return Err(invalid("lifecycle.min_proposal_power exceeds ledger.supply_cap"));
        }

        for kind in StrategyKind::ALL {
            self.strategies
                .get(kind)
                .validate()
                .map_err(|e| invalid(&format!("strategies.{}: {}", kind.name(), e)))?;
        }
        if !self.strategies.get(self.strategies.default_strategy).active {
            return Err(invalid("strategies.default_strategy is inactive"));
        }

        let timelock = &self.timelock;
        if timelock.min_delay > timelock.max_delay {
            return Err(invalid("timelock.min_delay exceeds timelock.max_delay"));
        }
        if timelock.delay < timelock.min_delay || timelock.delay > timelock.max_delay {
            return Err(invalid("timelock.delay outside [min_delay, max_delay]"));
        }
        if timelock.grace_period == 0 {
            return Err(invalid("timelock.grace_period must be non-zero"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> GovernanceError {
    GovernanceError::InvalidParameter(message.to_string())
}
