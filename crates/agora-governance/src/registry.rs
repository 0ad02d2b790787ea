//! Module registry.
//!
//! A typed service locator built once by the engine. Every module slot starts
//! at its derived principal and can be pointed at a new implementation
//! address. Cross-module authority follows the current implementation, so
//! an upgrade hands the slot's rights to the new address and takes them from
//! the old one. Swapping only happens through [`Registry::upgrade_module`],
//! and every swap is appended to the audit log.

use std::collections::BTreeMap;

use agora_types::Address;
use serde::{Deserialize, Serialize};

use crate::clock::Stamp;
use crate::error::GovernanceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Ledger,
    Strategy,
    Lifecycle,
    Timelock,
    Treasury,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 5] = [
        ModuleKind::Ledger,
        ModuleKind::Strategy,
        ModuleKind::Lifecycle,
        ModuleKind::Timelock,
        ModuleKind::Treasury,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ModuleKind::Ledger => "ledger",
            ModuleKind::Strategy => "strategy",
            ModuleKind::Lifecycle => "lifecycle",
            ModuleKind::Timelock => "timelock",
            ModuleKind::Treasury => "treasury",
        }
    }

    /// Initial identity of the module slot.
    pub fn principal(&self) -> Address {
        Address::derive(self.label())
    }
}

/// One audited implementation swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRecord {
    pub module: ModuleKind,
    pub previous: Address,
    pub implementation: Address,
    pub authorized_by: Address,
    /// Set when the swap came from an executed upgrade proposal
    pub proposal_id: Option<u64>,
    pub stamp: Stamp,
}

#[derive(Debug, Clone)]
pub struct Registry {
    authority: Address,
    implementations: BTreeMap<ModuleKind, Address>,
    audit: Vec<UpgradeRecord>,
}

impl Registry {
    pub fn new(authority: Address) -> Self {
        let implementations = ModuleKind::ALL
            .iter()
            .map(|kind| (*kind, kind.principal()))
            .collect();
        Self {
            authority,
            implementations,
            audit: Vec::new(),
        }
    }

    pub fn authority(&self) -> Address {
        self.authority
    }

    pub fn principal(&self, module: ModuleKind) -> Address {
        module.principal()
    }

    pub fn implementation(&self, module: ModuleKind) -> Address {
        self.implementations
            .get(&module)
            .copied()
            .unwrap_or_else(|| module.principal())
    }

    pub fn implementations(&self) -> &BTreeMap<ModuleKind, Address> {
        &self.implementations
    }

    pub fn audit_log(&self) -> &[UpgradeRecord] {
        &self.audit
    }

    /// Hand the authority role to `new_authority`. Returns the previous one.
    pub fn update_authority(&mut self, caller: Address, new_authority: Address) -> Result<Address, GovernanceError> {
        if caller != self.authority {
            return Err(GovernanceError::Unauthorized(
                "only the registry authority can update the authority".to_string(),
            ));
        }
        if new_authority.is_zero() {
            return Err(GovernanceError::InvalidParameter("authority is the zero address".to_string()));
        }
        let previous = std::mem::replace(&mut self.authority, new_authority);
        Ok(previous)
    }

    pub fn check_upgrade(
        &self,
        caller: Address,
        module: ModuleKind,
        implementation: Address,
    ) -> Result<(), GovernanceError> {
        if caller != self.authority && caller != self.implementation(ModuleKind::Lifecycle) {
            return Err(GovernanceError::Unauthorized(format!(
                "{:x} cannot upgrade the {} module",
                caller,
                module.label()
            )));
        }
        if implementation.is_zero() {
            return Err(GovernanceError::InvalidParameter("implementation is the zero address".to_string()));
        }
        if self.implementation(module) == implementation {
            return Err(GovernanceError::AlreadyExists(format!(
                "{:x} is already the {} implementation",
                implementation,
                module.label()
            )));
        }
        Ok(())
    }

    pub fn upgrade_module(
        &mut self,
        caller: Address,
        module: ModuleKind,
        implementation: Address,
        proposal_id: Option<u64>,
        stamp: Stamp,
    ) -> Result<UpgradeRecord, GovernanceError> {
        self.check_upgrade(caller, module, implementation)?;

        let previous = self.implementation(module);
        self.implementations.insert(module, implementation);
        let record = UpgradeRecord {
            module,
            previous,
            implementation,
            authorized_by: caller,
            proposal_id,
            stamp,
        };
        self.audit.push(record.clone());
        Ok(record)
    }
}
