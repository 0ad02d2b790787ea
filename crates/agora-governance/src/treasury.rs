//! Treasury gate.
//!
//! Tracks two numbers: `held`, the funds actually in custody, and `balance`,
//! the funds governance may release. Only deposits raise `balance`, so
//! `balance <= held` always holds; funds that arrive by other routes stay in
//! custody but are not spendable.
//!
//! Releases are made by the governor, the address the registry currently
//! lists as the lifecycle implementation, or by a registered executor.

use std::collections::{BTreeSet, HashMap};

use agora_types::{Address, Amount};
use serde::{Deserialize, Serialize};

use crate::clock::Stamp;
use crate::error::GovernanceError;

/// Immutable record of a released transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: u64,
    pub recipient: Address,
    #[serde(with = "agora_types::amount_serde")]
    pub amount: Amount,
    pub proposal_id: u64,
    pub executed_by: Address,
    pub stamp: Stamp,
}

#[derive(Debug, Clone)]
pub struct Treasury {
    governor: Address,
    held: Amount,
    balance: Amount,
    require_multisig: bool,
    executors: BTreeSet<Address>,
    payouts: HashMap<Address, Amount>,
    transfers: Vec<TransferRecord>,
}

impl Treasury {
    pub fn new(governor: Address, require_multisig: bool) -> Self {
        Self {
            governor,
            held: 0,
            balance: 0,
            require_multisig,
            executors: BTreeSet::new(),
            payouts: HashMap::new(),
            transfers: Vec::new(),
        }
    }

    pub fn governor(&self) -> Address {
        self.governor
    }

    /// Follow a lifecycle upgrade. The previous governor loses release rights.
    pub fn set_governor(&mut self, governor: Address) {
        self.governor = governor;
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn held(&self) -> Amount {
        self.held
    }

    pub fn requires_multisig(&self) -> bool {
        self.require_multisig
    }

    pub fn is_executor(&self, account: &Address) -> bool {
        self.executors.contains(account)
    }

    pub fn executors(&self) -> impl Iterator<Item = &Address> {
        self.executors.iter()
    }

    /// Total released to `recipient` so far.
    pub fn paid_to(&self, recipient: &Address) -> Amount {
        self.payouts.get(recipient).copied().unwrap_or(0)
    }

    pub fn transfers(&self) -> &[TransferRecord] {
        &self.transfers
    }

    pub fn transfer(&self, id: u64) -> Option<&TransferRecord> {
        id.checked_sub(1).and_then(|index| self.transfers.get(index as usize))
    }

    /// Id the next released transfer will carry; also the multisig tx id.
    pub fn next_transfer_id(&self) -> u64 {
        self.transfers.len() as u64 + 1
    }

    /// Returns the new logical balance.
    pub fn deposit(&mut self, amount: Amount) -> Result<Amount, GovernanceError> {
        if amount == 0 {
            return Err(GovernanceError::InvalidParameter("deposit amount must be non-zero".to_string()));
        }
        let held = self.held.checked_add(amount).ok_or(GovernanceError::Overflow)?;
        let balance = self.balance.checked_add(amount).ok_or(GovernanceError::Overflow)?;
        self.held = held;
        self.balance = balance;
        Ok(balance)
    }

    /// Funds that reached custody without a deposit call.
    pub fn receive_unaccounted(&mut self, amount: Amount) -> Result<Amount, GovernanceError> {
        self.held = self.held.checked_add(amount).ok_or(GovernanceError::Overflow)?;
        Ok(self.held)
    }

    pub fn set_executor(&mut self, executor: Address) -> Result<(), GovernanceError> {
        if executor.is_zero() {
            return Err(GovernanceError::InvalidParameter("executor is the zero address".to_string()));
        }
        if !self.executors.insert(executor) {
            return Err(GovernanceError::AlreadyExists(format!("executor {:x}", executor)));
        }
        Ok(())
    }

    pub fn revoke_executor(&mut self, executor: &Address) -> Result<(), GovernanceError> {
        if !self.executors.remove(executor) {
            return Err(GovernanceError::NotFound(format!("executor {:x}", executor)));
        }
        Ok(())
    }

    /// Authorization, multisig and funds checks for a release.
    pub fn check_transfer(
        &self,
        caller: Address,
        recipient: Address,
        amount: Amount,
        multisig_confirmed: bool,
    ) -> Result<(), GovernanceError> {
        if caller != self.governor && !self.executors.contains(&caller) {
            return Err(GovernanceError::Unauthorized(format!(
                "{:x} may not release treasury funds",
                caller
            )));
        }
        if self.require_multisig && !multisig_confirmed {
            return Err(GovernanceError::Unauthorized(format!(
                "transfer {} lacks multisig confirmations",
                self.next_transfer_id()
            )));
        }
        if amount == 0 {
            return Err(GovernanceError::InvalidParameter("transfer amount must be non-zero".to_string()));
        }
        if recipient.is_zero() {
            return Err(GovernanceError::InvalidParameter("recipient is the zero address".to_string()));
        }
        if amount > self.balance {
            return Err(GovernanceError::InsufficientFunds {
                requested: amount,
                available: self.balance,
            });
        }
        Ok(())
    }

    pub fn execute_transfer(
        &mut self,
        caller: Address,
        recipient: Address,
        amount: Amount,
        proposal_id: u64,
        multisig_confirmed: bool,
        stamp: Stamp,
    ) -> Result<TransferRecord, GovernanceError> {
        self.check_transfer(caller, recipient, amount, multisig_confirmed)?;
        let paid = self
            .paid_to(&recipient)
            .checked_add(amount)
            .ok_or(GovernanceError::Overflow)?;

        self.balance -= amount;
        self.held -= amount;
        self.payouts.insert(recipient, paid);

        let record = TransferRecord {
            id: self.next_transfer_id(),
            recipient,
            amount,
            proposal_id,
            executed_by: caller,
            stamp,
        };
        self.transfers.push(record.clone());
        Ok(record)
    }
}
