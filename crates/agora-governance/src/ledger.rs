//! Voting-power ledger.
//!
//! Owns balances, one-hop delegation, per-account checkpoints and the
//! locked-balance overlay. Every mutating method checks all of its
//! preconditions before it writes anything, so an `Err` leaves the ledger
//! exactly as it was.
//!
//! Delegation is a star forest of depth one: an account either delegates to
//! someone who is not delegating, or receives delegations, never both. A
//! delegate's voting power is its own balance plus the balances of its direct
//! delegators; an account that has delegated has no direct voting power.

use std::collections::{BTreeSet, HashMap};

use agora_types::{Address, Amount, Height};
use serde::{Deserialize, Serialize};

use crate::clock::Stamp;
use crate::error::GovernanceError;

/// Snapshot of an account's voting power after a balance- or
/// delegation-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Position in this account's checkpoint list.
    pub index: u64,
    pub height: Height,
    pub sequence: u64,
    pub power: Amount,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    balances: HashMap<Address, Amount>,
    total_supply: Amount,
    supply_cap: Amount,
    /// delegator -> delegate
    delegations: HashMap<Address, Address>,
    /// delegate -> delegators (reverse lookup)
    delegators: HashMap<Address, BTreeSet<Address>>,
    /// delegate -> sum of delegators' balances
    delegated_in: HashMap<Address, Amount>,
    checkpoints: HashMap<Address, Vec<Checkpoint>>,
    locked: HashMap<Address, Amount>,
    lockers: BTreeSet<Address>,
}

impl Ledger {
    pub fn new(supply_cap: Amount) -> Self {
        Self {
            balances: HashMap::new(),
            total_supply: 0,
            supply_cap,
            delegations: HashMap::new(),
            delegators: HashMap::new(),
            delegated_in: HashMap::new(),
            checkpoints: HashMap::new(),
            locked: HashMap::new(),
            lockers: BTreeSet::new(),
        }
    }

    // ----- reads -----

    pub fn balance(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn supply_cap(&self) -> Amount {
        self.supply_cap
    }

    pub fn locked(&self, account: &Address) -> Amount {
        self.locked.get(account).copied().unwrap_or(0)
    }

    /// Balance minus the locked overlay.
    pub fn spendable(&self, account: &Address) -> Amount {
        self.balance(account).saturating_sub(self.locked(account))
    }

    pub fn delegate_of(&self, account: &Address) -> Option<Address> {
        self.delegations.get(account).copied()
    }

    pub fn is_delegating(&self, account: &Address) -> bool {
        self.delegations.contains_key(account)
    }

    pub fn delegators_of(&self, delegate: &Address) -> Vec<Address> {
        self.delegators
            .get(delegate)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_locker(&self, module: &Address) -> bool {
        self.lockers.contains(module)
    }

    /// Present voting power of an account.
    pub fn voting_power(&self, account: &Address) -> Amount {
        if self.is_delegating(account) {
            return 0;
        }
        let delegated = self.delegated_in.get(account).copied().unwrap_or(0);
        self.balance(account).saturating_add(delegated)
    }

    /// Voting power as of `height`: the latest checkpoint at or before it.
    pub fn voting_power_at(&self, account: &Address, height: Height) -> Amount {
        let Some(list) = self.checkpoints.get(account) else {
            return 0;
        };
        let idx = list.partition_point(|c| c.height <= height);
        if idx == 0 {
            0
        } else {
            list[idx - 1].power
        }
    }

    pub fn checkpoints(&self, account: &Address) -> Vec<Checkpoint> {
        self.checkpoints.get(account).cloned().unwrap_or_default()
    }

    pub fn holders(&self) -> usize {
        self.balances.values().filter(|b| **b > 0).count()
    }

    // ----- supply -----

    pub fn mint(
        &mut self,
        amount: Amount,
        recipient: Address,
        stamp: Stamp,
    ) -> Result<(), GovernanceError> {
        require_nonzero(amount)?;
        let attempted = self
            .total_supply
            .checked_add(amount)
            .ok_or(GovernanceError::Overflow)?;
        if attempted > self.supply_cap {
            return Err(GovernanceError::SupplyExceeded {
                cap: self.supply_cap,
                attempted,
            });
        }

        self.total_supply = attempted;
        self.credit(recipient, amount);
        self.touch(&[recipient], stamp);
        Ok(())
    }

    pub fn burn(
        &mut self,
        caller: Address,
        amount: Amount,
        from: Address,
        stamp: Stamp,
    ) -> Result<(), GovernanceError> {
        if caller != from {
            return Err(GovernanceError::Unauthorized(
                "only the holder can burn its balance".to_string(),
            ));
        }
        require_nonzero(amount)?;
        self.require_spendable(&from, amount)?;

        self.total_supply -= amount;
        self.debit(from, amount);
        self.touch(&[from], stamp);
        Ok(())
    }

    pub fn transfer(
        &mut self,
        caller: Address,
        amount: Amount,
        from: Address,
        to: Address,
        stamp: Stamp,
    ) -> Result<(), GovernanceError> {
        if caller != from {
            return Err(GovernanceError::Unauthorized(
                "caller is not the sender".to_string(),
            ));
        }
        require_nonzero(amount)?;
        if from == to {
            return Err(GovernanceError::InvalidParameter(
                "sender and recipient are the same account".to_string(),
            ));
        }
        self.require_spendable(&from, amount)?;
        // Recipient balance and any delegate aggregate stay below the supply,
        // so the credit side cannot overflow once the debit side is valid.

        self.debit(from, amount);
        self.credit(to, amount);
        self.touch(&[from, to], stamp);
        Ok(())
    }

    // ----- delegation -----

    pub fn delegate(
        &mut self,
        caller: Address,
        to: Address,
        stamp: Stamp,
    ) -> Result<(), GovernanceError> {
        if caller == to {
            return Err(GovernanceError::InvalidDelegate(
                "self-delegation is not allowed".to_string(),
            ));
        }
        if to.is_zero() {
            return Err(GovernanceError::InvalidDelegate(
                "cannot delegate to the zero address".to_string(),
            ));
        }
        if let Some(existing) = self.delegations.get(&caller) {
            return Err(GovernanceError::InvalidDelegate(format!(
                "already delegating to {:x}; undelegate first",
                existing
            )));
        }
        if self.is_delegating(&to) {
            return Err(GovernanceError::InvalidDelegate(
                "delegate has itself delegated; delegation is one hop".to_string(),
            ));
        }
        if self.delegators.get(&caller).is_some_and(|set| !set.is_empty()) {
            return Err(GovernanceError::InvalidDelegate(
                "account holds delegated power and cannot delegate onward".to_string(),
            ));
        }

        let balance = self.balance(&caller);
        self.delegations.insert(caller, to);
        self.delegators.entry(to).or_default().insert(caller);
        *self.delegated_in.entry(to).or_insert(0) += balance;
        self.touch(&[caller, to], stamp);
        Ok(())
    }

    pub fn undelegate(&mut self, caller: Address, stamp: Stamp) -> Result<Address, GovernanceError> {
        let Some(delegate) = self.delegations.get(&caller).copied() else {
            return Err(GovernanceError::NotFound(format!(
                "no active delegation for {:x}",
                caller
            )));
        };

        let balance = self.balance(&caller);
        self.delegations.remove(&caller);
        if let Some(set) = self.delegators.get_mut(&delegate) {
            set.remove(&caller);
            if set.is_empty() {
                self.delegators.remove(&delegate);
            }
        }
        self.sub_delegated(delegate, balance);
        self.touch(&[caller, delegate], stamp);
        Ok(delegate)
    }

    // ----- locks -----

    pub fn authorize_locker(&mut self, module: Address) -> bool {
        self.lockers.insert(module)
    }

    pub fn revoke_locker(&mut self, module: &Address) -> bool {
        self.lockers.remove(module)
    }

    pub fn lock(
        &mut self,
        caller: Address,
        account: Address,
        amount: Amount,
    ) -> Result<Amount, GovernanceError> {
        self.require_locker(&caller)?;
        require_nonzero(amount)?;
        let locked = self.locked(&account);
        let new_locked = locked.checked_add(amount).ok_or(GovernanceError::Overflow)?;
        let balance = self.balance(&account);
        if new_locked > balance {
            return Err(GovernanceError::InsufficientBalance {
                required: amount,
                available: balance - locked,
            });
        }

        self.locked.insert(account, new_locked);
        Ok(new_locked)
    }

    pub fn unlock(
        &mut self,
        caller: Address,
        account: Address,
        amount: Amount,
    ) -> Result<Amount, GovernanceError> {
        self.require_locker(&caller)?;
        require_nonzero(amount)?;
        let locked = self.locked(&account);
        if amount > locked {
            return Err(GovernanceError::InsufficientBalance {
                required: amount,
                available: locked,
            });
        }

        let remaining = locked - amount;
        if remaining == 0 {
            self.locked.remove(&account);
        } else {
            self.locked.insert(account, remaining);
        }
        Ok(remaining)
    }

    // ----- internals -----

    fn require_locker(&self, caller: &Address) -> Result<(), GovernanceError> {
        if self.lockers.contains(caller) {
            Ok(())
        } else {
            Err(GovernanceError::Unauthorized(format!(
                "{:x} is not an authorized locking module",
                caller
            )))
        }
    }

    fn require_spendable(&self, account: &Address, amount: Amount) -> Result<(), GovernanceError> {
        let spendable = self.spendable(account);
        if amount > spendable {
            return Err(GovernanceError::InsufficientBalance {
                required: amount,
                available: spendable,
            });
        }
        Ok(())
    }

    fn credit(&mut self, account: Address, amount: Amount) {
        *self.balances.entry(account).or_insert(0) += amount;
        if let Some(delegate) = self.delegations.get(&account).copied() {
            *self.delegated_in.entry(delegate).or_insert(0) += amount;
        }
    }

    fn debit(&mut self, account: Address, amount: Amount) {
        let remaining = self.balance(&account) - amount;
        if remaining == 0 {
            self.balances.remove(&account);
        } else {
            self.balances.insert(account, remaining);
        }
        if let Some(delegate) = self.delegations.get(&account).copied() {
            self.sub_delegated(delegate, amount);
        }
    }

    fn sub_delegated(&mut self, delegate: Address, amount: Amount) {
        let current = self.delegated_in.get(&delegate).copied().unwrap_or(0);
        let next = current.saturating_sub(amount);
        if next == 0 {
            self.delegated_in.remove(&delegate);
        } else {
            self.delegated_in.insert(delegate, next);
        }
    }

    /// Append a checkpoint for each affected account and for the delegate
    /// whose aggregate moved with it.
    fn touch(&mut self, accounts: &[Address], stamp: Stamp) {
        let mut affected = BTreeSet::new();
        for account in accounts {
            affected.insert(*account);
            if let Some(delegate) = self.delegations.get(account) {
                affected.insert(*delegate);
            }
        }

        for account in affected {
            let power = self.voting_power(&account);
            let list = self.checkpoints.entry(account).or_default();
            list.push(Checkpoint {
                index: list.len() as u64,
                height: stamp.height,
                sequence: stamp.sequence,
                power,
            });
        }
    }
}

fn require_nonzero(amount: Amount) -> Result<(), GovernanceError> {
    if amount == 0 {
        Err(GovernanceError::InvalidParameter("amount must be non-zero".to_string()))
    } else {
        Ok(())
    }
}
