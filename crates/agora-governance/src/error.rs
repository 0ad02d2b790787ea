use agora_types::{Address, Amount, Hash};
use thiserror::Error;

/// Errors that can occur in governance operations.
///
/// Every failed call leaves state untouched; the caller fixes the request and
/// resubmits.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GovernanceError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Already voted on proposal {proposal_id}: {voter:x}")]
    AlreadyVoted { proposal_id: u64, voter: Address },

    #[error("Already executed: {0}")]
    AlreadyExecuted(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(Hash),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Amount, available: Amount },

    #[error("Insufficient voting power: required {required}, have {actual}")]
    InsufficientVotingPower { required: Amount, actual: Amount },

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Amount, available: Amount },

    #[error("Supply cap exceeded: cap {cap}, would reach {attempted}")]
    SupplyExceeded { cap: Amount, attempted: Amount },

    #[error("Invalid delegate: {0}")]
    InvalidDelegate(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Not ready: {0}")]
    StateNotReady(String),

    #[error("Expired: {0}")]
    StateExpired(String),

    #[error("Proposal {proposal_id} not passed (quorum met: {quorum_met}, approval met: {approval_met})")]
    ProposalNotPassed {
        proposal_id: u64,
        quorum_met: bool,
        approval_met: bool,
    },

    #[error("Arithmetic overflow")]
    Overflow,
}

/// Coarse error classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthorized,
    NotFound,
    /// Idempotency violation; resubmitting the same call can never succeed.
    Duplicate,
    Insufficient,
    InvalidParameter,
    NotReady,
    Expired,
}

impl GovernanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GovernanceError::Unauthorized(_) => ErrorKind::Unauthorized,
            GovernanceError::NotFound(_) => ErrorKind::NotFound,
            GovernanceError::AlreadyExists(_)
            | GovernanceError::AlreadyVoted { .. }
            | GovernanceError::AlreadyExecuted(_)
            | GovernanceError::Cancelled(_) => ErrorKind::Duplicate,
            GovernanceError::InsufficientBalance { .. }
            | GovernanceError::InsufficientVotingPower { .. }
            | GovernanceError::InsufficientFunds { .. }
            | GovernanceError::SupplyExceeded { .. }
            | GovernanceError::ProposalNotPassed { .. } => ErrorKind::Insufficient,
            GovernanceError::InvalidDelegate(_)
            | GovernanceError::InvalidParameter(_)
            | GovernanceError::Overflow => ErrorKind::InvalidParameter,
            GovernanceError::StateNotReady(_) => ErrorKind::NotReady,
            GovernanceError::StateExpired(_) => ErrorKind::Expired,
        }
    }

    /// True for errors that must never be retried blindly.
    pub fn is_idempotency_violation(&self) -> bool {
        self.kind() == ErrorKind::Duplicate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GovernanceError::InsufficientFunds { requested: 100, available: 40 };
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("40"));
    }

    #[test]
    fn test_idempotency_class() {
        assert!(GovernanceError::AlreadyExecuted("proposal 1".into()).is_idempotency_violation());
        assert!(GovernanceError::AlreadyVoted { proposal_id: 1, voter: Address::ZERO }
            .is_idempotency_violation());
        assert!(!GovernanceError::StateNotReady("window".into()).is_idempotency_violation());
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(GovernanceError::Overflow.kind(), ErrorKind::InvalidParameter);
        assert_eq!(GovernanceError::StateExpired("grace".into()).kind(), ErrorKind::Expired);
        assert_eq!(
            GovernanceError::SupplyExceeded { cap: 1, attempted: 2 }.kind(),
            ErrorKind::Insufficient
        );
    }
}
