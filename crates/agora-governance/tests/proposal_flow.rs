//! End-to-end proposal tests driving the engine through full lifecycles.

use std::sync::Arc;

use agora_governance::{
    Collaborators, Engine, ExecutionEffect, GovernanceConfig, GovernanceError, MemoryEventLog, ModuleKind,
    PowerSource, ProposalKind, ProposalState, StaticRoles, StrategyKind, VoteChoice, SET_PARAMETER,
};
use agora_types::Address;

fn addr(n: u8) -> Address {
    Address::from_bytes([n; 20])
}

fn admin() -> Address {
    addr(100)
}

const ALICE: u8 = 1;
const BOB: u8 = 2;
const GRANTEE: u8 = 3;

fn engine() -> Engine {
    Engine::with_defaults(admin()).unwrap()
}

fn engine_with(config: GovernanceConfig) -> (Engine, Arc<MemoryEventLog>) {
    let log = Arc::new(MemoryEventLog::new());
    let collaborators = Collaborators {
        access: Arc::new(StaticRoles::with_admin(admin())),
        events: log.clone(),
        multisig: None,
    };
    (Engine::new(&config, admin(), collaborators).unwrap(), log)
}

/// Alice holds 10M, Bob 5M, the treasury 1M.
fn funded(engine: &Engine) {
    engine.mint(admin(), 10_000_000, addr(ALICE)).unwrap();
    engine.mint(admin(), 5_000_000, addr(BOB)).unwrap();
    engine.deposit(admin(), 1_000_000).unwrap();
}

fn grant(amount: u128) -> ProposalKind {
    ProposalKind::Transfer {
        recipient: addr(GRANTEE),
        amount,
    }
}

/// Advance until the height equals `target`.
fn advance_to(engine: &Engine, target: u64) {
    let now = engine.height();
    assert!(target >= now, "cannot go back from {} to {}", now, target);
    engine.advance(target - now);
}

#[test]
fn test_passing_transfer_proposal_pays_out() {
    let engine = engine();
    funded(&engine);

    let id = engine
        .create_proposal(addr(ALICE), "Grants round 1", "Fund the grants round", grant(250_000), None)
        .unwrap();
    let proposal = engine.proposal(id).unwrap();
    assert_eq!((proposal.start, proposal.end), (1, 101));
    assert_eq!(engine.proposal_state(id).unwrap(), ProposalState::Pending);

    advance_to(&engine, proposal.start);
    assert_eq!(engine.proposal_state(id).unwrap(), ProposalState::Active);
    assert_eq!(engine.vote(addr(ALICE), id, VoteChoice::For).unwrap().power, 10_000_000);
    assert_eq!(engine.vote(addr(BOB), id, VoteChoice::Against).unwrap().power, 5_000_000);

    advance_to(&engine, proposal.end + 1);
    let outcome = engine.outcome(id).unwrap();
    assert_eq!(outcome.votes_cast, 15_000_000);
    assert_eq!(outcome.quorum_required, 3_000_000);
    assert_eq!(outcome.approval_required, 7_650_000);
    assert!(outcome.passed());
    assert_eq!(engine.proposal_state(id).unwrap(), ProposalState::Passed);

    advance_to(&engine, proposal.end + 10);
    let receipt = engine.execute(addr(BOB), id).unwrap();
    match receipt.effect {
        ExecutionEffect::Transferred { record } => {
            assert_eq!(record.amount, 250_000);
            assert_eq!(record.proposal_id, id);
        }
        other => panic!("unexpected effect {:?}", other),
    }
    assert_eq!(engine.treasury_balance(), 750_000);
    assert_eq!(engine.paid_to(&addr(GRANTEE)), 250_000);
    assert_eq!(engine.proposal_state(id).unwrap(), ProposalState::Executed);
}

#[test]
fn test_execution_boundary_and_idempotence() {
    let engine = engine();
    funded(&engine);
    let id = engine.create_proposal(addr(ALICE), "Grant", "", grant(10), None).unwrap();
    advance_to(&engine, 1);
    engine.vote(addr(ALICE), id, VoteChoice::For).unwrap();

    // end = 101, delay = 10
    advance_to(&engine, 110);
    assert!(matches!(engine.execute(addr(ALICE), id), Err(GovernanceError::StateNotReady(_))));
    assert!(!engine.proposal(id).unwrap().executed);

    advance_to(&engine, 111);
    engine.execute(addr(ALICE), id).unwrap();
    assert!(matches!(engine.execute(addr(ALICE), id), Err(GovernanceError::AlreadyExecuted(_))));

    engine.advance(1_000);
    assert!(matches!(engine.execute(addr(BOB), id), Err(GovernanceError::AlreadyExecuted(_))));
    assert!(engine.proposal(id).unwrap().executed);
    assert_eq!(engine.treasury_transfers().len(), 1);
}

#[test]
fn test_rejected_proposal_cannot_execute() {
    let engine = engine();
    funded(&engine);
    let id = engine.create_proposal(addr(ALICE), "Grant", "", grant(10), None).unwrap();
    advance_to(&engine, 1);
    engine.vote(addr(ALICE), id, VoteChoice::Against).unwrap();
    engine.vote(addr(BOB), id, VoteChoice::For).unwrap();

    advance_to(&engine, 111);
    assert_eq!(engine.proposal_state(id).unwrap(), ProposalState::Failed);
    assert_eq!(
        engine.execute(addr(BOB), id).unwrap_err(),
        GovernanceError::ProposalNotPassed {
            proposal_id: id,
            quorum_met: true,
            approval_met: false,
        }
    );
    assert_eq!(engine.treasury_balance(), 1_000_000);
}

#[test]
fn test_quorum_uses_live_supply() {
    let engine = engine();
    funded(&engine);
    let id = engine.create_proposal(addr(ALICE), "Grant", "", grant(10), None).unwrap();
    advance_to(&engine, 1);
    engine.vote(addr(BOB), id, VoteChoice::For).unwrap();

    // 5M of 15M cast clears 20% quorum; minting 15M more pushes the
    // requirement to 6M.
    advance_to(&engine, 111);
    assert!(engine.outcome(id).unwrap().quorum_met);
    engine.mint(admin(), 15_000_000, addr(9)).unwrap();
    let outcome = engine.outcome(id).unwrap();
    assert!(!outcome.quorum_met);
    assert!(matches!(
        engine.execute(addr(BOB), id),
        Err(GovernanceError::ProposalNotPassed { quorum_met: false, .. })
    ));
}

#[test]
fn test_vote_requires_power_and_window() {
    let engine = engine();
    funded(&engine);
    let id = engine.create_proposal(addr(ALICE), "Grant", "", grant(10), None).unwrap();

    assert!(matches!(engine.vote(addr(ALICE), id, VoteChoice::For), Err(GovernanceError::StateNotReady(_))));

    advance_to(&engine, 1);
    assert_eq!(
        engine.vote(addr(42), id, VoteChoice::For).unwrap_err(),
        GovernanceError::InsufficientVotingPower { required: 1, actual: 0 }
    );
    assert!(engine.vote_of(id, &addr(42)).is_none());

    engine.vote(addr(ALICE), id, VoteChoice::Abstain).unwrap();
    assert!(matches!(
        engine.vote(addr(ALICE), id, VoteChoice::For),
        Err(GovernanceError::AlreadyVoted { .. })
    ));

    advance_to(&engine, 102);
    assert!(matches!(engine.vote(addr(BOB), id, VoteChoice::For), Err(GovernanceError::StateExpired(_))));
    assert!(matches!(engine.vote(addr(BOB), 99, VoteChoice::For), Err(GovernanceError::NotFound(_))));
}

#[test]
fn test_proposal_needs_minimum_power() {
    let engine = engine();
    engine.mint(admin(), 999, addr(ALICE)).unwrap();
    assert_eq!(
        engine
            .create_proposal(addr(ALICE), "Grant", "", grant(10), None)
            .unwrap_err(),
        GovernanceError::InsufficientVotingPower { required: 1_000, actual: 999 }
    );
    assert!(engine.proposals().is_empty());
}

#[test]
fn test_tally_fixed_at_vote_time() {
    let engine = engine();
    funded(&engine);
    let id = engine.create_proposal(addr(ALICE), "Grant", "", grant(10), None).unwrap();
    advance_to(&engine, 1);
    engine.vote(addr(ALICE), id, VoteChoice::For).unwrap();

    engine.transfer(addr(ALICE), 10_000_000, addr(ALICE), addr(7)).unwrap();
    assert_eq!(engine.proposal(id).unwrap().tally.votes_for, 10_000_000);

    // the receiver votes with the moved balance under live power
    assert_eq!(engine.vote(addr(7), id, VoteChoice::Against).unwrap().power, 10_000_000);
}

#[test]
fn test_snapshot_power_ignores_later_balances() {
    let mut config = GovernanceConfig::default();
    config.lifecycle.power_source = PowerSource::Snapshot;
    let (engine, _) = engine_with(config);
    funded(&engine);
    let id = engine.create_proposal(addr(ALICE), "Grant", "", grant(10), None).unwrap();

    advance_to(&engine, 1);
    engine.transfer(addr(ALICE), 4_000_000, addr(ALICE), addr(7)).unwrap();
    assert_eq!(engine.vote(addr(ALICE), id, VoteChoice::For).unwrap().power, 10_000_000);
    assert_eq!(
        engine.vote(addr(7), id, VoteChoice::For).unwrap_err(),
        GovernanceError::InsufficientVotingPower { required: 1, actual: 0 }
    );
}

#[test]
fn test_delegated_power_votes_through_delegate() {
    let engine = engine();
    funded(&engine);
    engine.delegate(addr(BOB), addr(ALICE)).unwrap();

    let id = engine.create_proposal(addr(ALICE), "Grant", "", grant(10), None).unwrap();
    advance_to(&engine, 1);
    assert_eq!(engine.vote(addr(ALICE), id, VoteChoice::For).unwrap().power, 15_000_000);
    assert!(matches!(
        engine.vote(addr(BOB), id, VoteChoice::Against),
        Err(GovernanceError::InsufficientVotingPower { .. })
    ));
}

#[test]
fn test_quadratic_strategy_halves_power() {
    let engine = engine();
    funded(&engine);
    let id = engine
        .create_proposal(addr(ALICE), "Grant", "", grant(10), Some(StrategyKind::Quadratic))
        .unwrap();
    assert_eq!(engine.strategy_of(id), StrategyKind::Quadratic);
    advance_to(&engine, 1);
    assert_eq!(engine.vote(addr(ALICE), id, VoteChoice::For).unwrap().power, 5_000_000);
}

#[test]
fn test_parameter_change_retunes_lifecycle() {
    let engine = engine();
    funded(&engine);
    let id = engine
        .create_proposal(
            addr(ALICE),
            "Shorter votes",
            "",
            ProposalKind::ParameterChange {
                key: "voting_period".to_string(),
                value: 20u64.to_le_bytes().to_vec(),
            },
            None,
        )
        .unwrap();
    advance_to(&engine, 1);
    engine.vote(addr(ALICE), id, VoteChoice::For).unwrap();
    advance_to(&engine, 111);

    let receipt = engine.execute(addr(ALICE), id).unwrap();
    assert_eq!(
        receipt.effect,
        ExecutionEffect::ParameterSet { key: "voting_period".to_string(), value: 20 }
    );
    assert_eq!(engine.lifecycle_params().voting_period, 20);
    assert_eq!(engine.parameter("voting_period"), Some(20));

    let next = engine.create_proposal(addr(ALICE), "Next", "", grant(10), None).unwrap();
    let proposal = engine.proposal(next).unwrap();
    assert_eq!(proposal.end - proposal.start, 20);
}

#[test]
fn test_upgrade_proposal_is_audited() {
    let engine = engine();
    funded(&engine);
    let id = engine
        .create_proposal(
            addr(ALICE),
            "New treasury",
            "",
            ProposalKind::Upgrade { module: ModuleKind::Treasury, implementation: addr(55) },
            None,
        )
        .unwrap();
    advance_to(&engine, 1);
    engine.vote(addr(ALICE), id, VoteChoice::For).unwrap();
    advance_to(&engine, 111);
    engine.execute(addr(ALICE), id).unwrap();

    assert_eq!(engine.implementation(ModuleKind::Treasury), addr(55));
    let log = engine.upgrade_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].proposal_id, Some(id));
    assert_eq!(log[0].authorized_by, ModuleKind::Lifecycle.principal());
}

#[test]
fn test_custom_proposal_goes_through_timelock() {
    let (engine, log) = engine_with(GovernanceConfig::default());
    funded(&engine);
    let args = borsh::to_vec(&("min_proposal_power".to_string(), 5_000u64.to_le_bytes().to_vec())).unwrap();
    let id = engine
        .create_proposal(
            addr(ALICE),
            "Raise proposal bar",
            "",
            ProposalKind::Custom {
                target: ModuleKind::Lifecycle.principal(),
                function: SET_PARAMETER.to_string(),
                args,
            },
            None,
        )
        .unwrap();
    advance_to(&engine, 1);
    engine.vote(addr(ALICE), id, VoteChoice::For).unwrap();
    advance_to(&engine, 111);

    let receipt = engine.execute(addr(ALICE), id).unwrap();
    let ExecutionEffect::Queued { hash, eta } = receipt.effect else {
        panic!("custom proposal should queue");
    };
    assert_eq!(eta, 121);
    assert_eq!(engine.proposal(id).unwrap().queued_operation, Some(hash));
    assert_eq!(engine.lifecycle_params().min_proposal_power, 1_000);

    assert!(matches!(engine.execute_operation(addr(BOB), hash), Err(GovernanceError::StateNotReady(_))));
    advance_to(&engine, 121);
    let receipt = engine.execute_operation(addr(BOB), hash).unwrap();
    assert_eq!(receipt.applied_parameter, Some(("min_proposal_power".to_string(), 5_000)));
    assert_eq!(engine.lifecycle_params().min_proposal_power, 5_000);
    assert_eq!(log.of_type("operation_executed").len(), 1);
}

#[test]
fn test_transfer_failure_aborts_execution() {
    let engine = engine();
    funded(&engine);
    let id = engine.create_proposal(addr(ALICE), "Too much", "", grant(2_000_000), None).unwrap();
    advance_to(&engine, 1);
    engine.vote(addr(ALICE), id, VoteChoice::For).unwrap();
    advance_to(&engine, 111);

    assert_eq!(
        engine.execute(addr(ALICE), id).unwrap_err(),
        GovernanceError::InsufficientFunds { requested: 2_000_000, available: 1_000_000 }
    );
    assert!(!engine.proposal(id).unwrap().executed);

    engine.deposit(admin(), 1_000_000).unwrap();
    engine.execute(addr(ALICE), id).unwrap();
    assert_eq!(engine.treasury_balance(), 0);
}

#[test]
fn test_concurrent_votes_are_all_counted() {
    let engine = Arc::new(engine());
    engine.mint(admin(), 10_000, addr(ALICE)).unwrap();
    let voters: Vec<Address> = (10..42).map(addr).collect();
    for voter in &voters {
        engine.mint(admin(), 1_000, *voter).unwrap();
    }
    let id = engine.create_proposal(addr(ALICE), "Grant", "", grant(10), None).unwrap();
    engine.advance(1);

    std::thread::scope(|scope| {
        for voter in &voters {
            let engine = engine.clone();
            scope.spawn(move || {
                engine.vote(*voter, id, VoteChoice::For).unwrap();
                // second attempt from the same voter always loses
                assert!(engine.vote(*voter, id, VoteChoice::Against).is_err());
            });
        }
    });

    let tally = engine.proposal(id).unwrap().tally;
    assert_eq!(tally.votes_for, 1_000 * voters.len() as u128);
    assert_eq!(tally.votes_against, 0);
}

#[test]
fn test_round_trip_transfer() {
    let engine = engine();
    engine.mint(admin(), 100, addr(ALICE)).unwrap();
    engine.transfer(addr(ALICE), 100, addr(ALICE), addr(BOB)).unwrap();
    assert_eq!(engine.balance(&addr(ALICE)), 0);
    assert_eq!(engine.balance(&addr(BOB)), 100);
    assert_eq!(engine.total_supply(), 100);
}

/// Create `kind` from Alice, vote it through and move to its first
/// executable height.
fn pass(engine: &Engine, title: &str, kind: ProposalKind) -> u64 {
    let id = engine.create_proposal(addr(ALICE), title, "", kind, None).unwrap();
    let proposal = engine.proposal(id).unwrap();
    advance_to(engine, proposal.start);
    engine.vote(addr(ALICE), id, VoteChoice::For).unwrap();
    advance_to(engine, proposal.executable_from());
    id
}

fn parameter_change(key: &str, value: u128) -> ProposalKind {
    ProposalKind::ParameterChange {
        key: key.to_string(),
        value: value.to_le_bytes().to_vec(),
    }
}

#[test]
fn test_lifecycle_upgrade_moves_treasury_rights() {
    let engine = engine();
    funded(&engine);
    let retired = engine.governor();
    assert_eq!(retired, ModuleKind::Lifecycle.principal());

    let upgrade = ProposalKind::Upgrade { module: ModuleKind::Lifecycle, implementation: addr(77) };
    let id = pass(&engine, "New lifecycle", upgrade);
    engine.execute(addr(BOB), id).unwrap();
    assert_eq!(engine.governor(), addr(77));
    assert_eq!(engine.implementation(ModuleKind::Lifecycle), addr(77));

    assert!(matches!(
        engine.execute_transfer(retired, addr(GRANTEE), 10, id),
        Err(GovernanceError::Unauthorized(_))
    ));
    let record = engine.execute_transfer(addr(77), addr(GRANTEE), 10, id).unwrap();
    assert_eq!(record.executed_by, addr(77));

    // proposals keep executing, now under the new identity
    let grant_id = pass(&engine, "Grant", grant(100));
    let receipt = engine.execute(addr(BOB), grant_id).unwrap();
    let ExecutionEffect::Transferred { record } = receipt.effect else {
        panic!("grant should transfer");
    };
    assert_eq!(record.executed_by, addr(77));
    assert_eq!(engine.treasury_balance(), 1_000_000 - 110);
}

#[test]
fn test_lifecycle_upgrade_moves_timelock_rights() {
    let engine = engine();
    funded(&engine);
    let retired = engine.governor();
    engine.upgrade_module(admin(), ModuleKind::Lifecycle, addr(77)).unwrap();

    assert!(matches!(
        engine.queue_operation(retired, addr(8), "pause", vec![], 10),
        Err(GovernanceError::Unauthorized(_))
    ));
    engine.queue_operation(addr(77), addr(8), "pause", vec![], 10).unwrap();

    let args = borsh::to_vec(&("min_proposal_power".to_string(), 2_000u64.to_le_bytes().to_vec())).unwrap();
    let stale = engine
        .queue_operation(admin(), retired, SET_PARAMETER, args.clone(), 10)
        .unwrap();
    let current = engine
        .queue_operation(admin(), addr(77), SET_PARAMETER, args, 10)
        .unwrap();
    advance_to(&engine, 10);

    assert_eq!(engine.execute_operation(addr(BOB), stale).unwrap().applied_parameter, None);
    assert_eq!(engine.lifecycle_params().min_proposal_power, 1_000);
    assert_eq!(
        engine.execute_operation(addr(BOB), current).unwrap().applied_parameter,
        Some(("min_proposal_power".to_string(), 2_000))
    );
    assert_eq!(engine.lifecycle_params().min_proposal_power, 2_000);
}

#[test]
fn test_delay_change_does_not_retime_open_proposals() {
    let engine = engine();
    funded(&engine);
    let grant_id = engine.create_proposal(addr(ALICE), "Grant", "", grant(100), None).unwrap();
    let delay_id = engine
        .create_proposal(addr(ALICE), "Slower execution", "", parameter_change("execution_delay", 5_000), None)
        .unwrap();
    advance_to(&engine, 1);
    engine.vote(addr(ALICE), grant_id, VoteChoice::For).unwrap();
    engine.vote(addr(ALICE), delay_id, VoteChoice::For).unwrap();
    advance_to(&engine, 111);

    engine.execute(addr(BOB), delay_id).unwrap();
    assert_eq!(engine.lifecycle_params().execution_delay, 5_000);
    engine.execute(addr(BOB), grant_id).unwrap();
    assert_eq!(engine.treasury_balance(), 999_900);

    let next = engine.create_proposal(addr(ALICE), "Later grant", "", grant(1), None).unwrap();
    let proposal = engine.proposal(next).unwrap();
    assert_eq!(proposal.execution_delay, 5_000);
    assert_eq!(proposal.executable_from(), proposal.end + 5_000);
}

#[test]
fn test_out_of_range_parameters_rejected() {
    let engine = engine();
    funded(&engine);
    for (key, value) in [
        ("execution_delay", u64::MAX as u128),
        ("voting_period", u64::MAX as u128),
        ("voting_period", 0),
        ("min_proposal_power", u128::MAX),
    ] {
        let err = engine
            .create_proposal(addr(ALICE), "Freeze", "", parameter_change(key, value), None)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidParameter(_)), "{} = {}", key, value);
    }
    assert!(engine.proposals().is_empty());

    // the timelock route has the same bounds
    let args = borsh::to_vec(&("execution_delay".to_string(), u64::MAX.to_le_bytes().to_vec())).unwrap();
    let hash = engine
        .queue_operation(admin(), engine.governor(), SET_PARAMETER, args, 10)
        .unwrap();
    advance_to(&engine, 10);
    assert!(matches!(
        engine.execute_operation(addr(BOB), hash),
        Err(GovernanceError::InvalidParameter(_))
    ));
    assert_eq!(engine.lifecycle_params().execution_delay, 10);
}
