//! Deterministic script replay.
//!
//! A script names an admin and a list of steps. Each step is applied to a
//! fresh engine in order; failures are reported and replay continues unless
//! the caller asks to stop at the first one.

use agora_governance::{Engine, GovernanceError, ProposalKind, StrategyKind, VoteChoice};
use agora_types::{Address, Amount, Hash, Height};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    pub admin: Address,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Step {
    Mint {
        to: Address,
        #[serde(with = "agora_types::amount_serde")]
        amount: Amount,
    },
    Transfer {
        from: Address,
        to: Address,
        #[serde(with = "agora_types::amount_serde")]
        amount: Amount,
    },
    Delegate {
        from: Address,
        to: Address,
    },
    Undelegate {
        from: Address,
    },
    Deposit {
        from: Address,
        #[serde(with = "agora_types::amount_serde")]
        amount: Amount,
    },
    Propose {
        proposer: Address,
        title: String,
        #[serde(default)]
        description: String,
        kind: ProposalKind,
        #[serde(default)]
        strategy: Option<StrategyKind>,
    },
    Vote {
        voter: Address,
        proposal_id: u64,
        choice: VoteChoice,
    },
    Advance {
        blocks: u64,
    },
    Execute {
        caller: Address,
        proposal_id: u64,
    },
    Queue {
        caller: Address,
        target: Address,
        function: String,
        /// Hex, with or without `0x`
        #[serde(default)]
        args: String,
        eta: Height,
    },
    ExecuteOperation {
        caller: Address,
        hash: Hash,
    },
    CancelOperation {
        caller: Address,
        hash: Hash,
    },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Mint { .. } => "mint",
            Step::Transfer { .. } => "transfer",
            Step::Delegate { .. } => "delegate",
            Step::Undelegate { .. } => "undelegate",
            Step::Deposit { .. } => "deposit",
            Step::Propose { .. } => "propose",
            Step::Vote { .. } => "vote",
            Step::Advance { .. } => "advance",
            Step::Execute { .. } => "execute",
            Step::Queue { .. } => "queue",
            Step::ExecuteOperation { .. } => "execute-operation",
            Step::CancelOperation { .. } => "cancel-operation",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub op: &'static str,
    pub height: Height,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

#[derive(Debug)]
enum StepError {
    Governance(GovernanceError),
    Script(String),
}

impl From<GovernanceError> for StepError {
    fn from(e: GovernanceError) -> Self {
        StepError::Governance(e)
    }
}

pub fn parse_script(contents: &str) -> anyhow::Result<Script> {
    serde_json::from_str(contents).map_err(|e| anyhow::anyhow!("Invalid script: {}", e))
}

/// Apply every step; with `stop_on_error` replay ends after the first
/// failing step.
pub fn run(engine: &Engine, script: &Script, stop_on_error: bool) -> Vec<StepOutcome> {
    let mut outcomes = Vec::with_capacity(script.steps.len());
    for (index, step) in script.steps.iter().enumerate() {
        let result = apply(engine, step);
        let height = engine.height();
        let outcome = match result {
            Ok(value) => StepOutcome {
                index,
                op: step.name(),
                height,
                ok: true,
                result: Some(value),
                error: None,
                error_kind: None,
            },
            Err(StepError::Governance(e)) => {
                tracing::debug!(index, op = step.name(), error = %e, "step failed");
                StepOutcome {
                    index,
                    op: step.name(),
                    height,
                    ok: false,
                    result: None,
                    error: Some(e.to_string()),
                    error_kind: Some(format!("{:?}", e.kind())),
                }
            }
            Err(StepError::Script(message)) => StepOutcome {
                index,
                op: step.name(),
                height,
                ok: false,
                result: None,
                error: Some(message),
                error_kind: Some("Script".to_string()),
            },
        };
        let failed = !outcome.ok;
        outcomes.push(outcome);
        if failed && stop_on_error {
            break;
        }
    }
    outcomes
}

/// End-of-replay state summary.
pub fn summary(engine: &Engine) -> Value {
    let proposals: Vec<Value> = engine
        .proposals()
        .iter()
        .map(|proposal| {
            let state = engine
                .proposal_state(proposal.id)
                .map(|state| json!(state))
                .unwrap_or(Value::Null);
            json!({
                "id": proposal.id,
                "title": proposal.title,
                "state": state,
                "votes_for": proposal.tally.votes_for.to_string(),
                "votes_against": proposal.tally.votes_against.to_string(),
                "votes_abstain": proposal.tally.votes_abstain.to_string(),
            })
        })
        .collect();
    json!({
        "height": engine.height(),
        "total_supply": engine.total_supply().to_string(),
        "treasury_balance": engine.treasury_balance().to_string(),
        "proposals": proposals,
    })
}

fn apply(engine: &Engine, step: &Step) -> Result<Value, StepError> {
    let value = match step {
        Step::Mint { to, amount } => {
            let admin = engine.registry_authority();
            let supply = engine.mint(admin, *amount, *to)?;
            json!({ "total_supply": supply.to_string() })
        }
        Step::Transfer { from, to, amount } => {
            engine.transfer(*from, *amount, *from, *to)?;
            json!({ "from_balance": engine.balance(from).to_string(), "to_balance": engine.balance(to).to_string() })
        }
        Step::Delegate { from, to } => {
            engine.delegate(*from, *to)?;
            json!({ "delegate_power": engine.voting_power(to).to_string() })
        }
        Step::Undelegate { from } => {
            let previous = engine.undelegate(*from)?;
            json!({ "previous_delegate": previous })
        }
        Step::Deposit { from, amount } => {
            let balance = engine.deposit(*from, *amount)?;
            json!({ "treasury_balance": balance.to_string() })
        }
        Step::Propose { proposer, title, description, kind, strategy } => {
            let id = engine.create_proposal(*proposer, title.clone(), description.clone(), kind.clone(), *strategy)?;
            let proposal = engine.proposal(id);
            json!({
                "proposal_id": id,
                "start": proposal.as_ref().map(|p| p.start),
                "end": proposal.as_ref().map(|p| p.end),
            })
        }
        Step::Vote { voter, proposal_id, choice } => {
            let record = engine.vote(*voter, *proposal_id, *choice)?;
            json!({ "power": record.power.to_string(), "choice": record.choice })
        }
        Step::Advance { blocks } => json!({ "height": engine.advance(*blocks) }),
        Step::Execute { caller, proposal_id } => {
            let receipt = engine.execute(*caller, *proposal_id)?;
            serde_json::to_value(&receipt.effect).map_err(|e| StepError::Script(e.to_string()))?
        }
        Step::Queue { caller, target, function, args, eta } => {
            let args = hex::decode(args.trim_start_matches("0x"))
                .map_err(|e| StepError::Script(format!("args are not hex: {}", e)))?;
            let hash = engine.queue_operation(*caller, *target, function.clone(), args, *eta)?;
            json!({ "hash": hash })
        }
        Step::ExecuteOperation { caller, hash } => {
            let receipt = engine.execute_operation(*caller, *hash)?;
            let applied = match receipt.applied_parameter {
                Some((key, value)) => json!({ "key": key, "value": value.to_string() }),
                None => Value::Null,
            };
            json!({
                "target": receipt.operation.target,
                "function": receipt.operation.function,
                "applied_parameter": applied,
            })
        }
        Step::CancelOperation { caller, hash } => {
            engine.cancel_operation(*caller, *hash)?;
            json!({ "cancelled": hash })
        }
    };
    Ok(value)
}
