//! Executed proposals: apply parameter changes to the organization.
//!
//! The proposal's free-form type decides how its first calldata is read.
//! Matching is by case-insensitive substring, so "Update Voting Period" and
//! "voting period change" land in the same place.

use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use chrono::Utc;
use homebase_common::stage;
use homebase_common::store::{Fields, Update, WriteBatch};
use serde_json::Value;
use tracing::{info, warn};

use super::{checksum, decode, timestamp, to_u64, tx_hash, Context, Effect, ReconcileError};
use crate::abi;
use crate::contracts::ProposalExecuted;
use crate::dispatch::EventName;

const DEFAULT_DECIMALS: u64 = 18;

fn string_list(doc: &Fields, key: &str) -> Vec<String> {
    doc.get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Raw on-chain threshold scaled down by the token's decimals
fn display_threshold(raw: U256, decimals: u64) -> U256 {
    match U256::from(10u64).checked_pow(U256::from(decimals)) {
        Some(scale) => raw / scale,
        None => U256::ZERO,
    }
}

/// Organization fields changed by a parameter proposal
fn parameter_changes(kind: &str, calldata: &str, org_doc: Option<&Fields>) -> Update {
    let mut update = Update::new();
    let single_uint = || match abi::decode_uint_arg(calldata) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Could not decode {} calldata: {}", kind, e);
            None
        }
    };

    if kind.contains("voting period") {
        if let Some(value) = single_uint() {
            update = update.set("votingDuration", to_u64(value));
        }
    }

    if kind.contains("threshold") {
        if let Some(raw) = single_uint() {
            let decimals = org_doc
                .and_then(|doc| doc.get("decimals"))
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_DECIMALS);
            update = update.set("proposalThreshold", display_threshold(raw, decimals).to_string());
        }
    }

    if kind.contains("delay") {
        if let Some(value) = single_uint() {
            let field = if kind.contains("timelock") { "executionDelay" } else { "votingDelay" };
            update = update.set(field, to_u64(value));
        }
    }

    if kind.contains("quorum") {
        if let Some(value) = single_uint() {
            update = update.set("quorum", to_u64(value));
        }
    }

    if kind.contains("registry") {
        match abi::decode_string_pair(calldata) {
            Ok((key, value)) => {
                let mut registry = org_doc
                    .and_then(|doc| doc.get("registry"))
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                registry.insert(key, Value::String(value));
                update = update.set("registry", Value::Object(registry));
            }
            Err(e) => warn!("Could not decode registry calldata: {}", e),
        }
    }

    update
}

pub(super) async fn proposal_executed(
    ctx: &Context,
    org: Address,
    token: Address,
    log: &Log,
) -> Result<Effect, ReconcileError> {
    let event: ProposalExecuted = decode(log, EventName::ProposalExecuted)?;
    let id = event.proposalId.to_string();
    let proposal_path = ctx.proposal_path(org, &id);

    let Some(proposal) = ctx.store.get(&proposal_path).await? else {
        return Err(ReconcileError::MissingDocument(proposal_path.to_string()));
    };

    let kind = proposal
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    let targets = string_list(&proposal, "targets");
    let calldatas = string_list(&proposal, "callDatas");

    let org_path = ctx.org_path(org);
    let org_doc = ctx.store.get(&org_path).await?;

    let mut batch = WriteBatch::new();
    let mut org_update = Update::new();
    if let Some(calldata) = calldatas.first() {
        org_update = parameter_changes(&kind, calldata, org_doc.as_ref());

        if kind.contains("mint") || kind.contains("burn") {
            let target_token = targets
                .first()
                .and_then(|t| t.parse::<Address>().ok())
                .unwrap_or(token);
            if let Some(supply) = apply_balance_change(ctx, &mut batch, org, target_token, calldata).await? {
                org_update = org_update.set("totalSupply", supply.to_string());
            }
        }
    }

    if !org_update.is_empty() {
        if org_doc.is_some() {
            batch.update(org_path, org_update);
        } else {
            warn!(address = %org, "Organization document missing, dropping parameter changes from proposal {}", id);
        }
    }

    batch.update(
        proposal_path,
        Update::new()
            .set("statusHistory.executed", timestamp(Utc::now()))
            .set("latestStage", stage::EXECUTED)
            .set("executionHash", tx_hash(log)),
    );
    ctx.store.commit(batch).await?;

    info!("Proposal {} ({}) executed in {}", id, kind, checksum(org));
    Ok(Effect::None)
}

/// Re-read the affected member's balance and the token supply after a mint
/// or burn. Returns the new supply, or `None` when the change could not be read.
async fn apply_balance_change(
    ctx: &Context,
    batch: &mut WriteBatch,
    org: Address,
    token: Address,
    calldata: &str,
) -> Result<Option<U256>, ReconcileError> {
    let (member, _amount) = match abi::decode_address_amount(calldata) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(address = %token, "Could not decode mint/burn calldata: {}", e);
            return Ok(None);
        }
    };

    let balance = match ctx.chain.balance_of(token, member).await {
        Ok(balance) => balance,
        Err(e) => {
            warn!(address = %token, "balanceOf {} failed after mint/burn: {}", member, e);
            return Ok(None);
        }
    };
    let supply = match ctx.chain.total_supply(token).await {
        Ok(supply) => supply,
        Err(e) => {
            warn!(address = %token, "totalSupply failed after mint/burn: {}", e);
            return Ok(None);
        }
    };

    ctx.upsert_member(
        batch,
        org,
        token,
        member,
        Update::new().set("personalBalance", balance.to_string()),
    )
    .await?;
    Ok(Some(supply))
}
