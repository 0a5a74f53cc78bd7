use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use bigdecimal::BigDecimal;
use chrono::Utc;
use homebase_common::store::{DocPath, Fields, TransactionFn, Update, WriteBatch};
use homebase_common::{stage, Proposal, StoreError, Vote};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{info, warn};

use super::{checksum, decode, enrich, from_unix, timestamp, tx_hash, Context, Effect, ReconcileError};
use crate::contracts::{ProposalCreated, ProposalQueued, VoteCast};
use crate::dispatch::EventName;

const DESCRIPTION_DELIMITER: &str = "0|||0";
const TITLE_PREVIEW_CHARS: usize = 80;

const NO_TITLE: &str = "(No Title Provided)";
const NO_LINK: &str = "(No Link Provided)";
const NO_DESCRIPTION: &str = "(No Description Provided)";

/// The four fields packed into a proposal's description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalDescription {
    pub title: String,
    pub kind: String,
    pub body: String,
    pub link: String,
}

fn or_fallback(part: &str, fallback: &str) -> String {
    if part.is_empty() {
        fallback.to_string()
    } else {
        part.to_string()
    }
}

/// Split `title0|||0type0|||0body0|||0link`. A blob without delimiters is a
/// custom proposal titled by its first 80 characters.
pub fn parse_description(blob: &str) -> ProposalDescription {
    let parts: Vec<&str> = blob.split(DESCRIPTION_DELIMITER).collect();

    if parts.len() >= 4 {
        return ProposalDescription {
            title: or_fallback(parts[0], NO_TITLE),
            kind: or_fallback(parts[1], "unknown"),
            body: or_fallback(parts[2], blob),
            link: or_fallback(parts[3], NO_LINK),
        };
    }

    if parts.len() == 1 && !blob.is_empty() {
        return ProposalDescription {
            title: blob.chars().take(TITLE_PREVIEW_CHARS).collect(),
            kind: "custom".to_string(),
            body: blob.to_string(),
            link: NO_LINK.to_string(),
        };
    }

    ProposalDescription {
        title: NO_TITLE.to_string(),
        kind: "unknown".to_string(),
        body: or_fallback(blob, NO_DESCRIPTION),
        link: NO_LINK.to_string(),
    }
}

pub(super) async fn proposal_created(
    ctx: &Context,
    org: Address,
    token: Address,
    log: &Log,
) -> Result<Effect, ReconcileError> {
    let event: ProposalCreated = decode(log, EventName::ProposalCreated)?;
    let id = event.proposalId.to_string();
    let description = parse_description(&event.description);

    let total_supply = match ctx.chain.past_total_supply(token, event.voteStart).await {
        Ok(supply) => supply,
        Err(e) => {
            warn!(address = %token, "getPastTotalSupply failed, using current supply: {}", e);
            enrich("totalSupply", token, ctx.chain.total_supply(token), U256::ZERO).await
        }
    };

    let now = Utc::now();
    let proposal = Proposal {
        id: id.clone(),
        org: checksum(org),
        name: description.title,
        author: checksum(event.proposer),
        kind: description.kind,
        description: description.body,
        external_resource: description.link,
        targets: event.targets.iter().map(|t| checksum(*t)).collect(),
        values: event.values.iter().map(|v| v.to_string()).collect(),
        call_datas: event
            .calldatas
            .iter()
            .map(|data| format!("0x{}", hex::encode(data)))
            .collect(),
        voting_starts_block: event.voteStart.to_string(),
        voting_ends_block: event.voteEnd.to_string(),
        total_supply: total_supply.to_string(),
        in_favor: "0".to_string(),
        against: "0".to_string(),
        votes_for: 0,
        votes_against: 0,
        latest_stage: stage::CREATED.to_string(),
        status_history: BTreeMap::from([("created".to_string(), now)]),
        execution_hash: None,
        created_at: now,
    };

    let mut batch = WriteBatch::new();
    batch.set(ctx.proposal_path(org, &id), proposal.to_fields()?);
    ctx.upsert_member(
        &mut batch,
        org,
        token,
        event.proposer,
        Update::new().array_union("proposalsCreated", id.clone()),
    )
    .await?;
    ctx.store.commit(batch).await?;

    info!(
        "Proposal {} \"{}\" ({}) created in {} by {}",
        id, proposal.name, proposal.kind, proposal.org, proposal.author
    );
    Ok(Effect::None)
}

fn decimal_field(doc: &Fields, key: &str) -> Result<BigDecimal, StoreError> {
    match doc.get(key) {
        None | Some(Value::Null) => Ok(BigDecimal::from(0)),
        Some(Value::String(s)) => BigDecimal::from_str(s)
            .map_err(|e| StoreError::InvalidDocument(format!("{} = {:?}: {}", key, s, e))),
        Some(other) => Err(StoreError::InvalidDocument(format!(
            "{} is not a decimal string: {}",
            key, other
        ))),
    }
}

/// Tally increment for one ballot against the proposal as currently stored.
/// Abstain and unknown support codes leave the tallies alone.
fn tally_update(proposal: &Fields, support: u8, weight: &BigDecimal) -> Result<Option<Update>, StoreError> {
    let (amount_key, count_key) = match support {
        1 => ("inFavor", "votesFor"),
        0 => ("against", "votesAgainst"),
        _ => return Ok(None),
    };

    let amount = decimal_field(proposal, amount_key)? + weight;
    let count = proposal.get(count_key).and_then(Value::as_u64).unwrap_or(0) + 1;
    Ok(Some(
        Update::new()
            .set(amount_key, amount.to_string())
            .set(count_key, count),
    ))
}

/// The ballot, the voter's member record and the tally increment commit in
/// one transaction held on the proposal document.
pub(super) async fn vote_cast(
    ctx: &Context,
    org: Address,
    token: Address,
    log: &Log,
) -> Result<Effect, ReconcileError> {
    let event: VoteCast = decode(log, EventName::VoteCast)?;
    let id = event.proposalId.to_string();
    let voter = event.voter;
    let support = event.support;
    let weight = BigDecimal::from_str(&event.weight.to_string())
        .map_err(|e| ReconcileError::Malformed(format!("vote weight {}: {}", event.weight, e)))?;

    let vote = Vote {
        proposal_id: id.clone(),
        voter: checksum(voter),
        voting_power: event.weight.to_string(),
        option: support,
        reason: event.reason,
        hash: tx_hash(log),
    };

    let mut writes = WriteBatch::new();
    writes.set(ctx.vote_path(org, &id, voter), vote.to_fields()?);
    ctx.upsert_member(
        &mut writes,
        org,
        token,
        voter,
        Update::new().array_union("proposalsVoted", id.clone()),
    )
    .await?;

    let proposal_path = ctx.proposal_path(org, &id);
    let target: DocPath = proposal_path.clone();
    let tally_weight = weight.clone();
    let body: TransactionFn = Box::new(move |current| {
        let mut batch = writes;
        match current {
            Some(proposal) => {
                if let Some(update) = tally_update(&proposal, support, &tally_weight)? {
                    batch.update(target, update);
                }
            }
            None => warn!(proposal = %target, "Proposal not found, recording the vote without a tally"),
        }
        Ok(batch)
    });
    ctx.store.transaction(&proposal_path, body).await?;

    info!(
        "Vote on proposal {} in {} by {}: option {} with weight {}",
        id,
        checksum(org),
        vote.voter,
        support,
        weight
    );
    Ok(Effect::None)
}

pub(super) async fn proposal_queued(ctx: &Context, org: Address, log: &Log) -> Result<Effect, ReconcileError> {
    let event: ProposalQueued = decode(log, EventName::ProposalQueued)?;
    let id = event.proposalId.to_string();

    let mut update = Update::new()
        .set("statusHistory.queued", timestamp(Utc::now()))
        .set("latestStage", stage::QUEUED);
    if !event.etaSeconds.is_zero() {
        update = update.set("executionEta", timestamp(from_unix(event.etaSeconds)));
    }

    ctx.store.update(&ctx.proposal_path(org, &id), update).await?;
    info!("Proposal {} in {} queued", id, checksum(org));
    Ok(Effect::None)
}
