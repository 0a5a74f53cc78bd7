use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use chrono::Utc;
use homebase_common::Org;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{checksum, decode, enrich, to_u64, Context, Effect, ReconcileError};
use crate::contracts::DaoWrappedDeploymentInfo;
use crate::dispatch::EventName;

/// Organization created over an existing token through its voting wrapper.
/// There are no initial members; supply and settings come from read calls,
/// each of which degrades to a zero value on its own.
pub(super) async fn wrapped_deployment(ctx: &Context, log: &Log) -> Result<Effect, ReconcileError> {
    let event: DaoWrappedDeploymentInfo = decode(log, EventName::WrappedDeploymentInfo)?;
    let org = event.daoAddress;
    let token = event.wrappedTokenAddress;
    let chain = &ctx.chain;

    let decimals = enrich("decimals", token, chain.decimals(token), 18).await;
    let total_supply = enrich("totalSupply", token, chain.total_supply(token), U256::ZERO).await;
    let underlying = match chain.underlying(token).await {
        Ok(address) => Some(checksum(address)),
        Err(e) => {
            warn!(address = %token, "underlying failed, storing none: {}", e);
            None
        }
    };

    let threshold = enrich("proposalThreshold", org, chain.proposal_threshold(org), U256::ZERO).await;
    let voting_delay = enrich("votingDelay", org, chain.voting_delay(org), U256::ZERO).await;
    let voting_period = enrich("votingPeriod", org, chain.voting_period(org), U256::ZERO).await;
    let timelock = enrich("timelock", org, chain.timelock(org), Address::ZERO).await;
    let execution_delay = if timelock.is_zero() {
        U256::ZERO
    } else {
        enrich("getMinDelay", timelock, chain.min_delay(timelock), U256::ZERO).await
    };

    let document = Org {
        name: event.daoName,
        symbol: event.wrappedTokenSymbol,
        description: event.description,
        address: checksum(org),
        token: checksum(token),
        registry_address: checksum(event.registryAddress),
        underlying_token: underlying,
        decimals,
        total_supply: total_supply.to_string(),
        registry: BTreeMap::new(),
        voting_delay: to_u64(voting_delay),
        voting_duration: to_u64(voting_period),
        proposal_threshold: threshold.to_string(),
        quorum: u64::from(event.quorumFraction),
        execution_delay: to_u64(execution_delay),
        holders: 0,
        creation_date: Utc::now(),
    };
    ctx.store.set(&ctx.org_path(org), document.to_fields()?).await?;
    info!(
        "Wrapped organization {} ({}) created over token {}",
        document.name, document.address, document.token
    );

    Ok(Effect::OrganizationDeployed { org, token })
}
