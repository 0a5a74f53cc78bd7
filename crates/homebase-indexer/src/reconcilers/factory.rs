use alloy::primitives::U256;
use alloy::rpc::types::Log;
use chrono::Utc;
use homebase_common::store::WriteBatch;
use homebase_common::{Member, Org};
use std::collections::BTreeMap;
use tracing::info;

use super::{checksum, decode, enrich, to_u64, Context, Effect, ReconcileError};
use crate::contracts::NewDaoCreated;
use crate::dispatch::EventName;

/// Governance settings appended after the member balances in `initialAmounts`
#[derive(Debug, Default, PartialEq, Eq)]
struct Settings {
    voting_delay: u64,
    voting_duration: u64,
    proposal_threshold: U256,
    quorum: u64,
}

fn trailing_settings(amounts: &[U256], members: usize) -> Settings {
    if amounts.len() < members + 4 {
        return Settings::default();
    }
    let tail = &amounts[amounts.len() - 4..];
    Settings {
        voting_delay: to_u64(tail[0]),
        voting_duration: to_u64(tail[1]),
        proposal_threshold: tail[2],
        quorum: to_u64(tail[3]),
    }
}

/// Registry entries from parallel key/value arrays. Mismatched arrays are
/// ignored entirely; entries with an empty key or value are skipped.
fn registry_entries(keys: &[String], values: &[String]) -> BTreeMap<String, String> {
    if keys.len() != values.len() {
        return BTreeMap::new();
    }
    keys.iter()
        .zip(values)
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub(super) async fn organization_created(ctx: &Context, log: &Log) -> Result<Effect, ReconcileError> {
    let event: NewDaoCreated = decode(log, EventName::OrganizationCreated)?;
    let org = event.dao;
    let token = event.token;

    let decimals = enrich("decimals", token, ctx.chain.decimals(token), 18).await;

    let mut batch = WriteBatch::new();
    let mut total_supply = U256::ZERO;
    for (member, amount) in event.initialMembers.iter().zip(&event.initialAmounts) {
        total_supply = total_supply.saturating_add(*amount);
        batch.set(
            ctx.member_path(org, *member),
            Member::new(checksum(*member), amount.to_string()).to_fields()?,
        );
    }

    let settings = trailing_settings(&event.initialAmounts, event.initialMembers.len());
    let document = Org {
        name: event.name,
        symbol: event.symbol,
        description: event.description,
        address: checksum(org),
        token: checksum(token),
        registry_address: checksum(event.registry),
        underlying_token: None,
        decimals,
        total_supply: total_supply.to_string(),
        registry: registry_entries(&event.keys, &event.values),
        voting_delay: settings.voting_delay,
        voting_duration: settings.voting_duration,
        proposal_threshold: settings.proposal_threshold.to_string(),
        quorum: settings.quorum,
        execution_delay: to_u64(event.executionDelay),
        holders: event.initialMembers.len() as u64,
        creation_date: Utc::now(),
    };
    batch.set(ctx.org_path(org), document.to_fields()?);

    ctx.store.commit(batch).await?;
    info!(
        "Organization {} ({}) created with {} members, token {}",
        document.name,
        document.address,
        document.holders,
        document.token
    );

    Ok(Effect::OrganizationDeployed { org, token })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcilers::{ContractKind, Paper};
    use crate::testing::{context, log_for, MockChain};
    use alloy::primitives::{Address, B256};
    use homebase_common::store::{DocumentStore, MemoryStore};
    use std::sync::Arc;

    fn amounts(values: &[u64]) -> Vec<U256> {
        values.iter().map(|&v| U256::from(v)).collect()
    }

    fn creation_event(members: Vec<Address>, initial_amounts: Vec<U256>) -> NewDaoCreated {
        NewDaoCreated {
            dao: Address::repeat_byte(0xd0),
            token: Address::repeat_byte(0x70),
            initialMembers: members,
            initialAmounts: initial_amounts,
            name: "Commons".into(),
            symbol: "CMN".into(),
            description: "A test organization".into(),
            executionDelay: U256::from(60),
            registry: Address::repeat_byte(0x5e),
            keys: vec!["website".into(), "".into()],
            values: vec!["https://commons.example".into(), "orphan".into()],
        }
    }

    #[test]
    fn test_trailing_settings() {
        let settings = trailing_settings(&amounts(&[100, 200, 10, 50, 5, 3]), 2);
        assert_eq!(
            settings,
            Settings {
                voting_delay: 10,
                voting_duration: 50,
                proposal_threshold: U256::from(5),
                quorum: 3,
            }
        );
        assert_eq!(trailing_settings(&amounts(&[100, 200, 10]), 2), Settings::default());
    }

    #[test]
    fn test_registry_entries() {
        let keys = vec!["a".to_string(), "".to_string(), "c".to_string()];
        let values = vec!["1".to_string(), "2".to_string(), "".to_string()];
        let entries = registry_entries(&keys, &values);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["a"], "1");
        assert!(registry_entries(&keys, &values[..2]).is_empty());
    }

    #[tokio::test]
    async fn test_organization_created_scenario() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        let ctx = context(chain.clone(), store.clone());

        let a = Address::repeat_byte(0xaa);
        let b = Address::repeat_byte(0xbb);
        let event = creation_event(vec![a, b], amounts(&[100, 200, 10, 50, 5, 3]));
        chain.set_decimals(event.token, 6);

        let factory = Paper {
            address: Address::repeat_byte(0xfa),
            kind: ContractKind::RootFactory,
        };
        let log = log_for(factory.address, &event, B256::with_last_byte(1), 10);
        let effect = factory
            .handle(&ctx, EventName::OrganizationCreated, &log)
            .await
            .unwrap();
        assert_eq!(
            effect,
            Effect::OrganizationDeployed {
                org: event.dao,
                token: event.token
            }
        );

        let org = store.get(&ctx.org_path(event.dao)).await.unwrap().unwrap();
        assert_eq!(org["totalSupply"], "300");
        assert_eq!(org["votingDelay"], 10);
        assert_eq!(org["votingDuration"], 50);
        assert_eq!(org["proposalThreshold"], "5");
        assert_eq!(org["quorum"], 3);
        assert_eq!(org["decimals"], 6);
        assert_eq!(org["holders"], 2);
        assert_eq!(org["executionDelay"], 60);
        assert_eq!(org["registry"]["website"], "https://commons.example");
        assert_eq!(org["registry"].as_object().unwrap().len(), 1);

        let member_a = store.get(&ctx.member_path(event.dao, a)).await.unwrap().unwrap();
        let member_b = store.get(&ctx.member_path(event.dao, b)).await.unwrap().unwrap();
        assert_eq!(member_a["personalBalance"], "100");
        assert_eq!(member_b["personalBalance"], "200");
        assert_eq!(member_b["delegate"], "");
    }

    #[tokio::test]
    async fn test_decimals_failure_defaults_to_18() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        let ctx = context(chain, store.clone());

        let event = creation_event(vec![Address::repeat_byte(0xaa)], amounts(&[100]));
        let log = log_for(Address::repeat_byte(0xfa), &event, B256::with_last_byte(1), 10);
        organization_created(&ctx, &log).await.unwrap();

        let org = store.get(&ctx.org_path(event.dao)).await.unwrap().unwrap();
        assert_eq!(org["decimals"], 18);
        assert_eq!(org["totalSupply"], "100");
        assert_eq!(org["votingDelay"], 0);
        assert_eq!(org["proposalThreshold"], "0");
    }

    #[tokio::test]
    async fn test_malformed_payload_is_a_decode_error() {
        let ctx = context(Arc::new(MockChain::new()), Arc::new(MemoryStore::new()));
        let event = crate::contracts::ProposalExecuted {
            proposalId: U256::from(1),
        };
        // right topic, wrong body
        let mut log = log_for(Address::repeat_byte(0xfa), &event, B256::with_last_byte(1), 10);
        log.inner.data = alloy::primitives::LogData::new_unchecked(
            vec![<NewDaoCreated as alloy::sol_types::SolEvent>::SIGNATURE_HASH],
            log.inner.data.data.clone(),
        );
        let err = organization_created(&ctx, &log).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Decode {
                event: EventName::OrganizationCreated,
                ..
            }
        ));
    }
}
