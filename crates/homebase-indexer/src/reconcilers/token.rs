use alloy::primitives::Address;
use alloy::rpc::types::Log;
use homebase_common::store::{Update, WriteBatch};
use tracing::info;

use super::{checksum, decode, Context, Effect, ReconcileError};
use crate::contracts::DelegateChanged;
use crate::dispatch::EventName;

/// Delegation moves the delegator between constituent lists. The
/// delegator, new delegate and previous delegate change in one batch.
pub(super) async fn delegate_changed(
    ctx: &Context,
    org: Address,
    token: Address,
    log: &Log,
) -> Result<Effect, ReconcileError> {
    let event: DelegateChanged = decode(log, EventName::DelegateChanged)?;
    let delegator = event.delegator;
    let from = event.fromDelegate;
    let to = event.toDelegate;
    let delegator_id = checksum(delegator);

    let mut batch = WriteBatch::new();
    let delegate_field = if to.is_zero() { String::new() } else { checksum(to) };
    ctx.upsert_member(
        &mut batch,
        org,
        token,
        delegator,
        Update::new().set("delegate", delegate_field),
    )
    .await?;

    if !to.is_zero() && to != delegator {
        ctx.upsert_member(
            &mut batch,
            org,
            token,
            to,
            Update::new().array_union("constituents", delegator_id.clone()),
        )
        .await?;
    }

    if !from.is_zero() && from != delegator && from != to {
        let previous = ctx.member_path(org, from);
        // nothing to remove from a delegate the indexer never recorded
        if ctx.store.exists(&previous).await? {
            batch.update(previous, Update::new().array_remove("constituents", delegator_id.clone()));
        }
    }

    ctx.store.commit(batch).await?;
    info!(
        "{} delegated from {} to {} in {}",
        delegator_id,
        from,
        to,
        checksum(org)
    );
    Ok(Effect::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcilers::{ContractKind, Paper};
    use crate::testing::{context, log_for, MockChain};
    use alloy::primitives::{B256, U256};
    use homebase_common::store::{DocumentStore, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    const ORG: Address = Address::repeat_byte(0xd0);
    const TOKEN: Address = Address::repeat_byte(0x70);

    fn token_paper() -> Paper {
        Paper {
            address: TOKEN,
            kind: ContractKind::GovernanceToken { org: ORG },
        }
    }

    async fn delegate(ctx: &Context, delegator: Address, from: Address, to: Address, tx: u8) {
        let event = DelegateChanged {
            delegator,
            fromDelegate: from,
            toDelegate: to,
        };
        let log = log_for(TOKEN, &event, B256::with_last_byte(tx), 20);
        token_paper()
            .handle(ctx, EventName::DelegateChanged, &log)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delegate_then_undelegate() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        let ctx = context(chain.clone(), store.clone());
        let d = Address::repeat_byte(0x0d);
        let t = Address::repeat_byte(0x0e);
        chain.set_balance(TOKEN, d, U256::from(40));

        delegate(&ctx, d, Address::ZERO, t, 1).await;
        let delegator = store.get(&ctx.member_path(ORG, d)).await.unwrap().unwrap();
        let target = store.get(&ctx.member_path(ORG, t)).await.unwrap().unwrap();
        assert_eq!(delegator["delegate"], checksum(t));
        assert_eq!(delegator["personalBalance"], "40");
        assert_eq!(target["constituents"], json!([checksum(d)]));
        // balance read failed for the delegate, so it starts at zero
        assert_eq!(target["personalBalance"], "0");

        delegate(&ctx, d, t, Address::ZERO, 2).await;
        let delegator = store.get(&ctx.member_path(ORG, d)).await.unwrap().unwrap();
        let target = store.get(&ctx.member_path(ORG, t)).await.unwrap().unwrap();
        assert_eq!(delegator["delegate"], "");
        assert_eq!(target["constituents"], json!([]));
    }

    #[tokio::test]
    async fn test_self_delegation_adds_no_constituent() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        let ctx = context(chain, store.clone());
        let d = Address::repeat_byte(0x0d);

        delegate(&ctx, d, Address::ZERO, d, 1).await;
        let member = store.get(&ctx.member_path(ORG, d)).await.unwrap().unwrap();
        assert_eq!(member["delegate"], checksum(d));
        assert_eq!(member["constituents"], json!([]));
        assert_eq!(store.count(ctx.member_path(ORG, d).collection()).await, 1);
    }

    #[tokio::test]
    async fn test_redelegation_moves_constituent() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        let ctx = context(chain, store.clone());
        let d = Address::repeat_byte(0x0d);
        let first = Address::repeat_byte(0x01);
        let second = Address::repeat_byte(0x02);

        delegate(&ctx, d, Address::ZERO, first, 1).await;
        delegate(&ctx, d, first, second, 2).await;

        let first_doc = store.get(&ctx.member_path(ORG, first)).await.unwrap().unwrap();
        let second_doc = store.get(&ctx.member_path(ORG, second)).await.unwrap().unwrap();
        assert_eq!(first_doc["constituents"], json!([]));
        assert_eq!(second_doc["constituents"], json!([checksum(d)]));
    }

    #[tokio::test]
    async fn test_unknown_previous_delegate_is_skipped() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        let ctx = context(chain, store.clone());
        let d = Address::repeat_byte(0x0d);
        let ghost = Address::repeat_byte(0x99);

        delegate(&ctx, d, ghost, Address::ZERO, 1).await;
        assert!(store.get(&ctx.member_path(ORG, ghost)).await.unwrap().is_none());
        let member = store.get(&ctx.member_path(ORG, d)).await.unwrap().unwrap();
        assert_eq!(member["delegate"], "");
    }
}
