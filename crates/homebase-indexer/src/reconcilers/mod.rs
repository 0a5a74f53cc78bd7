//! Reconcilers ("papers"): one per watched contract, translating its events
//! into document writes.

use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use chrono::{DateTime, SecondsFormat, Utc};
use homebase_common::store::{DocPath, DocumentStore, Update, WriteBatch};
use homebase_common::{Member, StoreError};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::chain::{ChainError, ChainSource};
use crate::dispatch::EventName;

mod execution;
mod factory;
mod organization;
mod token;
mod will;
mod wrapped;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Failed to decode {event} log: {source}")]
    Decode {
        event: EventName,
        #[source]
        source: alloy::sol_types::Error,
    },

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Document not found: {0}")]
    MissingDocument(String),

    #[error("Malformed value: {0}")]
    Malformed(String),
}

/// Role a watched contract plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractKind {
    /// Factory deploying token-based organizations
    RootFactory,
    /// Factory deploying organizations over a wrapped existing token
    WrappedRootFactory,
    GovernanceToken { org: Address },
    Organization { token: Address },
    WillFactory,
    Will,
}

/// What a handled event means for the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    OrganizationDeployed { org: Address, token: Address },
    WillDeployed(Address),
    /// The will is gone; stop polling it
    WillRetired(Address),
}

#[derive(Debug)]
pub struct Paper {
    pub address: Address,
    pub kind: ContractKind,
}

/// Everything a reconciler touches
pub struct Context {
    pub chain: Arc<dyn ChainSource>,
    pub store: Arc<dyn DocumentStore>,
    daos: String,
    wills: String,
}

impl Context {
    pub fn new(
        chain: Arc<dyn ChainSource>,
        store: Arc<dyn DocumentStore>,
        daos: impl Into<String>,
        wills: impl Into<String>,
    ) -> Self {
        Self {
            chain,
            store,
            daos: daos.into(),
            wills: wills.into(),
        }
    }

    pub fn org_path(&self, org: Address) -> DocPath {
        DocPath::new(&self.daos, checksum(org))
    }

    pub fn member_path(&self, org: Address, member: Address) -> DocPath {
        self.org_path(org).child("members", checksum(member))
    }

    pub fn proposal_path(&self, org: Address, proposal_id: &str) -> DocPath {
        self.org_path(org).child("proposals", proposal_id)
    }

    pub fn vote_path(&self, org: Address, proposal_id: &str, voter: Address) -> DocPath {
        self.proposal_path(org, proposal_id).child("votes", checksum(voter))
    }

    pub fn will_path(&self, will: Address) -> DocPath {
        DocPath::new(&self.wills, checksum(will))
    }

    /// Queue `update` against the member, creating it first when absent.
    /// The existence check only decides whether a balance read is needed;
    /// creation is an upsert resolved by the store under its write lock,
    /// so two first interactions of one member both land.
    pub(crate) async fn upsert_member(
        &self,
        batch: &mut WriteBatch,
        org: Address,
        token: Address,
        member: Address,
        update: Update,
    ) -> Result<(), ReconcileError> {
        let path = self.member_path(org, member);
        if self.store.exists(&path).await? {
            batch.update(path, update);
            return Ok(());
        }

        let balance = enrich(
            "balanceOf",
            token,
            self.chain.balance_of(token, member),
            U256::ZERO,
        )
        .await;
        let defaults = Member::new(checksum(member), balance.to_string()).to_fields()?;
        batch.upsert(path, defaults, update);
        Ok(())
    }
}

impl Paper {
    /// Route one event to the behaviour for this contract's kind.
    pub async fn handle(&self, ctx: &Context, event: EventName, log: &Log) -> Result<Effect, ReconcileError> {
        match (self.kind, event) {
            (ContractKind::RootFactory, EventName::OrganizationCreated) => {
                factory::organization_created(ctx, log).await
            }
            (ContractKind::WrappedRootFactory, EventName::WrappedDeploymentInfo) => {
                wrapped::wrapped_deployment(ctx, log).await
            }
            (ContractKind::GovernanceToken { org }, EventName::DelegateChanged) => {
                token::delegate_changed(ctx, org, self.address, log).await
            }
            (ContractKind::Organization { token }, EventName::ProposalCreated) => {
                organization::proposal_created(ctx, self.address, token, log).await
            }
            (ContractKind::Organization { token }, EventName::VoteCast) => {
                organization::vote_cast(ctx, self.address, token, log).await
            }
            (ContractKind::Organization { .. }, EventName::ProposalQueued) => {
                organization::proposal_queued(ctx, self.address, log).await
            }
            (ContractKind::Organization { token }, EventName::ProposalExecuted) => {
                execution::proposal_executed(ctx, self.address, token, log).await
            }
            (ContractKind::WillFactory, EventName::WillCreated) => will::will_created(ctx, log).await,
            (ContractKind::Will, EventName::Ping) => will::ping(ctx, self.address, log).await,
            (ContractKind::Will, EventName::Executed) => will::executed(ctx, self.address).await,
            (ContractKind::Will, EventName::Cancelled) => will::cancelled(ctx, self.address).await,

            (kind, event) => {
                tracing::debug!(address = %self.address, ?kind, %event, "Event not handled for this contract kind");
                Ok(Effect::None)
            }
        }
    }
}

pub fn checksum(address: Address) -> String {
    address.to_checksum(None)
}

pub(crate) fn decode<E: SolEvent>(log: &Log, event: EventName) -> Result<E, ReconcileError> {
    E::decode_log_data(log.data()).map_err(|source| ReconcileError::Decode { event, source })
}

/// Await an enrichment read, falling back to `default` when it fails.
pub(crate) async fn enrich<T, F>(what: &str, address: Address, call: F, default: T) -> T
where
    F: Future<Output = Result<T, ChainError>>,
{
    match call.await {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(address = %address, "{} failed, using default: {}", what, e);
            default
        }
    }
}

/// Saturating conversion for on-chain counters stored as integers
pub(crate) fn to_u64(value: U256) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

pub(crate) fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Unix seconds from the chain as a UTC timestamp
pub(crate) fn from_unix(seconds: U256) -> DateTime<Utc> {
    i64::try_from(seconds)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_default()
}

pub(crate) fn tx_hash(log: &Log) -> String {
    log.transaction_hash.map(|hash| hash.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let ctx = crate::testing::context(
            Arc::new(crate::testing::MockChain::new()),
            Arc::new(homebase_common::store::MemoryStore::new()),
        );
        let org = Address::repeat_byte(0x11);
        let voter = Address::repeat_byte(0x22);
        let path = ctx.vote_path(org, "42", voter);
        assert_eq!(
            path.collection(),
            format!("daos/{}/proposals/42/votes", checksum(org))
        );
        assert_eq!(path.id(), checksum(voter));
    }

    #[tokio::test]
    async fn test_member_created_before_commit_keeps_both_updates() {
        use homebase_common::store::MemoryStore;
        use serde_json::json;

        let chain = Arc::new(crate::testing::MockChain::new());
        let store = Arc::new(MemoryStore::new());
        let ctx = crate::testing::context(chain.clone(), store.clone());
        let org = Address::repeat_byte(0x11);
        let token = Address::repeat_byte(0x12);
        let voter = Address::repeat_byte(0x22);
        chain.set_balance(token, voter, U256::from(40));

        let mut batch = WriteBatch::new();
        ctx.upsert_member(
            &mut batch,
            org,
            token,
            voter,
            Update::new().array_union("proposalsVoted", "1"),
        )
        .await
        .unwrap();

        // another worker creates the member while this batch is pending
        let mut created = Member::new(checksum(voter), "40").to_fields().unwrap();
        Update::new().array_union("proposalsVoted", "2").apply_to(&mut created);
        store.set(&ctx.member_path(org, voter), created).await.unwrap();

        store.commit(batch).await.unwrap();
        let member = store.get(&ctx.member_path(org, voter)).await.unwrap().unwrap();
        assert_eq!(member["proposalsVoted"], json!(["2", "1"]));
        assert_eq!(member["personalBalance"], "40");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_interactions_of_one_member() {
        use homebase_common::store::MemoryStore;

        let store = Arc::new(MemoryStore::new());
        let ctx = Arc::new(crate::testing::context(
            Arc::new(crate::testing::MockChain::new()),
            store.clone(),
        ));
        let org = Address::repeat_byte(0x11);
        let voter = Address::repeat_byte(0x22);

        let mut handles = Vec::new();
        for proposal in 0..30 {
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                let mut batch = WriteBatch::new();
                ctx.upsert_member(
                    &mut batch,
                    org,
                    Address::repeat_byte(0x12),
                    voter,
                    Update::new().array_union("proposalsVoted", proposal.to_string()),
                )
                .await
                .unwrap();
                ctx.store.commit(batch).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let member = store.get(&ctx.member_path(org, voter)).await.unwrap().unwrap();
        assert_eq!(member["proposalsVoted"].as_array().unwrap().len(), 30);
    }

    #[test]
    fn test_from_unix() {
        assert_eq!(from_unix(U256::from(0)).timestamp(), 0);
        assert_eq!(from_unix(U256::from(86_400)).to_rfc3339(), "1970-01-02T00:00:00+00:00");
        assert_eq!(from_unix(U256::MAX), DateTime::<Utc>::default());
    }

    #[test]
    fn test_to_u64_saturates() {
        assert_eq!(to_u64(U256::from(7)), 7);
        assert_eq!(to_u64(U256::MAX), u64::MAX);
    }
}
