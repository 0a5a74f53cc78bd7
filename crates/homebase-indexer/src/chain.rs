//! Chain access: log queries and the read-only calls used to enrich documents.

use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use alloy::transports::http::reqwest::Url;
use alloy::transports::TransportError;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::contracts::{IGovernor, ITimelock, IVotesToken, IWill};

type SharedRateLimiter = Arc<RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>>;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Transport(#[from] TransportError),

    #[error("Contract call failed: {0}")]
    Call(#[from] alloy::contract::Error),

    #[error("Invalid RPC endpoint {0}")]
    InvalidEndpoint(String),

    #[error("Chain unavailable: {0}")]
    Unavailable(String),
}

/// The fields of `getWillDetails()` the indexer stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillSnapshot {
    pub owner: Address,
    pub interval: U256,
    pub last_update: U256,
    pub executed: bool,
}

#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Logs emitted by any of `addresses` in `[from, to]`, both inclusive
    async fn logs(&self, from: u64, to: u64, addresses: &[Address]) -> Result<Vec<Log>, ChainError>;

    /// Replace the connection after a failure
    async fn reconnect(&self) -> Result<(), ChainError>;

    async fn decimals(&self, token: Address) -> Result<u8, ChainError>;

    async fn total_supply(&self, token: Address) -> Result<U256, ChainError>;

    async fn balance_of(&self, token: Address, holder: Address) -> Result<U256, ChainError>;

    async fn past_total_supply(&self, token: Address, timepoint: U256) -> Result<U256, ChainError>;

    /// Token wrapped by an ERC20Wrapper
    async fn underlying(&self, token: Address) -> Result<Address, ChainError>;

    async fn proposal_threshold(&self, governor: Address) -> Result<U256, ChainError>;

    async fn voting_delay(&self, governor: Address) -> Result<U256, ChainError>;

    async fn voting_period(&self, governor: Address) -> Result<U256, ChainError>;

    async fn timelock(&self, governor: Address) -> Result<Address, ChainError>;

    async fn min_delay(&self, timelock: Address) -> Result<U256, ChainError>;

    async fn will_details(&self, will: Address) -> Result<WillSnapshot, ChainError>;
}

/// [`ChainSource`] over an alloy HTTP provider. Every request waits on a
/// shared rate limiter first.
pub struct AlloyChain {
    url: Url,
    provider: RwLock<DynProvider>,
    rate_limiter: SharedRateLimiter,
}

impl AlloyChain {
    pub fn new(rpc_url: &str, requests_per_second: u32) -> Result<Self, ChainError> {
        let url: Url = rpc_url
            .parse()
            .map_err(|e| ChainError::InvalidEndpoint(format!("{}: {}", rpc_url, e)))?;
        let provider = ProviderBuilder::new().connect_http(url.clone()).erased();
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            url,
            provider: RwLock::new(provider),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    async fn provider(&self) -> DynProvider {
        self.rate_limiter.until_ready().await;
        self.provider.read().await.clone()
    }
}

#[async_trait]
impl ChainSource for AlloyChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.provider().await.get_block_number().await?)
    }

    async fn logs(&self, from: u64, to: u64, addresses: &[Address]) -> Result<Vec<Log>, ChainError> {
        let filter = Filter::new()
            .address(addresses.to_vec())
            .from_block(from)
            .to_block(to);
        Ok(self.provider().await.get_logs(&filter).await?)
    }

    async fn reconnect(&self) -> Result<(), ChainError> {
        let fresh = ProviderBuilder::new().connect_http(self.url.clone()).erased();
        self.rate_limiter.until_ready().await;
        let head = fresh
            .get_block_number()
            .await
            .map_err(|e| ChainError::Unavailable(format!("{} did not answer: {}", self.url, e)))?;
        *self.provider.write().await = fresh;
        tracing::info!("Reconnected to {} at block {}", self.url, head);
        Ok(())
    }

    async fn decimals(&self, token: Address) -> Result<u8, ChainError> {
        let provider = self.provider().await;
        Ok(IVotesToken::new(token, provider).decimals().call().await?)
    }

    async fn total_supply(&self, token: Address) -> Result<U256, ChainError> {
        let provider = self.provider().await;
        Ok(IVotesToken::new(token, provider).totalSupply().call().await?)
    }

    async fn balance_of(&self, token: Address, holder: Address) -> Result<U256, ChainError> {
        let provider = self.provider().await;
        Ok(IVotesToken::new(token, provider).balanceOf(holder).call().await?)
    }

    async fn past_total_supply(&self, token: Address, timepoint: U256) -> Result<U256, ChainError> {
        let provider = self.provider().await;
        Ok(IVotesToken::new(token, provider)
            .getPastTotalSupply(timepoint)
            .call()
            .await?)
    }

    async fn underlying(&self, token: Address) -> Result<Address, ChainError> {
        let provider = self.provider().await;
        Ok(IVotesToken::new(token, provider).underlying().call().await?)
    }

    async fn proposal_threshold(&self, governor: Address) -> Result<U256, ChainError> {
        let provider = self.provider().await;
        Ok(IGovernor::new(governor, provider).proposalThreshold().call().await?)
    }

    async fn voting_delay(&self, governor: Address) -> Result<U256, ChainError> {
        let provider = self.provider().await;
        Ok(IGovernor::new(governor, provider).votingDelay().call().await?)
    }

    async fn voting_period(&self, governor: Address) -> Result<U256, ChainError> {
        let provider = self.provider().await;
        Ok(IGovernor::new(governor, provider).votingPeriod().call().await?)
    }

    async fn timelock(&self, governor: Address) -> Result<Address, ChainError> {
        let provider = self.provider().await;
        Ok(IGovernor::new(governor, provider).timelock().call().await?)
    }

    async fn min_delay(&self, timelock: Address) -> Result<U256, ChainError> {
        let provider = self.provider().await;
        Ok(ITimelock::new(timelock, provider).getMinDelay().call().await?)
    }

    async fn will_details(&self, will: Address) -> Result<WillSnapshot, ChainError> {
        let provider = self.provider().await;
        let details = IWill::new(will, provider).getWillDetails().call().await?;
        Ok(WillSnapshot {
            owner: details.owner,
            interval: details.interval,
            last_update: details.lastUpdate,
            executed: details.executed,
        })
    }
}
