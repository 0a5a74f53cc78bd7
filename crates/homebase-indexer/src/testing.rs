//! Test doubles: an in-memory chain and log builders.

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use homebase_common::store::MemoryStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::chain::{ChainError, ChainSource, WillSnapshot};
use crate::reconcilers::Context;

pub fn context(chain: Arc<MockChain>, store: Arc<MemoryStore>) -> Context {
    Context::new(chain, store, "daos", "wills")
}

/// A log emitted by `address` carrying `event`
pub fn log_for<E: SolEvent>(address: Address, event: &E, tx_hash: B256, block: u64) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address,
            data: event.encode_log_data(),
        },
        block_number: Some(block),
        transaction_hash: Some(tx_hash),
        ..Default::default()
    }
}

#[derive(Default)]
struct Reads {
    decimals: HashMap<Address, u8>,
    total_supply: HashMap<Address, U256>,
    balances: HashMap<(Address, Address), U256>,
    past_supply: HashMap<(Address, U256), U256>,
    underlying: HashMap<Address, Address>,
    governors: HashMap<Address, (U256, U256, U256, Address)>,
    min_delay: HashMap<Address, U256>,
    wills: HashMap<Address, WillSnapshot>,
}

/// Chain whose reads fail unless a value was configured
#[derive(Default)]
pub struct MockChain {
    head: Mutex<u64>,
    logs: Mutex<Vec<Log>>,
    reads: Mutex<Reads>,
    log_queries: Mutex<Vec<(u64, u64, Vec<Address>)>>,
    offline: AtomicBool,
    reconnects: AtomicUsize,
}

fn missing(what: &str, address: Address) -> ChainError {
    ChainError::Unavailable(format!("no {} configured for {}", what, address))
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_head(&self, block: u64) {
        *self.head.lock().unwrap() = block;
    }

    pub fn push_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    /// Make `block_number` and `logs` fail until back online
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn log_queries(&self) -> Vec<(u64, u64, Vec<Address>)> {
        self.log_queries.lock().unwrap().clone()
    }

    pub fn set_decimals(&self, token: Address, decimals: u8) {
        self.reads.lock().unwrap().decimals.insert(token, decimals);
    }

    pub fn set_total_supply(&self, token: Address, supply: U256) {
        self.reads.lock().unwrap().total_supply.insert(token, supply);
    }

    pub fn set_balance(&self, token: Address, holder: Address, balance: U256) {
        self.reads.lock().unwrap().balances.insert((token, holder), balance);
    }

    pub fn set_past_total_supply(&self, token: Address, timepoint: U256, supply: U256) {
        self.reads
            .lock()
            .unwrap()
            .past_supply
            .insert((token, timepoint), supply);
    }

    pub fn set_underlying(&self, token: Address, underlying: Address) {
        self.reads.lock().unwrap().underlying.insert(token, underlying);
    }

    pub fn set_governor(&self, governor: Address, threshold: U256, delay: U256, period: U256, timelock: Address) {
        self.reads
            .lock()
            .unwrap()
            .governors
            .insert(governor, (threshold, delay, period, timelock));
    }

    pub fn set_min_delay(&self, timelock: Address, delay: U256) {
        self.reads.lock().unwrap().min_delay.insert(timelock, delay);
    }

    pub fn set_will(&self, will: Address, snapshot: WillSnapshot) {
        self.reads.lock().unwrap().wills.insert(will, snapshot);
    }

    pub fn clear_will(&self, will: Address) {
        self.reads.lock().unwrap().wills.remove(&will);
    }

    fn check_online(&self) -> Result<(), ChainError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ChainError::Unavailable("node offline".to_string()));
        }
        Ok(())
    }

    fn governor(&self, governor: Address) -> Result<(U256, U256, U256, Address), ChainError> {
        self.reads
            .lock()
            .unwrap()
            .governors
            .get(&governor)
            .copied()
            .ok_or_else(|| missing("governor", governor))
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.check_online()?;
        Ok(*self.head.lock().unwrap())
    }

    async fn logs(&self, from: u64, to: u64, addresses: &[Address]) -> Result<Vec<Log>, ChainError> {
        self.check_online()?;
        self.log_queries
            .lock()
            .unwrap()
            .push((from, to, addresses.to_vec()));
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                let block = log.block_number.unwrap_or_default();
                block >= from && block <= to && addresses.contains(&log.address())
            })
            .cloned()
            .collect())
    }

    async fn reconnect(&self) -> Result<(), ChainError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.check_online()
    }

    async fn decimals(&self, token: Address) -> Result<u8, ChainError> {
        self.reads
            .lock()
            .unwrap()
            .decimals
            .get(&token)
            .copied()
            .ok_or_else(|| missing("decimals", token))
    }

    async fn total_supply(&self, token: Address) -> Result<U256, ChainError> {
        self.reads
            .lock()
            .unwrap()
            .total_supply
            .get(&token)
            .copied()
            .ok_or_else(|| missing("totalSupply", token))
    }

    async fn balance_of(&self, token: Address, holder: Address) -> Result<U256, ChainError> {
        self.reads
            .lock()
            .unwrap()
            .balances
            .get(&(token, holder))
            .copied()
            .ok_or_else(|| missing("balance", holder))
    }

    async fn past_total_supply(&self, token: Address, timepoint: U256) -> Result<U256, ChainError> {
        self.reads
            .lock()
            .unwrap()
            .past_supply
            .get(&(token, timepoint))
            .copied()
            .ok_or_else(|| missing("past supply", token))
    }

    async fn underlying(&self, token: Address) -> Result<Address, ChainError> {
        self.reads
            .lock()
            .unwrap()
            .underlying
            .get(&token)
            .copied()
            .ok_or_else(|| missing("underlying", token))
    }

    async fn proposal_threshold(&self, governor: Address) -> Result<U256, ChainError> {
        Ok(self.governor(governor)?.0)
    }

    async fn voting_delay(&self, governor: Address) -> Result<U256, ChainError> {
        Ok(self.governor(governor)?.1)
    }

    async fn voting_period(&self, governor: Address) -> Result<U256, ChainError> {
        Ok(self.governor(governor)?.2)
    }

    async fn timelock(&self, governor: Address) -> Result<Address, ChainError> {
        Ok(self.governor(governor)?.3)
    }

    async fn min_delay(&self, timelock: Address) -> Result<U256, ChainError> {
        self.reads
            .lock()
            .unwrap()
            .min_delay
            .get(&timelock)
            .copied()
            .ok_or_else(|| missing("min delay", timelock))
    }

    async fn will_details(&self, will: Address) -> Result<WillSnapshot, ChainError> {
        self.reads
            .lock()
            .unwrap()
            .wills
            .get(&will)
            .cloned()
            .ok_or_else(|| missing("will details", will))
    }
}
