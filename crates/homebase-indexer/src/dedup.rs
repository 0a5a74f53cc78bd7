//! Idempotency filter for the trailing-window poller.
//!
//! Every cycle re-reads the last few blocks, so the same transaction is seen
//! several times. Hashes are grouped by the block they were first seen in;
//! once a block falls behind the window it can never be polled again and
//! its bucket is evicted. Memory is bounded by the window, not by uptime.

use alloy::primitives::B256;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct SeenTransactions {
    by_block: BTreeMap<u64, Vec<B256>>,
    seen: HashMap<B256, u64>,
}

impl SeenTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transaction. Returns true only the first time a hash is offered.
    pub fn first_sighting(&mut self, tx_hash: B256, block: u64) -> bool {
        if self.seen.contains_key(&tx_hash) {
            return false;
        }
        self.seen.insert(tx_hash, block);
        self.by_block.entry(block).or_default().push(tx_hash);
        true
    }

    /// Forget every transaction first seen below `floor`. Returns how many were dropped.
    pub fn evict_below(&mut self, floor: u64) -> usize {
        let kept = self.by_block.split_off(&floor);
        let evicted = std::mem::replace(&mut self.by_block, kept);

        let mut dropped = 0;
        for hash in evicted.into_values().flatten() {
            self.seen.remove(&hash);
            dropped += 1;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }
}
