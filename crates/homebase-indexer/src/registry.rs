//! Address → reconciler registry and the watch set the poller reads.

use alloy::primitives::Address;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::reconcilers::{ContractKind, Effect, Paper};

/// Registry shared by the poller and every worker. Chain and store calls
/// never happen while the lock is held.
pub type SharedRegistry = Arc<Mutex<Registry>>;

/// Ordered set of polled addresses. Order only matters for log output.
#[derive(Debug, Default)]
pub struct WatchSet {
    order: Vec<Address>,
    members: HashSet<Address>,
}

impl WatchSet {
    pub fn insert(&mut self, address: Address) -> bool {
        if !self.members.insert(address) {
            return false;
        }
        self.order.push(address);
        true
    }

    pub fn remove(&mut self, address: &Address) -> bool {
        if !self.members.remove(address) {
            return false;
        }
        self.order.retain(|a| a != address);
        true
    }

    pub fn to_vec(&self) -> Vec<Address> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}

/// Reconcilers live in an arena and are never removed; the address index
/// points into it.
#[derive(Debug, Default)]
pub struct Registry {
    papers: Vec<Arc<Paper>>,
    index: HashMap<Address, usize>,
    watch: WatchSet,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reconciler. An address that is already registered keeps
    /// its existing reconciler.
    pub fn register(&mut self, address: Address, kind: ContractKind) -> Arc<Paper> {
        if let Some(&slot) = self.index.get(&address) {
            return self.papers[slot].clone();
        }
        let paper = Arc::new(Paper { address, kind });
        self.index.insert(address, self.papers.len());
        self.papers.push(paper.clone());
        paper
    }

    /// Register and start polling. Returns true when the address was not watched before.
    pub fn track(&mut self, address: Address, kind: ContractKind) -> bool {
        self.register(address, kind);
        self.watch.insert(address)
    }

    pub fn lookup(&self, address: &Address) -> Option<Arc<Paper>> {
        self.index.get(address).map(|&slot| self.papers[slot].clone())
    }

    pub fn unwatch(&mut self, address: &Address) -> bool {
        self.watch.remove(address)
    }

    /// Snapshot of the watch set for one poll cycle
    pub fn watch_list(&self) -> Vec<Address> {
        self.watch.to_vec()
    }

    pub fn watched(&self) -> usize {
        self.watch.len()
    }

    pub fn len(&self) -> usize {
        self.papers.len()
    }

    /// Apply what a reconciler reported. Returns true when the watch set changed.
    pub fn apply(&mut self, effect: &Effect) -> bool {
        match *effect {
            Effect::None => false,
            Effect::OrganizationDeployed { org, token } => {
                // token first: the organization's reconciler refers to it
                let token_added = self.track(token, ContractKind::GovernanceToken { org });
                let org_added = self.track(org, ContractKind::Organization { token });
                token_added || org_added
            }
            Effect::WillDeployed(will) => self.track(will, ContractKind::Will),
            Effect::WillRetired(will) => self.unwatch(&will),
        }
    }
}
