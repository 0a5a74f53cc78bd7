use alloy::primitives::{keccak256, B256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use std::collections::HashMap;
use std::fmt;

use crate::contracts::{
    Cancelled, DaoWrappedDeploymentInfo, DelegateChanged, Executed, NewDaoCreated, Ping,
    ProposalCreated, ProposalExecuted, ProposalQueued, VoteCast, WillCreated,
};

/// Every event the indexer reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    OrganizationCreated,
    WrappedDeploymentInfo,
    DelegateChanged,
    ProposalCreated,
    VoteCast,
    ProposalQueued,
    ProposalExecuted,
    WillCreated,
    Ping,
    Executed,
    Cancelled,
}

impl EventName {
    pub const ALL: [EventName; 11] = [
        EventName::OrganizationCreated,
        EventName::WrappedDeploymentInfo,
        EventName::DelegateChanged,
        EventName::ProposalCreated,
        EventName::VoteCast,
        EventName::ProposalQueued,
        EventName::ProposalExecuted,
        EventName::WillCreated,
        EventName::Ping,
        EventName::Executed,
        EventName::Cancelled,
    ];

    /// Canonical Solidity signature, e.g. `ProposalExecuted(uint256)`
    pub fn signature(self) -> &'static str {
        match self {
            EventName::OrganizationCreated => NewDaoCreated::SIGNATURE,
            EventName::WrappedDeploymentInfo => DaoWrappedDeploymentInfo::SIGNATURE,
            EventName::DelegateChanged => DelegateChanged::SIGNATURE,
            EventName::ProposalCreated => ProposalCreated::SIGNATURE,
            EventName::VoteCast => VoteCast::SIGNATURE,
            EventName::ProposalQueued => ProposalQueued::SIGNATURE,
            EventName::ProposalExecuted => ProposalExecuted::SIGNATURE,
            EventName::WillCreated => WillCreated::SIGNATURE,
            EventName::Ping => Ping::SIGNATURE,
            EventName::Executed => Executed::SIGNATURE,
            EventName::Cancelled => Cancelled::SIGNATURE,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// topic0 → event name, computed once at startup and never mutated.
pub struct EventTable {
    by_topic: HashMap<B256, EventName>,
}

impl EventTable {
    pub fn new() -> Self {
        let by_topic = EventName::ALL
            .iter()
            .map(|&name| (keccak256(name.signature()), name))
            .collect();
        Self { by_topic }
    }

    /// Name of the event a log carries, `None` for anything the indexer ignores
    pub fn resolve(&self, log: &Log) -> Option<EventName> {
        log.topics().first().and_then(|topic| self.by_topic.get(topic).copied())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&B256, &EventName)> {
        self.by_topic.iter()
    }
}

impl Default for EventTable {
    fn default() -> Self {
        Self::new()
    }
}
