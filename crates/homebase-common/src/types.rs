use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::store::{to_fields, Fields};
use crate::StoreError;

// =====================
// Governance (homebase)
// =====================

/// Governed organization as stored at `<daos>/<address>`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Org {
    pub name: String,
    pub symbol: String,
    pub description: String,
    pub address: String,
    /// Governance token address
    pub token: String,
    pub registry_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying_token: Option<String>,
    pub decimals: u8,
    pub total_supply: String,
    #[serde(default)]
    pub registry: BTreeMap<String, String>,
    pub voting_delay: u64,
    pub voting_duration: u64,
    pub proposal_threshold: String,
    pub quorum: u64,
    pub execution_delay: u64,
    pub holders: u64,
    pub creation_date: DateTime<Utc>,
}

/// Per-organization participant as stored at `<daos>/<org>/members/<address>`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub address: String,
    pub personal_balance: String,
    /// Empty when the member has no delegate
    pub delegate: String,
    pub voting_weight: String,
    #[serde(default)]
    pub proposals_created: Vec<String>,
    #[serde(default)]
    pub proposals_voted: Vec<String>,
    #[serde(default)]
    pub constituents: Vec<String>,
}

impl Member {
    pub fn new(address: impl Into<String>, personal_balance: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            personal_balance: personal_balance.into(),
            delegate: String::new(),
            voting_weight: "0".to_string(),
            ..Self::default()
        }
    }
}

/// Proposal as stored at `<daos>/<org>/proposals/<id>`.
/// Tallies are decimal strings; token weights routinely exceed u64.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: String,
    pub org: String,
    pub name: String,
    pub author: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub external_resource: String,
    pub targets: Vec<String>,
    pub values: Vec<String>,
    pub call_datas: Vec<String>,
    pub voting_starts_block: String,
    pub voting_ends_block: String,
    pub total_supply: String,
    pub in_favor: String,
    pub against: String,
    pub votes_for: u64,
    pub votes_against: u64,
    pub latest_stage: String,
    pub status_history: BTreeMap<String, DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle stages recorded in a proposal's status history
pub mod stage {
    pub const CREATED: &str = "Created";
    pub const QUEUED: &str = "Queued";
    pub const EXECUTED: &str = "Executed";
}

/// One ballot, stored at `<daos>/<org>/proposals/<id>/votes/<voter>`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vote {
    #[serde(rename = "proposalID")]
    pub proposal_id: String,
    pub voter: String,
    #[serde(rename = "votingPower")]
    pub voting_power: String,
    /// 0 = against, 1 = for
    pub option: u8,
    pub reason: String,
    pub hash: String,
}

// =====================
// Inheritance (afterme)
// =====================

/// Will contract as stored at `<wills>/<address>`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Will {
    pub address: String,
    pub owner: String,
    /// Ping interval in seconds
    pub interval: u64,
    pub last_update: DateTime<Utc>,
    pub executed: bool,
    pub created_at: DateTime<Utc>,
    pub last_indexed: DateTime<Utc>,
}

macro_rules! impl_document {
    ($($ty:ty),*) => {
        $(
            impl $ty {
                pub fn to_fields(&self) -> Result<Fields, StoreError> {
                    to_fields(self)
                }
            }
        )*
    };
}

impl_document!(Org, Member, Proposal, Vote, Will);
