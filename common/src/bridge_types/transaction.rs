//! Ledger record data structures
//!
//! This module defines the rows of the `transaction_history` (bridge deposits)
//! and `withdraw_history` (vault withdrawals) tables, plus their insert payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use super::status::TransactionStatus;

/// Bridge deposit row as stored in `transaction_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeTransaction {
    /// Row id assigned by the store
    #[serde(deserialize_with = "id_from_any")]
    pub id: String,

    /// Address that initiated the deposit
    pub user_address: String,

    /// Amount in base units (integer string)
    pub amount: String,

    /// Token address on the source chain, zero address for native ETH
    pub token_address: String,

    /// Bridge network id of the source chain
    pub source_network: u32,

    /// Bridge network id of the destination chain
    pub destination_network: u32,

    /// Hash of the bridge transaction on the source chain
    pub transaction_hash: String,

    /// Deposit sequence number from the bridge event, if it could be extracted
    #[serde(default)]
    pub deposit_count: Option<u64>,

    /// Current status
    pub status: TransactionStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BridgeTransaction {
    /// Apply a status change if it is legal, bumping `updated_at`.
    /// Returns false when the transition is rejected.
    pub fn update_status(&mut self, new_status: TransactionStatus) -> bool {
        if !self.status.can_transition_to(new_status) {
            return false;
        }
        if self.status != new_status {
            self.status = new_status;
            self.updated_at = Utc::now();
        }
        true
    }
}

impl fmt::Display for BridgeTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bridge [{}] {} -> {}, Status: {}, Amount: {} [{}], User: {}",
            self.transaction_hash,
            self.source_network,
            self.destination_network,
            self.status,
            self.amount,
            self.token_address,
            self.user_address
        )
    }
}

/// Insert payload for `transaction_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBridgeTransaction {
    pub user_address: String,
    pub amount: String,
    pub token_address: String,
    pub source_network: u32,
    pub destination_network: u32,
    pub transaction_hash: String,
    pub deposit_count: Option<u64>,
    pub status: TransactionStatus,
}

impl NewBridgeTransaction {
    /// Create a row in pending status
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        user_address: String,
        amount: String,
        token_address: String,
        source_network: u32,
        destination_network: u32,
        transaction_hash: String,
        deposit_count: Option<u64>,
    ) -> Self {
        Self {
            user_address,
            amount,
            token_address,
            source_network,
            destination_network,
            transaction_hash,
            deposit_count,
            status: TransactionStatus::Pending,
        }
    }

    /// Materialize the row the way the store would, with the given id
    pub fn into_record(self, id: String) -> BridgeTransaction {
        let now = Utc::now();
        BridgeTransaction {
            id,
            user_address: self.user_address,
            amount: self.amount,
            token_address: self.token_address,
            source_network: self.source_network,
            destination_network: self.destination_network,
            transaction_hash: self.transaction_hash,
            deposit_count: self.deposit_count,
            status: self.status,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Vault withdrawal row as stored in `withdraw_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawRecord {
    #[serde(deserialize_with = "id_from_any")]
    pub id: String,
    pub user_address: String,
    /// Amount in base units (integer string)
    pub amount: String,
    pub token_address: String,
    pub transaction_hash: String,
    pub destination_network: u32,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for `withdraw_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWithdrawRecord {
    pub user_address: String,
    pub amount: String,
    pub token_address: String,
    pub transaction_hash: String,
    pub destination_network: u32,
}

impl NewWithdrawRecord {
    pub fn into_record(self, id: String) -> WithdrawRecord {
        WithdrawRecord {
            id,
            user_address: self.user_address,
            amount: self.amount,
            token_address: self.token_address,
            transaction_hash: self.transaction_hash,
            destination_network: self.destination_network,
            created_at: Utc::now(),
        }
    }
}

// transaction_history dùng uuid, withdraw_history dùng bigint
fn id_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(id) => id,
        RawId::Number(id) => id.to_string(),
    })
}
