//! Module ledger: lưu lịch sử bridge deposit và withdraw.
//!
//! Module này cung cấp:
//! - Trait `Ledger` cho insert/update/query trên hai bảng
//!   `transaction_history` và `withdraw_history`
//! - `SupabaseLedger` gọi PostgREST qua HTTPS
//! - `MemoryLedger` giữ dữ liệu trong bộ nhớ (test, chạy offline)
//! - Thống kê theo trạng thái, tổng volume tính bằng số nguyên không tràn

pub mod memory;
pub mod supabase;

use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::U512;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use common::bridge_types::{
    BridgeTransaction, NewBridgeTransaction, NewWithdrawRecord, TransactionStatus, WithdrawRecord,
};

use crate::config::{LedgerBackend, LedgerConfig};

pub use memory::MemoryLedger;
pub use supabase::SupabaseLedger;

/// Page size used when only an offset is given
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Lỗi ledger
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Transport-level failure
    #[error("Ledger request failed: {0}")]
    Request(String),

    /// Store answered with a non-success status
    #[error("Ledger returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body did not match the expected rows
    #[error("Failed to decode ledger response: {0}")]
    Decode(String),

    /// No row with that transaction hash
    #[error("Transaction not found: {0}")]
    NotFound(String),

    /// Status change would break the pending → completed|failed rule
    #[error("Illegal status transition for {hash}: {from} -> {to}")]
    IllegalTransition {
        hash: String,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Backend is missing credentials or URL
    #[error("Ledger is not configured: {0}")]
    NotConfigured(String),
}

/// Filters for a user's history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub status: Option<TransactionStatus>,
}

/// Filters for the admin view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFilter {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub status: Option<TransactionStatus>,
    pub source_network: Option<u32>,
    pub destination_network: Option<u32>,
}

/// Rows to skip and, if bounded, rows to take.
///
/// `limit` alone caps the result. A non-zero `offset` selects
/// `offset ..= offset + (limit or 10) - 1`. Zero counts as not given, so
/// `offset=0` without a limit returns every row.
pub fn page_window(limit: Option<usize>, offset: Option<usize>) -> (usize, Option<usize>) {
    let limit = limit.filter(|n| *n > 0);
    let offset = offset.filter(|n| *n > 0);
    match (limit, offset) {
        (limit, Some(offset)) => (offset, Some(limit.unwrap_or(DEFAULT_PAGE_SIZE))),
        (Some(limit), None) => (0, Some(limit)),
        (None, None) => (0, None),
    }
}

/// Aggregate counts by status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStats {
    pub total: u64,
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
    /// Sum of completed amounts in base units, as a decimal string
    pub total_volume: String,
}

/// Compute stats from `(status, amount)` pairs.
///
/// Amounts are summed as 512-bit integers, so no realistic set of 256-bit
/// amounts can overflow. Malformed amounts are skipped with a warning.
pub fn compute_stats<'a, I>(rows: I) -> TransactionStats
where
    I: IntoIterator<Item = (TransactionStatus, &'a str)>,
{
    let mut stats = TransactionStats {
        total: 0,
        pending: 0,
        completed: 0,
        failed: 0,
        total_volume: String::new(),
    };
    let mut volume = U512::zero();

    for (status, amount) in rows {
        stats.total += 1;
        match status {
            TransactionStatus::Pending => stats.pending += 1,
            TransactionStatus::Failed => stats.failed += 1,
            TransactionStatus::Completed => {
                stats.completed += 1;
                match U512::from_dec_str(amount.trim()) {
                    Ok(value) => volume = volume.saturating_add(value),
                    Err(_) => warn!("Skipping malformed amount in volume: {:?}", amount),
                }
            }
        }
    }

    stats.total_volume = volume.to_string();
    stats
}

/// Durable record of bridge and withdraw activity
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Insert a bridge deposit row
    async fn insert_bridge_transaction(
        &self,
        transaction: NewBridgeTransaction,
    ) -> Result<BridgeTransaction, LedgerError>;

    /// Change a row's status by transaction hash, if the transition is legal
    async fn update_status(
        &self,
        transaction_hash: &str,
        status: TransactionStatus,
    ) -> Result<BridgeTransaction, LedgerError>;

    async fn get_by_hash(&self, transaction_hash: &str) -> Result<Option<BridgeTransaction>, LedgerError>;

    /// User's deposits, newest first
    async fn user_history(
        &self,
        user_address: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<BridgeTransaction>, LedgerError>;

    /// All deposits, newest first
    async fn all_transactions(&self, filter: &TransactionFilter) -> Result<Vec<BridgeTransaction>, LedgerError>;

    async fn stats(&self) -> Result<TransactionStats, LedgerError>;

    /// Flip every pending row with this deposit count to completed.
    /// Returns only the rows that were flipped.
    async fn complete_by_deposit_count(&self, deposit_count: u64) -> Result<Vec<BridgeTransaction>, LedgerError>;

    /// Insert a withdrawal row
    async fn insert_withdrawal(&self, record: NewWithdrawRecord) -> Result<WithdrawRecord, LedgerError>;

    /// User's withdrawals, newest first
    async fn user_withdrawals(&self, user_address: &str) -> Result<Vec<WithdrawRecord>, LedgerError>;

    /// All withdrawals, newest first
    async fn all_withdrawals(&self) -> Result<Vec<WithdrawRecord>, LedgerError>;
}

/// Build the configured ledger backend
pub fn create_ledger(config: &LedgerConfig) -> Result<Arc<dyn Ledger>, LedgerError> {
    match config.backend {
        LedgerBackend::Memory => Ok(Arc::new(MemoryLedger::new())),
        LedgerBackend::Supabase => Ok(Arc::new(SupabaseLedger::from_config(config)?)),
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use mockall::mock;

    mock! {
        pub Ledger {}

        #[async_trait]
        impl Ledger for Ledger {
            async fn insert_bridge_transaction(&self, transaction: NewBridgeTransaction) -> Result<BridgeTransaction, LedgerError>;
            async fn update_status(&self, transaction_hash: &str, status: TransactionStatus) -> Result<BridgeTransaction, LedgerError>;
            async fn get_by_hash(&self, transaction_hash: &str) -> Result<Option<BridgeTransaction>, LedgerError>;
            async fn user_history(&self, user_address: &str, query: &HistoryQuery) -> Result<Vec<BridgeTransaction>, LedgerError>;
            async fn all_transactions(&self, filter: &TransactionFilter) -> Result<Vec<BridgeTransaction>, LedgerError>;
            async fn stats(&self) -> Result<TransactionStats, LedgerError>;
            async fn complete_by_deposit_count(&self, deposit_count: u64) -> Result<Vec<BridgeTransaction>, LedgerError>;
            async fn insert_withdrawal(&self, record: NewWithdrawRecord) -> Result<WithdrawRecord, LedgerError>;
            async fn user_withdrawals(&self, user_address: &str) -> Result<Vec<WithdrawRecord>, LedgerError>;
            async fn all_withdrawals(&self) -> Result<Vec<WithdrawRecord>, LedgerError>;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_window() {
        assert_eq!(page_window(None, None), (0, None));
        assert_eq!(page_window(Some(5), None), (0, Some(5)));
        assert_eq!(page_window(None, Some(20)), (20, Some(10)));
        assert_eq!(page_window(Some(3), Some(6)), (6, Some(3)));

        // 0 coi như không truyền
        assert_eq!(page_window(None, Some(0)), (0, None));
        assert_eq!(page_window(Some(0), None), (0, None));
        assert_eq!(page_window(Some(0), Some(20)), (20, Some(10)));
    }

    #[test]
    fn test_stats_counts_and_volume() {
        use TransactionStatus::*;
        let rows = vec![
            (Completed, "1000000000000000000"),
            (Completed, "2500000000000000000"),
            (Pending, "999"),
            (Failed, "5"),
        ];

        let stats = compute_stats(rows);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total_volume, "3500000000000000000");
    }

    #[test]
    fn test_stats_volume_beyond_u256() {
        let max = ethers::types::U256::MAX.to_string();
        let rows = vec![
            (TransactionStatus::Completed, max.as_str()),
            (TransactionStatus::Completed, "1"),
        ];

        let expected = U512::from(ethers::types::U256::MAX) + U512::one();
        assert_eq!(compute_stats(rows).total_volume, expected.to_string());
    }

    #[test]
    fn test_stats_skip_malformed_amount() {
        let rows = vec![
            (TransactionStatus::Completed, "12"),
            (TransactionStatus::Completed, "1.5"),
        ];
        let stats = compute_stats(rows);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.total_volume, "12");
    }

    #[test]
    fn test_stats_serialize_camel_case() {
        let stats = compute_stats(Vec::<(TransactionStatus, &str)>::new());
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["totalVolume"], "0");
        assert_eq!(json["total"], 0);
    }
}
