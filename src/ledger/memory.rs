//! In-memory ledger
//!
//! Mirrors the PostgREST backend's query semantics: newest-first ordering,
//! case-insensitive user matching, the same pagination window.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use common::bridge_types::{
    BridgeTransaction, NewBridgeTransaction, NewWithdrawRecord, TransactionStatus, WithdrawRecord,
};

use super::{
    compute_stats, page_window, HistoryQuery, Ledger, LedgerError, TransactionFilter, TransactionStats,
};

/// Ledger lưu trong bộ nhớ
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    transactions: Arc<RwLock<Vec<BridgeTransaction>>>,
    withdrawals: Arc<RwLock<Vec<WithdrawRecord>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

fn same_address(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Newest first; rows with equal timestamps keep reverse insertion order
fn newest_first<T: Clone>(rows: &[T], created_at: impl Fn(&T) -> chrono::DateTime<chrono::Utc>) -> Vec<T> {
    let mut sorted: Vec<T> = rows.iter().rev().cloned().collect();
    sorted.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
    sorted
}

fn paginate<T>(rows: Vec<T>, limit: Option<usize>, offset: Option<usize>) -> Vec<T> {
    let (skip, take) = page_window(limit, offset);
    let rows = rows.into_iter().skip(skip);
    match take {
        Some(take) => rows.take(take).collect(),
        None => rows.collect(),
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn insert_bridge_transaction(
        &self,
        transaction: NewBridgeTransaction,
    ) -> Result<BridgeTransaction, LedgerError> {
        let record = transaction.into_record(Uuid::new_v4().to_string());
        debug!("Inserted bridge transaction {}", record);

        self.transactions.write().await.push(record.clone());
        Ok(record)
    }

    async fn update_status(
        &self,
        transaction_hash: &str,
        status: TransactionStatus,
    ) -> Result<BridgeTransaction, LedgerError> {
        let mut transactions = self.transactions.write().await;
        let row = transactions
            .iter_mut()
            .find(|tx| tx.transaction_hash == transaction_hash)
            .ok_or_else(|| LedgerError::NotFound(transaction_hash.to_string()))?;

        let from = row.status;
        if !row.update_status(status) {
            return Err(LedgerError::IllegalTransition {
                hash: transaction_hash.to_string(),
                from,
                to: status,
            });
        }
        Ok(row.clone())
    }

    async fn get_by_hash(&self, transaction_hash: &str) -> Result<Option<BridgeTransaction>, LedgerError> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .iter()
            .find(|tx| tx.transaction_hash == transaction_hash)
            .cloned())
    }

    async fn user_history(
        &self,
        user_address: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<BridgeTransaction>, LedgerError> {
        let transactions = self.transactions.read().await;
        let rows: Vec<BridgeTransaction> = newest_first(&transactions, |tx| tx.created_at)
            .into_iter()
            .filter(|tx| same_address(&tx.user_address, user_address))
            .filter(|tx| query.status.map_or(true, |status| tx.status == status))
            .collect();

        Ok(paginate(rows, query.limit, query.offset))
    }

    async fn all_transactions(&self, filter: &TransactionFilter) -> Result<Vec<BridgeTransaction>, LedgerError> {
        let transactions = self.transactions.read().await;
        let rows: Vec<BridgeTransaction> = newest_first(&transactions, |tx| tx.created_at)
            .into_iter()
            .filter(|tx| filter.status.map_or(true, |status| tx.status == status))
            .filter(|tx| filter.source_network.map_or(true, |n| tx.source_network == n))
            .filter(|tx| filter.destination_network.map_or(true, |n| tx.destination_network == n))
            .collect();

        Ok(paginate(rows, filter.limit, filter.offset))
    }

    async fn stats(&self) -> Result<TransactionStats, LedgerError> {
        let transactions = self.transactions.read().await;
        Ok(compute_stats(
            transactions.iter().map(|tx| (tx.status, tx.amount.as_str())),
        ))
    }

    async fn complete_by_deposit_count(&self, deposit_count: u64) -> Result<Vec<BridgeTransaction>, LedgerError> {
        let mut transactions = self.transactions.write().await;
        let mut completed = Vec::new();

        for row in transactions.iter_mut() {
            if row.deposit_count == Some(deposit_count) && row.status == TransactionStatus::Pending {
                row.update_status(TransactionStatus::Completed);
                completed.push(row.clone());
            }
        }

        if completed.len() > 1 {
            warn!(
                "Deposit count {} matched {} pending rows, all were completed",
                deposit_count,
                completed.len()
            );
        }
        Ok(completed)
    }

    async fn insert_withdrawal(&self, record: NewWithdrawRecord) -> Result<WithdrawRecord, LedgerError> {
        let mut withdrawals = self.withdrawals.write().await;
        let id = (withdrawals.len() + 1).to_string();
        let record = record.into_record(id);

        withdrawals.push(record.clone());
        Ok(record)
    }

    async fn user_withdrawals(&self, user_address: &str) -> Result<Vec<WithdrawRecord>, LedgerError> {
        let withdrawals = self.withdrawals.read().await;
        Ok(newest_first(&withdrawals, |w| w.created_at)
            .into_iter()
            .filter(|w| same_address(&w.user_address, user_address))
            .collect())
    }

    async fn all_withdrawals(&self) -> Result<Vec<WithdrawRecord>, LedgerError> {
        let withdrawals = self.withdrawals.read().await;
        Ok(newest_first(&withdrawals, |w| w.created_at))
    }
}
