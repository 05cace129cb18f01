//! Supabase (PostgREST) ledger backend
//!
//! Each table is reached at `{url}/rest/v1/{table}` with the project key in
//! both the `apikey` and `Authorization: Bearer` headers. Filters use
//! PostgREST operators (`eq.`, `ilike.`), ordering uses `order=created_at.desc`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use common::bridge_types::{
    BridgeTransaction, NewBridgeTransaction, NewWithdrawRecord, TransactionStatus, WithdrawRecord,
};

use super::{
    compute_stats, page_window, HistoryQuery, Ledger, LedgerError, TransactionFilter, TransactionStats,
};
use crate::config::LedgerConfig;

type Params = Vec<(String, String)>;

fn param(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

fn push_page(params: &mut Params, limit: Option<usize>, offset: Option<usize>) {
    let (skip, take) = page_window(limit, offset);
    if let Some(take) = take {
        params.push(param("limit", take));
    }
    if skip > 0 {
        params.push(param("offset", skip));
    }
}

/// Query string for a user's history
pub fn history_params(user_address: &str, query: &HistoryQuery) -> Params {
    let mut params = vec![
        param("select", "*"),
        param("user_address", format!("ilike.{}", user_address)),
    ];
    if let Some(status) = query.status {
        params.push(param("status", format!("eq.{}", status)));
    }
    params.push(param("order", "created_at.desc"));
    push_page(&mut params, query.limit, query.offset);
    params
}

/// Query string for the admin view
pub fn filter_params(filter: &TransactionFilter) -> Params {
    let mut params = vec![param("select", "*")];
    if let Some(status) = filter.status {
        params.push(param("status", format!("eq.{}", status)));
    }
    if let Some(network) = filter.source_network {
        params.push(param("source_network", format!("eq.{}", network)));
    }
    if let Some(network) = filter.destination_network {
        params.push(param("destination_network", format!("eq.{}", network)));
    }
    params.push(param("order", "created_at.desc"));
    push_page(&mut params, filter.limit, filter.offset);
    params
}

#[derive(Debug, Deserialize)]
struct StatsRow {
    status: TransactionStatus,
    amount: String,
}

/// Ledger backed by Supabase REST
#[derive(Debug, Clone)]
pub struct SupabaseLedger {
    client: Client,
    base_url: String,
    api_key: String,
    transaction_table: String,
    withdraw_table: String,
}

impl SupabaseLedger {
    pub fn new(
        base_url: &str,
        api_key: &str,
        transaction_table: &str,
        withdraw_table: &str,
        timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Request(format!("Failed to build HTTP client: {}", e)))?;

        info!("Supabase ledger at {}", base_url);
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            transaction_table: transaction_table.to_string(),
            withdraw_table: withdraw_table.to_string(),
        })
    }

    pub fn from_config(config: &LedgerConfig) -> Result<Self, LedgerError> {
        if config.supabase_url.trim().is_empty() {
            return Err(LedgerError::NotConfigured("SUPABASE_URL is not set".to_string()));
        }
        let key = config
            .supabase_key
            .as_deref()
            .ok_or_else(|| LedgerError::NotConfigured("SUPABASE_ANON_KEY is not set".to_string()))?;

        Self::new(
            &config.supabase_url,
            key,
            &config.transaction_table,
            &config.withdraw_table,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn rows<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<Vec<T>, LedgerError> {
        let response = builder
            .send()
            .await
            .map_err(|e| LedgerError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Supabase returned {}: {}", status, body);
            return Err(LedgerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| LedgerError::Decode(e.to_string()))
    }

    async fn single<T: DeserializeOwned>(&self, builder: RequestBuilder, what: &str) -> Result<T, LedgerError> {
        self.rows::<T>(builder)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::Decode(format!("{}: empty representation", what)))
    }
}

#[async_trait]
impl Ledger for SupabaseLedger {
    async fn insert_bridge_transaction(
        &self,
        transaction: NewBridgeTransaction,
    ) -> Result<BridgeTransaction, LedgerError> {
        let builder = self
            .request(Method::POST, &self.transaction_table)
            .header("Prefer", "return=representation")
            .json(&transaction);

        let row: BridgeTransaction = self.single(builder, "insert transaction_history").await?;
        debug!("Inserted bridge transaction {}", row);
        Ok(row)
    }

    async fn update_status(
        &self,
        transaction_hash: &str,
        status: TransactionStatus,
    ) -> Result<BridgeTransaction, LedgerError> {
        let mut params = vec![param("transaction_hash", format!("eq.{}", transaction_hash))];
        // chỉ row pending mới được đổi trạng thái
        if status != TransactionStatus::Pending {
            params.push(param("status", "eq.pending"));
        }

        let builder = self
            .request(Method::PATCH, &self.transaction_table)
            .header("Prefer", "return=representation")
            .query(&params)
            .json(&json!({ "status": status, "updated_at": Utc::now() }));

        let updated: Vec<BridgeTransaction> = self.rows(builder).await?;
        if let Some(row) = updated.into_iter().next() {
            return Ok(row);
        }

        match self.get_by_hash(transaction_hash).await? {
            Some(row) if row.status == status => Ok(row),
            Some(row) => Err(LedgerError::IllegalTransition {
                hash: transaction_hash.to_string(),
                from: row.status,
                to: status,
            }),
            None => Err(LedgerError::NotFound(transaction_hash.to_string())),
        }
    }

    async fn get_by_hash(&self, transaction_hash: &str) -> Result<Option<BridgeTransaction>, LedgerError> {
        let builder = self
            .request(Method::GET, &self.transaction_table)
            .query(&[
                param("select", "*"),
                param("transaction_hash", format!("eq.{}", transaction_hash)),
                param("limit", 1),
            ]);

        Ok(self.rows(builder).await?.into_iter().next())
    }

    async fn user_history(
        &self,
        user_address: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<BridgeTransaction>, LedgerError> {
        let builder = self
            .request(Method::GET, &self.transaction_table)
            .query(&history_params(user_address, query));
        self.rows(builder).await
    }

    async fn all_transactions(&self, filter: &TransactionFilter) -> Result<Vec<BridgeTransaction>, LedgerError> {
        let builder = self
            .request(Method::GET, &self.transaction_table)
            .query(&filter_params(filter));
        self.rows(builder).await
    }

    async fn stats(&self) -> Result<TransactionStats, LedgerError> {
        let builder = self
            .request(Method::GET, &self.transaction_table)
            .query(&[param("select", "status,amount")]);

        let rows: Vec<StatsRow> = self.rows(builder).await?;
        Ok(compute_stats(rows.iter().map(|row| (row.status, row.amount.as_str()))))
    }

    async fn complete_by_deposit_count(&self, deposit_count: u64) -> Result<Vec<BridgeTransaction>, LedgerError> {
        let builder = self
            .request(Method::PATCH, &self.transaction_table)
            .header("Prefer", "return=representation")
            .query(&[
                param("deposit_count", format!("eq.{}", deposit_count)),
                param("status", "eq.pending"),
            ])
            .json(&json!({ "status": TransactionStatus::Completed, "updated_at": Utc::now() }));

        let completed: Vec<BridgeTransaction> = self.rows(builder).await?;
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
        let builder = self
            .request(Method::POST, &self.withdraw_table)
            .header("Prefer", "return=representation")
            .json(&record);
        self.single(builder, "insert withdraw_history").await
    }

    async fn user_withdrawals(&self, user_address: &str) -> Result<Vec<WithdrawRecord>, LedgerError> {
        let builder = self.request(Method::GET, &self.withdraw_table).query(&[
            param("select", "*"),
            param("user_address", format!("ilike.{}", user_address)),
            param("order", "created_at.desc"),
        ]);
        self.rows(builder).await
    }

    async fn all_withdrawals(&self) -> Result<Vec<WithdrawRecord>, LedgerError> {
        let builder = self
            .request(Method::GET, &self.withdraw_table)
            .query(&[param("select", "*"), param("order", "created_at.desc")]);
        self.rows(builder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has(params: &Params, key: &str, value: &str) -> bool {
        params.iter().any(|(k, v)| k == key && v == value)
    }

    #[test]
    fn test_history_params() {
        let query = HistoryQuery {
            limit: Some(5),
            offset: Some(10),
            status: Some(TransactionStatus::Pending),
        };
        let params = history_params("0xAbC", &query);

        assert!(has(&params, "user_address", "ilike.0xAbC"));
        assert!(has(&params, "status", "eq.pending"));
        assert!(has(&params, "order", "created_at.desc"));
        assert!(has(&params, "limit", "5"));
        assert!(has(&params, "offset", "10"));
    }

    #[test]
    fn test_filter_params_without_paging() {
        let filter = TransactionFilter {
            source_network: Some(0),
            destination_network: Some(29),
            ..Default::default()
        };
        let params = filter_params(&filter);

        assert!(has(&params, "source_network", "eq.0"));
        assert!(has(&params, "destination_network", "eq.29"));
        assert!(!params.iter().any(|(k, _)| k == "limit" || k == "offset" || k == "status"));
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let mut config = LedgerConfig::default();
        assert!(matches!(
            SupabaseLedger::from_config(&config),
            Err(LedgerError::NotConfigured(_))
        ));

        config.supabase_url = "https://example.supabase.co/".to_string();
        assert!(matches!(
            SupabaseLedger::from_config(&config),
            Err(LedgerError::NotConfigured(_))
        ));

        config.supabase_key = Some("anon".to_string());
        let ledger = SupabaseLedger::from_config(&config).unwrap();
        assert_eq!(
            ledger.table_url("transaction_history"),
            "https://example.supabase.co/rest/v1/transaction_history"
        );
    }
}
