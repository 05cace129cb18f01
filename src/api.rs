//! REST API
//!
//! Các endpoint:
//! - GET  /health
//! - POST /api/withdraw
//! - GET  /api/vault-balance
//! - GET  /api/contract-info
//! - GET  /api/withdraw-history/{user}
//! - GET  /api/withdrawals
//! - GET  /api/transactions/stats
//! - GET  /api/transactions/{user}?limit&offset&status
//! - GET  /api/transactions?limit&offset&status&sourceNetwork&destinationNetwork
//! - GET  /api/balances/{address}
//! - GET  /api/price
//!
//! Handlers never reject: failures are rendered as `{error, message?}` right
//! away, so a failing route never falls through to a sibling route.

use std::convert::Infallible;
use std::sync::Arc;

use chrono::Utc;
use ethers::types::Address;
use serde::Serialize;
use tracing::debug;
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::{Filter, Rejection, Reply};

use crate::balance::BalanceReader;
use crate::error::{handle_rejection, ApiError};
use crate::ledger::{HistoryQuery, Ledger, TransactionFilter};
use crate::price::PriceTracker;
use crate::version::VERSION;
use crate::withdrawal::{is_valid_address, WithdrawRequest, WithdrawalService};

/// Largest accepted request body
const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Services the handlers need
pub struct ApiContext {
    pub withdrawals: Arc<WithdrawalService>,
    pub ledger: Arc<dyn Ledger>,
    pub balances: Arc<BalanceReader>,
    pub prices: Arc<PriceTracker>,
    /// Page size used when only `offset` is given
    pub default_page_size: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    version: &'static str,
}

fn with_context(ctx: Arc<ApiContext>) -> impl Filter<Extract = (Arc<ApiContext>,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

fn respond<T: Serialize>(result: Result<T, ApiError>) -> WithStatus<Json> {
    match result {
        Ok(body) => warp::reply::with_status(warp::reply::json(&body), StatusCode::OK),
        Err(e) => {
            e.log();
            e.into_reply()
        }
    }
}

/// All routes with CORS and the JSON rejection handler
pub fn routes(ctx: Arc<ApiContext>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health = warp::path!("health").and(warp::get()).map(|| {
        warp::reply::json(&HealthResponse {
            status: "OK",
            timestamp: Utc::now().to_rfc3339(),
            version: VERSION,
        })
    });

    let withdraw = warp::path!("api" / "withdraw")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_context(ctx.clone()))
        .and_then(withdraw_handler);

    let vault_balance = warp::path!("api" / "vault-balance")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(vault_balance_handler);

    let contract_info = warp::path!("api" / "contract-info")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(contract_info_handler);

    let withdraw_history = warp::path!("api" / "withdraw-history" / String)
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(withdraw_history_handler);

    let withdrawals = warp::path!("api" / "withdrawals")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(withdrawals_handler);

    // stats phải đứng trước /transactions/{user}
    let stats = warp::path!("api" / "transactions" / "stats")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(stats_handler);

    let user_transactions = warp::path!("api" / "transactions" / String)
        .and(warp::get())
        .and(warp::query::<HistoryQuery>())
        .and(with_context(ctx.clone()))
        .and_then(user_transactions_handler);

    let all_transactions = warp::path!("api" / "transactions")
        .and(warp::get())
        .and(warp::query::<TransactionFilter>())
        .and(with_context(ctx.clone()))
        .and_then(all_transactions_handler);

    let balances = warp::path!("api" / "balances" / String)
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(balances_handler);

    let price = warp::path!("api" / "price")
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(price_handler);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["Content-Type", "Authorization"]);

    health
        .or(withdraw)
        .or(vault_balance)
        .or(contract_info)
        .or(withdraw_history)
        .or(withdrawals)
        .or(stats)
        .or(user_transactions)
        .or(all_transactions)
        .or(balances)
        .or(price)
        .recover(handle_rejection)
        .with(cors)
        .with(warp::log("katana_bridge::api"))
}

async fn withdraw_handler(request: WithdrawRequest, ctx: Arc<ApiContext>) -> Result<WithStatus<Json>, Rejection> {
    debug!("POST /api/withdraw: {:?}", request);
    let result = ctx.withdrawals.process(&request).await.map_err(ApiError::from);
    Ok(respond(result))
}

async fn vault_balance_handler(ctx: Arc<ApiContext>) -> Result<WithStatus<Json>, Rejection> {
    Ok(respond(ctx.withdrawals.vault_balance().await.map_err(ApiError::from)))
}

async fn contract_info_handler(ctx: Arc<ApiContext>) -> Result<WithStatus<Json>, Rejection> {
    Ok(respond(ctx.withdrawals.contract_info().await.map_err(ApiError::from)))
}

async fn withdraw_history_handler(user: String, ctx: Arc<ApiContext>) -> Result<WithStatus<Json>, Rejection> {
    Ok(respond(ctx.ledger.user_withdrawals(&user).await.map_err(ApiError::from)))
}

async fn withdrawals_handler(ctx: Arc<ApiContext>) -> Result<WithStatus<Json>, Rejection> {
    Ok(respond(ctx.ledger.all_withdrawals().await.map_err(ApiError::from)))
}

async fn stats_handler(ctx: Arc<ApiContext>) -> Result<WithStatus<Json>, Rejection> {
    Ok(respond(ctx.ledger.stats().await.map_err(ApiError::from)))
}

/// Page size for an `offset` given without `limit`; zero means not given
fn default_limit(limit: &mut Option<usize>, offset: Option<usize>, page_size: usize) {
    if offset.unwrap_or(0) > 0 && limit.unwrap_or(0) == 0 {
        *limit = Some(page_size);
    }
}

async fn user_transactions_handler(
    user: String,
    mut query: HistoryQuery,
    ctx: Arc<ApiContext>,
) -> Result<WithStatus<Json>, Rejection> {
    default_limit(&mut query.limit, query.offset, ctx.default_page_size);
    Ok(respond(ctx.ledger.user_history(&user, &query).await.map_err(ApiError::from)))
}

async fn all_transactions_handler(
    mut filter: TransactionFilter,
    ctx: Arc<ApiContext>,
) -> Result<WithStatus<Json>, Rejection> {
    default_limit(&mut filter.limit, filter.offset, ctx.default_page_size);
    Ok(respond(ctx.ledger.all_transactions(&filter).await.map_err(ApiError::from)))
}

async fn balances_handler(address: String, ctx: Arc<ApiContext>) -> Result<WithStatus<Json>, Rejection> {
    let owner = if is_valid_address(&address) {
        address.parse::<Address>().ok()
    } else {
        None
    };

    let result = match owner {
        Some(owner) => Ok(ctx.balances.snapshot(owner).await),
        None => Err(ApiError::BadRequest("Invalid address format".to_string())),
    };
    Ok(respond(result))
}

async fn price_handler(ctx: Arc<ApiContext>) -> Result<WithStatus<Json>, Rejection> {
    Ok(respond(ctx.prices.current().await.map_err(ApiError::from)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockReader;
    use crate::chain::ConfirmationPolicy;
    use crate::ledger::mock::MockLedger;
    use crate::ledger::{LedgerError, MemoryLedger};
    use crate::price::{PriceError, PriceSource};
    use async_trait::async_trait;
    use common::bridge_types::{NewBridgeTransaction, NewWithdrawRecord};
    use ethers::types::U256;
    use serde_json::{json, Value};

    struct FixedPrice(f64);

    #[async_trait]
    impl PriceSource for FixedPrice {
        async fn eth_usd(&self) -> Result<f64, PriceError> {
            Ok(self.0)
        }
    }

    fn context(reader: MockReader, ledger: Arc<dyn Ledger>) -> Arc<ApiContext> {
        let reader: Arc<MockReader> = Arc::new(reader);
        Arc::new(ApiContext {
            withdrawals: Arc::new(WithdrawalService::new(
                reader.clone(),
                None,
                Address::repeat_byte(0x5d),
                ledger.clone(),
                ConfirmationPolicy::fast(),
            )),
            ledger,
            balances: Arc::new(BalanceReader::new(reader, vec![])),
            prices: Arc::new(PriceTracker::new(Arc::new(FixedPrice(3150.25)))),
            default_page_size: 10,
        })
    }

    fn body(response: &warp::http::Response<warp::hyper::body::Bytes>) -> Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    async fn seeded_ledger() -> Arc<MemoryLedger> {
        let ledger = Arc::new(MemoryLedger::new());
        for (i, user) in ["0xAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAa", "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"]
            .iter()
            .enumerate()
        {
            ledger
                .insert_bridge_transaction(NewBridgeTransaction::pending(
                    user.to_string(),
                    "1000000000000000000".to_string(),
                    format!("{:?}", Address::zero()),
                    0,
                    29,
                    format!("0x{:064x}", i + 1),
                    Some(i as u64 + 50),
                ))
                .await
                .unwrap();
        }
        ledger
    }

    #[tokio::test]
    async fn test_health() {
        let api = routes(context(MockReader::new(), Arc::new(MemoryLedger::new())));

        let res = warp::test::request().method("GET").path("/health").reply(&api).await;

        assert_eq!(res.status(), StatusCode::OK);
        let body = body(&res);
        assert_eq!(body["status"], "OK");
        assert_eq!(body["version"], VERSION);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_withdraw_validation_error() {
        // MockReader không có expectation: mọi chain call sẽ panic
        let api = routes(context(MockReader::new(), Arc::new(MemoryLedger::new())));

        let res = warp::test::request()
            .method("POST")
            .path("/api/withdraw")
            .json(&json!({
                "amount": "0",
                "destinationNetwork": 0,
                "destinationAddress": "0x1111111111111111111111111111111111111111",
                "token": "0x7b79995e5f793A07Bc00c21412e50Ecae098E7f9"
            }))
            .reply(&api)
            .await;

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body(&res)["error"], "Amount must be greater than 0");
    }

    #[tokio::test]
    async fn test_withdraw_without_operator_key() {
        let api = routes(context(MockReader::new(), Arc::new(MemoryLedger::new())));

        let res = warp::test::request()
            .method("POST")
            .path("/api/withdraw")
            .json(&json!({
                "amount": "100",
                "destinationNetwork": "0",
                "destinationAddress": "0x1111111111111111111111111111111111111111",
                "token": "0x7b79995e5f793A07Bc00c21412e50Ecae098E7f9"
            }))
            .reply(&api)
            .await;

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body(&res);
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["message"], "Operator key is not configured");
    }

    #[tokio::test]
    async fn test_withdraw_malformed_body() {
        let api = routes(context(MockReader::new(), Arc::new(MemoryLedger::new())));

        let res = warp::test::request()
            .method("POST")
            .path("/api/withdraw")
            .header("content-type", "application/json")
            .body("{not json")
            .reply(&api)
            .await;

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_route_is_not_a_user() {
        let ledger = seeded_ledger().await;
        let api = routes(context(MockReader::new(), ledger));

        let res = warp::test::request()
            .method("GET")
            .path("/api/transactions/stats")
            .reply(&api)
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        let body = body(&res);
        assert_eq!(body["total"], 2);
        assert_eq!(body["pending"], 2);
        assert_eq!(body["totalVolume"], "0");
    }

    #[tokio::test]
    async fn test_stats_failure_does_not_fall_through() {
        let mut ledger = MockLedger::new();
        ledger
            .expect_stats()
            .times(1)
            .returning(|| Err(LedgerError::Request("connection reset".to_string())));
        ledger.expect_user_history().never();
        let api = routes(context(MockReader::new(), Arc::new(ledger)));

        let res = warp::test::request()
            .method("GET")
            .path("/api/transactions/stats")
            .reply(&api)
            .await;

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_user_transactions_case_insensitive() {
        let ledger = seeded_ledger().await;
        let api = routes(context(MockReader::new(), ledger));

        let res = warp::test::request()
            .method("GET")
            .path("/api/transactions/0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa?status=pending&limit=5")
            .reply(&api)
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        let rows = body(&res);
        assert_eq!(rows.as_array().unwrap().len(), 1);
        assert_eq!(rows[0]["deposit_count"], 50);
    }

    #[tokio::test]
    async fn test_all_transactions_filter() {
        let ledger = seeded_ledger().await;
        let api = routes(context(MockReader::new(), ledger));

        let res = warp::test::request()
            .method("GET")
            .path("/api/transactions?sourceNetwork=0&destinationNetwork=29")
            .reply(&api)
            .await;
        assert_eq!(body(&res).as_array().unwrap().len(), 2);

        let res = warp::test::request()
            .method("GET")
            .path("/api/transactions?status=completed")
            .reply(&api)
            .await;
        assert!(body(&res).as_array().unwrap().is_empty());

        let res = warp::test::request()
            .method("GET")
            .path("/api/transactions?status=bogus")
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_withdraw_history() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger
            .insert_withdrawal(NewWithdrawRecord {
                user_address: "0x1111111111111111111111111111111111111111".to_string(),
                amount: "42".to_string(),
                token_address: "0x7b79995e5f793a07bc00c21412e50ecae098e7f9".to_string(),
                transaction_hash: format!("0x{:064x}", 9),
                destination_network: 0,
            })
            .await
            .unwrap();
        let api = routes(context(MockReader::new(), ledger));

        let res = warp::test::request()
            .method("GET")
            .path("/api/withdraw-history/0x1111111111111111111111111111111111111111")
            .reply(&api)
            .await;
        assert_eq!(body(&res)[0]["amount"], "42");

        let res = warp::test::request().method("GET").path("/api/withdrawals").reply(&api).await;
        assert_eq!(body(&res).as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_balances() {
        let mut reader = MockReader::new();
        reader
            .expect_native_balance()
            .times(1)
            .returning(|_| Ok(U256::from(2u64) * U256::exp10(18)));
        let api = routes(context(reader, Arc::new(MemoryLedger::new())));

        let res = warp::test::request()
            .method("GET")
            .path("/api/balances/0x1111111111111111111111111111111111111111")
            .reply(&api)
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body(&res)["native"]["ready"]["formatted"], "2.000000000000000000");

        let res = warp::test::request()
            .method("GET")
            .path("/api/balances/0x1234")
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body(&res)["error"], "Invalid address format");
    }

    #[tokio::test]
    async fn test_price() {
        let api = routes(context(MockReader::new(), Arc::new(MemoryLedger::new())));

        let res = warp::test::request().method("GET").path("/api/price").reply(&api).await;

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body(&res)["usd"], 3150.25);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let api = routes(context(MockReader::new(), Arc::new(MemoryLedger::new())));

        let res = warp::test::request().method("GET").path("/api/nothing").reply(&api).await;

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(body(&res)["error"], "Not found");
    }
}
