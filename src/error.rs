//! # API Error
//!
//! Lỗi trả về cho REST client. Mọi lỗi của các tầng bên dưới
//! (`WithdrawError`, `LedgerError`, `ChainError`, `PriceError`) được chuyển
//! thành `ApiError` rồi render thành JSON `{error, message?}`.

use std::convert::Infallible;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};
use warp::http::StatusCode;
use warp::reject::Reject;
use warp::reply::{Json, WithStatus};
use warp::{Rejection, Reply};

use crate::chain::ChainError;
use crate::ledger::LedgerError;
use crate::price::PriceError;
use crate::withdrawal::WithdrawError;

/// Lỗi tầng HTTP
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Request rejected before any external call
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Vault cannot cover the withdrawal; amounts in base units
    #[error("Insufficient vault balance")]
    InsufficientBalance { requested: String, available: String },

    /// Chain, store or feed failure
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl Reject for ApiError {}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON body sent to the client
    pub fn body(&self) -> Value {
        match self {
            ApiError::BadRequest(msg) | ApiError::Forbidden(msg) | ApiError::NotFound(msg) => {
                json!({ "error": msg })
            }
            ApiError::InsufficientBalance { requested, available } => json!({
                "error": "Insufficient vault balance",
                "requested": requested,
                "available": available,
            }),
            ApiError::Internal(msg) => json!({
                "error": "Internal server error",
                "message": msg,
            }),
        }
    }

    pub fn log(&self) {
        match self {
            ApiError::Internal(msg) => error!(error_type = "internal", message = %msg, "API error"),
            other => warn!(status = other.status_code().as_u16(), message = %other, "Request rejected"),
        }
    }

    pub fn into_reply(self) -> WithStatus<Json> {
        let status = self.status_code();
        warp::reply::with_status(warp::reply::json(&self.body()), status)
    }
}

impl From<WithdrawError> for ApiError {
    fn from(err: WithdrawError) -> Self {
        match err {
            WithdrawError::InsufficientBalance { requested, available } => ApiError::InsufficientBalance {
                requested: requested.to_string(),
                available: available.to_string(),
            },
            WithdrawError::Unauthorized => ApiError::Forbidden(err.to_string()),
            WithdrawError::NotConfigured | WithdrawError::Chain(_) => ApiError::Internal(err.to_string()),
            _ => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(_) => ApiError::NotFound(err.to_string()),
            LedgerError::IllegalTransition { .. } => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<PriceError> for ApiError {
    fn from(err: PriceError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// Render any rejection as `{error, message?}`
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let api_error = if let Some(e) = err.find::<ApiError>() {
        e.clone()
    } else if err.is_not_found() {
        ApiError::NotFound("Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        ApiError::BadRequest(format!("Invalid request body: {}", e))
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        ApiError::BadRequest(e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(warp::reply::with_status(
            warp::reply::json(&json!({ "error": "Method not allowed" })),
            StatusCode::METHOD_NOT_ALLOWED,
        ));
    } else {
        ApiError::Internal(format!("Unhandled rejection: {:?}", err))
    };

    api_error.log();
    Ok(api_error.into_reply())
}
