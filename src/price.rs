//! ETH/USD spot price
//!
//! `CoinGeckoFeed` calls the simple-price endpoint; `PriceTracker` caches the
//! last quote and refreshes it on an interval. A failed refresh keeps the
//! previous quote.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PriceFeedConfig;

/// Lỗi khi lấy giá
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriceError {
    /// Transport failure or non-2xx status
    #[error("Failed to fetch ETH price")]
    Fetch,

    /// `ethereum.usd` missing or not a number
    #[error("Invalid price data")]
    InvalidData,
}

/// Extract `ethereum.usd` from a simple-price response
pub fn parse_price(body: &Value) -> Result<f64, PriceError> {
    body.get("ethereum")
        .and_then(|eth| eth.get("usd"))
        .and_then(Value::as_f64)
        .filter(|price| price.is_finite())
        .ok_or(PriceError::InvalidData)
}

/// Nguồn giá ETH/USD
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn eth_usd(&self) -> Result<f64, PriceError>;
}

/// CoinGecko simple-price client
pub struct CoinGeckoFeed {
    client: Client,
    url: String,
}

impl CoinGeckoFeed {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
        }
    }

    pub fn from_config(config: &PriceFeedConfig) -> Self {
        Self::new(&config.url)
    }
}

#[async_trait]
impl PriceSource for CoinGeckoFeed {
    async fn eth_usd(&self) -> Result<f64, PriceError> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            warn!("Price request failed: {}", e);
            PriceError::Fetch
        })?;

        if !response.status().is_success() {
            warn!("Price endpoint returned {}", response.status());
            return Err(PriceError::Fetch);
        }

        let body: Value = response.json().await.map_err(|e| {
            warn!("Price response is not JSON: {}", e);
            PriceError::InvalidData
        })?;
        parse_price(&body)
    }
}

/// Cached quote
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub usd: f64,
    pub updated_at: DateTime<Utc>,
}

/// Giữ giá mới nhất và refresh định kỳ
pub struct PriceTracker {
    source: Arc<dyn PriceSource>,
    latest: RwLock<Option<PriceQuote>>,
}

impl PriceTracker {
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        Self {
            source,
            latest: RwLock::new(None),
        }
    }

    pub async fn latest(&self) -> Option<PriceQuote> {
        *self.latest.read().await
    }

    /// Fetch now. On failure the cached quote is left untouched.
    pub async fn refresh(&self) -> Result<PriceQuote, PriceError> {
        let usd = self.source.eth_usd().await?;
        let quote = PriceQuote {
            usd,
            updated_at: Utc::now(),
        };
        *self.latest.write().await = Some(quote);
        debug!("ETH price updated: ${:.2}", usd);
        Ok(quote)
    }

    /// Cached quote, fetching once if nothing is cached yet
    pub async fn current(&self) -> Result<PriceQuote, PriceError> {
        match self.latest().await {
            Some(quote) => Ok(quote),
            None => self.refresh().await,
        }
    }

    /// Refresh immediately, then every `interval`
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        info!("Price tracker refreshing every {}s", interval.as_secs());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh().await {
                    warn!("Price refresh failed: {}", e);
                }
            }
        })
    }
}
