//! Waiting for transaction receipts
//!
//! Polling is bounded by a deadline and backs off exponentially between
//! attempts. This only waits; it never re-sends a transaction.

use std::time::{Duration, Instant};

use ethers::types::{TransactionReceipt, H256, U64};
use tracing::{debug, warn};

use super::{ChainError, ChainReader};
use crate::config::ConfirmationConfig;

/// How long and how often to poll for a receipt
#[derive(Debug, Clone)]
pub struct ConfirmationPolicy {
    /// Give up after this long
    pub timeout: Duration,

    /// Thời gian chờ cơ bản (ms)
    pub base_delay_ms: u64,

    /// Hệ số nhân cho exponential backoff
    pub backoff_factor: f64,

    /// Thời gian chờ tối đa (ms)
    pub max_delay_ms: u64,

    /// Có thêm jitter không
    pub add_jitter: bool,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self::from_config(&ConfirmationConfig::default())
    }
}

impl ConfirmationPolicy {
    pub fn from_config(config: &ConfirmationConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            base_delay_ms: config.initial_interval_ms,
            backoff_factor: config.backoff_factor,
            max_delay_ms: config.max_interval_ms,
            add_jitter: config.add_jitter,
        }
    }

    /// Millisecond-scale policy for tests and local devnets
    pub fn fast() -> Self {
        Self {
            timeout: Duration::from_millis(200),
            base_delay_ms: 1,
            backoff_factor: 1.5,
            max_delay_ms: 5,
            add_jitter: false,
        }
    }

    /// Tính thời gian chờ cho lần poll tiếp theo
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let backoff = self.base_delay_ms as f64 * self.backoff_factor.powi(attempt as i32);
        let backoff = backoff.min(self.max_delay_ms as f64);

        // Thêm jitter trong khoảng ±20%
        let backoff = if self.add_jitter {
            backoff * (0.8 + rand::random::<f64>() * 0.4)
        } else {
            backoff
        };

        Duration::from_millis(backoff as u64)
    }
}

/// Poll until the transaction is mined, it reverts, or the deadline passes.
///
/// RPC errors while polling are logged and polling continues until the deadline.
pub async fn wait_for_confirmation(
    reader: &dyn ChainReader,
    hash: H256,
    policy: &ConfirmationPolicy,
) -> Result<TransactionReceipt, ChainError> {
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        match reader.transaction_receipt(hash).await {
            Ok(Some(receipt)) => {
                if receipt.status == Some(U64::zero()) {
                    warn!("Transaction {:?} reverted in block {:?}", hash, receipt.block_number);
                    return Err(ChainError::Reverted(hash));
                }
                debug!(
                    "Transaction {:?} confirmed in block {:?} after {} polls",
                    hash,
                    receipt.block_number,
                    attempt + 1
                );
                return Ok(receipt);
            }
            Ok(None) => {}
            Err(e) => warn!("Receipt poll for {:?} failed: {}", hash, e),
        }

        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            return Err(ChainError::Timeout {
                hash,
                waited_secs: elapsed.as_secs(),
            });
        }

        let delay = policy.calculate_backoff(attempt).min(policy.timeout - elapsed);
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{receipt, MockReader};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_is_capped() {
        let policy = ConfirmationPolicy {
            timeout: Duration::from_secs(60),
            base_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 10_000,
            add_jitter: false,
        };

        assert_eq!(policy.calculate_backoff(0), Duration::from_millis(1000));
        assert_eq!(policy.calculate_backoff(2), Duration::from_millis(4000));
        assert_eq!(policy.calculate_backoff(10), Duration::from_millis(10_000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = ConfirmationPolicy {
            add_jitter: true,
            ..ConfirmationPolicy::default()
        };
        for _ in 0..50 {
            let delay = policy.calculate_backoff(0).as_millis();
            assert!((800..=1200).contains(&delay));
        }
    }

    #[tokio::test]
    async fn test_waits_until_mined() {
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();

        let mut reader = MockReader::new();
        reader.expect_transaction_receipt().times(3).returning(move |hash| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(None)
            } else {
                Ok(Some(receipt(hash, 1, 100, vec![])))
            }
        });

        let hash = H256::repeat_byte(0xaa);
        let mined = wait_for_confirmation(&reader, hash, &ConfirmationPolicy::fast()).await.unwrap();

        assert_eq!(mined.block_number, Some(U64::from(100)));
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_reverted_receipt() {
        let mut reader = MockReader::new();
        reader
            .expect_transaction_receipt()
            .returning(|hash| Ok(Some(receipt(hash, 0, 7, vec![]))));

        let hash = H256::repeat_byte(0xbb);
        let err = wait_for_confirmation(&reader, hash, &ConfirmationPolicy::fast()).await.unwrap_err();
        assert!(matches!(err, ChainError::Reverted(h) if h == hash));
    }

    #[tokio::test]
    async fn test_times_out() {
        let mut reader = MockReader::new();
        reader.expect_transaction_receipt().returning(|_| Ok(None));

        let policy = ConfirmationPolicy {
            timeout: Duration::from_millis(30),
            ..ConfirmationPolicy::fast()
        };
        let err = wait_for_confirmation(&reader, H256::zero(), &policy).await.unwrap_err();
        assert!(matches!(err, ChainError::Timeout { .. }));
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_rpc_errors_keep_polling() {
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();

        let mut reader = MockReader::new();
        reader.expect_transaction_receipt().returning(move |hash| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ChainError::Rpc("connection reset".into()))
            } else {
                Ok(Some(receipt(hash, 1, 5, vec![])))
            }
        });

        assert!(wait_for_confirmation(&reader, H256::zero(), &ConfirmationPolicy::fast()).await.is_ok());
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }
}
