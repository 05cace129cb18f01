//! Claim reconciliation job
//!
//! Watches mint `Transfer(0x0 → claim recipient)` logs of the bridged token on
//! the destination chain. Each one comes from a `claimAsset` transaction whose
//! global index, masked to 64 bits, is the deposit count stored by the
//! orchestrator. Matching pending rows are completed and the claimed value is
//! pushed into the vault for the depositor.

use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, Filter, Log, H256, U256};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chain::abi;
use crate::chain::{wait_for_confirmation, ChainError, ChainReader, ConfirmationPolicy, TransactionSender};
use crate::config::{parse_address, ReconcilerConfig};
use crate::contracts::{BridgeContract, PayoutContract};
use crate::ledger::Ledger;

/// Summary of one scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub from_block: u64,
    pub to_block: u64,
    /// Transfer logs found
    pub transfers: usize,
    /// Transfers that came from a `claimAsset` call
    pub claims: usize,
    /// Ledger rows flipped to completed
    pub completed: usize,
    /// Payouts confirmed on chain
    pub payouts: usize,
}

/// Đối soát claim với ledger
pub struct Reconciler {
    reader: Arc<dyn ChainReader>,
    ledger: Arc<dyn Ledger>,
    /// Operator key; without it rows are completed but nothing is paid out
    sender: Option<Arc<dyn TransactionSender>>,
    token: Address,
    payout: PayoutContract,
    policy: ConfirmationPolicy,
    /// Next block to scan
    next_block: Mutex<u64>,
}

impl Reconciler {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        ledger: Arc<dyn Ledger>,
        sender: Option<Arc<dyn TransactionSender>>,
        token: Address,
        claim_recipient: Address,
        from_block: u64,
        policy: ConfirmationPolicy,
    ) -> Self {
        Self {
            reader,
            ledger,
            sender,
            token,
            payout: PayoutContract::new(claim_recipient),
            policy,
            next_block: Mutex::new(from_block),
        }
    }

    pub fn from_config(
        config: &ReconcilerConfig,
        reader: Arc<dyn ChainReader>,
        ledger: Arc<dyn Ledger>,
        sender: Option<Arc<dyn TransactionSender>>,
        policy: ConfirmationPolicy,
    ) -> anyhow::Result<Self> {
        Ok(Self::new(
            reader,
            ledger,
            sender,
            parse_address("reconciler.token_address", &config.token_address)?,
            parse_address("reconciler.claim_recipient", &config.claim_recipient)?,
            config.from_block,
            policy,
        ))
    }

    fn transfer_filter(&self, from_block: u64, to_block: u64) -> Filter {
        Filter::new()
            .address(self.token)
            .event("Transfer(address,address,uint256)")
            .topic1(H256::from(Address::zero()))
            .topic2(H256::from(self.payout.address))
            .from_block(from_block)
            .to_block(to_block)
    }

    /// Scan from the cursor to the latest block.
    ///
    /// The cursor only moves when every transfer in the range was either
    /// written to the ledger or is permanently not a claim. RPC and ledger
    /// failures keep it in place so the range is scanned again.
    pub async fn run_once(&self) -> Result<ReconcileReport, ChainError> {
        let mut next_block = self.next_block.lock().await;
        let latest = self.reader.block_number().await?;

        let mut report = ReconcileReport {
            from_block: *next_block,
            to_block: latest,
            ..Default::default()
        };
        if *next_block > latest {
            debug!("No new blocks since {}", latest);
            return Ok(report);
        }

        info!("Fetching claim transfers from block {} to {}", *next_block, latest);
        let logs = self.reader.logs(&self.transfer_filter(*next_block, latest)).await?;
        report.transfers = logs.len();

        let mut retry = false;
        for log in &logs {
            match self.reconcile_log(log, &mut report).await {
                Ok(()) => {}
                Err(ReconcileStep::Retry(e)) => {
                    error!("Reconciling {:?} failed, will rescan: {}", log.transaction_hash, e);
                    retry = true;
                }
                Err(ReconcileStep::Skip(e)) => {
                    warn!("Skipping transfer in {:?}: {}", log.transaction_hash, e);
                }
            }
        }

        if retry {
            warn!("Cursor held at block {}", *next_block);
        } else {
            *next_block = latest + 1;
        }

        info!(
            "Reconciled blocks {}..={}: {} transfers, {} claims, {} rows completed, {} payouts",
            report.from_block, report.to_block, report.transfers, report.claims, report.completed, report.payouts
        );
        Ok(report)
    }

    async fn reconcile_log(&self, log: &Log, report: &mut ReconcileReport) -> Result<(), ReconcileStep> {
        let value = transfer_value(log).ok_or_else(|| {
            ReconcileStep::Skip(ChainError::Abi("undecodable Transfer log".to_string()))
        })?;
        let hash = match log.transaction_hash {
            Some(hash) => hash,
            None => return Ok(()),
        };

        let tx = match self
            .reader
            .transaction(hash)
            .await
            .map_err(ReconcileStep::from_lookup)?
        {
            Some(tx) => tx,
            None => {
                debug!("Transaction {:?} not found", hash);
                return Ok(());
            }
        };

        let claim = match BridgeContract::decode_claim_asset(&tx.input).map_err(ReconcileStep::Skip)? {
            Some(claim) => claim,
            None => {
                debug!("Transaction {:?} is not a claimAsset call", hash);
                return Ok(());
            }
        };
        report.claims += 1;

        let deposit_count = claim.masked_deposit_count();
        debug!("Claim {:?}: global index {}, deposit count {}", hash, claim.global_index, deposit_count);

        let rows = self
            .ledger
            .complete_by_deposit_count(deposit_count)
            .await
            .map_err(|e| ReconcileStep::Retry(e.to_string()))?;
        if rows.is_empty() {
            debug!("Deposit count {} has no pending row", deposit_count);
            return Ok(());
        }
        report.completed += rows.len();

        if rows.len() > 1 {
            // cùng một deposit count khớp nhiều row, chỉ trả cho row đầu
            warn!(
                "Deposit count {} is ambiguous: {} rows completed, paying out to {} only",
                deposit_count,
                rows.len(),
                rows[0].user_address
            );
        }

        let user = match rows[0].user_address.parse::<Address>() {
            Ok(user) => user,
            Err(_) => {
                error!("Row {} has an invalid user address {}", rows[0].id, rows[0].user_address);
                return Ok(());
            }
        };

        match self.pay_out(value, user).await {
            Ok(true) => report.payouts += 1,
            Ok(false) => {}
            // row vẫn là completed
            Err(e) => error!("Payout of {} to {:?} failed: {}", value, user, e),
        }
        Ok(())
    }

    /// Wrap any native balance, then `executeToVault(amount, user)`.
    /// Returns false when no operator key is configured.
    async fn pay_out(&self, amount: U256, user: Address) -> Result<bool, ChainError> {
        let sender = match &self.sender {
            Some(sender) => sender,
            None => {
                warn!("OPERATOR_PRIVATE_KEY is not set, skipping payout to {:?}", user);
                return Ok(false);
            }
        };

        let eth_balance = self.reader.native_balance(self.payout.address).await?;
        if !eth_balance.is_zero() {
            info!("Wrapping {} wei held by the payout contract", eth_balance);
            let hash = sender.send(self.payout.wrap_eth_request()?).await?;
            wait_for_confirmation(self.reader.as_ref(), hash, &self.policy).await?;
        }

        info!("Executing vault payout of {} for {:?}", amount, user);
        let hash = sender
            .send(self.payout.execute_to_vault_request(amount, user)?)
            .await?;
        let receipt = wait_for_confirmation(self.reader.as_ref(), hash, &self.policy).await?;
        info!("Payout confirmed in block {:?}", receipt.block_number);
        Ok(true)
    }

    /// Run `run_once` every `interval`, starting now
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        info!("Reconciler running every {}s", interval.as_secs());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    error!("Reconciliation failed: {}", e);
                }
            }
        })
    }
}

enum ReconcileStep {
    /// Not a claim, never will be
    Skip(ChainError),
    /// RPC or ledger failure; rescan the range
    Retry(String),
}

impl ReconcileStep {
    fn from_lookup(err: ChainError) -> Self {
        if err.is_connection_error() {
            ReconcileStep::Retry(err.to_string())
        } else {
            ReconcileStep::Skip(err)
        }
    }
}

/// `value` of a Transfer log
fn transfer_value(log: &Log) -> Option<U256> {
    let erc20 = abi::erc20().ok()?;
    let event = abi::event(erc20, "Transfer").ok()?;
    abi::decode_log(event, log)?
        .params
        .into_iter()
        .find(|param| param.name == "value")
        .and_then(|param| param.value.into_uint())
}
