//! Bridge Orchestrator
//!
//! Drives one bridge operation from the source chain:
//! - native asset: `bridgeAsset` paying `value = amount`
//! - ERC-20: `approve(bridge, amount)`, wait for it, then `bridgeAsset`
//! - deposit-and-bridge: `depositGasTokenAndBridge` on the vault-bridge, one transaction
//!
//! Progress is published on the `EventBus`. A confirmed bridge is recorded in
//! the ledger as `pending`; the reconciler completes it once claimed.

use std::sync::Arc;

use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use common::bridge_types::{
    BridgePhase, BridgeProgress, BridgeTransaction, NewBridgeTransaction, ProgressError,
};

use crate::chain::{wait_for_confirmation, ChainError, ChainReader, ConfirmationPolicy, TransactionSender};
use crate::config::ContractAddresses;
use crate::contracts::{BridgeAssetArgs, BridgeContract, Erc20Token, VaultBridgeContract};
use crate::events::EventBus;
use crate::ledger::Ledger;

/// Lỗi trong quá trình bridge
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("Amount must be greater than 0")]
    ZeroAmount,

    /// Contract address left at 0x0 in the config
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Progress(#[from] ProgressError),
}

/// One bridge request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeParams {
    /// Token to bridge; the native sentinel means the gas token
    pub token: Address,
    /// Base units
    pub amount: U256,
    pub source_network: u32,
    pub destination_network: u32,
    pub force_update_global_exit_root: bool,
}

/// Result of a confirmed bridge
#[derive(Debug, Clone)]
pub struct BridgeOutcome {
    pub operation_id: String,
    pub transaction_hash: H256,
    pub block_number: Option<u64>,
    /// From the `BridgeEvent` log, if present
    pub deposit_count: Option<u32>,
    /// Ledger row, None when the write failed
    pub record: Option<BridgeTransaction>,
}

/// Wording of the status messages for each flow
struct Messages {
    success: &'static str,
    failure: &'static str,
}

const BRIDGE_MESSAGES: Messages = Messages {
    success: "Bridge transaction successful!",
    failure: "Bridge failed",
};

const DEPOSIT_MESSAGES: Messages = Messages {
    success: "Deposit and bridge successful!",
    failure: "Deposit and bridge failed",
};

/// Điều phối bridge từ source chain
pub struct BridgeOrchestrator {
    reader: Arc<dyn ChainReader>,
    ledger: Arc<dyn Ledger>,
    bridge: BridgeContract,
    vault_bridge: VaultBridgeContract,
    /// `destinationAddress` of every bridge call
    vault: Address,
    native_token: Address,
    policy: ConfirmationPolicy,
    events: EventBus,
}

impl BridgeOrchestrator {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        ledger: Arc<dyn Ledger>,
        contracts: &ContractAddresses,
        policy: ConfirmationPolicy,
        events: EventBus,
    ) -> Self {
        Self {
            reader,
            ledger,
            bridge: BridgeContract::new(contracts.bridge),
            vault_bridge: VaultBridgeContract::new(contracts.vault_bridge),
            vault: contracts.vault,
            native_token: contracts.native_token,
            policy,
            events,
        }
    }

    pub fn is_native(&self, token: Address) -> bool {
        token == self.native_token
    }

    fn emit(&self, progress: &mut BridgeProgress, phase: BridgePhase, message: &str, tx_hash: Option<H256>) {
        match progress.advance(phase, message, tx_hash.map(|h| format!("{:?}", h))) {
            Ok(update) => {
                self.events.publish(update);
            }
            Err(e) => warn!("[{}] {}", progress.operation_id(), e),
        }
    }

    fn fail(&self, progress: &mut BridgeProgress, messages: &Messages, err: &BridgeError) {
        error!("[{}] {}: {}", progress.operation_id(), messages.failure, err);
        self.emit(progress, BridgePhase::Error, &format!("{}: {}", messages.failure, err), None);
    }

    /// Bridge `params.amount` of `params.token` to the vault on the destination network
    pub async fn bridge_asset(
        &self,
        params: &BridgeParams,
        sender: &dyn TransactionSender,
    ) -> Result<BridgeOutcome, BridgeError> {
        let mut progress = BridgeProgress::new(Uuid::new_v4().to_string());
        info!(
            "[{}] Bridging {} of {:?} from network {} to {}",
            progress.operation_id(),
            params.amount,
            params.token,
            params.source_network,
            params.destination_network
        );

        match self.run_bridge(&mut progress, params, sender).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.fail(&mut progress, &BRIDGE_MESSAGES, &e);
                Err(e)
            }
        }
    }

    async fn run_bridge(
        &self,
        progress: &mut BridgeProgress,
        params: &BridgeParams,
        sender: &dyn TransactionSender,
    ) -> Result<BridgeOutcome, BridgeError> {
        if params.amount.is_zero() {
            return Err(BridgeError::ZeroAmount);
        }
        if self.bridge.address.is_zero() {
            return Err(BridgeError::NotConfigured("BRIDGE_ADDRESS"));
        }

        let native = self.is_native(params.token);
        if native {
            self.emit(progress, BridgePhase::Bridging, "Preparing bridge transaction...", None);
        } else {
            self.approve(progress, params, sender).await?;
            self.emit(progress, BridgePhase::Bridging, "Sending bridge transaction...", None);
        }

        let args = BridgeAssetArgs {
            destination_network: params.destination_network,
            destination_address: self.vault,
            amount: params.amount,
            token: params.token,
            force_update_global_exit_root: params.force_update_global_exit_root,
            permit_data: Bytes::default(),
        };
        let value = if native { params.amount } else { U256::zero() };
        let request = self.bridge.bridge_asset_request(&args, value)?;

        let hash = sender.send(request).await?;
        self.emit(
            progress,
            BridgePhase::Bridging,
            "Bridge transaction submitted! Waiting for confirmation...",
            Some(hash),
        );

        let receipt = wait_for_confirmation(self.reader.as_ref(), hash, &self.policy).await?;
        let outcome = self
            .finish(progress, sender.address(), params, params.token, hash, &receipt)
            .await;

        self.emit(progress, BridgePhase::Success, BRIDGE_MESSAGES.success, Some(hash));
        Ok(outcome)
    }

    /// Approve the bridge for `amount` and wait until the approval is mined
    async fn approve(
        &self,
        progress: &mut BridgeProgress,
        params: &BridgeParams,
        sender: &dyn TransactionSender,
    ) -> Result<(), BridgeError> {
        self.emit(progress, BridgePhase::Approving, "Approving token for bridge...", None);

        let token = Erc20Token::new(params.token, self.reader.clone());
        let hash = sender
            .send(token.approve_request(self.bridge.address, params.amount)?)
            .await?;
        self.emit(
            progress,
            BridgePhase::Approving,
            "Approval submitted! Waiting for confirmation...",
            Some(hash),
        );

        wait_for_confirmation(self.reader.as_ref(), hash, &self.policy).await?;
        self.emit(
            progress,
            BridgePhase::Approving,
            "Approval confirmed! Preparing bridge transaction...",
            Some(hash),
        );
        Ok(())
    }

    /// Deposit the gas token into the vault-bridge and bridge it in one transaction
    pub async fn deposit_and_bridge(
        &self,
        params: &BridgeParams,
        sender: &dyn TransactionSender,
    ) -> Result<BridgeOutcome, BridgeError> {
        let mut progress = BridgeProgress::new(Uuid::new_v4().to_string());
        info!(
            "[{}] Deposit and bridge {} to network {}",
            progress.operation_id(),
            params.amount,
            params.destination_network
        );

        match self.run_deposit(&mut progress, params, sender).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.fail(&mut progress, &DEPOSIT_MESSAGES, &e);
                Err(e)
            }
        }
    }

    async fn run_deposit(
        &self,
        progress: &mut BridgeProgress,
        params: &BridgeParams,
        sender: &dyn TransactionSender,
    ) -> Result<BridgeOutcome, BridgeError> {
        if params.amount.is_zero() {
            return Err(BridgeError::ZeroAmount);
        }
        // gửi value tới 0x0 là đốt ETH
        if self.vault_bridge.address.is_zero() {
            return Err(BridgeError::NotConfigured("VAULT_BRIDGE_ADDRESS"));
        }

        self.emit(progress, BridgePhase::Bridging, "Preparing deposit and bridge transaction...", None);
        let request = self.vault_bridge.deposit_and_bridge_request(
            self.vault,
            params.destination_network,
            params.force_update_global_exit_root,
            params.amount,
        )?;

        self.emit(progress, BridgePhase::Bridging, "Sending deposit and bridge transaction...", None);
        let hash = sender.send(request).await?;
        self.emit(
            progress,
            BridgePhase::Bridging,
            "Transaction submitted! Waiting for confirmation...",
            Some(hash),
        );

        let receipt = wait_for_confirmation(self.reader.as_ref(), hash, &self.policy).await?;
        // luôn ghi token là native sentinel
        let outcome = self
            .finish(progress, sender.address(), params, self.native_token, hash, &receipt)
            .await;

        self.emit(progress, BridgePhase::Success, DEPOSIT_MESSAGES.success, Some(hash));
        Ok(outcome)
    }

    /// Read the deposit count and write the pending ledger row
    async fn finish(
        &self,
        progress: &BridgeProgress,
        user: Address,
        params: &BridgeParams,
        token: Address,
        hash: H256,
        receipt: &TransactionReceipt,
    ) -> BridgeOutcome {
        let deposit_count = BridgeContract::deposit_count_from_receipt(receipt);
        match deposit_count {
            Some(count) => debug!("[{}] Deposit count {}", progress.operation_id(), count),
            None => warn!("[{}] No BridgeEvent in receipt of {:?}", progress.operation_id(), hash),
        }

        let row = NewBridgeTransaction::pending(
            format!("{:?}", user),
            params.amount.to_string(),
            format!("{:?}", token),
            params.source_network,
            params.destination_network,
            format!("{:?}", hash),
            deposit_count.map(u64::from),
        );

        // lỗi ghi ledger không làm hỏng bridge
        let record = match self.ledger.insert_bridge_transaction(row).await {
            Ok(record) => Some(record),
            Err(e) => {
                error!("[{}] Failed to record bridge transaction: {}", progress.operation_id(), e);
                None
            }
        };

        BridgeOutcome {
            operation_id: progress.operation_id().to_string(),
            transaction_hash: hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
            deposit_count,
            record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::abi;
    use crate::chain::mock::{receipt, selector_of, MockReader, MockSender};
    use crate::chain::TxRequest;
    use crate::ledger::mock::MockLedger;
    use crate::ledger::{LedgerError, MemoryLedger};
    use common::bridge_types::{BridgeUpdate, TransactionStatus};
    use ethers::abi::{encode, Token};
    use ethers::types::Log;
    use std::sync::Mutex;
    use tokio::sync::broadcast::Receiver;

    const TOKEN: Address = Address::repeat_byte(0x7b);
    const USER: Address = Address::repeat_byte(0x11);

    fn contracts() -> ContractAddresses {
        ContractAddresses {
            bridge: Address::repeat_byte(0x52),
            vault_bridge: Address::repeat_byte(0xbb),
            vault: Address::repeat_byte(0x5d),
            native_token: Address::zero(),
            weth: TOKEN,
            usdc: Address::repeat_byte(0x1c),
            bank: None,
        }
    }

    fn params(token: Address) -> BridgeParams {
        BridgeParams {
            token,
            amount: U256::exp10(18),
            source_network: 0,
            destination_network: 29,
            force_update_global_exit_root: true,
        }
    }

    fn bridge_event_log(deposit_count: u32) -> Log {
        let data = encode(&[
            Token::Uint(U256::zero()),
            Token::Uint(U256::zero()),
            Token::Address(Address::zero()),
            Token::Uint(U256::from(29u32)),
            Token::Address(Address::repeat_byte(0x5d)),
            Token::Uint(U256::exp10(18)),
            Token::Bytes(vec![]),
            Token::Uint(U256::from(deposit_count)),
        ]);
        Log {
            topics: vec![abi::bridge_event_topic().unwrap()],
            data: Bytes::from(data),
            ..Default::default()
        }
    }

    /// Every receipt is mined; each carries a BridgeEvent with count 7
    fn mined_reader() -> MockReader {
        let mut reader = MockReader::new();
        reader
            .expect_transaction_receipt()
            .returning(|hash| Ok(Some(receipt(hash, 1, 42, vec![bridge_event_log(7)]))));
        reader
    }

    /// Sender that records every request and returns sequential hashes
    fn recording_sender(sent: Arc<Mutex<Vec<TxRequest>>>) -> MockSender {
        let mut sender = MockSender::new();
        sender.expect_address().return_const(USER);
        sender.expect_send().returning(move |request| {
            let mut sent = sent.lock().unwrap();
            sent.push(request);
            Ok(H256::from_low_u64_be(sent.len() as u64))
        });
        sender
    }

    fn drain(rx: &mut Receiver<BridgeUpdate>) -> Vec<BridgeUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }
        updates
    }

    fn phases(updates: &[BridgeUpdate]) -> Vec<BridgePhase> {
        let mut phases: Vec<BridgePhase> = updates.iter().map(|u| u.phase).collect();
        phases.dedup();
        phases
    }

    #[tokio::test]
    async fn test_erc20_bridge_approves_first() {
        // Arrange
        let ledger = Arc::new(MemoryLedger::new());
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let orchestrator = BridgeOrchestrator::new(
            Arc::new(mined_reader()),
            ledger.clone(),
            &contracts(),
            ConfirmationPolicy::fast(),
            events,
        );
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sender = recording_sender(sent.clone());

        // Act
        let outcome = orchestrator.bridge_asset(&params(TOKEN), &sender).await.unwrap();

        // Assert
        let updates = drain(&mut rx);
        assert_eq!(
            phases(&updates),
            vec![BridgePhase::Approving, BridgePhase::Bridging, BridgePhase::Success]
        );
        assert_eq!(updates[0].message, "Approving token for bridge...");
        assert_eq!(updates.last().unwrap().message, "Bridge transaction successful!");

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, TOKEN);
        assert_eq!(selector_of(&sent[0].data), abi::selector(abi::erc20().unwrap(), "approve").unwrap());
        assert_eq!(sent[1].to, contracts().bridge);
        assert!(sent[1].value.is_zero());

        assert_eq!(outcome.deposit_count, Some(7));
        let row = ledger
            .get_by_hash(&format!("{:?}", outcome.transaction_hash))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, TransactionStatus::Pending);
        assert_eq!(row.amount, "1000000000000000000");
        assert_eq!(row.deposit_count, Some(7));
    }

    #[tokio::test]
    async fn test_native_bridge_sends_value() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let orchestrator = BridgeOrchestrator::new(
            Arc::new(mined_reader()),
            Arc::new(MemoryLedger::new()),
            &contracts(),
            ConfirmationPolicy::fast(),
            events,
        );
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sender = recording_sender(sent.clone());

        orchestrator.bridge_asset(&params(Address::zero()), &sender).await.unwrap();

        let updates = drain(&mut rx);
        assert_eq!(phases(&updates), vec![BridgePhase::Bridging, BridgePhase::Success]);
        assert_eq!(updates[0].message, "Preparing bridge transaction...");

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].value, U256::exp10(18));

        let args = abi::decode_call(abi::bridge().unwrap(), "bridgeAsset", &sent[0].data)
            .unwrap()
            .unwrap();
        assert_eq!(args[1], Token::Address(contracts().vault));
        assert_eq!(args[5], Token::Bytes(vec![]));
    }

    #[tokio::test]
    async fn test_ledger_failure_is_swallowed() {
        let mut ledger = MockLedger::new();
        ledger
            .expect_insert_bridge_transaction()
            .times(1)
            .returning(|_| Err(LedgerError::Request("connection refused".into())));

        let orchestrator = BridgeOrchestrator::new(
            Arc::new(mined_reader()),
            Arc::new(ledger),
            &contracts(),
            ConfirmationPolicy::fast(),
            EventBus::default(),
        );
        let sender = recording_sender(Arc::new(Mutex::new(Vec::new())));

        let outcome = orchestrator.bridge_asset(&params(Address::zero()), &sender).await.unwrap();
        assert!(outcome.record.is_none());
        assert_eq!(outcome.block_number, Some(42));
    }

    #[tokio::test]
    async fn test_send_failure_publishes_error() {
        let events = EventBus::default();
        let mut rx = events.subscribe();

        let mut reader = MockReader::new();
        reader.expect_transaction_receipt().never();
        let mut ledger = MockLedger::new();
        ledger.expect_insert_bridge_transaction().never();

        let orchestrator = BridgeOrchestrator::new(
            Arc::new(reader),
            Arc::new(ledger),
            &contracts(),
            ConfirmationPolicy::fast(),
            events,
        );

        let mut sender = MockSender::new();
        sender.expect_address().return_const(USER);
        sender
            .expect_send()
            .times(1)
            .returning(|_| Err(ChainError::Send("user rejected transaction".into())));

        let err = orchestrator.bridge_asset(&params(TOKEN), &sender).await.unwrap_err();
        assert!(matches!(err, BridgeError::Chain(ChainError::Send(_))));

        let updates = drain(&mut rx);
        let last = updates.last().unwrap();
        assert_eq!(last.phase, BridgePhase::Error);
        assert!(last.message.starts_with("Bridge failed: "));
        assert!(last.message.contains("user rejected transaction"));
    }

    #[tokio::test]
    async fn test_reverted_bridge_is_error() {
        let events = EventBus::default();
        let mut rx = events.subscribe();

        let mut reader = MockReader::new();
        reader
            .expect_transaction_receipt()
            .returning(|hash| Ok(Some(receipt(hash, 0, 42, vec![]))));

        let orchestrator = BridgeOrchestrator::new(
            Arc::new(reader),
            Arc::new(MemoryLedger::new()),
            &contracts(),
            ConfirmationPolicy::fast(),
            events,
        );
        let sender = recording_sender(Arc::new(Mutex::new(Vec::new())));

        let err = orchestrator.bridge_asset(&params(Address::zero()), &sender).await.unwrap_err();
        assert!(matches!(err, BridgeError::Chain(ChainError::Reverted(_))));
        assert_eq!(drain(&mut rx).last().unwrap().phase, BridgePhase::Error);
    }

    #[tokio::test]
    async fn test_zero_amount_sends_nothing() {
        let mut sender = MockSender::new();
        sender.expect_send().never();
        sender.expect_address().return_const(USER);

        let orchestrator = BridgeOrchestrator::new(
            Arc::new(MockReader::new()),
            Arc::new(MemoryLedger::new()),
            &contracts(),
            ConfirmationPolicy::fast(),
            EventBus::default(),
        );
        let mut zero = params(TOKEN);
        zero.amount = U256::zero();

        let err = orchestrator.bridge_asset(&zero, &sender).await.unwrap_err();
        assert!(matches!(err, BridgeError::ZeroAmount));
    }

    #[tokio::test]
    async fn test_deposit_and_bridge() {
        let ledger = Arc::new(MemoryLedger::new());
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let orchestrator = BridgeOrchestrator::new(
            Arc::new(mined_reader()),
            ledger.clone(),
            &contracts(),
            ConfirmationPolicy::fast(),
            events,
        );
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sender = recording_sender(sent.clone());

        let outcome = orchestrator.deposit_and_bridge(&params(TOKEN), &sender).await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, contracts().vault_bridge);
        assert_eq!(sent[0].value, U256::exp10(18));

        let updates = drain(&mut rx);
        assert_eq!(phases(&updates), vec![BridgePhase::Bridging, BridgePhase::Success]);
        assert_eq!(updates.last().unwrap().message, "Deposit and bridge successful!");

        // token is recorded as the native sentinel
        let row = outcome.record.unwrap();
        assert_eq!(row.token_address, format!("{:?}", Address::zero()));
        assert_eq!(row.deposit_count, Some(7));
    }

    #[tokio::test]
    async fn test_deposit_without_vault_bridge_sends_nothing() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let mut ledger = MockLedger::new();
        ledger.expect_insert_bridge_transaction().never();

        let mut unconfigured = contracts();
        unconfigured.vault_bridge = Address::zero();
        let orchestrator = BridgeOrchestrator::new(
            Arc::new(MockReader::new()),
            Arc::new(ledger),
            &unconfigured,
            ConfirmationPolicy::fast(),
            events,
        );
        let mut sender = MockSender::new();
        sender.expect_address().return_const(USER);
        sender.expect_send().never();

        let err = orchestrator.deposit_and_bridge(&params(TOKEN), &sender).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotConfigured("VAULT_BRIDGE_ADDRESS")));

        let updates = drain(&mut rx);
        assert_eq!(phases(&updates), vec![BridgePhase::Error]);
        assert_eq!(
            updates[0].message,
            "Deposit and bridge failed: VAULT_BRIDGE_ADDRESS is not configured"
        );
    }
}
