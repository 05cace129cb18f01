//! RPC access traits and their ethers-backed implementations
//!
//! Reads go through `ChainReader`; anything that needs a signature goes
//! through `TransactionSender`. Callers supply the sender, so the same
//! orchestration code runs with the operator key or any other signer.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, Bytes, Filter, Log, Transaction, TransactionReceipt, TransactionRequest, H256, U256,
};
use tracing::{debug, info};

use super::ChainError;

/// A transaction to be signed and broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    /// Target contract
    pub to: Address,
    /// Calldata
    pub data: Bytes,
    /// Native value attached to the call
    pub value: U256,
}

impl TxRequest {
    pub fn new(to: Address, data: Bytes) -> Self {
        Self {
            to,
            data,
            value: U256::zero(),
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

/// Read-only chain access
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// `eth_call` against `to`, optionally from a given sender (used for simulation)
    async fn call(&self, to: Address, data: Bytes, from: Option<Address>) -> Result<Bytes, ChainError>;

    /// Native balance of an address
    async fn native_balance(&self, owner: Address) -> Result<U256, ChainError>;

    /// Latest block number
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Receipt of a mined transaction, None while pending
    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ChainError>;

    /// Transaction by hash
    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, ChainError>;

    /// Logs matching a filter
    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError>;
}

/// Signing capability
#[async_trait]
pub trait TransactionSender: Send + Sync {
    /// Address transactions are sent from
    fn address(&self) -> Address;

    /// Sign and broadcast, returning the transaction hash
    async fn send(&self, request: TxRequest) -> Result<H256, ChainError>;
}

/// `ChainReader` over an HTTP JSON-RPC provider
#[derive(Clone)]
pub struct EvmReader {
    provider: Arc<Provider<Http>>,
}

impl EvmReader {
    /// Create a reader for an RPC endpoint
    pub fn connect(rpc_url: &str) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::Rpc(format!("Invalid RPC URL {}: {}", rpc_url, e)))?;
        debug!("Created HTTP provider for {}", rpc_url);

        Ok(Self {
            provider: Arc::new(provider),
        })
    }
}

fn rpc_error(context: &str, e: impl std::fmt::Display) -> ChainError {
    ChainError::Rpc(format!("{}: {}", context, e))
}

#[async_trait]
impl ChainReader for EvmReader {
    async fn call(&self, to: Address, data: Bytes, from: Option<Address>) -> Result<Bytes, ChainError> {
        let mut request = TransactionRequest::new().to(to).data(data);
        if let Some(from) = from {
            request = request.from(from);
        }
        let tx: TypedTransaction = request.into();

        self.provider
            .call(&tx, None)
            .await
            .map_err(|e| ChainError::Call(e.to_string()))
    }

    async fn native_balance(&self, owner: Address) -> Result<U256, ChainError> {
        self.provider
            .get_balance(owner, None)
            .await
            .map_err(|e| rpc_error("eth_getBalance", e))
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| rpc_error("eth_blockNumber", e))
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ChainError> {
        self.provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| rpc_error("eth_getTransactionReceipt", e))
    }

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, ChainError> {
        self.provider
            .get_transaction(hash)
            .await
            .map_err(|e| rpc_error("eth_getTransactionByHash", e))
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError> {
        self.provider
            .get_logs(filter)
            .await
            .map_err(|e| rpc_error("eth_getLogs", e))
    }
}

/// `TransactionSender` backed by a local private key
pub struct LocalSigner {
    client: Arc<SignerMiddleware<Provider<Http>, LocalWallet>>,
}

impl LocalSigner {
    /// Build a signer for `rpc_url` from a hex private key (with or without `0x`)
    pub async fn connect(rpc_url: &str, private_key: &str) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::Rpc(format!("Invalid RPC URL {}: {}", rpc_url, e)))?;

        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| rpc_error("eth_chainId", e))?
            .as_u64();

        let key = private_key.trim();
        let key = key.strip_prefix("0x").unwrap_or(key);
        let wallet = key
            .parse::<LocalWallet>()
            .map_err(|e| ChainError::Signer(format!("Invalid private key: {}", e)))?
            .with_chain_id(chain_id);

        info!("Signer {:?} ready on chain {}", wallet.address(), chain_id);

        Ok(Self {
            client: Arc::new(SignerMiddleware::new(provider, wallet)),
        })
    }
}

#[async_trait]
impl TransactionSender for LocalSigner {
    fn address(&self) -> Address {
        self.client.address()
    }

    async fn send(&self, request: TxRequest) -> Result<H256, ChainError> {
        let tx = TransactionRequest::new()
            .from(self.address())
            .to(request.to)
            .data(request.data)
            .value(request.value);

        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| ChainError::Send(e.to_string()))?;

        let hash = pending.tx_hash();
        debug!("Broadcast transaction {:?} to {:?}", hash, request.to);
        Ok(hash)
    }
}
