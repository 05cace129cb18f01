//! Chain access layer
//!
//! - `abi`: contract ABIs and calldata encode/decode helpers
//! - `client`: `ChainReader` / `TransactionSender` traits and their ethers implementations
//! - `confirm`: bounded receipt polling with exponential backoff

pub mod abi;
pub mod client;
pub mod confirm;

#[cfg(test)]
pub mod mock;

use ethers::types::H256;
use thiserror::Error;

pub use client::{ChainReader, EvmReader, LocalSigner, TransactionSender, TxRequest};
pub use confirm::{wait_for_confirmation, ConfirmationPolicy};

/// Lỗi khi tương tác với blockchain
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// RPC request failed
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Read-only contract call (or simulation) failed
    #[error("Contract call failed: {0}")]
    Call(String),

    /// Transaction could not be submitted
    #[error("Failed to send transaction: {0}")]
    Send(String),

    /// Transaction was mined with status 0
    #[error("Transaction {0:?} reverted")]
    Reverted(H256),

    /// Receipt did not show up in time
    #[error("Timed out after {waited_secs}s waiting for transaction {hash:?}")]
    Timeout { hash: H256, waited_secs: u64 },

    /// Encoding or decoding failed
    #[error("ABI error: {0}")]
    Abi(String),

    /// Signing key could not be loaded
    #[error("Signer error: {0}")]
    Signer(String),
}

impl ChainError {
    /// Failures that come from the node or the network rather than from the transaction itself
    pub fn is_connection_error(&self) -> bool {
        matches!(self, ChainError::Rpc(_) | ChainError::Timeout { .. })
    }
}
