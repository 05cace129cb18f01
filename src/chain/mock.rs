//! Mocks cho các chain trait, chỉ dùng trong test

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::types::{
    Address, Bytes, Filter, Log, Transaction, TransactionReceipt, H256, U256, U64,
};
use mockall::mock;

use super::{ChainError, ChainReader, TransactionSender, TxRequest};

mock! {
    pub Reader {}

    #[async_trait]
    impl ChainReader for Reader {
        async fn call(&self, to: Address, data: Bytes, from: Option<Address>) -> Result<Bytes, ChainError>;
        async fn native_balance(&self, owner: Address) -> Result<U256, ChainError>;
        async fn block_number(&self) -> Result<u64, ChainError>;
        async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ChainError>;
        async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, ChainError>;
        async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError>;
    }
}

mock! {
    pub Sender {}

    #[async_trait]
    impl TransactionSender for Sender {
        fn address(&self) -> Address;
        async fn send(&self, request: TxRequest) -> Result<H256, ChainError>;
    }
}

/// Build a mined receipt
pub fn receipt(hash: H256, status: u64, block: u64, logs: Vec<Log>) -> TransactionReceipt {
    TransactionReceipt {
        transaction_hash: hash,
        status: Some(U64::from(status)),
        block_number: Some(U64::from(block)),
        logs,
        ..Default::default()
    }
}

/// ABI-encoded `address` return value
pub fn address_word(address: Address) -> Bytes {
    Bytes::from(encode(&[Token::Address(address)]))
}

/// ABI-encoded `uint` return value
pub fn uint_word(value: U256) -> Bytes {
    Bytes::from(encode(&[Token::Uint(value)]))
}

/// First four bytes of calldata
pub fn selector_of(data: &Bytes) -> [u8; 4] {
    let mut selector = [0u8; 4];
    if data.len() >= 4 {
        selector.copy_from_slice(&data[..4]);
    }
    selector
}
