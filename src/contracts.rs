//! Typed wrappers over the contracts the backend talks to
//!
//! Read methods go through a `ChainReader`. Write methods only build a
//! `TxRequest`; signing and broadcasting is up to the caller's `TransactionSender`.

use std::sync::Arc;

use ethers::abi::{Abi, Token};
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use tracing::debug;

use crate::chain::abi;
use crate::chain::{ChainError, ChainReader, TxRequest};

/// Mask applied to a claim's global index to recover the deposit count
pub const DEPOSIT_COUNT_MASK: u64 = 0xFFFF_FFFF_FFFF_FFFF;

async fn read(
    reader: &dyn ChainReader,
    to: Address,
    abi: &Abi,
    name: &str,
    args: &[Token],
) -> Result<Vec<Token>, ChainError> {
    let data = abi::encode_call(abi, name, args)?;
    let output = reader.call(to, data, None).await?;
    abi::decode_output(abi, name, &output)
}

fn first_address(tokens: Vec<Token>, name: &str) -> Result<Address, ChainError> {
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_address)
        .ok_or_else(|| ChainError::Abi(format!("{} did not return an address", name)))
}

fn first_uint(tokens: Vec<Token>, name: &str) -> Result<U256, ChainError> {
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| ChainError::Abi(format!("{} did not return a uint", name)))
}

fn proof_token(proof: &[H256; 32]) -> Token {
    Token::FixedArray(
        proof
            .iter()
            .map(|node| Token::FixedBytes(node.as_bytes().to_vec()))
            .collect(),
    )
}

/// ERC-20 token
#[derive(Clone)]
pub struct Erc20Token {
    pub address: Address,
    reader: Arc<dyn ChainReader>,
}

impl Erc20Token {
    pub fn new(address: Address, reader: Arc<dyn ChainReader>) -> Self {
        Self { address, reader }
    }

    pub async fn balance_of(&self, owner: Address) -> Result<U256, ChainError> {
        let tokens = read(
            self.reader.as_ref(),
            self.address,
            abi::erc20()?,
            "balanceOf",
            &[Token::Address(owner)],
        )
        .await?;
        first_uint(tokens, "balanceOf")
    }

    pub async fn decimals(&self) -> Result<u8, ChainError> {
        let tokens = read(self.reader.as_ref(), self.address, abi::erc20()?, "decimals", &[]).await?;
        let value = first_uint(tokens, "decimals")?;
        if value > U256::from(u8::MAX) {
            return Err(ChainError::Abi(format!("decimals out of range: {}", value)));
        }
        Ok(value.as_u32() as u8)
    }

    /// `approve(spender, amount)`
    pub fn approve_request(&self, spender: Address, amount: U256) -> Result<TxRequest, ChainError> {
        let data = abi::encode_call(
            abi::erc20()?,
            "approve",
            &[Token::Address(spender), Token::Uint(amount)],
        )?;
        Ok(TxRequest::new(self.address, data))
    }
}

/// Arguments of `bridgeAsset`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeAssetArgs {
    pub destination_network: u32,
    pub destination_address: Address,
    pub amount: U256,
    pub token: Address,
    pub force_update_global_exit_root: bool,
    pub permit_data: Bytes,
}

/// Decoded `claimAsset` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimAssetCall {
    pub global_index: U256,
    pub origin_network: u32,
    pub origin_token_address: Address,
    pub destination_network: u32,
    pub destination_address: Address,
    pub amount: U256,
    pub metadata: Bytes,
}

impl ClaimAssetCall {
    /// Low 64 bits of the global index, the value stored as `deposit_count`
    pub fn masked_deposit_count(&self) -> u64 {
        (self.global_index & U256::from(DEPOSIT_COUNT_MASK)).as_u64()
    }
}

/// Unified bridge contract
#[derive(Debug, Clone, Copy)]
pub struct BridgeContract {
    pub address: Address,
}

impl BridgeContract {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    /// `bridgeAsset(...)` with `value` attached
    pub fn bridge_asset_request(&self, args: &BridgeAssetArgs, value: U256) -> Result<TxRequest, ChainError> {
        let data = abi::encode_call(
            abi::bridge()?,
            "bridgeAsset",
            &[
                Token::Uint(U256::from(args.destination_network)),
                Token::Address(args.destination_address),
                Token::Uint(args.amount),
                Token::Address(args.token),
                Token::Bool(args.force_update_global_exit_root),
                Token::Bytes(args.permit_data.to_vec()),
            ],
        )?;
        Ok(TxRequest::new(self.address, data).with_value(value))
    }

    /// Decode transaction input as `claimAsset`, None for any other call
    pub fn decode_claim_asset(input: &[u8]) -> Result<Option<ClaimAssetCall>, ChainError> {
        let tokens = match abi::decode_call(abi::bridge()?, "claimAsset", input)? {
            Some(tokens) => tokens,
            None => return Ok(None),
        };
        if tokens.len() != 11 {
            return Err(ChainError::Abi(format!("claimAsset: expected 11 arguments, got {}", tokens.len())));
        }

        let uint = |i: usize| tokens[i].clone().into_uint();
        let address = |i: usize| tokens[i].clone().into_address();
        let malformed = || ChainError::Abi("claimAsset: unexpected argument types".to_string());

        Ok(Some(ClaimAssetCall {
            global_index: uint(2).ok_or_else(malformed)?,
            origin_network: uint(5).ok_or_else(malformed)?.low_u32(),
            origin_token_address: address(6).ok_or_else(malformed)?,
            destination_network: uint(7).ok_or_else(malformed)?.low_u32(),
            destination_address: address(8).ok_or_else(malformed)?,
            amount: uint(9).ok_or_else(malformed)?,
            metadata: Bytes::from(tokens[10].clone().into_bytes().ok_or_else(malformed)?),
        }))
    }

    /// Deposit count from the first `BridgeEvent` log in a receipt.
    /// None when the log is missing or cannot be decoded.
    pub fn deposit_count_from_receipt(receipt: &TransactionReceipt) -> Option<u32> {
        let event = abi::bridge().ok().and_then(|bridge| abi::event(bridge, "BridgeEvent").ok())?;

        receipt.logs.iter().find_map(|log| {
            let decoded = abi::decode_log(event, log)?;
            decoded
                .params
                .into_iter()
                .find(|param| param.name == "depositCount")
                .and_then(|param| param.value.into_uint())
                .map(|count| count.low_u32())
        })
    }
}

/// Vault-bridge contract: native deposit + bridge in one transaction
#[derive(Debug, Clone, Copy)]
pub struct VaultBridgeContract {
    pub address: Address,
}

impl VaultBridgeContract {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    /// `depositGasTokenAndBridge(destination, network, force)` paying `amount`
    pub fn deposit_and_bridge_request(
        &self,
        destination_address: Address,
        destination_network: u32,
        force_update_global_exit_root: bool,
        amount: U256,
    ) -> Result<TxRequest, ChainError> {
        let data = abi::encode_call(
            abi::vault_bridge()?,
            "depositGasTokenAndBridge",
            &[
                Token::Address(destination_address),
                Token::Uint(U256::from(destination_network)),
                Token::Bool(force_update_global_exit_root),
            ],
        )?;
        Ok(TxRequest::new(self.address, data).with_value(amount))
    }
}

/// Arguments of `requestWithdraw`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestWithdrawArgs {
    pub amount: U256,
    pub destination_network: u32,
    pub destination_address: Address,
    pub token: Address,
    pub force_update_global_exit_root: bool,
    pub permit_data: Bytes,
}

/// Vault contract on the destination chain
#[derive(Clone)]
pub struct VaultContract {
    pub address: Address,
    reader: Arc<dyn ChainReader>,
}

impl VaultContract {
    pub fn new(address: Address, reader: Arc<dyn ChainReader>) -> Self {
        Self { address, reader }
    }

    async fn address_constant(&self, name: &str) -> Result<Address, ChainError> {
        let tokens = read(self.reader.as_ref(), self.address, abi::vault()?, name, &[]).await?;
        let value = first_address(tokens, name)?;
        debug!("{}.{} = {:?}", self.address, name, value);
        Ok(value)
    }

    pub async fn admin_address(&self) -> Result<Address, ChainError> {
        self.address_constant("ADMIN_ADDRESS").await
    }

    pub async fn vault_address(&self) -> Result<Address, ChainError> {
        self.address_constant("VAULT_ADDRESS").await
    }

    pub async fn weth_address(&self) -> Result<Address, ChainError> {
        self.address_constant("WETH_ADDRESS").await
    }

    pub async fn bridge_address(&self) -> Result<Address, ChainError> {
        self.address_constant("BRIDGE_ADDRESS").await
    }

    /// User's position in the vault (18 decimals)
    pub async fn check_balance(&self, user: Address) -> Result<U256, ChainError> {
        let tokens = read(
            self.reader.as_ref(),
            self.address,
            abi::vault()?,
            "checkBalance",
            &[Token::Address(user)],
        )
        .await?;
        first_uint(tokens, "checkBalance")
    }

    /// `requestWithdraw(...)`
    pub fn request_withdraw_request(&self, args: &RequestWithdrawArgs) -> Result<TxRequest, ChainError> {
        let data = abi::encode_call(
            abi::vault()?,
            "requestWithdraw",
            &[
                Token::Uint(args.amount),
                Token::Uint(U256::from(args.destination_network)),
                Token::Address(args.destination_address),
                Token::Address(args.token),
                Token::Bool(args.force_update_global_exit_root),
                Token::Bytes(args.permit_data.to_vec()),
            ],
        )?;
        Ok(TxRequest::new(self.address, data))
    }
}

/// Claim recipient contract that moves claimed funds into the vault
#[derive(Debug, Clone, Copy)]
pub struct PayoutContract {
    pub address: Address,
}

impl PayoutContract {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    pub fn wrap_eth_request(&self) -> Result<TxRequest, ChainError> {
        let data = abi::encode_call(abi::payout()?, "wrapEthToWeth", &[])?;
        Ok(TxRequest::new(self.address, data))
    }

    pub fn execute_to_vault_request(&self, amount: U256, user: Address) -> Result<TxRequest, ChainError> {
        let data = abi::encode_call(
            abi::payout()?,
            "executeToVault",
            &[Token::Uint(amount), Token::Address(user)],
        )?;
        Ok(TxRequest::new(self.address, data))
    }
}

/// Arguments of `claimAndRedeem`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimAndRedeemArgs {
    pub smt_proof_local_exit_root: [H256; 32],
    pub smt_proof_rollup_exit_root: [H256; 32],
    pub global_index: U256,
    pub mainnet_exit_root: H256,
    pub rollup_exit_root: H256,
    pub destination_address: Address,
    pub amount: U256,
    pub origin_token_address: Address,
    pub metadata: Bytes,
}

/// Contract exposing the operator's `claimAndRedeem`
#[derive(Debug, Clone, Copy)]
pub struct BankContract {
    pub address: Address,
}

impl BankContract {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    pub fn claim_and_redeem_request(&self, args: &ClaimAndRedeemArgs) -> Result<TxRequest, ChainError> {
        let data = abi::encode_call(
            abi::bank()?,
            "claimAndRedeem",
            &[
                proof_token(&args.smt_proof_local_exit_root),
                proof_token(&args.smt_proof_rollup_exit_root),
                Token::Uint(args.global_index),
                Token::FixedBytes(args.mainnet_exit_root.as_bytes().to_vec()),
                Token::FixedBytes(args.rollup_exit_root.as_bytes().to_vec()),
                Token::Address(args.destination_address),
                Token::Uint(args.amount),
                Token::Address(args.origin_token_address),
                Token::Bytes(args.metadata.to_vec()),
            ],
        )?;
        Ok(TxRequest::new(self.address, data))
    }
}
