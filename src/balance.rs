//! Balance Reader
//!
//! Reads native, ERC-20 and vault balances for one wallet. Every field of a
//! snapshot is read concurrently and fails on its own: a broken token
//! contract never hides the native balance.

use std::sync::Arc;

use ethers::types::{Address, U256};
use ethers::utils::format_units;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::chain::{ChainError, ChainReader};
use crate::contracts::{Erc20Token, VaultContract};

/// Decimals of the native asset and of vault positions
pub const NATIVE_DECIMALS: u8 = 18;

/// Balance in three forms
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    /// Base units, decimal string
    pub value: String,
    pub decimals: u8,
    /// `value / 10^decimals`, full precision
    pub formatted: String,
    /// `value / 10^decimals` as a float, for display only
    pub numeric: f64,
}

impl TokenBalance {
    pub fn new(value: U256, decimals: u8) -> Result<Self, ChainError> {
        let formatted = format_units(value, decimals as u32)
            .map_err(|e| ChainError::Abi(format!("Failed to format {} with {} decimals: {}", value, decimals, e)))?;
        let numeric = formatted.parse::<f64>().unwrap_or(0.0);

        Ok(Self {
            value: value.to_string(),
            decimals,
            formatted,
            numeric,
        })
    }
}

/// Kết quả đọc một trường: thành công hoặc lỗi riêng
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldState<T> {
    Ready(T),
    Failed(String),
}

impl<T> FieldState<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, FieldState::Ready(_))
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            FieldState::Ready(value) => Some(value),
            FieldState::Failed(_) => None,
        }
    }
}

impl<T> From<Result<T, ChainError>> for FieldState<T> {
    fn from(result: Result<T, ChainError>) -> Self {
        match result {
            Ok(value) => FieldState::Ready(value),
            Err(e) => FieldState::Failed(e.to_string()),
        }
    }
}

/// An ERC-20 whose balance is part of every snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedToken {
    pub symbol: String,
    pub address: Address,
}

impl TrackedToken {
    pub fn new(symbol: &str, address: Address) -> Self {
        Self {
            symbol: symbol.to_string(),
            address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSnapshot {
    pub symbol: String,
    pub token_address: String,
    pub balance: FieldState<TokenBalance>,
}

/// Everything the dashboard shows for a wallet
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    pub address: String,
    pub native: FieldState<TokenBalance>,
    pub tokens: Vec<TokenSnapshot>,
    /// None when no vault is configured
    pub vault_position: Option<FieldState<TokenBalance>>,
}

/// Đọc số dư của ví trên source chain và vị thế trong vault
pub struct BalanceReader {
    reader: Arc<dyn ChainReader>,
    tokens: Vec<TrackedToken>,
    vault: Option<VaultContract>,
}

impl BalanceReader {
    pub fn new(reader: Arc<dyn ChainReader>, tokens: Vec<TrackedToken>) -> Self {
        Self {
            reader,
            tokens,
            vault: None,
        }
    }

    /// Also read the wallet's vault position (destination chain)
    pub fn with_vault(mut self, vault: VaultContract) -> Self {
        self.vault = Some(vault);
        self
    }

    pub async fn native_balance(&self, owner: Address) -> Result<TokenBalance, ChainError> {
        let value = self.reader.native_balance(owner).await?;
        TokenBalance::new(value, NATIVE_DECIMALS)
    }

    /// `decimals` and `balanceOf` are read concurrently
    pub async fn token_balance(&self, token: Address, owner: Address) -> Result<TokenBalance, ChainError> {
        let contract = Erc20Token::new(token, self.reader.clone());
        let (decimals, value) = futures::try_join!(contract.decimals(), contract.balance_of(owner))?;
        TokenBalance::new(value, decimals)
    }

    pub async fn vault_position(&self, owner: Address) -> Option<Result<TokenBalance, ChainError>> {
        let vault = self.vault.as_ref()?;
        Some(
            vault
                .check_balance(owner)
                .await
                .and_then(|value| TokenBalance::new(value, NATIVE_DECIMALS)),
        )
    }

    /// Read every field at once
    pub async fn snapshot(&self, owner: Address) -> BalanceSnapshot {
        let token_reads = join_all(
            self.tokens
                .iter()
                .map(|token| self.token_balance(token.address, owner)),
        );

        let (native, token_results, vault_position) =
            futures::join!(self.native_balance(owner), token_reads, self.vault_position(owner));

        let tokens = self
            .tokens
            .iter()
            .zip(token_results)
            .map(|(token, result)| {
                if let Err(e) = &result {
                    warn!("Failed to read {} balance of {:?}: {}", token.symbol, owner, e);
                }
                TokenSnapshot {
                    symbol: token.symbol.clone(),
                    token_address: format!("{:?}", token.address),
                    balance: result.into(),
                }
            })
            .collect();

        if let Err(e) = &native {
            warn!("Failed to read native balance of {:?}: {}", owner, e);
        }
        debug!("Balance snapshot for {:?} done", owner);

        BalanceSnapshot {
            address: format!("{:?}", owner),
            native: native.into(),
            tokens,
            vault_position: vault_position.map(FieldState::from),
        }
    }
}
